//! Object storage for PDF bytes and cropped exercise images.
//!
//! Blobs are written before the row that references them, so an aborted
//! transaction can leave unreferenced blobs behind. They are harmless and
//! collected outside this crate.

use std::path::{Component, Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Vec<u8>>;
    async fn exists(&self, key: &str) -> Result<bool>;
}

pub fn pdf_key(sha256: &str) -> String {
    format!("pdf-files/{}.pdf", sha256)
}

pub fn exercise_image_key(page_extraction_id: i64, local_identifier: &str) -> String {
    format!("exercise-images/{}/{}.png", page_extraction_id, local_identifier)
}

/// Blobs as files under a root directory.
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_of(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        if key.is_empty()
            || !relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)))
        {
            bail!("Invalid blob key '{}'", key);
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_of(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        // Write-then-rename so readers never see a partial blob.
        let partial = path.with_extension("partial");
        tokio::fs::write(&partial, bytes)
            .await
            .with_context(|| format!("Failed to write {}", partial.display()))?;
        tokio::fs::rename(&partial, &path)
            .await
            .with_context(|| format!("Failed to move blob into {}", path.display()))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path_of(key)?;
        tokio::fs::read(&path)
            .await
            .with_context(|| format!("Blob '{}' not readable at {}", key, path.display()))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let path = self.path_of(key)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn put_then_get() {
        let tmp = TempDir::new().unwrap();
        let store = LocalBlobStore::new(tmp.path());
        let key = exercise_image_key(3, "p1c0");

        assert!(!store.exists(&key).await.unwrap());
        store.put(&key, b"png bytes").await.unwrap();
        assert!(store.exists(&key).await.unwrap());
        assert_eq!(store.get(&key).await.unwrap(), b"png bytes");
        assert!(tmp.path().join("exercise-images/3/p1c0.png").is_file());
    }

    #[tokio::test]
    async fn rejects_keys_escaping_the_root() {
        let tmp = TempDir::new().unwrap();
        let store = LocalBlobStore::new(tmp.path());
        assert!(store.put("../outside", b"x").await.is_err());
        assert!(store.put("/etc/passwd", b"x").await.is_err());
        assert!(store.get("").await.is_err());
    }
}
