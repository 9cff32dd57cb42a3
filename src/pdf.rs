//! PDF storage, caching and rasterization.
//!
//! PDFs are content-addressed by SHA-256. The extraction stage reads them
//! through [`PdfCache`] and renders single pages with a [`PageRasterizer`];
//! the production rasterizer shells out to `pdftoppm`.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use sqlx::SqliteConnection;
use tokio::process::Command;
use tracing::debug;

use crate::blobs::{pdf_key, BlobStore};
use crate::models::PdfFile;
use crate::store;
use crate::subprocess::run_piped;

const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";

struct CachedPdf {
    bytes: Arc<Vec<u8>>,
    loaded_at: Instant,
    last_used: Instant,
}

/// Process-local TTL cache of PDF bytes keyed by SHA-256.
///
/// Entries older than `ttl` are reloaded; when full, the least recently
/// used entry is evicted.
pub struct PdfCache {
    capacity: usize,
    ttl: Duration,
    entries: HashMap<String, CachedPdf>,
}

impl PdfCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            ttl,
            entries: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub async fn get_or_load(
        &mut self,
        sha256: &str,
        blobs: &dyn BlobStore,
    ) -> Result<Arc<Vec<u8>>> {
        let now = Instant::now();
        let ttl = self.ttl;
        self.entries
            .retain(|_, entry| now.duration_since(entry.loaded_at) < ttl);

        if let Some(entry) = self.entries.get_mut(sha256) {
            entry.last_used = now;
            return Ok(entry.bytes.clone());
        }

        debug!(sha256, "Loading PDF from blob store");
        let bytes = Arc::new(
            blobs
                .get(&pdf_key(sha256))
                .await
                .with_context(|| format!("PDF {} missing from blob store", sha256))?,
        );

        if self.entries.len() >= self.capacity {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(key, _)| key.clone());
            if let Some(key) = oldest {
                self.entries.remove(&key);
            }
        }
        self.entries.insert(
            sha256.to_string(),
            CachedPdf {
                bytes: bytes.clone(),
                loaded_at: now,
                last_used: now,
            },
        );
        Ok(bytes)
    }
}

/// Renders one 1-indexed page of a PDF to PNG bytes.
#[async_trait]
pub trait PageRasterizer: Send + Sync {
    async fn rasterize(&self, pdf: &[u8], page_number: i64, dpi: u32) -> Result<Vec<u8>>;
}

/// `pdftoppm -f N -l N -r DPI -png -` with the PDF on stdin.
pub struct PdftoppmRasterizer {
    program: String,
}

impl PdftoppmRasterizer {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl PageRasterizer for PdftoppmRasterizer {
    async fn rasterize(&self, pdf: &[u8], page_number: i64, dpi: u32) -> Result<Vec<u8>> {
        let page = page_number.to_string();
        let mut command = Command::new(&self.program);
        command.args(["-f", &page, "-l", &page, "-r", &dpi.to_string(), "-png", "-"]);

        let what = format!("{} (page {})", self.program, page_number);
        let png = run_piped(command, pdf.to_vec(), &what).await?;
        if !png.starts_with(PNG_MAGIC) {
            bail!("{} produced no PNG", what);
        }
        Ok(png)
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

pub fn count_pages(bytes: &[u8]) -> Result<i64> {
    let document = lopdf::Document::load_mem(bytes).context("Not a readable PDF")?;
    Ok(document.get_pages().len() as i64)
}

/// Store a PDF's bytes (blob first) and register it, or record another
/// file name for an already-known PDF.
pub async fn upload_pdf(
    conn: &mut SqliteConnection,
    blobs: &dyn BlobStore,
    path: &Path,
) -> Result<PdfFile> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .with_context(|| format!("No file name in {}", path.display()))?;

    let pages_count = count_pages(&bytes)?;
    if pages_count == 0 {
        bail!("{} has no pages", path.display());
    }
    let sha256 = sha256_hex(&bytes);

    let key = pdf_key(&sha256);
    if !blobs.exists(&key).await? {
        blobs.put(&key, &bytes).await?;
    }

    store::pdfs::upsert_pdf_file(conn, &sha256, bytes.len() as i64, pages_count, &file_name).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blobs::LocalBlobStore;
    use tempfile::TempDir;

    #[tokio::test]
    async fn cache_hits_until_capacity() {
        let tmp = TempDir::new().unwrap();
        let blobs = LocalBlobStore::new(tmp.path());
        for sha in ["a", "b", "c"] {
            blobs.put(&pdf_key(sha), sha.as_bytes()).await.unwrap();
        }

        let mut cache = PdfCache::new(2, Duration::from_secs(3600));
        assert_eq!(*cache.get_or_load("a", &blobs).await.unwrap(), b"a".to_vec());
        assert_eq!(*cache.get_or_load("b", &blobs).await.unwrap(), b"b".to_vec());
        // Touch "a" so "b" is the least recently used.
        cache.get_or_load("a", &blobs).await.unwrap();
        cache.get_or_load("c", &blobs).await.unwrap();
        assert_eq!(cache.len(), 2);

        // "b" was evicted: deleting its blob makes a reload fail.
        tokio::fs::remove_file(tmp.path().join("pdf-files/b.pdf"))
            .await
            .unwrap();
        assert!(cache.get_or_load("b", &blobs).await.is_err());
        assert!(cache.get_or_load("a", &blobs).await.is_ok());
    }

    #[tokio::test]
    async fn expired_entries_are_reloaded() {
        let tmp = TempDir::new().unwrap();
        let blobs = LocalBlobStore::new(tmp.path());
        blobs.put(&pdf_key("a"), b"old").await.unwrap();

        let mut cache = PdfCache::new(5, Duration::ZERO);
        assert_eq!(*cache.get_or_load("a", &blobs).await.unwrap(), b"old".to_vec());
        blobs.put(&pdf_key("a"), b"new").await.unwrap();
        assert_eq!(*cache.get_or_load("a", &blobs).await.unwrap(), b"new".to_vec());
    }

    #[test]
    fn sha256_is_lowercase_hex() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn garbage_is_not_a_pdf() {
        assert!(count_pages(b"not a pdf").is_err());
    }
}
