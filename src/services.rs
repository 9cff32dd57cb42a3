use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::blobs::{BlobStore, LocalBlobStore};
use crate::classifier::LazyClassifier;
use crate::config::Config;
use crate::llm::LlmClient;
use crate::pdf::{PageRasterizer, PdfCache, PdftoppmRasterizer};
use crate::vision::{CommandDetector, ImageDetector, NoImages};

/// Everything the pipeline stages call out to.
///
/// Owned by whoever drives the stages (the daemon, or a test) and passed
/// down by reference; the PDF cache and the classifier keep their state
/// across ticks.
pub struct Services {
    pub llm: LlmClient,
    pub blobs: Arc<dyn BlobStore>,
    pub pdf_cache: PdfCache,
    pub rasterizer: Box<dyn PageRasterizer>,
    pub detector: Box<dyn ImageDetector>,
    pub classifier: LazyClassifier,
    pub dpi: u32,
}

impl Services {
    pub fn from_config(config: &Config) -> Result<Self> {
        let extraction = &config.extraction;
        let detector: Box<dyn ImageDetector> = match extraction.detector.as_str() {
            "none" => Box::new(NoImages),
            "command" => Box::new(CommandDetector::new(
                extraction
                    .detector_command
                    .as_deref()
                    .context("extraction.detector_command is not set")?,
            )),
            other => bail!("Unknown image detector: '{}'", other),
        };

        Ok(Self {
            llm: LlmClient::from_config(&config.llm)?,
            blobs: Arc::new(LocalBlobStore::new(&config.storage.root)),
            pdf_cache: PdfCache::new(
                extraction.pdf_cache_capacity,
                Duration::from_secs(extraction.pdf_cache_ttl_secs),
            ),
            rasterizer: Box::new(PdftoppmRasterizer::new(extraction.renderer.clone())),
            detector,
            classifier: LazyClassifier::new(config.classification.clone()),
            dpi: extraction.dpi,
        })
    }
}
