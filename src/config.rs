//! TOML configuration.
//!
//! ```toml
//! [db]
//! path = "./data/patty.sqlite"
//!
//! [storage]
//! root = "./data/blobs"
//!
//! [daemon]
//! extraction_parallelism = 1
//! classification_parallelism = 20
//! adaptation_parallelism = 1
//! pause_secs = 1.0
//! pulse_url = "https://monitoring.example.com/ping/patty"
//!
//! [extraction]
//! renderer = "pdftoppm"
//! dpi = 300
//! detector = "none"
//!
//! [classification]
//! classifier = "keyword"
//!
//! [llm.dummy]
//! sleep_ms = 0
//!
//! [llm.openai]
//! timeout_secs = 120
//!
//! [llm.mistral]
//! recursion = "unfold"
//! unfold_depth = 3
//! ```
//!
//! Only `[db]` and `[storage]` are required.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub classification: ClassificationConfig,
    #[serde(default)]
    pub llm: LlmConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Directory of the local blob store (PDFs, image crops).
    pub root: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DaemonConfig {
    #[serde(default = "default_extraction_parallelism")]
    pub extraction_parallelism: usize,
    #[serde(default = "default_classification_parallelism")]
    pub classification_parallelism: usize,
    #[serde(default = "default_adaptation_parallelism")]
    pub adaptation_parallelism: usize,
    #[serde(default = "default_pause_secs")]
    pub pause_secs: f64,
    #[serde(default)]
    pub pulse_url: Option<String>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            extraction_parallelism: default_extraction_parallelism(),
            classification_parallelism: default_classification_parallelism(),
            adaptation_parallelism: default_adaptation_parallelism(),
            pause_secs: default_pause_secs(),
            pulse_url: None,
        }
    }
}

fn default_extraction_parallelism() -> usize {
    1
}
fn default_classification_parallelism() -> usize {
    20
}
fn default_adaptation_parallelism() -> usize {
    1
}
fn default_pause_secs() -> f64 {
    1.0
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractionConfig {
    #[serde(default = "default_renderer")]
    pub renderer: String,
    #[serde(default = "default_dpi")]
    pub dpi: u32,
    #[serde(default = "default_pdf_cache_capacity")]
    pub pdf_cache_capacity: usize,
    #[serde(default = "default_pdf_cache_ttl_secs")]
    pub pdf_cache_ttl_secs: u64,
    /// `none` or `command`.
    #[serde(default = "default_detector")]
    pub detector: String,
    #[serde(default)]
    pub detector_command: Option<String>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            renderer: default_renderer(),
            dpi: default_dpi(),
            pdf_cache_capacity: default_pdf_cache_capacity(),
            pdf_cache_ttl_secs: default_pdf_cache_ttl_secs(),
            detector: default_detector(),
            detector_command: None,
        }
    }
}

fn default_renderer() -> String {
    "pdftoppm".to_string()
}
fn default_dpi() -> u32 {
    300
}
fn default_pdf_cache_capacity() -> usize {
    5
}
fn default_pdf_cache_ttl_secs() -> u64 {
    3600
}
fn default_detector() -> String {
    "none".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClassificationConfig {
    /// `keyword` or `command`.
    #[serde(default = "default_classifier")]
    pub classifier: String,
    #[serde(default)]
    pub command: Option<String>,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            classifier: default_classifier(),
            command: None,
        }
    }
}

fn default_classifier() -> String {
    "keyword".to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LlmConfig {
    #[serde(default)]
    pub dummy: DummyConfig,
    #[serde(default)]
    pub openai: Option<ProviderConfig>,
    #[serde(default)]
    pub mistral: Option<ProviderConfig>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct DummyConfig {
    #[serde(default)]
    pub sleep_ms: u64,
    #[serde(default)]
    pub jitter_ms: u64,
    #[serde(default)]
    pub seed: u64,
}

/// How recursive component definitions are sent to a provider.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RecursionMode {
    Refs,
    Unfold,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    /// Defaults per provider: `refs` for OpenAI, `unfold` for Mistral.
    #[serde(default)]
    pub recursion: Option<RecursionMode>,
    #[serde(default = "default_unfold_depth")]
    pub unfold_depth: usize,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_secs: default_llm_timeout_secs(),
            recursion: None,
            unfold_depth: default_unfold_depth(),
        }
    }
}

fn default_llm_timeout_secs() -> u64 {
    120
}
fn default_unfold_depth() -> usize {
    3
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    let daemon = &config.daemon;
    if daemon.extraction_parallelism == 0 {
        anyhow::bail!("daemon.extraction_parallelism must be >= 1");
    }
    if daemon.classification_parallelism == 0 {
        anyhow::bail!("daemon.classification_parallelism must be >= 1");
    }
    if daemon.adaptation_parallelism == 0 {
        anyhow::bail!("daemon.adaptation_parallelism must be >= 1");
    }
    if !daemon.pause_secs.is_finite() || daemon.pause_secs < 0.0 {
        anyhow::bail!("daemon.pause_secs must be a non-negative number");
    }

    let extraction = &config.extraction;
    if extraction.dpi == 0 {
        anyhow::bail!("extraction.dpi must be > 0");
    }
    if extraction.pdf_cache_capacity < 5 {
        anyhow::bail!("extraction.pdf_cache_capacity must be >= 5");
    }
    if extraction.pdf_cache_ttl_secs < 3600 {
        anyhow::bail!("extraction.pdf_cache_ttl_secs must be >= 3600");
    }
    match extraction.detector.as_str() {
        "none" => {}
        "command" => {
            if extraction.detector_command.is_none() {
                anyhow::bail!("extraction.detector_command must be set when detector is 'command'");
            }
        }
        other => anyhow::bail!(
            "Unknown image detector: '{}'. Must be none or command.",
            other
        ),
    }

    match config.classification.classifier.as_str() {
        "keyword" => {}
        "command" => {
            if config.classification.command.is_none() {
                anyhow::bail!("classification.command must be set when classifier is 'command'");
            }
        }
        other => anyhow::bail!(
            "Unknown classifier: '{}'. Must be keyword or command.",
            other
        ),
    }

    for (name, provider) in [
        ("openai", &config.llm.openai),
        ("mistral", &config.llm.mistral),
    ] {
        if let Some(provider) = provider {
            if provider.timeout_secs == 0 {
                anyhow::bail!("llm.{}.timeout_secs must be > 0", name);
            }
        }
    }

    Ok(())
}
