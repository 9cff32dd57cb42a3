//! # Submission daemon
//!
//! Drives the pipeline stages. Each tick runs inside one transaction and
//! drains at most one stage, in strict priority order:
//!
//! 1. extraction, up to `extraction_parallelism` pages;
//! 2. otherwise classification of the oldest pending chunk;
//! 3. otherwise adaptation, up to `adaptation_parallelism` rows.
//!
//! A failing tick is logged and rolled back; the loop continues. A liveness
//! pulse is sent to the configured URL at most once a minute, measured on a
//! monotonic clock. Ctrl-C drops the in-flight tick, which rolls its
//! transaction back, and exits cleanly.

use std::future::Future;
use std::time::{Duration, Instant};

use anyhow::Result;
use sqlx::SqlitePool;
use tracing::{debug, error, info, warn};

use crate::adaptation::submit_adaptations;
use crate::classification::submit_classifications;
use crate::config::{Config, DaemonConfig};
use crate::db;
use crate::extraction::submit_extractions;
use crate::migrate;
use crate::services::Services;

const PULSE_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq)]
pub struct DaemonOptions {
    pub extraction_parallelism: usize,
    pub classification_parallelism: usize,
    pub adaptation_parallelism: usize,
    pub pause: Duration,
    pub pulse_url: Option<String>,
}

impl DaemonOptions {
    pub fn from_config(config: &DaemonConfig) -> Self {
        Self {
            extraction_parallelism: config.extraction_parallelism,
            classification_parallelism: config.classification_parallelism,
            adaptation_parallelism: config.adaptation_parallelism,
            pause: Duration::from_secs_f64(config.pause_secs),
            pulse_url: config.pulse_url.clone(),
        }
    }
}

/// Which stage a tick drained, with the ids it worked on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Extraction(Vec<i64>),
    Classification(Vec<i64>),
    Adaptation(Vec<i64>),
    Idle,
}

fn log_work_items(stage: &str, ids: &[i64]) {
    let listed = ids
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(" ");
    if ids.is_empty() {
        debug!("Found 0 {} work items: {}", stage, listed);
    } else {
        info!("Found {} {} work items: {}", ids.len(), stage, listed);
    }
}

/// Run one tick: drain the first stage with work, then commit.
pub async fn tick(
    pool: &SqlitePool,
    services: &mut Services,
    options: &DaemonOptions,
) -> Result<TickOutcome> {
    let mut tx = pool.begin().await?;

    let ids = submit_extractions(&mut tx, services, options.extraction_parallelism).await?;
    log_work_items("extraction", &ids);
    let outcome = if !ids.is_empty() {
        TickOutcome::Extraction(ids)
    } else {
        let ids =
            submit_classifications(&mut tx, services, options.classification_parallelism).await?;
        log_work_items("classification", &ids);
        if !ids.is_empty() {
            TickOutcome::Classification(ids)
        } else {
            let ids =
                submit_adaptations(&mut tx, &services.llm, options.adaptation_parallelism).await?;
            log_work_items("adaptation", &ids);
            if ids.is_empty() {
                TickOutcome::Idle
            } else {
                TickOutcome::Adaptation(ids)
            }
        }
    };

    tx.commit().await?;
    Ok(outcome)
}

/// Tells an external monitor the daemon is alive.
struct Pulse {
    url: Option<String>,
    client: reqwest::Client,
    last: Option<Instant>,
}

impl Pulse {
    fn new(url: Option<String>) -> Result<Self> {
        Ok(Self {
            url,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()?,
            last: None,
        })
    }

    async fn maybe_send(&mut self) {
        let Some(url) = &self.url else {
            return;
        };
        if self.last.is_some_and(|last| last.elapsed() < PULSE_INTERVAL) {
            return;
        }
        self.last = Some(Instant::now());
        match self.client.get(url).send().await {
            Ok(response) if response.status().is_success() => debug!("Pulse sent"),
            Ok(response) => warn!(status = %response.status(), "Pulse rejected"),
            Err(e) => warn!("Pulse failed: {}", e),
        }
    }
}

/// Tick until `shutdown` resolves.
pub async fn run_until<F>(
    pool: &SqlitePool,
    services: &mut Services,
    options: &DaemonOptions,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()>,
{
    let mut pulse = Pulse::new(options.pulse_url.clone())?;
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            result = tick(pool, services, options) => {
                if let Err(e) = result {
                    error!("Tick failed: {:?}", e);
                }
            }
        }

        pulse.maybe_send().await;

        info!("Sleeping for {}s...", options.pause.as_secs_f64());
        tokio::select! {
            _ = &mut shutdown => break,
            _ = tokio::time::sleep(options.pause) => {}
        }
    }

    info!("Shutting down");
    Ok(())
}

/// Entry point of `patty run-submission-daemon`.
pub async fn run_submission_daemon(config: &Config, options: DaemonOptions) -> Result<()> {
    info!("Starting");
    let pool = db::connect(config).await?;
    migrate::apply(&pool).await?;
    let mut services = Services::from_config(config)?;

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };
    run_until(&pool, &mut services, &options, shutdown).await?;

    pool.close().await;
    Ok(())
}
