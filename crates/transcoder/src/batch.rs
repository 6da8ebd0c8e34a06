//! Batch orchestration for media-squeeze
//!
//! Provisions the library roots, walks the catalog and hands every candidate
//! to the bitrate gate and the job runner, strictly one item at a time.

use crate::bitrate_gate::{BitrateGate, GateDecision};
use crate::catalog::{CatalogKind, CatalogWalker, MediaItem};
use crate::config::{Config, ConfigError};
use crate::encode::{Encoder, FfmpegEncoder};
use crate::filter::{BitrateFlags, FilterError, NameFilter};
use crate::job_runner::{JobOutcome, JobRunner, RunnerSettings};
use crate::probe::{FfprobeProbe, MediaProbe};
use crate::progress::{IndicatifSink, ProgressSink};
use crate::report::format_size;
use crate::startup::StartupError;
use crate::storage::{provider_for, StorageError, StorageProvider};
use log::{error, info, warn};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Error type for a whole run
#[derive(Debug, Error)]
pub enum BatchError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Invalid filter or bitrate flags
    #[error("Configuration error: {0}")]
    Filter(#[from] FilterError),

    /// Startup check failed
    #[error("Startup check failed: {0}")]
    Startup(#[from] StartupError),

    /// Library roots could not be provisioned
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl BatchError {
    /// Errors caused by what the user asked for or configured, as opposed to
    /// an environment failure such as a share that would not mount.
    ///
    /// Startup checks count as configuration: the tool paths come from the
    /// configuration file.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            BatchError::Config(_)
                | BatchError::Filter(_)
                | BatchError::Startup(_)
                | BatchError::Storage(StorageError::NotConfigured { .. })
        )
    }
}

/// What to process in one run
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub kind: CatalogKind,
    pub filter: NameFilter,
    pub bitrate: BitrateFlags,
}

/// Per-run tally of item outcomes
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchSummary {
    pub completed: usize,
    pub already_done: usize,
    pub skipped: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Items whose bitrate was only displayed
    pub shown: usize,
    pub bytes_saved: u64,
}

impl BatchSummary {
    pub fn was_cancelled(&self) -> bool {
        self.cancelled > 0
    }

    fn record(&mut self, outcome: &JobOutcome) {
        match outcome {
            JobOutcome::AlreadyDone => self.already_done += 1,
            JobOutcome::Skipped(_) => self.skipped += 1,
            JobOutcome::Completed(report) => {
                self.completed += 1;
                self.bytes_saved += report.saved_bytes();
            }
            JobOutcome::Cancelled => self.cancelled += 1,
            JobOutcome::Failed(_) => self.failed += 1,
        }
    }

    /// One-line tally of every outcome.
    pub fn summary_line(&self) -> String {
        format!(
            "Summary: {} completed, {} already done, {} skipped, {} failed, {} cancelled, {} shown, {} saved",
            self.completed,
            self.already_done,
            self.skipped,
            self.failed,
            self.cancelled,
            self.shown,
            format_size(self.bytes_saved)
        )
    }

    pub fn log(&self) {
        info!("{}", self.summary_line());
    }
}

/// Sequential batch loop over catalog items
pub struct Orchestrator {
    probe: Arc<dyn MediaProbe>,
    gate: BitrateGate,
    runner: JobRunner,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        probe: Arc<dyn MediaProbe>,
        gate: BitrateGate,
        runner: JobRunner,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            probe,
            gate,
            runner,
            cancel,
        }
    }

    /// Walks `input_root` and processes every accepted item.
    pub async fn run_catalog(
        &self,
        input_root: &Path,
        kind: CatalogKind,
        filter: NameFilter,
    ) -> BatchSummary {
        let walker = CatalogWalker::new(input_root, kind, filter, self.cancel.clone());
        let summary = self.run_items(walker).await;

        if !summary.was_cancelled() && !self.cancel.is_cancelled() {
            info!("All {} have been fully compressed.", kind.as_str());
        }
        summary.log();
        summary
    }

    /// Processes items in order until they run out or a cancellation halts the batch.
    pub async fn run_items<I>(&self, items: I) -> BatchSummary
    where
        I: IntoIterator<Item = MediaItem>,
    {
        let mut summary = BatchSummary::default();

        for item in items {
            if self.cancel.is_cancelled() {
                break;
            }

            let outcome = match self.process(&item).await {
                Some(outcome) => outcome,
                None => {
                    summary.shown += 1;
                    continue;
                }
            };

            if let JobOutcome::Failed(e) = &outcome {
                error!("{}: {}", item.source_path().display(), e);
            }
            summary.record(&outcome);

            if matches!(outcome, JobOutcome::Cancelled) {
                break;
            }
        }

        summary
    }

    /// `None` when the item was only inspected (bitrate display).
    async fn process(&self, item: &MediaItem) -> Option<JobOutcome> {
        let source = item.source_path();

        if self.runner.is_done(item) && !self.gate.show_only() {
            return Some(JobOutcome::AlreadyDone);
        }

        let (decision, probed) = self.gate.decide_probed(self.probe.as_ref(), source).await;
        match decision {
            GateDecision::ShowOnly(measured) => {
                let name = source
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| item.display_name().to_string());
                match measured {
                    Some(mbps) => println!("{}: {:.2} Mbps", name, mbps),
                    None => println!("{}: unknown", name),
                }
                None
            }
            GateDecision::Skip { measured_mbps } => {
                info!(
                    "Skipping {}: bitrate {:.2} Mbps is below the filter",
                    source.display(),
                    measured_mbps
                );
                Some(JobOutcome::Skipped(format!(
                    "bitrate {:.2} Mbps below filter",
                    measured_mbps
                )))
            }
            GateDecision::Proceed { target_bitrate } => {
                Some(self.runner.run_probed(item, target_bitrate, probed).await)
            }
        }
    }
}

/// Provisions storage, runs the batch with the ffmpeg collaborators and
/// releases storage again, whatever the outcome.
pub async fn run_library(
    config: &Config,
    options: RunOptions,
    cancel: CancellationToken,
) -> Result<BatchSummary, BatchError> {
    options.bitrate.validate()?;

    let storage = provider_for(&config.storage, options.kind)?;
    let input_root = storage.provision_input().await?;

    let output_root = match storage.provision_output().await {
        Ok(root) => root,
        Err(e) => {
            release(storage.as_ref(), &input_root).await;
            return Err(e.into());
        }
    };

    let probe: Arc<dyn MediaProbe> = Arc::new(FfprobeProbe::new(&config.encoder.ffprobe_bin));
    let encoder: Arc<dyn Encoder> = Arc::new(FfmpegEncoder::new(
        &config.encoder.ffmpeg_bin,
        config.encoder.video_codec.clone(),
        config.encoder.max_height,
    ));
    let sink: Arc<dyn ProgressSink> = Arc::new(IndicatifSink::new());

    let runner = JobRunner::new(
        Arc::clone(&probe),
        encoder,
        sink,
        RunnerSettings::from_config(config),
        output_root.clone(),
        cancel.clone(),
    );
    let orchestrator = Orchestrator::new(probe, BitrateGate::new(options.bitrate), runner, cancel);

    let summary = orchestrator
        .run_catalog(&input_root, options.kind, options.filter)
        .await;

    release(storage.as_ref(), &output_root).await;
    release(storage.as_ref(), &input_root).await;

    Ok(summary)
}

async fn release(storage: &dyn StorageProvider, root: &Path) {
    if let Err(e) = storage.release(root).await {
        warn!("Failed to release {}: {}", root.display(), e);
    }
}
