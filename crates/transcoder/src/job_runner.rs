//! Job runner module for media-squeeze
//!
//! Drives one encode at a time through its lifecycle:
//! Pending -> Running -> Completed | Cancelled | Failed.
//!
//! The runner owns the output bookkeeping. A job that does not complete leaves
//! neither its partial output nor any directory it created behind.

use crate::catalog::{MediaItem, MediaKind};
use crate::cleanup::{create_output_dirs, discard_output, CreatedDirs};
use crate::config::Config;
use crate::encode::{EncodeError, EncodeOutcome, EncodeProcess, EncodeRequest, Encoder, Quality};
use crate::probe::{Dimensions, MediaProbe, ProbeResult};
use crate::progress::{ProgressMonitor, ProgressSink};
use crate::report::{format_elapsed, format_media_duration, SizeReport};
use log::{debug, info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Error type for a failed job
#[derive(Debug, Error)]
pub enum JobError {
    /// Encoding failed
    #[error("Encode failed: {0}")]
    Encode(#[from] EncodeError),

    /// Could not read the source file
    #[error("Failed to read source {path}: {source}")]
    Source {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not create the output directories
    #[error("Failed to create output directories for {path}: {source}")]
    OutputDirs {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Job state representing the current stage of an encode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Job constructed, output path computed
    Pending,
    /// Encoder process started
    Running,
    /// Encoder exited successfully and the output exists
    Completed,
    /// Cancelled while running; output and created directories removed
    Cancelled,
    /// Encoder failed; output and created directories removed
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &str {
        match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Cancelled => "cancelled",
            JobState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Cancelled | JobState::Failed)
    }
}

/// Runtime record for one transcode attempt
#[derive(Debug)]
pub struct EncodeJob {
    id: Uuid,
    item: MediaItem,
    output_path: PathBuf,
    target_bitrate: Option<f64>,
    state: JobState,
    original_size: u64,
    final_size: Option<u64>,
    created_dirs: CreatedDirs,
}

impl EncodeJob {
    fn new(
        item: MediaItem,
        output_path: PathBuf,
        target_bitrate: Option<f64>,
        original_size: u64,
        created_dirs: CreatedDirs,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            item,
            output_path,
            target_bitrate,
            state: JobState::Pending,
            original_size,
            final_size: None,
            created_dirs,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn item(&self) -> &MediaItem {
        &self.item
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn original_size(&self) -> u64 {
        self.original_size
    }

    pub fn final_size(&self) -> Option<u64> {
        self.final_size
    }

    fn transition(&mut self, next: JobState) {
        debug_assert!(!self.state.is_terminal(), "job {} already settled", self.id);
        debug!(
            "Job {} {} -> {}",
            self.id,
            self.state.as_str(),
            next.as_str()
        );
        self.state = next;
    }

    /// Removes the partial output and prunes the directories this job created.
    fn discard(&self) {
        discard_output(&self.output_path, &self.created_dirs);
    }
}

/// Result of handing one item to the runner
#[derive(Debug)]
pub enum JobOutcome {
    /// Output already exists; no job was created
    AlreadyDone,
    /// Item could not be attempted (e.g. unknown duration)
    Skipped(String),
    Completed(SizeReport),
    Cancelled,
    Failed(JobError),
}

/// Knobs the runner takes from configuration
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub quality: Quality,
    pub poll_interval: Duration,
    pub terminate_grace: Duration,
    pub scratch_dir: PathBuf,
}

impl RunnerSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            quality: Quality {
                crf: cfg.encoder.crf,
                preset: cfg.encoder.preset.clone(),
            },
            poll_interval: Duration::from_millis(cfg.progress.poll_interval_ms),
            terminate_grace: Duration::from_secs(cfg.encoder.terminate_grace_secs),
            scratch_dir: cfg.progress.scratch_dir(),
        }
    }
}

/// Runs encode jobs for items below one output root
pub struct JobRunner {
    probe: Arc<dyn MediaProbe>,
    encoder: Arc<dyn Encoder>,
    sink: Arc<dyn ProgressSink>,
    settings: RunnerSettings,
    output_root: PathBuf,
    cancel: CancellationToken,
}

impl JobRunner {
    pub fn new(
        probe: Arc<dyn MediaProbe>,
        encoder: Arc<dyn Encoder>,
        sink: Arc<dyn ProgressSink>,
        settings: RunnerSettings,
        output_root: PathBuf,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            probe,
            encoder,
            sink,
            settings,
            output_root,
            cancel,
        }
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    /// Whether the item's output already exists.
    pub fn is_done(&self, item: &MediaItem) -> bool {
        item.output_path(&self.output_root).exists()
    }

    /// Transcodes one item, optionally at an explicit bitrate in Mbps.
    pub async fn run(&self, item: &MediaItem, target_bitrate: Option<f64>) -> JobOutcome {
        self.run_probed(item, target_bitrate, None).await
    }

    /// Like [`run`](Self::run), reusing an earlier probe of the source when
    /// one is at hand.
    pub async fn run_probed(
        &self,
        item: &MediaItem,
        target_bitrate: Option<f64>,
        probed: Option<ProbeResult>,
    ) -> JobOutcome {
        let output_path = item.output_path(&self.output_root);
        if output_path.exists() {
            debug!("{} already exists, skipping", output_path.display());
            return JobOutcome::AlreadyDone;
        }
        if self.cancel.is_cancelled() {
            return JobOutcome::Cancelled;
        }

        let source = item.source_path();
        let probed = match probed {
            Some(probed) => probed,
            None => match self.probe.probe(source).await {
                Ok(probed) => probed,
                Err(e) => {
                    warn!("Skipping {}: could not probe it: {}", source.display(), e);
                    return JobOutcome::Skipped(format!("probe failed: {}", e));
                }
            },
        };
        let duration = match probed.duration() {
            Ok(duration) => duration,
            Err(e) => {
                warn!("Skipping {}: {}", source.display(), e);
                return JobOutcome::Skipped(e.to_string());
            }
        };
        let dimensions = match probed.dimensions() {
            Ok(dims) => Some(dims),
            Err(e) => {
                debug!("{}: {}; not normalising dimensions", source.display(), e);
                None
            }
        };

        let original_size = match fs::metadata(source) {
            Ok(meta) => meta.len(),
            Err(e) => {
                return JobOutcome::Failed(JobError::Source {
                    path: source.to_path_buf(),
                    source: e,
                })
            }
        };

        // Cancellation may have arrived while probing.
        if self.cancel.is_cancelled() {
            return JobOutcome::Cancelled;
        }

        let created_dirs = match create_output_dirs(&self.output_root, &output_path) {
            Ok(created) => created,
            Err(e) => {
                return JobOutcome::Failed(JobError::OutputDirs {
                    path: output_path,
                    source: e,
                })
            }
        };

        let mut job = EncodeJob::new(
            item.clone(),
            output_path,
            target_bitrate,
            original_size,
            created_dirs,
        );

        announce(item, duration);
        self.execute(&mut job, duration, dimensions).await
    }

    async fn execute(
        &self,
        job: &mut EncodeJob,
        duration: Duration,
        dimensions: Option<Dimensions>,
    ) -> JobOutcome {
        let progress_path = self
            .settings
            .scratch_dir
            .join(format!("media-squeeze-{}.progress", job.id));

        let request = EncodeRequest {
            input_path: job.item.source_path().to_path_buf(),
            output_path: job.output_path.clone(),
            quality: self.settings.quality.clone(),
            target_bitrate: job.target_bitrate,
            dimensions,
            progress_path: progress_path.clone(),
        };

        let mut process = match self.encoder.start(&request).await {
            Ok(process) => process,
            Err(e) => {
                job.transition(JobState::Failed);
                job.discard();
                let _ = fs::remove_file(&progress_path);
                warn!("Failed to start encoder for {}: {}", job.item.source_path().display(), e);
                return JobOutcome::Failed(e.into());
            }
        };
        job.transition(JobState::Running);

        let monitor = ProgressMonitor::spawn(
            progress_path,
            duration,
            self.settings.poll_interval,
            Arc::clone(&self.sink),
        );
        let started = Instant::now();

        let exited = tokio::select! {
            result = process.wait() => Some(result),
            _ = self.cancel.cancelled() => None,
        };

        match exited {
            None => {
                info!("Cancellation requested, stopping the encoder");
                self.stop_encoder(process.as_mut()).await;
                monitor.stop().await;
                self.settle_cancelled(job)
            }
            Some(Ok(EncodeOutcome::Success)) if self.cancel.is_cancelled() => {
                monitor.stop().await;
                self.settle_cancelled(job)
            }
            Some(Ok(EncodeOutcome::Success)) => {
                monitor.stop().await;
                self.settle_success(job, started.elapsed())
            }
            Some(Ok(outcome)) => {
                self.force_kill(process.as_mut()).await;
                monitor.stop().await;
                let err = match outcome.into_result() {
                    Err(e) => e,
                    Ok(()) => EncodeError::Terminated,
                };
                self.settle_failed(job, err.into())
            }
            Some(Err(e)) => {
                self.force_kill(process.as_mut()).await;
                monitor.stop().await;
                self.settle_failed(job, e.into())
            }
        }
    }

    /// Asks the encoder to quit, then kills it once the grace period is over.
    async fn stop_encoder(&self, process: &mut dyn EncodeProcess) {
        if let Err(e) = process.terminate().await {
            warn!("Failed to ask the encoder to stop: {}", e);
        }

        let stopped = tokio::time::timeout(self.settings.terminate_grace, process.wait()).await;
        match stopped {
            Ok(Ok(outcome)) => debug!("Encoder stopped with {:?}", outcome),
            Ok(Err(e)) => {
                warn!("Error while waiting for the encoder to stop: {}", e);
                self.force_kill(process).await;
            }
            Err(_) => {
                warn!(
                    "Encoder still running after {}s, killing it",
                    self.settings.terminate_grace.as_secs()
                );
                self.force_kill(process).await;
            }
        }
    }

    async fn force_kill(&self, process: &mut dyn EncodeProcess) {
        if let Err(e) = process.kill().await {
            warn!("Failed to kill the encoder: {}", e);
        }
    }

    fn settle_cancelled(&self, job: &mut EncodeJob) -> JobOutcome {
        job.transition(JobState::Cancelled);
        job.discard();
        info!(
            "Compression of {} cancelled, incomplete output removed",
            job.item.source_path().display()
        );
        JobOutcome::Cancelled
    }

    fn settle_failed(&self, job: &mut EncodeJob, error: JobError) -> JobOutcome {
        job.transition(JobState::Failed);
        job.discard();
        warn!(
            "Compression of {} failed: {}",
            job.item.source_path().display(),
            error
        );
        JobOutcome::Failed(error)
    }

    fn settle_success(&self, job: &mut EncodeJob, elapsed: Duration) -> JobOutcome {
        let final_size = match fs::metadata(&job.output_path) {
            Ok(meta) => meta.len(),
            Err(_) => {
                let missing = EncodeError::MissingOutput(job.output_path.clone());
                return self.settle_failed(job, missing.into());
            }
        };

        job.final_size = Some(final_size);
        job.transition(JobState::Completed);

        let report = SizeReport::new(job.original_size, final_size);
        info!("Compression completed in {}", format_elapsed(elapsed));
        info!("Size: {}", report.summary());
        JobOutcome::Completed(report)
    }
}

fn announce(item: &MediaItem, duration: Duration) {
    match item.kind() {
        MediaKind::Episode {
            series_name,
            season_label,
            episode,
            sibling_count,
        } => {
            let noun = if episode.chapter_count() > 1 { "chapters" } else { "chapter" };
            info!(
                "Compressing {} {} of the {} in season {} of the series '{}'",
                noun,
                episode.chapter_range(),
                sibling_count,
                season_label,
                series_name
            );
        }
        MediaKind::Movie { movie_name, .. } => {
            info!("Compressing movie '{}'", movie_name);
        }
    }
    info!("Duration: {}", format_media_duration(duration));
}
