//! Encoding collaborators for media-squeeze
//!
//! The job runner drives an [`Encoder`] that starts one opaque external
//! process per job and hands back an [`EncodeProcess`] handle.

pub mod ffmpeg;

use crate::probe::Dimensions;
use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;

pub use ffmpeg::{build_ffmpeg_command, scale_filter, FfmpegEncoder, FfmpegProcess};

/// Error type for encoding operations
#[derive(Debug, Error)]
pub enum EncodeError {
    /// Encoder process exited with non-zero status
    #[error("Encoder failed with exit code: {0}")]
    Failed(i32),

    /// Encoder process was terminated by a signal
    #[error("Encoder process was terminated by signal")]
    Terminated,

    /// Encoder reported success but produced no output file
    #[error("Encoder produced no output file at {0}")]
    MissingOutput(PathBuf),

    /// IO error while starting or controlling the encoder
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Constant-quality settings used when no explicit bitrate is requested
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quality {
    pub crf: u8,
    pub preset: String,
}

/// Everything needed to start one encode
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeRequest {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub quality: Quality,
    /// Explicit video bitrate in Mbps; replaces CRF when set
    pub target_bitrate: Option<f64>,
    /// Source dimensions, when known; enables dimension normalisation
    pub dimensions: Option<Dimensions>,
    /// File the encoder appends `key=value` progress lines to
    pub progress_path: PathBuf,
}

/// Exit status of a finished encode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeOutcome {
    Success,
    /// Non-zero exit code, or `None` when killed by a signal
    Failure(Option<i32>),
}

impl EncodeOutcome {
    pub fn from_status(status: std::process::ExitStatus) -> Self {
        if status.success() {
            EncodeOutcome::Success
        } else {
            EncodeOutcome::Failure(status.code())
        }
    }

    pub fn into_result(self) -> Result<(), EncodeError> {
        match self {
            EncodeOutcome::Success => Ok(()),
            EncodeOutcome::Failure(Some(code)) => Err(EncodeError::Failed(code)),
            EncodeOutcome::Failure(None) => Err(EncodeError::Terminated),
        }
    }
}

/// Handle to a running encode
#[async_trait]
pub trait EncodeProcess: Send {
    /// Waits for the process to exit. Cancel-safe.
    async fn wait(&mut self) -> Result<EncodeOutcome, EncodeError>;

    /// Asks the process to stop and finalise; does not wait.
    async fn terminate(&mut self) -> Result<(), EncodeError>;

    /// Kills the process if it is still running and reaps it.
    async fn kill(&mut self) -> Result<(), EncodeError>;
}

/// Media encoder collaborator
#[async_trait]
pub trait Encoder: Send + Sync {
    async fn start(&self, request: &EncodeRequest) -> Result<Box<dyn EncodeProcess>, EncodeError>;
}
