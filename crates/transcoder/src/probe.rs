//! Media probing through ffprobe.
//!
//! The probe answers three questions about a source file: its duration, its
//! container bitrate and its video dimensions. Every answer may be unavailable;
//! callers decide how to degrade.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

/// Error type for probe operations.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// ffprobe exited unsuccessfully.
    #[error("ffprobe failed: {0}")]
    FfprobeFailed(String),

    /// ffprobe output was not the JSON we asked for.
    #[error("Failed to parse ffprobe output: {0}")]
    ParseError(String),

    /// The requested field is absent or non-numeric.
    #[error("{0} unavailable")]
    Unavailable(&'static str),

    /// IO error while spawning ffprobe.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Width and height of the first video stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// Facts about a media file relevant to transcoding.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProbeResult {
    pub duration_secs: Option<f64>,
    /// Container bitrate in bits per second.
    pub bit_rate_bps: Option<f64>,
    pub dimensions: Option<Dimensions>,
}

impl ProbeResult {
    pub fn duration(&self) -> Result<Duration, ProbeError> {
        self.duration_secs
            .filter(|secs| secs.is_finite() && *secs > 0.0)
            .map(Duration::from_secs_f64)
            .ok_or(ProbeError::Unavailable("duration"))
    }

    /// Container bitrate in Mbps (bits per second / 1e6).
    pub fn bitrate_mbps(&self) -> Result<f64, ProbeError> {
        self.bit_rate_bps
            .filter(|bps| bps.is_finite() && *bps >= 0.0)
            .map(|bps| bps / 1_000_000.0)
            .ok_or(ProbeError::Unavailable("bitrate"))
    }

    pub fn dimensions(&self) -> Result<Dimensions, ProbeError> {
        self.dimensions
            .filter(|d| d.width > 0 && d.height > 0)
            .ok_or(ProbeError::Unavailable("dimensions"))
    }
}

/// Media probe collaborator.
#[async_trait]
pub trait MediaProbe: Send + Sync {
    async fn probe(&self, path: &Path) -> Result<ProbeResult, ProbeError>;

    async fn probe_duration(&self, path: &Path) -> Result<Duration, ProbeError> {
        self.probe(path).await?.duration()
    }

    async fn probe_bitrate(&self, path: &Path) -> Result<f64, ProbeError> {
        self.probe(path).await?.bitrate_mbps()
    }

    async fn probe_dimensions(&self, path: &Path) -> Result<Dimensions, ProbeError> {
        self.probe(path).await?.dimensions()
    }
}

/// Raw ffprobe JSON structures for parsing.
mod ffprobe_json {
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    pub struct FfprobeOutput {
        pub streams: Option<Vec<Stream>>,
        pub format: Option<Format>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Stream {
        pub codec_type: Option<String>,
        pub width: Option<u32>,
        pub height: Option<u32>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Format {
        pub duration: Option<String>,
        pub bit_rate: Option<String>,
    }
}

/// Parses ffprobe JSON output into a ProbeResult.
///
/// Numeric fields arrive as strings; anything that does not parse is left as `None`.
pub fn parse_ffprobe_output(json_str: &str) -> Result<ProbeResult, ProbeError> {
    let ffprobe: ffprobe_json::FfprobeOutput =
        serde_json::from_str(json_str).map_err(|e| ProbeError::ParseError(e.to_string()))?;

    let format = ffprobe.format.ok_or_else(|| {
        ProbeError::ParseError("Missing format information in ffprobe output".to_string())
    })?;

    let dimensions = ffprobe
        .streams
        .unwrap_or_default()
        .into_iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .and_then(|s| match (s.width, s.height) {
            (Some(width), Some(height)) => Some(Dimensions { width, height }),
            _ => None,
        });

    Ok(ProbeResult {
        duration_secs: format.duration.as_deref().and_then(|d| d.trim().parse().ok()),
        bit_rate_bps: format.bit_rate.as_deref().and_then(|b| b.trim().parse().ok()),
        dimensions,
    })
}

/// Probe backed by the ffprobe binary.
#[derive(Debug, Clone)]
pub struct FfprobeProbe {
    ffprobe_bin: PathBuf,
}

impl FfprobeProbe {
    pub fn new(ffprobe_bin: impl Into<PathBuf>) -> Self {
        Self {
            ffprobe_bin: ffprobe_bin.into(),
        }
    }
}

#[async_trait]
impl MediaProbe for FfprobeProbe {
    /// Runs `ffprobe -v error -print_format json -show_format -show_streams <path>`.
    async fn probe(&self, path: &Path) -> Result<ProbeResult, ProbeError> {
        let output = Command::new(&self.ffprobe_bin)
            .args([
                "-v",
                "error",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(path)
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProbeError::FfprobeFailed(format!(
                "ffprobe exited with status {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_ffprobe_output(&stdout)
    }
}
