//! ffmpeg encoder module for media-squeeze
//!
//! Builds and spawns ffmpeg with a machine-readable progress file, and exposes
//! the child as an [`EncodeProcess`].

use super::{EncodeError, EncodeOutcome, EncodeProcess, EncodeRequest, Encoder};
use crate::probe::Dimensions;
use async_trait::async_trait;
use log::debug;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin};

/// Scale filter normalising the source dimensions, if any is needed.
///
/// Tall sources are scaled down to `max_height` keeping aspect with an even
/// width; sources with odd dimensions are rounded down to even ones.
pub fn scale_filter(dimensions: Option<Dimensions>, max_height: Option<u32>) -> Option<String> {
    let dims = dimensions?;
    if let Some(max) = max_height.filter(|h| *h > 0) {
        if dims.height > max {
            return Some(format!("scale=-2:{}", max - max % 2));
        }
    }
    if dims.width % 2 != 0 || dims.height % 2 != 0 {
        return Some("scale=trunc(iw/2)*2:trunc(ih/2)*2".to_string());
    }
    None
}

fn megabits(value: f64) -> String {
    format!("{}M", value)
}

/// Build an ffmpeg command for one encode
///
/// Creates a Command configured with:
/// - Quiet logging and a `-progress` file for the progress monitor
/// - `-n` so an existing output is never overwritten
/// - All streams mapped, video re-encoded, audio and subtitles copied
/// - CRF quality, or an explicit bitrate with matching maxrate/bufsize
/// - An optional scale filter from [`scale_filter`]
pub fn build_ffmpeg_command(
    ffmpeg_bin: &std::path::Path,
    video_codec: &str,
    max_height: Option<u32>,
    request: &EncodeRequest,
) -> Command {
    let mut cmd = Command::new(ffmpeg_bin);

    cmd.args(["-hide_banner", "-nostats", "-loglevel", "error", "-n"]);
    cmd.arg("-progress").arg(&request.progress_path);
    cmd.arg("-i").arg(&request.input_path);
    cmd.args(["-map", "0"]);
    cmd.arg("-c:v").arg(video_codec);

    match request.target_bitrate {
        Some(mbps) => {
            cmd.arg("-b:v").arg(megabits(mbps));
            cmd.arg("-maxrate").arg(megabits(mbps));
            cmd.arg("-bufsize").arg(megabits(mbps * 2.0));
        }
        None => {
            cmd.arg("-crf").arg(request.quality.crf.to_string());
        }
    }
    cmd.arg("-preset").arg(&request.quality.preset);

    if let Some(filter) = scale_filter(request.dimensions, max_height) {
        cmd.arg("-vf").arg(filter);
    }

    cmd.args(["-c:a", "copy", "-c:s", "copy"]);
    cmd.arg(&request.output_path);

    cmd
}

/// Encoder backed by the ffmpeg binary
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    ffmpeg_bin: PathBuf,
    video_codec: String,
    max_height: Option<u32>,
}

impl FfmpegEncoder {
    pub fn new(ffmpeg_bin: impl Into<PathBuf>, video_codec: impl Into<String>, max_height: Option<u32>) -> Self {
        Self {
            ffmpeg_bin: ffmpeg_bin.into(),
            video_codec: video_codec.into(),
            max_height,
        }
    }
}

#[async_trait]
impl Encoder for FfmpegEncoder {
    async fn start(&self, request: &EncodeRequest) -> Result<Box<dyn EncodeProcess>, EncodeError> {
        let mut std_cmd = build_ffmpeg_command(&self.ffmpeg_bin, &self.video_codec, self.max_height, request);
        std_cmd
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit());

        // Keep the terminal's interrupt away from ffmpeg; the runner decides how it stops.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            std_cmd.process_group(0);
        }

        debug!("Spawning encoder: {:?}", std_cmd);

        let mut cmd = tokio::process::Command::from(std_cmd);
        cmd.kill_on_drop(true);
        let mut child = cmd.spawn()?;
        // Child::wait closes the child's stdin, so the handle lives outside it.
        let stdin = child.stdin.take();

        Ok(Box::new(FfmpegProcess { child, stdin }))
    }
}

/// A running ffmpeg child
#[derive(Debug)]
pub struct FfmpegProcess {
    child: Child,
    stdin: Option<ChildStdin>,
}

#[async_trait]
impl EncodeProcess for FfmpegProcess {
    async fn wait(&mut self) -> Result<EncodeOutcome, EncodeError> {
        let status = self.child.wait().await?;
        Ok(EncodeOutcome::from_status(status))
    }

    /// Sends `q` on stdin, ffmpeg's request to finish up and exit.
    async fn terminate(&mut self) -> Result<(), EncodeError> {
        let Some(mut stdin) = self.stdin.take() else {
            return Ok(());
        };
        match stdin.write_all(b"q").await {
            Ok(()) => {}
            // already gone
            Err(e) if e.kind() == ErrorKind::BrokenPipe => return Ok(()),
            Err(e) => return Err(e.into()),
        }
        match stdin.flush().await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::BrokenPipe => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn kill(&mut self) -> Result<(), EncodeError> {
        if self.child.try_wait()?.is_some() {
            return Ok(());
        }
        self.child.kill().await?;
        Ok(())
    }
}
