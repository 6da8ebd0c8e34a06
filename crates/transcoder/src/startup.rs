//! Startup checks module for media-squeeze
//!
//! Verifies that the external media tools can be executed before any library
//! is provisioned:
//! - ffprobe, always (bitrate display and duration probing)
//! - ffmpeg, unless only bitrates are being shown

use crate::config::Config;
use log::info;
use std::path::Path;
use std::process::Command;
use thiserror::Error;

/// Error types for startup checks
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("{tool} not available: {reason}")]
    ToolUnavailable { tool: String, reason: String },
}

/// Extract the version token from `<tool> -version` output
///
/// Handles release versions ("ffmpeg version 6.1.1 ...") as well as git
/// builds ("ffprobe version n6.1-3-gabcdef ..." or "N-112233-g...").
pub fn parse_tool_version(version_output: &str) -> Option<String> {
    let line = version_output
        .lines()
        .find(|line| line.to_lowercase().contains(" version "))?;

    let lower = line.to_lowercase();
    let start = lower.find(" version ")? + " version ".len();
    line[start..]
        .split_whitespace()
        .next()
        .map(|token| token.trim_start_matches('n').to_string())
        .filter(|token| !token.is_empty())
}

/// Check that `<bin> -version` executes successfully
///
/// Returns the reported version, if it could be parsed.
pub fn check_tool_available(bin: &Path) -> Result<Option<String>, StartupError> {
    let tool = bin.display().to_string();
    let output = Command::new(bin)
        .arg("-version")
        .output()
        .map_err(|e| StartupError::ToolUnavailable {
            tool: tool.clone(),
            reason: format!("{} -version failed; is it installed and in PATH? Error: {}", tool, e),
        })?;

    if !output.status.success() {
        return Err(StartupError::ToolUnavailable {
            reason: format!("{} -version exited with {}", tool, output.status),
            tool,
        });
    }

    Ok(parse_tool_version(&String::from_utf8_lossy(&output.stdout)))
}

/// Run the startup checks in order
///
/// 1. ffprobe availability
/// 2. ffmpeg availability, skipped when `show_bitrate_only` is set
pub fn run_startup_checks(cfg: &Config, show_bitrate_only: bool) -> Result<(), StartupError> {
    let mut tools = vec![cfg.encoder.ffprobe_bin.as_path()];
    if !show_bitrate_only {
        tools.push(cfg.encoder.ffmpeg_bin.as_path());
    }

    for bin in tools {
        let version = check_tool_available(bin)?;
        info!(
            "Found {} {}",
            bin.display(),
            version.as_deref().unwrap_or("(unknown version)")
        );
    }
    Ok(())
}
