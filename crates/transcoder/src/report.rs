//! Size-reduction and duration reporting helpers.

use serde::{Deserialize, Serialize};
use std::time::Duration;

const MIB: f64 = 1024.0 * 1024.0;
const GIB: u64 = 1024 * 1024 * 1024;

/// Byte counts captured before and after a completed encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeReport {
    pub original_bytes: u64,
    pub final_bytes: u64,
}

impl SizeReport {
    pub fn new(original_bytes: u64, final_bytes: u64) -> Self {
        Self {
            original_bytes,
            final_bytes,
        }
    }

    /// `(original - final) / original * 100`, or 0 for an empty original.
    ///
    /// Negative when the output grew.
    pub fn reduction_percent(&self) -> f64 {
        if self.original_bytes == 0 {
            return 0.0;
        }
        (self.original_bytes as f64 - self.final_bytes as f64) / self.original_bytes as f64 * 100.0
    }

    /// Bytes saved; zero when the output grew.
    pub fn saved_bytes(&self) -> u64 {
        self.original_bytes.saturating_sub(self.final_bytes)
    }

    /// One-line summary, e.g. `1.50 GB -> 600.00 MB (60.00% smaller)`.
    pub fn summary(&self) -> String {
        format!(
            "{} -> {} ({:.2}% smaller)",
            format_size(self.original_bytes),
            format_size(self.final_bytes),
            self.reduction_percent()
        )
    }
}

/// Human readable size: MB below 1 GiB, GB at or above.
pub fn format_size(bytes: u64) -> String {
    if bytes >= GIB {
        format!("{:.2} GB", bytes as f64 / GIB as f64)
    } else {
        format!("{:.2} MB", bytes as f64 / MIB)
    }
}

/// Media duration in minutes, switching to hours past one hour.
pub fn format_media_duration(duration: Duration) -> String {
    let minutes = duration.as_secs_f64() / 60.0;
    if minutes > 60.0 {
        format!("{:.2} hours", minutes / 60.0)
    } else {
        format!("{:.2} minutes", minutes)
    }
}

/// Wall-clock time spent compressing, e.g. `2 hours and 5 minutes`.
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    if secs >= 3600 {
        format!("{} hours and {} minutes", secs / 3600, (secs % 3600) / 60)
    } else {
        format!("{} minutes", secs / 60)
    }
}
