//! Catalog name filters and run-option validation.
//!
//! Everything here is resolved before any media file is touched: conflicting
//! flags, a missing list file, or a filter bitrate without a compress bitrate
//! abort the run up front.

use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration errors detected before the catalog walk starts.
#[derive(Debug, Error)]
pub enum FilterError {
    /// `--name` and `--list` were both supplied.
    #[error("--name and --list are mutually exclusive")]
    ConflictingFilters,

    /// The list file could not be read.
    #[error("Failed to read list file {path}: {source}")]
    ListFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// `--filter-bitrate` was supplied without `--compress-bitrate`.
    #[error("--filter-bitrate requires --compress-bitrate")]
    MissingCompressBitrate,

    /// A bitrate flag was zero, negative or not finite.
    #[error("Invalid bitrate {0} Mbps: must be a positive number")]
    InvalidBitrate(f64),
}

/// Restricts which series or movies a run processes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum NameFilter {
    /// Every catalog entry is accepted.
    #[default]
    All,
    /// Case-insensitive substring match against the series/movie name.
    Substring(String),
    /// Case-insensitive exact-or-substring membership in a list of names.
    List(Vec<String>),
}

impl NameFilter {
    /// Builds the filter from the `--name` / `--list` flags.
    ///
    /// Reads the list file eagerly so a missing file fails the run before the walk.
    pub fn from_flags(name: Option<&str>, list: Option<&Path>) -> Result<Self, FilterError> {
        match (name, list) {
            (Some(_), Some(_)) => Err(FilterError::ConflictingFilters),
            (Some(name), None) => Ok(NameFilter::Substring(name.to_lowercase())),
            (None, Some(path)) => {
                let content = fs::read_to_string(path).map_err(|source| FilterError::ListFile {
                    path: path.to_path_buf(),
                    source,
                })?;
                Ok(Self::from_list_content(&content))
            }
            (None, None) => Ok(NameFilter::All),
        }
    }

    /// Parses a newline-delimited list, ignoring blank lines and surrounding whitespace.
    pub fn from_list_content(content: &str) -> Self {
        let entries = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_lowercase)
            .collect();
        NameFilter::List(entries)
    }

    /// Whether a series or movie name passes the filter.
    ///
    /// Both operands are case-folded, so list entries and catalog names compare
    /// symmetrically.
    pub fn accepts(&self, catalog_name: &str) -> bool {
        match self {
            NameFilter::All => true,
            NameFilter::Substring(needle) => catalog_name.to_lowercase().contains(needle.as_str()),
            NameFilter::List(entries) => {
                let name = catalog_name.to_lowercase();
                entries
                    .iter()
                    .any(|entry| name == *entry || name.contains(entry.as_str()))
            }
        }
    }
}

/// Bitrate gate flags as given on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BitrateFlags {
    pub show_bitrate: bool,
    pub filter_bitrate: Option<f64>,
    pub compress_bitrate: Option<f64>,
}

impl BitrateFlags {
    /// Checks the filter/compress pairing once, before any file is probed.
    pub fn validate(&self) -> Result<(), FilterError> {
        for value in [self.filter_bitrate, self.compress_bitrate].into_iter().flatten() {
            if !value.is_finite() || value <= 0.0 {
                return Err(FilterError::InvalidBitrate(value));
            }
        }
        if self.filter_bitrate.is_some() && self.compress_bitrate.is_none() {
            return Err(FilterError::MissingCompressBitrate);
        }
        Ok(())
    }
}
