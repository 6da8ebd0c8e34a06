//! Naming convention parser for episode and movie files.
//!
//! Episodes are recognised by a `<season>x<chapter[-chapter...]>` marker in the
//! file name (for example `ShowA - 2x04-05.mkv`). Movies carry no structure and
//! are identified by their file stem.

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::path::Path;

static EPISODE_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d+x)(\d+(?:-\d+)*)").expect("episode marker pattern is valid")
});

/// Season marker plus the ordered chapters a single file contains.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EpisodeLabel {
    /// Literal season token including the trailing `x` (e.g. `"2x"`).
    pub season: String,
    /// Chapter numbers, zero-padded to at least two digits, in file order.
    pub chapters: Vec<String>,
}

impl EpisodeLabel {
    /// Number of chapters encoded in the file.
    pub fn chapter_count(&self) -> usize {
        self.chapters.len()
    }

    /// Chapters joined with `-`, e.g. `04-05`.
    pub fn chapter_range(&self) -> String {
        self.chapters.join("-")
    }
}

impl fmt::Display for EpisodeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.season, self.chapter_range())
    }
}

/// Extracts the season marker and chapter list from a file name.
///
/// Returns `None` when the name carries no `<digits>x<digits>` marker; callers
/// treat that as "not an episode" rather than an error.
pub fn parse_episode(file_name: &str) -> Option<EpisodeLabel> {
    let caps = EPISODE_MARKER.captures(file_name)?;
    let season = caps.get(1)?.as_str().to_string();
    let chapters = caps
        .get(2)?
        .as_str()
        .split('-')
        .map(|chapter| format!("{:0>2}", chapter))
        .collect();

    Some(EpisodeLabel { season, chapters })
}

/// Movie name for a file: its base name without extension.
pub fn derive_movie_name(file_path: &Path) -> String {
    file_path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}
