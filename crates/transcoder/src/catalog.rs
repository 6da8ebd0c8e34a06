//! Catalog walker for series and movie libraries.
//!
//! Walks the mounted input root in file-name order and lazily yields
//! [`MediaItem`]s. Series files must sit at `<series>/<season>/<file>` (at least
//! three segments below the root) and carry an episode marker; movie files are
//! media files directly under the root or inside a per-movie directory, one
//! item per directory.

use crate::filter::NameFilter;
use crate::naming::{derive_movie_name, parse_episode, EpisodeLabel};
use log::{debug, warn};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

/// Container of every movie output.
pub const MOVIE_OUTPUT_EXTENSION: &str = "mkv";

/// Media file extensions recognised by the walker (case-insensitive matching).
pub const VIDEO_EXTENSIONS: &[&str] = &[".mkv", ".mp4", ".avi", ".mov", ".m4v", ".ts", ".m2ts"];

/// Which library layout the walker expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogKind {
    Series,
    Movies,
}

impl CatalogKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CatalogKind::Series => "series",
            CatalogKind::Movies => "movies",
        }
    }
}

/// Kind-specific identity of a media item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaKind {
    Episode {
        series_name: String,
        /// Name of the season directory (e.g. `Season 1`).
        season_label: String,
        episode: EpisodeLabel,
        /// Chapters found in the same season directory; informational only.
        sibling_count: usize,
    },
    Movie {
        movie_name: String,
        /// Directory below the root holding the movie, if it has its own folder.
        movie_dir: Option<String>,
    },
}

/// One transcodable unit discovered by the walker. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaItem {
    source_path: PathBuf,
    kind: MediaKind,
}

impl MediaItem {
    pub fn episode(
        source_path: PathBuf,
        series_name: String,
        season_label: String,
        episode: EpisodeLabel,
        sibling_count: usize,
    ) -> Self {
        Self {
            source_path,
            kind: MediaKind::Episode {
                series_name,
                season_label,
                episode,
                sibling_count,
            },
        }
    }

    pub fn movie(source_path: PathBuf, movie_name: String, movie_dir: Option<String>) -> Self {
        Self {
            source_path,
            kind: MediaKind::Movie {
                movie_name,
                movie_dir,
            },
        }
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    pub fn kind(&self) -> &MediaKind {
        &self.kind
    }

    /// Series name for episodes, movie name for movies.
    pub fn display_name(&self) -> &str {
        match &self.kind {
            MediaKind::Episode { series_name, .. } => series_name,
            MediaKind::Movie { movie_name, .. } => movie_name,
        }
    }

    /// Deterministic output location under `output_root`; doubles as the idempotency key.
    ///
    /// Episodes land at `<root>/<series>/<season>/<file>`, movies at
    /// `<root>/<movie>/<movie>.mkv` whatever their source layout.
    pub fn output_path(&self, output_root: &Path) -> PathBuf {
        match &self.kind {
            MediaKind::Episode {
                series_name,
                season_label,
                ..
            } => {
                let file_name = self.source_path.file_name().unwrap_or_default();
                output_root.join(series_name).join(season_label).join(file_name)
            }
            MediaKind::Movie { movie_name, .. } => output_root
                .join(movie_name)
                .join(format!("{}.{}", movie_name, MOVIE_OUTPUT_EXTENSION)),
        }
    }
}

/// Checks if a file has a video extension (case-insensitive).
pub fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext_lower = format!(".{}", ext.to_lowercase());
            VIDEO_EXTENSIONS.contains(&ext_lower.as_str())
        })
        .unwrap_or(false)
}

/// Sums the chapters of every episode file in a season directory.
///
/// A file holding `1x04-05` counts twice.
pub fn count_season_chapters(season_dir: &Path) -> usize {
    let entries = match fs::read_dir(season_dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Could not list season directory {}: {}", season_dir.display(), e);
            return 0;
        }
    };

    entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .map(|entry| entry.path())
        .filter(|path| is_video_file(path))
        .filter_map(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .and_then(parse_episode)
        })
        .map(|label| label.chapter_count())
        .sum()
}

/// Lazy, single-pass iterator over the media items of one catalog.
///
/// The walker checks the cancellation token before every directory entry and
/// ends permanently once it is set.
pub struct CatalogWalker {
    root: PathBuf,
    kind: CatalogKind,
    filter: NameFilter,
    cancel: CancellationToken,
    entries: walkdir::IntoIter,
    sibling_counts: HashMap<PathBuf, usize>,
    /// Movie directories that already produced their item.
    seen_movie_dirs: HashSet<String>,
    finished: bool,
}

impl CatalogWalker {
    pub fn new(root: &Path, kind: CatalogKind, filter: NameFilter, cancel: CancellationToken) -> Self {
        let max_depth = match kind {
            CatalogKind::Series => usize::MAX,
            CatalogKind::Movies => 2,
        };

        let entries = WalkDir::new(root)
            .follow_links(false)
            .max_depth(max_depth)
            .sort_by_file_name()
            .into_iter();

        Self {
            root: root.to_path_buf(),
            kind,
            filter,
            cancel,
            entries,
            sibling_counts: HashMap::new(),
            seen_movie_dirs: HashSet::new(),
            finished: false,
        }
    }

    /// Turns a regular file into a media item, or `None` if it does not qualify.
    fn classify(&mut self, path: &Path) -> Option<MediaItem> {
        if !is_video_file(path) {
            return None;
        }

        let relative = path.strip_prefix(&self.root).ok()?;
        let segments: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();

        match self.kind {
            CatalogKind::Series => self.classify_episode(path, &segments),
            CatalogKind::Movies => self.classify_movie(path, &segments),
        }
    }

    fn classify_episode(&mut self, path: &Path, segments: &[String]) -> Option<MediaItem> {
        if segments.len() < 3 {
            debug!("Not inside a series/season directory, ignoring: {}", path.display());
            return None;
        }

        let series_name = segments[segments.len() - 3].clone();
        let season_label = segments[segments.len() - 2].clone();
        let file_name = &segments[segments.len() - 1];

        if !self.filter.accepts(&series_name) {
            return None;
        }

        let Some(episode) = parse_episode(file_name) else {
            warn!(
                "Could not extract the chapter and season from the file '{}', skipping.",
                file_name
            );
            return None;
        };

        let season_dir = path.parent()?.to_path_buf();
        let sibling_count = *self
            .sibling_counts
            .entry(season_dir)
            .or_insert_with_key(|dir| count_season_chapters(dir));

        Some(MediaItem::episode(
            path.to_path_buf(),
            series_name,
            season_label,
            episode,
            sibling_count,
        ))
    }

    fn classify_movie(&mut self, path: &Path, segments: &[String]) -> Option<MediaItem> {
        let movie_dir = match segments.len() {
            1 => None,
            2 => Some(segments[0].clone()),
            _ => return None,
        };
        let movie_name = movie_dir.clone().unwrap_or_else(|| derive_movie_name(path));

        if !self.filter.accepts(&movie_name) {
            return None;
        }

        if let Some(dir) = &movie_dir {
            if !self.seen_movie_dirs.insert(dir.clone()) {
                debug!("'{}' already has its movie file, ignoring {}", dir, path.display());
                return None;
            }
        }

        Some(MediaItem::movie(path.to_path_buf(), movie_name, movie_dir))
    }
}

impl Iterator for CatalogWalker {
    type Item = MediaItem;

    fn next(&mut self) -> Option<MediaItem> {
        if self.finished {
            return None;
        }

        loop {
            if self.cancel.is_cancelled() {
                debug!("Catalog walk of {} cancelled", self.root.display());
                self.finished = true;
                return None;
            }

            let entry = match self.entries.next() {
                Some(Ok(entry)) => entry,
                Some(Err(e)) => {
                    warn!("Error reading directory entry: {}", e);
                    continue;
                }
                None => {
                    self.finished = true;
                    return None;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }

            if let Some(item) = self.classify(entry.path()) {
                return Some(item);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::fs::{self, File};
    use tempfile::TempDir;

    fn touch(root: &Path, relative: &str) -> PathBuf {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        File::create(&path).unwrap();
        path
    }

    fn walk(root: &Path, kind: CatalogKind, filter: NameFilter) -> Vec<MediaItem> {
        CatalogWalker::new(root, kind, filter, CancellationToken::new()).collect()
    }

    #[test]
    fn test_is_video_file() {
        assert!(is_video_file(Path::new("/media/movie.mkv")));
        assert!(is_video_file(Path::new("/media/movie.MKV")));
        assert!(is_video_file(Path::new("/media/movie.m2ts")));
        assert!(!is_video_file(Path::new("/media/movie.srt")));
        assert!(!is_video_file(Path::new("/media/movie")));
    }

    #[test]
    fn test_series_walk_yields_episodes_in_order() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        touch(root, "ShowA/Season 1/ShowA - 1x02.mkv");
        touch(root, "ShowA/Season 1/ShowA - 1x01.mkv");
        touch(root, "ShowA/Season 1/ShowA - 1x01.srt");
        touch(root, "ShowB/Season 2/ShowB - 2x04-05.mkv");

        let items = walk(root, CatalogKind::Series, NameFilter::All);
        let names: Vec<_> = items
            .iter()
            .map(|i| i.source_path().file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            vec!["ShowA - 1x01.mkv", "ShowA - 1x02.mkv", "ShowB - 2x04-05.mkv"]
        );

        match items[2].kind() {
            MediaKind::Episode {
                series_name,
                season_label,
                episode,
                sibling_count,
            } => {
                assert_eq!(series_name, "ShowB");
                assert_eq!(season_label, "Season 2");
                assert_eq!(episode.chapters, vec!["04", "05"]);
                assert_eq!(*sibling_count, 2);
            }
            other => panic!("expected episode, got {:?}", other),
        }
    }

    #[test]
    fn test_sibling_count_sums_chapters_not_files() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        touch(root, "Show/S1/Show 1x01.mkv");
        touch(root, "Show/S1/Show 1x02-03.mkv");
        touch(root, "Show/S1/Show extras.mkv");
        touch(root, "Show/S1/cover.jpg");

        assert_eq!(count_season_chapters(&root.join("Show/S1")), 3);

        let items = walk(root, CatalogKind::Series, NameFilter::All);
        assert_eq!(items.len(), 2);
        for item in &items {
            match item.kind() {
                MediaKind::Episode { sibling_count, .. } => assert_eq!(*sibling_count, 3),
                other => panic!("expected episode, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_series_requires_three_segments() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        touch(root, "Loose 1x01.mkv");
        touch(root, "Show/Show 1x01.mkv");

        assert!(walk(root, CatalogKind::Series, NameFilter::All).is_empty());
    }

    #[test]
    fn test_series_name_filter() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        touch(root, "The Wire/Season 1/The Wire 1x01.mkv");
        touch(root, "Lost/Season 1/Lost 1x01.mkv");

        let items = walk(root, CatalogKind::Series, NameFilter::Substring("wire".into()));
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].display_name(), "The Wire");
    }

    #[test]
    fn test_movie_walk_and_list_filter() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        touch(root, "Heat (1995)/Heat (1995).mkv");
        touch(root, "Alien.mkv");
        touch(root, "Collections/Nested/Deep.mkv");
        touch(root, "readme.txt");

        let all = walk(root, CatalogKind::Movies, NameFilter::All);
        let names: Vec<_> = all.iter().map(|i| i.display_name().to_string()).collect();
        assert_eq!(names, vec!["Alien", "Heat (1995)"]);

        let filter = NameFilter::from_list_content("HEAT (1995)\n");
        let listed = walk(root, CatalogKind::Movies, filter);
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].display_name(), "Heat (1995)");
    }

    #[test]
    fn test_output_paths() {
        let episode = MediaItem::episode(
            PathBuf::from("/in/ShowA/Season 1/ShowA - 1x01.mkv"),
            "ShowA".into(),
            "Season 1".into(),
            parse_episode("1x01").unwrap(),
            1,
        );
        assert_eq!(
            episode.output_path(Path::new("/out")),
            PathBuf::from("/out/ShowA/Season 1/ShowA - 1x01.mkv")
        );

        let boxed = MediaItem::movie(
            PathBuf::from("/in/Heat (1995)/heat.1995.1080p.mp4"),
            "Heat (1995)".into(),
            Some("Heat (1995)".into()),
        );
        assert_eq!(
            boxed.output_path(Path::new("/out")),
            PathBuf::from("/out/Heat (1995)/Heat (1995).mkv")
        );

        let loose = MediaItem::movie(PathBuf::from("/in/Alien.mkv"), "Alien".into(), None);
        assert_eq!(loose.output_path(Path::new("/out")), PathBuf::from("/out/Alien/Alien.mkv"));
    }

    #[test]
    fn test_movie_dir_yields_one_item() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        touch(root, "Heat/Heat.cd2.mkv");
        touch(root, "Heat/Heat.cd1.mkv");
        touch(root, "Heat/sample.mkv");
        touch(root, "Alien.mkv");
        touch(root, "Aliens.mkv");

        let items = walk(root, CatalogKind::Movies, NameFilter::All);
        let names: Vec<_> = items.iter().map(|i| i.display_name().to_string()).collect();
        assert_eq!(names, vec!["Alien", "Aliens", "Heat"]);
        assert!(items[2].source_path().ends_with("Heat/Heat.cd1.mkv"));
    }

    #[test]
    fn test_cancelled_walk_yields_nothing_further() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        touch(root, "A/S1/A 1x01.mkv");
        touch(root, "B/S1/B 1x01.mkv");

        let cancel = CancellationToken::new();
        let mut walker = CatalogWalker::new(root, CatalogKind::Series, NameFilter::All, cancel.clone());

        assert!(walker.next().is_some());
        cancel.cancel();
        assert!(walker.next().is_none());
        assert!(walker.next().is_none());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        // Every file with the right layout and an episode marker is yielded exactly once.
        #[test]
        fn prop_every_marked_episode_is_found(
            series in "[A-Za-z]{1,10}",
            season in 1u32..20,
            chapters in proptest::collection::btree_set(1u32..60, 1..6),
        ) {
            let temp = TempDir::new().unwrap();
            let root = temp.path();
            for chapter in &chapters {
                touch(root, &format!("{}/Season {}/{} {}x{:02}.mkv", series, season, series, season, chapter));
            }

            let items = walk(root, CatalogKind::Series, NameFilter::All);
            prop_assert_eq!(items.len(), chapters.len());
            for item in &items {
                match item.kind() {
                    MediaKind::Episode { sibling_count, .. } => {
                        prop_assert_eq!(*sibling_count, chapters.len())
                    }
                    _ => prop_assert!(false, "expected an episode"),
                }
            }
        }
    }
}
