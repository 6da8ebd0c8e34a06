//! Output directory bookkeeping for safe cleanup.
//!
//! A job records exactly which directories it had to create for its output.
//! On cancellation or failure the partial output is deleted and those
//! directories are pruned deepest-first, each only if it is empty. Directories
//! that existed before the job, and anything at or above the output root, are
//! never touched.

use log::{debug, warn};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Directories created for one job's output, deepest last.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreatedDirs {
    dirs: Vec<PathBuf>,
}

impl CreatedDirs {
    pub fn paths(&self) -> &[PathBuf] {
        &self.dirs
    }

    pub fn is_empty(&self) -> bool {
        self.dirs.is_empty()
    }
}

/// Creates the parent directories of `output_path` below `output_root`,
/// remembering which ones did not exist beforehand.
pub fn create_output_dirs(output_root: &Path, output_path: &Path) -> io::Result<CreatedDirs> {
    let Some(parent) = output_path.parent() else {
        return Ok(CreatedDirs::default());
    };

    let mut missing = Vec::new();
    let mut current = parent;
    while current != output_root && current.starts_with(output_root) && !current.exists() {
        missing.push(current.to_path_buf());
        match current.parent() {
            Some(next) => current = next,
            None => break,
        }
    }
    missing.reverse();

    fs::create_dir_all(parent)?;
    Ok(CreatedDirs { dirs: missing })
}

/// Deletes a (possibly partial) output file. Missing files are fine.
pub fn remove_partial_output(output_path: &Path) -> io::Result<bool> {
    match fs::remove_file(output_path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

fn is_empty_dir(dir: &Path) -> io::Result<bool> {
    Ok(fs::read_dir(dir)?.next().is_none())
}

/// Walks the created directories upward (leaf, season, series), removing each
/// one that is empty. Stops at the first directory that still has content.
///
/// Returns the directories actually removed.
pub fn prune_created_dirs(created: &CreatedDirs) -> Vec<PathBuf> {
    let mut removed = Vec::new();

    for dir in created.dirs.iter().rev() {
        match is_empty_dir(dir) {
            Ok(true) => match fs::remove_dir(dir) {
                Ok(()) => {
                    debug!("Removed empty directory {}", dir.display());
                    removed.push(dir.clone());
                }
                Err(e) => {
                    warn!("Failed to remove directory {}: {}", dir.display(), e);
                    break;
                }
            },
            Ok(false) => break,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => {
                warn!("Failed to inspect directory {}: {}", dir.display(), e);
                break;
            }
        }
    }

    removed
}

/// Deletes the partial output and prunes the directories created for it.
pub fn discard_output(output_path: &Path, created: &CreatedDirs) {
    match remove_partial_output(output_path) {
        Ok(true) => debug!("Removed incomplete output {}", output_path.display()),
        Ok(false) => {}
        Err(e) => warn!("Failed to remove incomplete output {}: {}", output_path.display(), e),
    }
    prune_created_dirs(created);
}
