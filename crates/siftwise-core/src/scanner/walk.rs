use dashmap::DashMap;
use glob::Pattern;
use rayon::prelude::*;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{error, warn};

use crate::model::ScanFailure;

#[derive(Debug, Default)]
pub struct WalkResult {
    /// Sorted file paths.
    pub files: Vec<PathBuf>,
    /// Sorted by path.
    pub failures: Vec<ScanFailure>,
}

/// Parallel directory traversal below `root`, filtering by glob ignore patterns
/// and skipping everything under `excluded` (the destination tree). Symlinks are
/// not followed. Unreadable entries are reported as failures, never fatal.
pub fn collect_files(
    root: &Path,
    ignore_globs: &[String],
    excluded: &[PathBuf],
) -> io::Result<WalkResult> {
    let found: DashMap<PathBuf, Option<String>> = DashMap::new();

    let ignore_patterns: Vec<Pattern> = ignore_globs
        .iter()
        .filter_map(|glob| match Pattern::new(glob) {
            Ok(p) => Some(p),
            Err(e) => {
                error!("Invalid glob pattern '{}': {}", glob, e);
                None
            }
        })
        .collect();

    let walker = Walker {
        ignore_patterns: &ignore_patterns,
        excluded,
        found: &found,
    };
    walker.visit_dir(root)?;

    let mut files = Vec::new();
    let mut failures = Vec::new();
    for (path, failure) in found.into_iter() {
        match failure {
            None => files.push(path),
            Some(reason) => failures.push(ScanFailure { path, reason }),
        }
    }
    files.sort();
    failures.sort_by(|a, b| a.path.cmp(&b.path));

    Ok(WalkResult { files, failures })
}

struct Walker<'a> {
    ignore_patterns: &'a [Pattern],
    excluded: &'a [PathBuf],
    found: &'a DashMap<PathBuf, Option<String>>,
}

impl Walker<'_> {
    fn is_ignored(&self, path: &Path) -> bool {
        self.excluded.iter().any(|ex| path.starts_with(ex))
            || self
                .ignore_patterns
                .iter()
                .any(|pattern| pattern.matches_path(path))
    }

    fn visit_dir(&self, dir: &Path) -> io::Result<()> {
        if self.is_ignored(dir) {
            return Ok(());
        }

        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) => {
                if err.kind() == io::ErrorKind::PermissionDenied {
                    warn!("Access denied reading directory {}: {}", dir.display(), err);
                } else {
                    warn!("Error reading directory {}: {}", dir.display(), err);
                }
                self.found
                    .insert(dir.to_path_buf(), Some(format!("directory unreadable: {}", err)));
                return Ok(());
            }
        };

        entries.par_bridge().try_for_each(|entry_result| {
            let entry = match entry_result {
                Ok(entry) => entry,
                Err(err) => {
                    warn!("Error reading entry in directory {}: {}", dir.display(), err);
                    return Ok(());
                }
            };

            let path = entry.path();
            let metadata = match fs::symlink_metadata(&path) {
                Ok(metadata) => metadata,
                Err(err) => {
                    warn!("Error getting metadata for {}: {}", path.display(), err);
                    self.found.insert(path, Some(err.to_string()));
                    return Ok(());
                }
            };

            if metadata.file_type().is_symlink() {
                return Ok(());
            }
            if metadata.is_dir() {
                self.visit_dir(&path)?;
            } else if metadata.is_file() && !self.is_ignored(&path) {
                self.found.insert(path, None);
            }
            Ok(())
        })
    }
}
