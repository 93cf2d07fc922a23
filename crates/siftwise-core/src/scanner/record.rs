use rayon::prelude::*;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::warn;

use crate::hasher::xxhash;
use crate::model::{FileRecord, ScanFailure};

const COMPOUND_EXTENSIONS: [&str; 3] = ["tar.gz", "tar.bz2", "tar.xz"];

/// Capture a `FileRecord` for each path in parallel. Files that cannot be read
/// come back as failures; both outputs are sorted by path.
pub fn capture_records(paths: &[PathBuf], full_hash: bool) -> (Vec<FileRecord>, Vec<ScanFailure>) {
    let captured: Vec<Result<FileRecord, ScanFailure>> = paths
        .par_iter()
        .map(|path| {
            capture_record(path, full_hash).map_err(|e| {
                warn!("Unscannable file {}: {}", path.display(), e);
                ScanFailure {
                    path: path.clone(),
                    reason: e.to_string(),
                }
            })
        })
        .collect();

    let mut records = Vec::with_capacity(captured.len());
    let mut failures = Vec::new();
    for item in captured {
        match item {
            Ok(record) => records.push(record),
            Err(failure) => failures.push(failure),
        }
    }
    records.sort_by(|a, b| a.path.cmp(&b.path));
    failures.sort_by(|a, b| a.path.cmp(&b.path));
    (records, failures)
}

pub fn capture_record(path: &Path, full_hash: bool) -> io::Result<FileRecord> {
    let metadata = fs::metadata(path)?;
    if !metadata.is_file() {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "not a regular file"));
    }

    let modified = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);

    let fingerprint = xxhash::fingerprint_file(path)?;
    let content_hash = if full_hash {
        Some(xxhash::content_hash(path)?)
    } else {
        None
    };

    Ok(FileRecord {
        path: path.to_path_buf(),
        size: metadata.len(),
        modified,
        extension: extension_of(path),
        head: fingerprint.head,
        fingerprint: fingerprint.hash,
        content_hash,
    })
}

pub fn extension_of(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if let Some(compound) = COMPOUND_EXTENSIONS
        .iter()
        .find(|ext| name.ends_with(&format!(".{}", ext)) && name.len() > ext.len() + 1)
    {
        return compound.to_string();
    }
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of(Path::new("/a/Report.PDF")), "pdf");
        assert_eq!(extension_of(Path::new("/a/site.tar.gz")), "tar.gz");
        assert_eq!(extension_of(Path::new("/a/.bashrc")), "");
        assert_eq!(extension_of(Path::new("/a/README")), "");
    }

    #[test]
    fn test_capture_records_reports_missing_files() {
        let tmp = tempfile::tempdir().unwrap();
        let present = tmp.path().join("present.txt");
        fs::write(&present, "hello world").unwrap();
        let missing = tmp.path().join("missing.txt");

        let (records, failures) = capture_records(&[missing.clone(), present.clone()], true);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].path, present);
        assert_eq!(records[0].size, 11);
        assert_eq!(records[0].extension, "txt");
        assert_eq!(records[0].head, b"hello world".to_vec());
        assert!(records[0].content_hash.is_some());
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].path, missing);
    }
}
