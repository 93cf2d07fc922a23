use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

use super::fileops::move_file;
use super::journal::{Journal, JournalOperation, JournalStatus, Sequence};
use super::retry::{with_retry, RetryConfig};
use crate::error::Result;
use crate::hasher::checksum::{file_checksum, matches_checksum};
use crate::progress::ProgressReporter;

#[derive(Debug, Default)]
pub struct UndoReport {
    pub rolled_back: usize,
    /// Planned leftovers that never happened, closed as Failed.
    pub closed: usize,
    /// Sequences left alone, with the reason.
    pub conflicts: Vec<(PathBuf, String)>,
    pub cancelled: bool,
}

enum Step {
    RolledBack,
    Closed,
    Conflict(String),
}

/// Reverse every applied operation, newest first.
///
/// A sequence whose files no longer look the way the journal says is reported
/// as a conflict and left untouched; the rest of the undo carries on.
pub fn undo_all(
    journal: &Journal,
    retry: &RetryConfig,
    cancel: &AtomicBool,
    reporter: &dyn ProgressReporter,
) -> Result<UndoReport> {
    let state = journal.load()?;
    let open: Vec<&Sequence> = state
        .sequences()
        .rev()
        .filter(|s| matches!(s.status, JournalStatus::Applied | JournalStatus::Planned))
        .collect();

    let mut report = UndoReport::default();
    reporter.on_undo_start(open.len());
    for (done, seq) in open.iter().enumerate() {
        if cancel.load(Ordering::Relaxed) {
            report.cancelled = true;
            break;
        }
        let step = match seq.status {
            JournalStatus::Applied => undo_applied(journal, seq, retry)?,
            _ => undo_planned(journal, seq, retry)?,
        };
        match step {
            Step::RolledBack => report.rolled_back += 1,
            Step::Closed => report.closed += 1,
            Step::Conflict(reason) => {
                warn!("Undo conflict for {}: {}", seq.dest.display(), reason);
                report.conflicts.push((seq.dest.clone(), reason));
            }
        }
        reporter.on_undo_progress(done + 1, open.len());
    }

    info!(
        "Undo finished: {} rolled back, {} closed, {} conflicts",
        report.rolled_back,
        report.closed,
        report.conflicts.len()
    );
    Ok(report)
}

fn key(seq: &Sequence) -> (i64, JournalOperation, &std::path::Path, &std::path::Path) {
    (seq.sequence_id, seq.operation, seq.source.as_path(), seq.dest.as_path())
}

fn undo_applied(journal: &Journal, seq: &Sequence, retry: &RetryConfig) -> Result<Step> {
    let checksum = match &seq.applied_checksum {
        Some(c) => c.as_str(),
        None => return Ok(Step::Conflict("no applied checksum".to_string())),
    };

    if !seq.dest.exists() {
        // restored by an earlier undo that did not get to record it
        if matches_checksum(&seq.source, checksum) {
            journal.record(key(seq), JournalStatus::RolledBack, None, Some("already restored"))?;
            return Ok(Step::RolledBack);
        }
        return Ok(Step::Conflict("destination missing".to_string()));
    }
    if !matches_checksum(&seq.dest, checksum) {
        return Ok(Step::Conflict("destination changed since it was applied".to_string()));
    }

    match restore(seq, checksum, retry) {
        Ok(()) => {
            journal.record(key(seq), JournalStatus::RolledBack, None, None)?;
            debug!("Rolled back {} -> {}", seq.dest.display(), seq.source.display());
            Ok(Step::RolledBack)
        }
        Err(reason) => Ok(Step::Conflict(reason)),
    }
}

fn restore(seq: &Sequence, checksum: &str, retry: &RetryConfig) -> std::result::Result<(), String> {
    let name = format!("undo {}", seq.dest.display());
    if seq.source.exists() {
        let identical = seq.operation == JournalOperation::Copy && matches_checksum(&seq.source, checksum);
        if !identical {
            return Err("source path is occupied".to_string());
        }
        return with_retry(&name, retry, || fs::remove_file(&seq.dest)).map_err(|e| e.to_string());
    }
    with_retry(&name, retry, || move_file(&seq.dest, &seq.source)).map_err(|e| e.to_string())
}

/// A sequence that was planned but never closed: undo it if it happened,
/// otherwise close it as Failed.
fn undo_planned(journal: &Journal, seq: &Sequence, retry: &RetryConfig) -> Result<Step> {
    let planned = seq.planned_checksum.as_deref();
    let dest_matches = planned.map_or(false, |c| matches_checksum(&seq.dest, c));
    let source_present = seq.source.exists();
    let happened = dest_matches && (seq.operation == JournalOperation::Copy || !source_present);

    if happened {
        let checksum = match file_checksum(&seq.dest) {
            Ok(c) => c,
            Err(e) => return Ok(Step::Conflict(e.to_string())),
        };
        journal.record(key(seq), JournalStatus::Applied, Some(checksum.as_str()), Some("recovered by undo"))?;
        return match restore(seq, &checksum, retry) {
            Ok(()) => {
                journal.record(key(seq), JournalStatus::RolledBack, None, None)?;
                Ok(Step::RolledBack)
            }
            Err(reason) => Ok(Step::Conflict(reason)),
        };
    }

    if dest_matches && source_present {
        // interrupted cross-device move: drop the partial copy
        if let Err(e) = fs::remove_file(&seq.dest) {
            return Ok(Step::Conflict(e.to_string()));
        }
    }
    journal.record(key(seq), JournalStatus::Failed, None, Some("never applied; closed by undo"))?;
    Ok(Step::Closed)
}
