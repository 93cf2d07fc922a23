use rayon::prelude::*;
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::fileops::{copy_new, move_file};
use super::journal::{Journal, JournalOperation, JournalStatus, Sequence};
use super::retry::{with_retry, RetryConfig};
use crate::error::Result;
use crate::hasher::checksum::{file_checksum, matches_checksum};
use crate::model::{Action, Mapping};
use crate::progress::ProgressReporter;

#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("source missing: {}", .0.display())]
    SourceMissing(PathBuf),

    #[error("destination already exists: {}", .0.display())]
    DestinationOccupied(PathBuf),

    #[error("source changed since it was planned: {}", .0.display())]
    SourceChanged(PathBuf),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// One Move/Copy to perform.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedOp {
    pub operation: JournalOperation,
    pub source: PathBuf,
    pub dest: PathBuf,
    /// Planned sequence to resume, with its recorded source checksum.
    pub resume: Option<(i64, Option<String>)>,
}

#[derive(Debug, Clone, PartialEq)]
enum OpOutcome {
    Applied,
    Failed(String),
    NotDispatched,
}

#[derive(Debug, Default)]
pub struct ExecutionReport {
    pub applied: usize,
    /// Entries whose latest journal record is already Applied.
    pub already_applied: usize,
    pub resumed: usize,
    pub failed: Vec<(PathBuf, String)>,
    /// Operations left undispatched after cancellation.
    pub not_dispatched: usize,
    pub what_if: bool,
    /// In what-if mode: the operations that would run.
    pub pending: Vec<PlannedOp>,
}

impl ExecutionReport {
    pub fn cancelled(&self) -> bool {
        self.not_dispatched > 0
    }
}

/// Operations the mapping asks for, matched against the journal.
pub fn planned_ops(mapping: &Mapping, journal: &Journal) -> Result<(Vec<PlannedOp>, usize)> {
    let state = journal.load()?;
    let mut ops = Vec::new();
    let mut already_applied = 0;

    for entry in mapping.iter() {
        let (operation, dest) = match (JournalOperation::from_action(entry.action), &entry.target_path) {
            (Some(op), Some(dest)) => (op, dest),
            _ => continue,
        };
        let resume = match state.lookup(operation, &entry.source_path, dest) {
            Some(Sequence {
                status: JournalStatus::Applied,
                ..
            }) => {
                already_applied += 1;
                continue;
            }
            Some(seq) if seq.status == JournalStatus::Planned => {
                Some((seq.sequence_id, seq.planned_checksum.clone()))
            }
            _ => None,
        };
        ops.push(PlannedOp {
            operation,
            source: entry.source_path.clone(),
            dest: dest.clone(),
            resume,
        });
    }
    Ok((ops, already_applied))
}

/// Apply every Move/Copy entry of `mapping` through the journal.
///
/// Operations are grouped by destination directory; groups run in parallel and
/// each group runs in order. Failed entries are turned back into residual Skips.
pub fn execute_mapping(
    mapping: &mut Mapping,
    journal: &Journal,
    retry: &RetryConfig,
    what_if: bool,
    cancel: &AtomicBool,
    reporter: &dyn ProgressReporter,
) -> Result<ExecutionReport> {
    let (ops, already_applied) = planned_ops(mapping, journal)?;
    let mut report = ExecutionReport {
        already_applied,
        what_if,
        ..ExecutionReport::default()
    };

    if what_if {
        info!(
            "What-if: {} operations would run, {} already applied",
            ops.len(),
            already_applied
        );
        report.pending = ops;
        return Ok(report);
    }

    let mut groups: BTreeMap<PathBuf, Vec<PlannedOp>> = BTreeMap::new();
    for op in ops {
        let dir = op.dest.parent().map(Path::to_path_buf).unwrap_or_default();
        groups.entry(dir).or_default().push(op);
    }
    let total: usize = groups.values().map(Vec::len).sum();
    report.resumed = groups.values().flatten().filter(|op| op.resume.is_some()).count();
    reporter.on_execute_start(total);
    let started = Instant::now();
    let done = AtomicUsize::new(0);

    let results: Vec<(PlannedOp, OpOutcome)> = groups
        .into_par_iter()
        .map(|(_, group)| {
            let mut outcomes = Vec::with_capacity(group.len());
            for op in group {
                if cancel.load(Ordering::Relaxed) {
                    outcomes.push((op, OpOutcome::NotDispatched));
                    continue;
                }
                let outcome = run_op(&op, journal, retry);
                reporter.on_execute_progress(done.fetch_add(1, Ordering::Relaxed) + 1, total);
                outcomes.push((op, outcome));
            }
            outcomes
        })
        .collect::<Vec<_>>()
        .into_iter()
        .flatten()
        .collect();

    for (op, outcome) in results {
        match outcome {
            OpOutcome::Applied => report.applied += 1,
            OpOutcome::NotDispatched => report.not_dispatched += 1,
            OpOutcome::Failed(reason) => {
                if let Some(mut entry) = mapping.get(&op.source).cloned() {
                    entry.action = Action::Skip;
                    entry.target_path = None;
                    entry.is_residual = true;
                    entry.reason = format!("execution failed: {}", reason);
                    mapping.replace(entry);
                }
                report.failed.push((op.source, reason));
            }
        }
    }
    report.failed.sort();

    reporter.on_execute_complete(report.applied, report.failed.len(), started.elapsed().as_secs_f64());
    info!(
        "Execution finished: {} applied, {} already applied, {} failed, {} not dispatched",
        report.applied,
        report.already_applied,
        report.failed.len(),
        report.not_dispatched
    );
    Ok(report)
}

fn run_op(op: &PlannedOp, journal: &Journal, retry: &RetryConfig) -> OpOutcome {
    let (sequence_id, planned_checksum) = match &op.resume {
        Some((id, checksum)) => (*id, checksum.clone()),
        None => {
            let checksum = file_checksum(&op.source).ok();
            match journal.begin(op.operation, &op.source, &op.dest, checksum.as_deref()) {
                Ok(id) => (id, checksum),
                Err(e) => {
                    error!("Could not journal {}: {}", op.source.display(), e);
                    return OpOutcome::Failed(format!("journal unavailable: {}", e));
                }
            }
        }
    };
    let sequence = (sequence_id, op.operation, op.source.as_path(), op.dest.as_path());

    let result = if op.resume.is_some() {
        resume(op, planned_checksum.as_deref(), retry)
    } else {
        apply(op, planned_checksum.as_deref(), retry)
    };

    let recorded = match &result {
        Ok(dest_checksum) => {
            debug!("{} {} -> {}", op.operation, op.source.display(), op.dest.display());
            journal.record(sequence, JournalStatus::Applied, Some(dest_checksum.as_str()), None)
        }
        Err(e) => {
            warn!("{} {} failed: {}", op.operation, op.source.display(), e);
            journal.record(sequence, JournalStatus::Failed, None, Some(e.to_string().as_str()))
        }
    };
    if let Err(e) = recorded {
        error!("Could not journal outcome of {}: {}", op.source.display(), e);
    }

    match result {
        Ok(_) => OpOutcome::Applied,
        Err(e) => OpOutcome::Failed(e.to_string()),
    }
}

/// Perform the operation. Returns the destination checksum.
fn apply(op: &PlannedOp, planned_checksum: Option<&str>, retry: &RetryConfig) -> std::result::Result<String, ExecutionError> {
    if !op.source.exists() {
        return Err(ExecutionError::SourceMissing(op.source.clone()));
    }
    if op.dest.exists() {
        return Err(ExecutionError::DestinationOccupied(op.dest.clone()));
    }
    if let Some(expected) = planned_checksum {
        if !matches_checksum(&op.source, expected) {
            return Err(ExecutionError::SourceChanged(op.source.clone()));
        }
    }

    let name = format!("{} {}", op.operation, op.source.display());
    match op.operation {
        JournalOperation::Move => with_retry(&name, retry, || move_file(&op.source, &op.dest))?,
        JournalOperation::Copy => {
            with_retry(&name, retry, || copy_new(&op.source, &op.dest))?;
        }
    }
    Ok(file_checksum(&op.dest)?)
}

/// Continue a sequence that was planned but never closed.
fn resume(op: &PlannedOp, planned_checksum: Option<&str>, retry: &RetryConfig) -> std::result::Result<String, ExecutionError> {
    if let Some(expected) = planned_checksum {
        if matches_checksum(&op.dest, expected) {
            let source_present = op.source.exists();
            match op.operation {
                JournalOperation::Copy => {
                    debug!("Resumed copy already done: {}", op.dest.display());
                    return Ok(expected.to_string());
                }
                JournalOperation::Move if !source_present => {
                    debug!("Resumed move already done: {}", op.dest.display());
                    return Ok(expected.to_string());
                }
                JournalOperation::Move if matches_checksum(&op.source, expected) => {
                    // interrupted cross-device move: the copy is complete
                    std::fs::remove_file(&op.source)?;
                    return Ok(expected.to_string());
                }
                JournalOperation::Move => {}
            }
        }
    }
    apply(op, planned_checksum, retry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MappingEntry;
    use crate::progress::SilentReporter;
    use std::fs;

    fn entry(src: &Path, dst: &Path, action: Action) -> MappingEntry {
        MappingEntry {
            source_path: src.to_path_buf(),
            label: "documents".into(),
            confidence: 0.9,
            action,
            target_path: Some(dst.to_path_buf()),
            is_residual: false,
            rule_id: None,
            reason: String::new(),
            pass_id: 1,
        }
    }

    #[test]
    fn test_execute_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("in/a.txt");
        let copy_src = dir.path().join("in/b.txt");
        fs::create_dir_all(src.parent().unwrap()).unwrap();
        fs::write(&src, "alpha").unwrap();
        fs::write(&copy_src, "beta").unwrap();
        let dst = dir.path().join("out/Documents/a.txt");
        let copy_dst = dir.path().join("out/Documents/b.txt");

        let mut mapping = Mapping::from_entries(vec![
            entry(&src, &dst, Action::Move),
            entry(&copy_src, &copy_dst, Action::Copy),
        ]);
        let journal = Journal::in_memory().unwrap();
        let cancel = AtomicBool::new(false);
        let retry = RetryConfig::default();

        let first = execute_mapping(&mut mapping, &journal, &retry, false, &cancel, &SilentReporter).unwrap();
        assert_eq!(first.applied, 2);
        assert!(!src.exists());
        assert_eq!(fs::read_to_string(&dst).unwrap(), "alpha");
        assert!(copy_src.exists());
        assert_eq!(fs::read_to_string(&copy_dst).unwrap(), "beta");

        let second = execute_mapping(&mut mapping, &journal, &retry, false, &cancel, &SilentReporter).unwrap();
        assert_eq!(second.applied, 0);
        assert_eq!(second.already_applied, 2);
        assert_eq!(journal.load().unwrap().row_count(), 4);
    }

    #[test]
    fn test_what_if_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.txt");
        fs::write(&src, "alpha").unwrap();
        let dst = dir.path().join("out/a.txt");
        let mut mapping = Mapping::from_entries(vec![entry(&src, &dst, Action::Move)]);
        let journal = Journal::in_memory().unwrap();

        let report = execute_mapping(
            &mut mapping,
            &journal,
            &RetryConfig::default(),
            true,
            &AtomicBool::new(false),
            &SilentReporter,
        )
        .unwrap();
        assert_eq!(report.pending.len(), 1);
        assert!(src.exists());
        assert!(!dst.exists());
        assert_eq!(journal.load().unwrap().row_count(), 0);
    }

    #[test]
    fn test_failure_marks_entry_residual() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.txt");
        fs::write(&src, "alpha").unwrap();
        let dst = dir.path().join("out/a.txt");
        fs::create_dir_all(dst.parent().unwrap()).unwrap();
        fs::write(&dst, "someone else's").unwrap();
        let mut mapping = Mapping::from_entries(vec![entry(&src, &dst, Action::Move)]);
        let journal = Journal::in_memory().unwrap();

        let report = execute_mapping(
            &mut mapping,
            &journal,
            &RetryConfig::default(),
            false,
            &AtomicBool::new(false),
            &SilentReporter,
        )
        .unwrap();
        assert_eq!(report.failed.len(), 1);
        assert_eq!(fs::read_to_string(&dst).unwrap(), "someone else's");
        let e = mapping.get(&src).unwrap();
        assert_eq!(e.action, Action::Skip);
        assert!(e.is_residual);
        assert!(e.reason.starts_with("execution failed"));
        assert_eq!(journal.load().unwrap().count_with_status(JournalStatus::Failed), 1);
    }

    #[test]
    fn test_cancelled_run_dispatches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.txt");
        fs::write(&src, "alpha").unwrap();
        let mut mapping = Mapping::from_entries(vec![entry(&src, &dir.path().join("o/a.txt"), Action::Move)]);
        let journal = Journal::in_memory().unwrap();
        let report = execute_mapping(
            &mut mapping,
            &journal,
            &RetryConfig::default(),
            false,
            &AtomicBool::new(true),
            &SilentReporter,
        )
        .unwrap();
        assert!(report.cancelled());
        assert!(src.exists());
        assert_eq!(journal.load().unwrap().row_count(), 0);
    }
}
