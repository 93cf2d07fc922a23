use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::error::{Error, Result};
use crate::model::Action;
use crate::storage::{Database, JournalRow, NewJournalRow};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum JournalStatus {
    Planned,
    Applied,
    Failed,
    RolledBack,
}

impl JournalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JournalStatus::Planned => "Planned",
            JournalStatus::Applied => "Applied",
            JournalStatus::Failed => "Failed",
            JournalStatus::RolledBack => "RolledBack",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Planned" => Some(JournalStatus::Planned),
            "Applied" => Some(JournalStatus::Applied),
            "Failed" => Some(JournalStatus::Failed),
            "RolledBack" => Some(JournalStatus::RolledBack),
            _ => None,
        }
    }

    /// Allowed successor statuses within one sequence.
    pub fn can_become(&self, next: JournalStatus) -> bool {
        matches!(
            (self, next),
            (JournalStatus::Planned, JournalStatus::Applied)
                | (JournalStatus::Planned, JournalStatus::Failed)
                | (JournalStatus::Applied, JournalStatus::RolledBack)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JournalStatus::Failed | JournalStatus::RolledBack)
    }
}

impl fmt::Display for JournalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum JournalOperation {
    Move,
    Copy,
}

impl JournalOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            JournalOperation::Move => "Move",
            JournalOperation::Copy => "Copy",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Move" => Some(JournalOperation::Move),
            "Copy" => Some(JournalOperation::Copy),
            _ => None,
        }
    }

    pub fn from_action(action: Action) -> Option<Self> {
        match action {
            Action::Move => Some(JournalOperation::Move),
            Action::Copy => Some(JournalOperation::Copy),
            Action::Skip | Action::Suggest => None,
        }
    }
}

impl fmt::Display for JournalOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The rows of one planned operation, folded into its current state.
#[derive(Debug, Clone, PartialEq)]
pub struct Sequence {
    pub sequence_id: i64,
    pub operation: JournalOperation,
    pub source: PathBuf,
    pub dest: PathBuf,
    pub status: JournalStatus,
    /// Source checksum recorded when the operation was planned.
    pub planned_checksum: Option<String>,
    /// Destination checksum recorded when the operation was applied.
    pub applied_checksum: Option<String>,
    pub detail: Option<String>,
}

/// Validated view of the whole journal.
#[derive(Debug, Default)]
pub struct JournalState {
    sequences: BTreeMap<i64, Sequence>,
    latest_by_key: BTreeMap<(JournalOperation, PathBuf, PathBuf), i64>,
    rows: usize,
}

impl JournalState {
    /// Fold rows (in append order) into sequences, rejecting anything that
    /// could not have been written by a correct run.
    pub fn from_rows(rows: &[JournalRow]) -> Result<Self> {
        let mut state = JournalState {
            rows: rows.len(),
            ..JournalState::default()
        };
        let mut highest_opened = 0i64;

        for row in rows {
            let corrupt = |what: String| Error::JournalCorruption(format!("row {}: {}", row.id, what));
            let status = JournalStatus::parse(&row.status)
                .ok_or_else(|| corrupt(format!("unknown status '{}'", row.status)))?;
            let operation = JournalOperation::parse(&row.operation)
                .ok_or_else(|| corrupt(format!("unknown operation '{}'", row.operation)))?;
            let source = PathBuf::from(&row.source_path);
            let dest = PathBuf::from(&row.dest_path);

            if status == JournalStatus::Applied && row.checksum.is_none() {
                return Err(corrupt("Applied without checksum".to_string()));
            }

            match state.sequences.get_mut(&row.sequence_id) {
                None => {
                    if status != JournalStatus::Planned {
                        return Err(corrupt(format!(
                            "sequence {} starts with {} instead of Planned",
                            row.sequence_id, status
                        )));
                    }
                    if row.sequence_id <= highest_opened {
                        return Err(corrupt(format!(
                            "sequence id {} is not greater than {}",
                            row.sequence_id, highest_opened
                        )));
                    }
                    highest_opened = row.sequence_id;
                    state.latest_by_key.insert(
                        (operation, source.clone(), dest.clone()),
                        row.sequence_id,
                    );
                    state.sequences.insert(
                        row.sequence_id,
                        Sequence {
                            sequence_id: row.sequence_id,
                            operation,
                            source,
                            dest,
                            status,
                            planned_checksum: row.checksum.clone(),
                            applied_checksum: None,
                            detail: row.detail.clone(),
                        },
                    );
                }
                Some(seq) => {
                    if seq.operation != operation || seq.source != source || seq.dest != dest {
                        return Err(corrupt(format!(
                            "sequence {} changes its operation or paths",
                            row.sequence_id
                        )));
                    }
                    if !seq.status.can_become(status) {
                        return Err(corrupt(format!(
                            "sequence {} moves from {} to {}",
                            row.sequence_id, seq.status, status
                        )));
                    }
                    seq.status = status;
                    if status == JournalStatus::Applied {
                        seq.applied_checksum = row.checksum.clone();
                    }
                    seq.detail = row.detail.clone();
                }
            }
        }
        Ok(state)
    }

    /// Latest sequence for exactly this operation.
    pub fn lookup(&self, operation: JournalOperation, source: &Path, dest: &Path) -> Option<&Sequence> {
        self.latest_by_key
            .get(&(operation, source.to_path_buf(), dest.to_path_buf()))
            .and_then(|id| self.sequences.get(id))
    }

    pub fn sequences(&self) -> impl DoubleEndedIterator<Item = &Sequence> {
        self.sequences.values()
    }

    pub fn sequence_count(&self) -> usize {
        self.sequences.len()
    }

    pub fn row_count(&self) -> usize {
        self.rows
    }

    pub fn count_with_status(&self, status: JournalStatus) -> usize {
        self.sequences.values().filter(|s| s.status == status).count()
    }
}

/// Append-only operation journal. All writes go through one connection behind a mutex.
pub struct Journal {
    db: Mutex<Database>,
}

impl Journal {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            db: Mutex::new(Database::open(path)?),
        })
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self {
            db: Mutex::new(Database::open_in_memory()?),
        })
    }

    pub fn from_database(db: Database) -> Self {
        Self { db: Mutex::new(db) }
    }

    pub fn lock(&self) -> Result<MutexGuard<'_, Database>> {
        self.db
            .lock()
            .map_err(|_| Error::Other("journal lock poisoned".to_string()))
    }

    /// Read and validate every row.
    pub fn load(&self) -> Result<JournalState> {
        let rows = self.lock()?.journal_rows()?;
        let state = JournalState::from_rows(&rows)?;
        debug!(
            "Journal loaded: {} rows, {} sequences",
            state.row_count(),
            state.sequence_count()
        );
        Ok(state)
    }

    /// Sequences per current status, read from the latest row of each sequence
    /// without folding and validating the whole journal.
    pub fn status_counts(&self) -> Result<BTreeMap<JournalStatus, usize>> {
        let rows = self.lock()?.latest_journal_rows()?;
        let mut counts = BTreeMap::new();
        for row in rows {
            let status = JournalStatus::parse(&row.status).ok_or_else(|| {
                Error::JournalCorruption(format!("row {}: unknown status '{}'", row.id, row.status))
            })?;
            *counts.entry(status).or_insert(0) += 1;
        }
        Ok(counts)
    }

    /// Open a new sequence with a Planned row. Returns its sequence id.
    pub fn begin(
        &self,
        operation: JournalOperation,
        source: &Path,
        dest: &Path,
        source_checksum: Option<&str>,
    ) -> Result<i64> {
        let db = self.lock()?;
        let sequence_id = db.next_sequence_id()?;
        db.append_journal_entry(&NewJournalRow {
            sequence_id,
            operation: operation.as_str(),
            source_path: &source.to_string_lossy(),
            dest_path: &dest.to_string_lossy(),
            status: JournalStatus::Planned.as_str(),
            checksum: source_checksum,
            detail: None,
        })?;
        Ok(sequence_id)
    }

    /// Append a transition for an existing sequence.
    pub fn record(
        &self,
        sequence: (i64, JournalOperation, &Path, &Path),
        status: JournalStatus,
        checksum: Option<&str>,
        detail: Option<&str>,
    ) -> Result<()> {
        let (sequence_id, operation, source, dest) = sequence;
        self.lock()?.append_journal_entry(&NewJournalRow {
            sequence_id,
            operation: operation.as_str(),
            source_path: &source.to_string_lossy(),
            dest_path: &dest.to_string_lossy(),
            status: status.as_str(),
            checksum,
            detail,
        })?;
        Ok(())
    }
}
