use super::models::*;
use super::sqlite::Database;
use rusqlite::{params, Result, Row};
use tracing::debug;

const JOURNAL_COLUMNS: &str =
    "id, sequence_id, operation, source_path, dest_path, status, recorded_at, checksum, detail";

fn journal_row(row: &Row<'_>) -> Result<JournalRow> {
    Ok(JournalRow {
        id: row.get(0)?,
        sequence_id: row.get(1)?,
        operation: row.get(2)?,
        source_path: row.get(3)?,
        dest_path: row.get(4)?,
        status: row.get(5)?,
        recorded_at: row.get(6)?,
        checksum: row.get(7)?,
        detail: row.get(8)?,
    })
}

impl Database {
    // ── Journal ──────────────────────────────────────────────────

    pub fn append_journal_entry(&self, entry: &NewJournalRow<'_>) -> Result<i64> {
        let now = chrono::Utc::now().to_rfc3339();
        self.connection().execute(
            "INSERT INTO journal_entry \
             (sequence_id, operation, source_path, dest_path, status, recorded_at, checksum, detail) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                entry.sequence_id,
                entry.operation,
                entry.source_path,
                entry.dest_path,
                entry.status,
                now,
                entry.checksum,
                entry.detail
            ],
        )?;
        Ok(self.connection().last_insert_rowid())
    }

    pub fn next_sequence_id(&self) -> Result<i64> {
        self.connection().query_row(
            "SELECT COALESCE(MAX(sequence_id), 0) + 1 FROM journal_entry",
            [],
            |row| row.get(0),
        )
    }

    /// Every journal row in append order.
    pub fn journal_rows(&self) -> Result<Vec<JournalRow>> {
        let mut stmt = self.connection().prepare(&format!(
            "SELECT {} FROM journal_entry ORDER BY id",
            JOURNAL_COLUMNS
        ))?;
        let rows = stmt.query_map([], journal_row)?.collect::<Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Latest row of each sequence, ordered by sequence id.
    pub fn latest_journal_rows(&self) -> Result<Vec<JournalRow>> {
        let mut stmt = self.connection().prepare(&format!(
            "SELECT {} FROM journal_latest ORDER BY sequence_id",
            JOURNAL_COLUMNS
        ))?;
        let rows = stmt.query_map([], journal_row)?.collect::<Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn journal_row_count(&self) -> Result<i64> {
        self.connection()
            .query_row("SELECT COUNT(*) FROM journal_entry", [], |row| row.get(0))
    }

    // ── Classification History ───────────────────────────────────

    pub fn insert_history_records(&self, records: &[HistoryRecord]) -> Result<usize> {
        let tx = self.connection().unchecked_transaction()?;
        {
            let now = chrono::Utc::now().to_rfc3339();
            let mut stmt = tx.prepare_cached(
                "INSERT INTO classification_history \
                 (pass_id, source_path, label, confidence, action, is_residual, accepted, recorded_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for record in records {
                stmt.execute(params![
                    record.pass_id,
                    record.source_path,
                    record.label,
                    record.confidence,
                    record.action,
                    record.is_residual,
                    record.accepted,
                    now
                ])?;
            }
        }
        tx.commit()?;
        debug!("Inserted {} classification history records", records.len());
        Ok(records.len())
    }

    /// History of one path, oldest first.
    pub fn history_for(&self, source_path: &str) -> Result<Vec<HistoryRecord>> {
        let mut stmt = self.connection().prepare(
            "SELECT pass_id, source_path, label, confidence, action, is_residual, accepted \
             FROM classification_history WHERE source_path = ?1 ORDER BY id",
        )?;
        let records = stmt
            .query_map(params![source_path], |row| {
                Ok(HistoryRecord {
                    pass_id: row.get(0)?,
                    source_path: row.get(1)?,
                    label: row.get(2)?,
                    confidence: row.get(3)?,
                    action: row.get(4)?,
                    is_residual: row.get(5)?,
                    accepted: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>>>()?;
        Ok(records)
    }

    pub fn history_count(&self) -> Result<i64> {
        self.connection()
            .query_row("SELECT COUNT(*) FROM classification_history", [], |row| row.get(0))
    }
}
