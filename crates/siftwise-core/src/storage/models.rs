/// One row of `journal_entry`, exactly as stored. Strings are not trusted until
/// the journal has been validated.
#[derive(Debug, Clone, PartialEq)]
pub struct JournalRow {
    pub id: i64,
    pub sequence_id: i64,
    pub operation: String,
    pub source_path: String,
    pub dest_path: String,
    pub status: String,
    pub recorded_at: String,
    pub checksum: Option<String>,
    pub detail: Option<String>,
}

/// A journal row about to be appended.
#[derive(Debug, Clone)]
pub struct NewJournalRow<'a> {
    pub sequence_id: i64,
    pub operation: &'a str,
    pub source_path: &'a str,
    pub dest_path: &'a str,
    pub status: &'a str,
    pub checksum: Option<&'a str>,
    pub detail: Option<&'a str>,
}

/// Audit record of one classification decision for one path in one pass.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRecord {
    pub pass_id: u32,
    pub source_path: String,
    pub label: String,
    pub confidence: f64,
    pub action: String,
    pub is_residual: bool,
    /// Whether the decision replaced the live mapping entry.
    pub accepted: bool,
}
