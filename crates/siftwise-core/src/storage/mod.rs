pub mod models;
pub mod queries;
pub mod sqlite;

pub use models::{HistoryRecord, JournalRow, NewJournalRow};
pub use sqlite::Database;
