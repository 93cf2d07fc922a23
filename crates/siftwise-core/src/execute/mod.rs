pub mod engine;
pub mod fileops;
pub mod journal;
pub mod retry;
pub mod undo;

pub use engine::{execute_mapping, ExecutionError, ExecutionReport, PlannedOp};
pub use journal::{Journal, JournalOperation, JournalState, JournalStatus, Sequence};
pub use retry::RetryConfig;
pub use undo::{undo_all, UndoReport};
