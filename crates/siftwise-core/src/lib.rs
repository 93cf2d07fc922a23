pub mod analysis;
pub mod classify;
pub mod config;
pub mod engine;
pub mod error;
pub mod execute;
pub mod hasher;
pub mod model;
pub mod plan;
pub mod progress;
pub mod scanner;
pub mod state;
pub mod storage;

pub use config::AppConfig;
pub use engine::{DraftOptions, DraftResult, Review, SiftEngine};
pub use error::Error;
pub use model::{Action, Classification, FileRecord, Mapping, MappingEntry};
pub use progress::{ProgressReporter, SilentReporter};
