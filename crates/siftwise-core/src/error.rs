use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Rules file error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Missing artifact: {}", .0.display())]
    MissingArtifact(PathBuf),

    #[error("Journal corruption: {0}")]
    JournalCorruption(String),

    #[error("{count} plan collision(s) exceeded the suffix cap")]
    PlanCollision { count: usize },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Configuration problems are reported before any artifact is written.
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::Config(_) | Error::InvalidConfig(_) | Error::Toml(_))
    }

    /// Process exit status for the CLI.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Config(_) | Error::InvalidConfig(_) | Error::Toml(_) => 2,
            Error::JournalCorruption(_) => 3,
            Error::PlanCollision { .. } => 4,
            _ => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
