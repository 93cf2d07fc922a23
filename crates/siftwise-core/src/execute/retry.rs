use std::io;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::ExecutionConfig;

/// Retry behaviour for file system operations.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Backoff multiplier (exponential)
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::from(&ExecutionConfig::default())
    }
}

impl From<&ExecutionConfig> for RetryConfig {
    fn from(config: &ExecutionConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms.max(config.initial_backoff_ms)),
            backoff_multiplier: 2.0,
        }
    }
}

/// Errors worth another attempt: interruptions, timeouts and sharing/lock conflicts.
pub fn is_transient(err: &io::Error) -> bool {
    match err.kind() {
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => true,
        _ => match err.raw_os_error() {
            // EBUSY, EAGAIN
            #[cfg(unix)]
            Some(16) | Some(11) => true,
            // ERROR_SHARING_VIOLATION, ERROR_LOCK_VIOLATION
            #[cfg(windows)]
            Some(32) | Some(33) => true,
            _ => false,
        },
    }
}

/// Run `operation`, retrying transient failures with exponential backoff.
pub fn with_retry<T, F>(operation_name: &str, config: &RetryConfig, mut operation: F) -> io::Result<T>
where
    F: FnMut() -> io::Result<T>,
{
    let mut attempts = 0;
    let mut backoff = config.initial_backoff;

    loop {
        match operation() {
            Ok(result) => {
                if attempts > 0 {
                    debug!("{} succeeded after {} retries", operation_name, attempts);
                }
                return Ok(result);
            }
            Err(e) if !is_transient(&e) => return Err(e),
            Err(e) => {
                attempts += 1;
                if attempts > config.max_retries {
                    warn!(
                        "{} failed after {} attempts: {}",
                        operation_name, config.max_retries, e
                    );
                    return Err(e);
                }

                warn!(
                    "{} attempt {}/{} failed: {}. Retrying in {:?}",
                    operation_name, attempts, config.max_retries, e, backoff
                );
                thread::sleep(backoff);

                backoff = Duration::from_millis(
                    ((backoff.as_millis() as f64 * config.backoff_multiplier) as u64)
                        .min(config.max_backoff.as_millis() as u64),
                );
            }
        }
    }
}
