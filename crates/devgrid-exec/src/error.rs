//! Error types for command execution and process management.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type alias for exec operations.
pub type ExecResult<T> = Result<T, ExecError>;

/// Errors raised before a command produced an exit code.
#[derive(Debug, Clone, Error)]
pub enum ExecError {
    /// The program could not be started at all.
    #[error("failed to start `{program}`: {reason}")]
    Dispatch { program: String, reason: String },

    #[error("`{command}` did not finish within {timeout:?}")]
    TimedOut { command: String, timeout: Duration },

    #[error("failed to open log file {}: {reason}", path.display())]
    LogFile { path: PathBuf, reason: String },
}
