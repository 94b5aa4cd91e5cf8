//! Error types for cluster orchestration.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use devgrid_core::{AgentRole, MissingDependency, Stage};
use devgrid_exec::ExitInfo;
use devgrid_health::PollError;

/// Result type alias for orchestration operations.
pub type DevgridResult<T> = Result<T, DevgridError>;

/// Terminal failures of a bootstrap, deployment or stop.
///
/// Every variant that belongs to a pipeline stage names it, so the message
/// alone tells the user where things went wrong.
#[derive(Debug, Clone, Error)]
pub enum DevgridError {
    #[error("{message}")]
    MissingDependency {
        missing: MissingDependency,
        message: String,
    },

    #[error("{stage}: failed to run `{command}`: {reason}")]
    Dispatch {
        stage: Stage,
        command: String,
        reason: String,
    },

    #[error("{stage}: `{command}` exited with code {code}: {}", stderr.trim())]
    NonZeroExit {
        stage: Stage,
        command: String,
        code: i32,
        stderr: String,
    },

    #[error("{stage}: status query failed {failures} times in a row: {last_error}")]
    RepeatedStatusQueryFailure {
        stage: Stage,
        failures: u32,
        last_error: String,
    },

    #[error("{stage}: not healthy after {attempts} attempts over {waited:?}")]
    HealthCheckExhausted {
        stage: Stage,
        attempts: u32,
        waited: Duration,
    },

    #[error("{stage}: {role} exited unexpectedly ({}), see {}", ExitInfo { code: *code }, log.display())]
    AgentExited {
        stage: Stage,
        role: AgentRole,
        code: Option<i32>,
        log: PathBuf,
    },

    #[error("{stage}: {reason}")]
    Aborted { stage: Stage, reason: String },

    #[error("failed to stop the {role}")]
    TerminationFailure { role: AgentRole },

    #[error("a cluster instance is already running or being stopped")]
    AlreadyRunning,

    #[error("{stage} cancelled")]
    Cancelled { stage: Stage },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl DevgridError {
    /// Map a failed poll onto the stage it belongs to.
    pub fn from_poll(stage: Stage, err: PollError) -> Self {
        match err {
            PollError::TimedOut { attempts, waited } => DevgridError::HealthCheckExhausted {
                stage,
                attempts,
                waited,
            },
            PollError::ErrorStreak {
                failures,
                last_error,
            } => DevgridError::RepeatedStatusQueryFailure {
                stage,
                failures,
                last_error,
            },
            PollError::Aborted(reason) => DevgridError::Aborted { stage, reason },
            PollError::Cancelled { .. } => DevgridError::Cancelled { stage },
        }
    }

    /// The stage that failed, if the error belongs to one.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            DevgridError::MissingDependency { .. } => Some(Stage::Prerequisites),
            DevgridError::Dispatch { stage, .. }
            | DevgridError::NonZeroExit { stage, .. }
            | DevgridError::RepeatedStatusQueryFailure { stage, .. }
            | DevgridError::HealthCheckExhausted { stage, .. }
            | DevgridError::AgentExited { stage, .. }
            | DevgridError::Aborted { stage, .. }
            | DevgridError::Cancelled { stage } => Some(*stage),
            DevgridError::TerminationFailure { .. } => Some(Stage::Teardown),
            DevgridError::AlreadyRunning | DevgridError::Config(_) => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, DevgridError::Cancelled { .. })
    }
}

impl From<anyhow::Error> for DevgridError {
    fn from(err: anyhow::Error) -> Self {
        DevgridError::Config(format!("{err:#}"))
    }
}
