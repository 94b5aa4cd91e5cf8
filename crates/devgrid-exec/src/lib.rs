//! devgrid-exec: command execution and child process lifecycle.
//!
//! Two seams, both injected so the orchestration layer can be tested
//! without real agents:
//!
//! ```text
//! CommandRunner   run to completion → exit code, stdout, stderr
//!   └── TokioRunner (optional per-command timeout)
//! ProcessSpawner  start a long-lived child → ManagedProcess
//!   └── TokioSpawner (stdout/stderr appended to a log file)
//! ```
//!
//! `ProcessHandle` owns one spawned process and implements escalating
//! termination: SIGINT, SIGQUIT, SIGKILL, stopping at the first signal the
//! OS accepts, then waiting for the exit with exponential backoff.

pub mod deadline;
pub mod error;
pub mod process;
pub mod runner;
pub mod signal;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use deadline::deadline_after;
pub use error::{ExecError, ExecResult};
pub use process::{
    ExitInfo, ManagedProcess, ProcessHandle, ProcessSpawner, SpawnSpec, StopResult,
    TerminationPolicy, TokioSpawner,
};
pub use runner::{CommandOutput, CommandRunner, CommandSpec, RunFuture, TokioRunner, is_program_present};
pub use signal::StopSignal;
