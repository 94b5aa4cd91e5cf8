//! Run-to-completion command execution.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use std::time::Duration;

use tracing::debug;

use crate::error::{ExecError, ExecResult};

/// A program plus its argument vector. No shell is involved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " {arg:?}")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

/// Exit code and captured streams of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, or -1 if the process was terminated by a signal.
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// A zero-exit output with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// A failed output with the given exit code and stderr.
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Boxed future returned by [`CommandRunner::run`].
pub type RunFuture<'a> = Pin<Box<dyn Future<Output = ExecResult<CommandOutput>> + Send + 'a>>;

/// Runs a command to completion. Injected for testability.
pub trait CommandRunner: Send + Sync {
    fn run<'a>(&'a self, command: &'a CommandSpec) -> RunFuture<'a>;
}

/// [`CommandRunner`] backed by `tokio::process`.
#[derive(Debug, Clone, Default)]
pub struct TokioRunner {
    timeout: Option<Duration>,
}

impl TokioRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kill and fail any command that runs longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

impl CommandRunner for TokioRunner {
    fn run<'a>(&'a self, command: &'a CommandSpec) -> RunFuture<'a> {
        Box::pin(async move {
            let mut cmd = tokio::process::Command::new(&command.program);
            cmd.args(&command.args)
                .stdin(Stdio::null())
                .kill_on_drop(true);

            let result = match self.timeout {
                Some(timeout) => tokio::time::timeout(timeout, cmd.output())
                    .await
                    .map_err(|_| ExecError::TimedOut {
                        command: command.to_string(),
                        timeout,
                    })?,
                None => cmd.output().await,
            };

            let output = result.map_err(|e| ExecError::Dispatch {
                program: command.program.clone(),
                reason: e.to_string(),
            })?;

            let code = output.status.code().unwrap_or(-1);
            debug!(%command, code, "command finished");

            Ok(CommandOutput {
                code,
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        })
    }
}

/// Whether `program --version` can be run and exits 0.
pub async fn is_program_present(runner: &dyn CommandRunner, program: &str) -> bool {
    let probe = CommandSpec::new(program).arg("--version");
    match runner.run(&probe).await {
        Ok(output) => output.success(),
        Err(e) => {
            debug!(%program, error = %e, "program not available");
            false
        }
    }
}
