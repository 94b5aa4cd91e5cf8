//! Long-lived child processes and their termination.

use std::fmt;
use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use devgrid_core::config::TerminationConfig;
use devgrid_core::duration::{require_duration, require_nonzero_duration};

use crate::deadline::deadline_after;
use crate::error::{ExecError, ExecResult};
use crate::runner::CommandSpec;
use crate::signal::StopSignal;

/// How a process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitInfo {
    /// Exit code, `None` if the process was killed by a signal.
    pub code: Option<i32>,
}

impl fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "exit code {code}"),
            None => f.write_str("terminated by signal"),
        }
    }
}

/// A spawned OS process as seen by its owner.
pub trait ManagedProcess: Send + fmt::Debug {
    fn id(&self) -> Option<u32>;

    /// Non-blocking exit check. Reaps the process once it has exited.
    fn try_exit(&mut self) -> io::Result<Option<ExitInfo>>;

    /// Request delivery of `signal`. `Ok` means accepted, not exited.
    fn signal(&mut self, signal: StopSignal) -> io::Result<()>;
}

/// What to launch and where its output goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnSpec {
    pub command: CommandSpec,
    /// stdout and stderr are appended here; discarded when `None`.
    pub log_file: Option<PathBuf>,
}

impl SpawnSpec {
    pub fn new(command: CommandSpec) -> Self {
        Self {
            command,
            log_file: None,
        }
    }

    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }
}

/// Starts long-lived processes. Injected for testability.
pub trait ProcessSpawner: Send + Sync {
    fn spawn(&self, spec: &SpawnSpec) -> ExecResult<Box<dyn ManagedProcess>>;
}

/// [`ProcessSpawner`] backed by `tokio::process`.
///
/// Children are killed when their handle is dropped, so an abandoned
/// handle never leaves an agent running. On unix each child leads its own
/// process group.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSpawner;

impl ProcessSpawner for TokioSpawner {
    fn spawn(&self, spec: &SpawnSpec) -> ExecResult<Box<dyn ManagedProcess>> {
        let mut cmd = tokio::process::Command::new(&spec.command.program);
        cmd.args(&spec.command.args)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        // Own process group, so a terminal Ctrl-C is not delivered to the agents.
        #[cfg(unix)]
        cmd.process_group(0);

        match &spec.log_file {
            Some(path) => {
                let (stdout, stderr) = open_log(path)?;
                cmd.stdout(stdout).stderr(stderr);
            }
            None => {
                cmd.stdout(Stdio::null()).stderr(Stdio::null());
            }
        }

        let child = cmd.spawn().map_err(|e| ExecError::Dispatch {
            program: spec.command.program.clone(),
            reason: e.to_string(),
        })?;

        info!(pid = ?child.id(), command = %spec.command, "spawned process");
        Ok(Box::new(ChildProcess { child }))
    }
}

fn open_log(path: &Path) -> ExecResult<(Stdio, Stdio)> {
    let log_err = |e: io::Error| ExecError::LogFile {
        path: path.to_path_buf(),
        reason: e.to_string(),
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(log_err)?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(log_err)?;
    let clone = file.try_clone().map_err(log_err)?;
    Ok((Stdio::from(file), Stdio::from(clone)))
}

#[derive(Debug)]
struct ChildProcess {
    child: tokio::process::Child,
}

impl ManagedProcess for ChildProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    fn try_exit(&mut self) -> io::Result<Option<ExitInfo>> {
        Ok(self
            .child
            .try_wait()?
            .map(|status| ExitInfo { code: status.code() }))
    }

    #[cfg(unix)]
    fn signal(&mut self, signal: StopSignal) -> io::Result<()> {
        match self.child.id() {
            Some(pid) => crate::signal::send_signal(pid, signal),
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                "process has already been reaped",
            )),
        }
    }

    #[cfg(not(unix))]
    fn signal(&mut self, _signal: StopSignal) -> io::Result<()> {
        self.child.start_kill()
    }
}

/// Outcome of [`ProcessHandle::terminate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopResult {
    /// The process had already exited or been stopped; no signal was sent.
    NoInstanceRunning,
    Stopped,
    StopFailed,
}

/// Timing for post-signal exit detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminationPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// How long to wait for exit after the first accepted signal.
    pub grace: Duration,
    /// How long to wait after the forced SIGKILL.
    pub kill_grace: Duration,
    /// Send SIGKILL when the accepted signal did not end the process in time.
    pub escalate_on_timeout: bool,
}

impl Default for TerminationPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(1),
            grace: Duration::from_secs(10),
            kill_grace: Duration::from_secs(2),
            escalate_on_timeout: true,
        }
    }
}

impl TerminationPolicy {
    pub fn from_config(config: &TerminationConfig) -> anyhow::Result<Self> {
        Ok(Self {
            initial_backoff: require_nonzero_duration(
                "termination.initial_backoff",
                &config.initial_backoff,
            )?,
            max_backoff: require_duration("termination.max_backoff", &config.max_backoff)?,
            grace: require_duration("termination.grace", &config.grace)?,
            kill_grace: require_duration("termination.kill_grace", &config.kill_grace)?,
            escalate_on_timeout: config.escalate_on_timeout,
        })
    }
}

/// Exclusive ownership of one spawned process.
///
/// Liveness is one-way: once the process has exited or been signaled,
/// [`is_alive`](Self::is_alive) never reports `true` again.
#[derive(Debug)]
pub struct ProcessHandle {
    label: String,
    pid: Option<u32>,
    process: Box<dyn ManagedProcess>,
    exit: Option<ExitInfo>,
    signaled: bool,
}

impl ProcessHandle {
    /// Spawn a process and take ownership of it.
    pub fn spawn(
        spawner: &dyn ProcessSpawner,
        label: impl Into<String>,
        spec: &SpawnSpec,
    ) -> ExecResult<Self> {
        let process = spawner.spawn(spec)?;
        Ok(Self::from_process(label, process))
    }

    pub fn from_process(label: impl Into<String>, process: Box<dyn ManagedProcess>) -> Self {
        Self {
            label: label.into(),
            pid: process.id(),
            process,
            exit: None,
            signaled: false,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Exit status, if the exit has been observed.
    pub fn exit_info(&self) -> Option<ExitInfo> {
        self.exit
    }

    pub fn was_signaled(&self) -> bool {
        self.signaled
    }

    /// True iff the process has not exited and has not been signaled.
    pub fn is_alive(&mut self) -> bool {
        !self.signaled && !self.has_exited()
    }

    /// Whether the OS has reported the process as exited.
    pub fn has_exited(&mut self) -> bool {
        if self.exit.is_some() {
            return true;
        }
        match self.process.try_exit() {
            Ok(Some(exit)) => {
                debug!(process = %self.label, pid = ?self.pid, %exit, "process exited");
                self.exit = Some(exit);
                true
            }
            Ok(None) => false,
            Err(e) => {
                warn!(process = %self.label, pid = ?self.pid, error = %e, "failed to query process status");
                false
            }
        }
    }

    /// Stop the process with escalating signals.
    ///
    /// Tries SIGINT, SIGQUIT and SIGKILL in order until one is accepted, then
    /// waits for the exit with exponential backoff up to `policy.grace`.
    pub async fn terminate(&mut self, policy: &TerminationPolicy) -> StopResult {
        if !self.is_alive() {
            debug!(process = %self.label, "not running, nothing to stop");
            return StopResult::NoInstanceRunning;
        }

        let Some(accepted) = self.deliver_first_accepted() else {
            if self.has_exited() {
                self.signaled = true;
                return StopResult::Stopped;
            }
            error!(process = %self.label, pid = ?self.pid, "no termination signal was accepted");
            return StopResult::StopFailed;
        };
        self.signaled = true;

        if self.wait_for_exit(policy, policy.grace).await {
            info!(process = %self.label, pid = ?self.pid, signal = %accepted, "process stopped");
            return StopResult::Stopped;
        }

        if policy.escalate_on_timeout && accepted != StopSignal::Kill {
            warn!(
                process = %self.label,
                pid = ?self.pid,
                signal = %accepted,
                grace = ?policy.grace,
                "process still running after grace period, sending SIGKILL"
            );
            match self.process.signal(StopSignal::Kill) {
                Ok(()) => {
                    if self.wait_for_exit(policy, policy.kill_grace).await {
                        info!(process = %self.label, pid = ?self.pid, "process killed");
                        return StopResult::Stopped;
                    }
                }
                Err(e) => {
                    warn!(process = %self.label, pid = ?self.pid, error = %e, "SIGKILL rejected");
                }
            }
        }

        error!(process = %self.label, pid = ?self.pid, "process did not exit");
        StopResult::StopFailed
    }

    fn deliver_first_accepted(&mut self) -> Option<StopSignal> {
        for signal in StopSignal::ESCALATION {
            match self.process.signal(signal) {
                Ok(()) => {
                    debug!(process = %self.label, pid = ?self.pid, %signal, "signal accepted");
                    return Some(signal);
                }
                Err(e) => {
                    debug!(process = %self.label, pid = ?self.pid, %signal, error = %e, "signal rejected");
                }
            }
        }
        None
    }

    async fn wait_for_exit(&mut self, policy: &TerminationPolicy, limit: Duration) -> bool {
        let deadline = deadline_after(limit);
        let mut delay = policy.initial_backoff;
        loop {
            if self.has_exited() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            tokio::time::sleep(delay.min(deadline - now)).await;
            delay = delay.saturating_mul(2).min(policy.max_backoff);
        }
    }
}
