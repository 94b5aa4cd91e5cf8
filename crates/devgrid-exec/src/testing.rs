//! Scripted fakes for [`CommandRunner`] and [`ProcessSpawner`].
//!
//! Enabled for this crate's tests and, via the `test-util` feature, for
//! downstream crates that want to drive the orchestration without real
//! agents.

use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::{ExecError, ExecResult};
use crate::process::{ExitInfo, ManagedProcess, ProcessSpawner, SpawnSpec};
use crate::runner::{CommandOutput, CommandRunner, CommandSpec, RunFuture};
use crate::signal::StopSignal;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A [`CommandRunner`] that answers from a script keyed by command line.
///
/// Responses for a command are consumed in order; the last one repeats.
/// Commands without a script fail with a dispatch error.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    script: Mutex<HashMap<String, VecDeque<ExecResult<CommandOutput>>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful run (any exit code) for `command_line`.
    pub fn on(self, command_line: &str, output: CommandOutput) -> Self {
        self.push(command_line, Ok(output));
        self
    }

    /// Queue a dispatch-level failure for `command_line`.
    pub fn on_error(self, command_line: &str, error: ExecError) -> Self {
        self.push(command_line, Err(error));
        self
    }

    /// Queue several responses at once.
    pub fn on_sequence(
        self,
        command_line: &str,
        responses: impl IntoIterator<Item = ExecResult<CommandOutput>>,
    ) -> Self {
        for response in responses {
            self.push(command_line, response);
        }
        self
    }

    /// Queue a response after construction, e.g. from a running test.
    pub fn push(&self, command_line: &str, response: ExecResult<CommandOutput>) {
        lock(&self.script)
            .entry(command_line.to_string())
            .or_default()
            .push_back(response);
    }

    /// Every command line run so far, in order.
    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self, command_line: &str) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|call| call.as_str() == command_line)
            .count()
    }

    fn next_response(&self, command: &CommandSpec) -> ExecResult<CommandOutput> {
        let key = command.to_string();
        lock(&self.calls).push(key.clone());

        let mut script = lock(&self.script);
        match script.get_mut(&key) {
            Some(queue) if queue.len() > 1 => queue
                .pop_front()
                .unwrap_or_else(|| Ok(CommandOutput::ok(""))),
            Some(queue) => match queue.front() {
                Some(response) => response.clone(),
                None => Ok(CommandOutput::ok("")),
            },
            None => Err(ExecError::Dispatch {
                program: command.program.clone(),
                reason: format!("no scripted response for `{key}`"),
            }),
        }
    }
}

impl CommandRunner for ScriptedRunner {
    fn run<'a>(&'a self, command: &'a CommandSpec) -> RunFuture<'a> {
        let response = self.next_response(command);
        Box::pin(async move { response })
    }
}

/// How a fake process reacts to signals.
#[derive(Debug, Clone)]
pub struct FakeBehavior {
    /// Signals refused for delivery.
    pub rejects: Vec<StopSignal>,
    /// Accepted signals that end the process.
    pub exits_on: Vec<StopSignal>,
}

impl Default for FakeBehavior {
    fn default() -> Self {
        Self {
            rejects: Vec::new(),
            exits_on: StopSignal::ESCALATION.to_vec(),
        }
    }
}

#[derive(Debug)]
struct FakeState {
    program: String,
    behavior: FakeBehavior,
    exit: Option<ExitInfo>,
    signals: Vec<StopSignal>,
}

/// A process that exists only in memory.
#[derive(Debug)]
pub struct FakeProcess {
    pid: u32,
    state: Arc<Mutex<FakeState>>,
}

impl ManagedProcess for FakeProcess {
    fn id(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn try_exit(&mut self) -> io::Result<Option<ExitInfo>> {
        Ok(lock(&self.state).exit)
    }

    fn signal(&mut self, signal: StopSignal) -> io::Result<()> {
        let mut state = lock(&self.state);
        if state.exit.is_some() {
            return Err(io::Error::new(io::ErrorKind::NotFound, "no such process"));
        }
        if state.behavior.rejects.contains(&signal) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("{signal} rejected"),
            ));
        }
        state.signals.push(signal);
        if state.behavior.exits_on.contains(&signal) {
            state.exit = Some(ExitInfo { code: None });
        }
        Ok(())
    }
}

/// A [`ProcessSpawner`] that hands out [`FakeProcess`]es and records
/// everything done to them.
#[derive(Debug)]
pub struct FakeSpawner {
    missing: HashSet<String>,
    behaviors: HashMap<String, FakeBehavior>,
    spawned: Mutex<Vec<SpawnSpec>>,
    processes: Mutex<Vec<Arc<Mutex<FakeState>>>>,
    next_pid: AtomicU32,
}

impl Default for FakeSpawner {
    fn default() -> Self {
        Self {
            missing: HashSet::new(),
            behaviors: HashMap::new(),
            spawned: Mutex::new(Vec::new()),
            processes: Mutex::new(Vec::new()),
            next_pid: AtomicU32::new(4000),
        }
    }
}

impl FakeSpawner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make spawning `program` fail with a dispatch error.
    pub fn fail_program(mut self, program: &str) -> Self {
        self.missing.insert(program.to_string());
        self
    }

    pub fn with_behavior(mut self, program: &str, behavior: FakeBehavior) -> Self {
        self.behaviors.insert(program.to_string(), behavior);
        self
    }

    pub fn spawned(&self) -> Vec<SpawnSpec> {
        lock(&self.spawned).clone()
    }

    pub fn spawn_count(&self) -> usize {
        lock(&self.spawned).len()
    }

    /// Signals accepted by every process spawned from `program`.
    pub fn signals_for(&self, program: &str) -> Vec<StopSignal> {
        self.states_for(program)
            .iter()
            .flat_map(|state| lock(state).signals.clone())
            .collect()
    }

    /// Whether any process spawned from `program` is still running.
    pub fn is_running(&self, program: &str) -> bool {
        self.states_for(program)
            .iter()
            .any(|state| lock(state).exit.is_none())
    }

    /// Simulate the processes of `program` exiting on their own.
    pub fn exit(&self, program: &str, code: Option<i32>) {
        for state in self.states_for(program) {
            let mut guard = lock(&state);
            if guard.exit.is_none() {
                guard.exit = Some(ExitInfo { code });
            }
        }
    }

    fn states_for(&self, program: &str) -> Vec<Arc<Mutex<FakeState>>> {
        lock(&self.processes)
            .iter()
            .filter(|state| lock(state).program == program)
            .cloned()
            .collect()
    }
}

impl ProcessSpawner for FakeSpawner {
    fn spawn(&self, spec: &SpawnSpec) -> ExecResult<Box<dyn ManagedProcess>> {
        let program = spec.command.program.clone();
        if self.missing.contains(&program) {
            return Err(ExecError::Dispatch {
                program,
                reason: "No such file or directory (os error 2)".to_string(),
            });
        }

        lock(&self.spawned).push(spec.clone());
        let state = Arc::new(Mutex::new(FakeState {
            behavior: self.behaviors.get(&program).cloned().unwrap_or_default(),
            program,
            exit: None,
            signals: Vec::new(),
        }));
        lock(&self.processes).push(state.clone());

        Ok(Box::new(FakeProcess {
            pid: self.next_pid.fetch_add(1, Ordering::Relaxed),
            state,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_runner_consumes_then_repeats() {
        let runner = ScriptedRunner::new().on_sequence(
            "nomad server members",
            [
                Ok(CommandOutput::failed(1, "connection refused")),
                Ok(CommandOutput::ok("node1 alive")),
            ],
        );
        let members = CommandSpec::new("nomad").args(["server", "members"]);

        assert_eq!(runner.run(&members).await.unwrap().code, 1);
        assert_eq!(runner.run(&members).await.unwrap().stdout, "node1 alive");
        assert_eq!(runner.run(&members).await.unwrap().stdout, "node1 alive");
        assert_eq!(runner.call_count("nomad server members"), 3);
    }

    #[tokio::test]
    async fn unscripted_command_is_dispatch_error() {
        let runner = ScriptedRunner::new();
        let err = runner.run(&CommandSpec::new("nomad")).await.unwrap_err();
        assert!(matches!(err, ExecError::Dispatch { .. }));
        assert_eq!(runner.calls(), vec!["nomad".to_string()]);
    }

    #[test]
    fn fake_spawner_tracks_processes() {
        let spawner = FakeSpawner::new();
        let spec = SpawnSpec::new(CommandSpec::new("nomad").arg("agent"));
        let mut process = spawner.spawn(&spec).unwrap();

        assert!(spawner.is_running("nomad"));
        process.signal(StopSignal::Interrupt).unwrap();
        assert!(!spawner.is_running("nomad"));
        assert_eq!(spawner.signals_for("nomad"), vec![StopSignal::Interrupt]);
        assert!(process.signal(StopSignal::Kill).is_err());
        assert_eq!(spawner.spawn_count(), 1);
    }
}
