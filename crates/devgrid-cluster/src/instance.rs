//! A bootstrapped (or bootstrapping) local cluster.

use tracing::{error, info};

use devgrid_core::{AgentRole, InstanceState};
use devgrid_exec::{ExitInfo, ProcessHandle, StopResult, TerminationPolicy};

use crate::error::{DevgridError, DevgridResult};

/// The two agent processes of one cluster.
///
/// Handles are attached as they are spawned, so a partially bootstrapped
/// instance can always be torn down.
#[derive(Debug)]
pub struct Instance {
    discovery: Option<ProcessHandle>,
    scheduler: Option<ProcessHandle>,
    state: InstanceState,
}

impl Default for Instance {
    fn default() -> Self {
        Self::new()
    }
}

impl Instance {
    pub fn new() -> Self {
        Self {
            discovery: None,
            scheduler: None,
            state: InstanceState::NotStarted,
        }
    }

    pub fn state(&self) -> InstanceState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: InstanceState) {
        self.state = state;
    }

    pub fn attach(&mut self, role: AgentRole, handle: ProcessHandle) {
        match role {
            AgentRole::Discovery => self.discovery = Some(handle),
            AgentRole::Scheduler => self.scheduler = Some(handle),
        }
    }

    pub fn handle(&self, role: AgentRole) -> Option<&ProcessHandle> {
        match role {
            AgentRole::Discovery => self.discovery.as_ref(),
            AgentRole::Scheduler => self.scheduler.as_ref(),
        }
    }

    pub fn pid(&self, role: AgentRole) -> Option<u32> {
        self.handle(role).and_then(ProcessHandle::pid)
    }

    /// The first agent found to have exited without being asked to.
    pub fn first_exited(&mut self) -> Option<(AgentRole, ExitInfo)> {
        let agents = [
            (AgentRole::Discovery, self.discovery.as_mut()),
            (AgentRole::Scheduler, self.scheduler.as_mut()),
        ];
        for (role, handle) in agents {
            let Some(handle) = handle else { continue };
            if !handle.was_signaled() && handle.has_exited() {
                if let Some(exit) = handle.exit_info() {
                    return Some((role, exit));
                }
            }
        }
        None
    }

    /// Terminate the scheduler, then the discovery agent.
    ///
    /// Both are attempted regardless of how the first one went.
    pub async fn stop(&mut self, policy: &TerminationPolicy) -> StopReport {
        self.state = InstanceState::Stopping;
        let scheduler = terminate(self.scheduler.as_mut(), policy).await;
        let discovery = terminate(self.discovery.as_mut(), policy).await;
        self.state = InstanceState::Stopped;

        let report = StopReport {
            scheduler,
            discovery,
        };
        if report.is_clean() {
            info!(?scheduler, ?discovery, "cluster stopped");
        } else {
            error!(?scheduler, ?discovery, "cluster did not stop cleanly");
        }
        report
    }
}

async fn terminate(handle: Option<&mut ProcessHandle>, policy: &TerminationPolicy) -> StopResult {
    match handle {
        Some(handle) => handle.terminate(policy).await,
        None => StopResult::NoInstanceRunning,
    }
}

/// Per-agent outcome of [`Instance::stop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopReport {
    pub scheduler: StopResult,
    pub discovery: StopResult,
}

impl StopReport {
    pub fn get(&self, role: AgentRole) -> StopResult {
        match role {
            AgentRole::Discovery => self.discovery,
            AgentRole::Scheduler => self.scheduler,
        }
    }

    /// Agents that were still running after termination.
    pub fn failed_roles(&self) -> Vec<AgentRole> {
        [AgentRole::Scheduler, AgentRole::Discovery]
            .into_iter()
            .filter(|role| self.get(*role) == StopResult::StopFailed)
            .collect()
    }

    pub fn is_clean(&self) -> bool {
        self.failed_roles().is_empty()
    }

    pub fn into_result(self) -> DevgridResult<()> {
        match self.failed_roles().first() {
            Some(role) => Err(DevgridError::TerminationFailure { role: *role }),
            None => Ok(()),
        }
    }
}
