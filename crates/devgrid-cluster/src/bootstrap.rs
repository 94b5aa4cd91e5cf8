//! Cluster bootstrap: prerequisite check, agent launch, membership wait.

use tokio::sync::watch;
use tracing::{info, warn};

use devgrid_core::{AgentRole, DevgridConfig, InstanceState, MissingDependency, Stage};
use devgrid_exec::{CommandRunner, ProcessHandle, ProcessSpawner, SpawnSpec, is_program_present};
use devgrid_health::{PollError, PollOutcome, PollPolicy, membership_outcome, poll_until_ready};

use crate::agents;
use crate::error::{DevgridError, DevgridResult};
use crate::instance::Instance;

/// Tell the user which agent to install and where.
pub fn missing_dependency_message(config: &DevgridConfig, missing: MissingDependency) -> String {
    match missing {
        MissingDependency::Discovery => format!(
            "devgrid requires {} which is not present. See {} for instructions.",
            config.discovery.display_name, config.discovery.install_url
        ),
        MissingDependency::Scheduler => format!(
            "devgrid requires {} which is not present. See {} for instructions.",
            config.scheduler.display_name, config.scheduler.install_url
        ),
        MissingDependency::Both => format!(
            "devgrid requires {} and {} which are not present. See {} for links.",
            config.scheduler.display_name,
            config.discovery.display_name,
            config.cluster.install_guide
        ),
    }
}

/// Check that both agent binaries run. Spawns nothing.
pub async fn check_prerequisites(
    config: &DevgridConfig,
    runner: &dyn CommandRunner,
) -> DevgridResult<()> {
    let (discovery, scheduler) = tokio::join!(
        is_program_present(runner, &config.discovery.binary),
        is_program_present(runner, &config.scheduler.binary),
    );
    match MissingDependency::from_presence(discovery, scheduler) {
        None => Ok(()),
        Some(missing) => {
            let message = missing_dependency_message(config, missing);
            warn!(?missing, "agent binaries missing");
            Err(DevgridError::MissingDependency { missing, message })
        }
    }
}

/// Starts the agents of one instance and waits for the scheduler to report
/// a live server.
pub struct Bootstrapper<'a> {
    config: &'a DevgridConfig,
    runner: &'a dyn CommandRunner,
    spawner: &'a dyn ProcessSpawner,
    membership: &'a PollPolicy,
}

impl<'a> Bootstrapper<'a> {
    pub fn new(
        config: &'a DevgridConfig,
        runner: &'a dyn CommandRunner,
        spawner: &'a dyn ProcessSpawner,
        membership: &'a PollPolicy,
    ) -> Self {
        Self {
            config,
            runner,
            spawner,
            membership,
        }
    }

    /// Bring up `instance`.
    ///
    /// Handles are attached to `instance` as soon as each agent is spawned,
    /// so on error the caller still owns everything that was started.
    pub async fn run(
        &self,
        instance: &mut Instance,
        cancel: &mut watch::Receiver<bool>,
    ) -> DevgridResult<()> {
        check_prerequisites(self.config, self.runner).await?;

        instance.set_state(InstanceState::Starting);
        self.start_agent(instance, AgentRole::Discovery, &agents::discovery_agent(self.config), cancel)?;
        self.start_agent(instance, AgentRole::Scheduler, &agents::scheduler_agent(self.config), cancel)?;

        self.wait_for_membership(instance, cancel).await?;
        instance.set_state(InstanceState::Running);
        info!(
            discovery_pid = ?instance.pid(AgentRole::Discovery),
            scheduler_pid = ?instance.pid(AgentRole::Scheduler),
            "cluster is up"
        );
        Ok(())
    }

    fn start_agent(
        &self,
        instance: &mut Instance,
        role: AgentRole,
        spec: &SpawnSpec,
        cancel: &watch::Receiver<bool>,
    ) -> DevgridResult<()> {
        if *cancel.borrow() {
            return Err(DevgridError::Cancelled {
                stage: Stage::Bootstrap,
            });
        }
        let handle = ProcessHandle::spawn(self.spawner, role.to_string(), spec).map_err(|e| {
            DevgridError::Dispatch {
                stage: Stage::Bootstrap,
                command: spec.command.to_string(),
                reason: e.to_string(),
            }
        })?;
        info!(%role, pid = ?handle.pid(), log = ?spec.log_file, "agent started");
        instance.attach(role, handle);
        Ok(())
    }

    /// Poll the membership listing. An agent dying early ends the wait.
    async fn wait_for_membership(
        &self,
        instance: &mut Instance,
        cancel: &mut watch::Receiver<bool>,
    ) -> DevgridResult<()> {
        let members = agents::server_members(self.config);
        let members = &members;
        let runner = self.runner;
        let token = self.config.scheduler.ready_token.as_str();

        let result = poll_until_ready("membership", self.membership, cancel, || {
            let exited = instance.first_exited();
            async move {
                if let Some((role, exit)) = exited {
                    return PollOutcome::Fatal(format!("{role} exited ({exit})"));
                }
                membership_outcome(runner.run(members).await, token)
            }
        })
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(PollError::Aborted(reason)) => match instance.first_exited() {
                Some((role, exit)) => Err(DevgridError::AgentExited {
                    stage: Stage::Bootstrap,
                    role,
                    code: exit.code,
                    log: agents::log_path(self.config, role),
                }),
                None => Err(DevgridError::Aborted {
                    stage: Stage::Bootstrap,
                    reason,
                }),
            },
            Err(err) => Err(DevgridError::from_poll(Stage::Bootstrap, err)),
        }
    }
}
