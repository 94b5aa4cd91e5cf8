//! Deployment pipeline: drives the cluster through its phases.
//!
//! ```text
//! Idle → Bootstrapping → ProxyDeploying → StorageDeploying
//!      → RegistryDeploying → AwaitingExternalHealth → Ready
//! ```
//!
//! Any phase may fail; the pipeline then tears the instance down (or keeps
//! it, if configured and the agents came up). `Stopped` follows an explicit
//! stop.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{error, info, warn};

use devgrid_core::config::FailurePolicy;
use devgrid_core::duration::require_duration;
use devgrid_core::{AgentRole, DevgridConfig, JobRole, Stage};
use devgrid_exec::{
    CommandRunner, ProcessSpawner, TerminationPolicy, TokioRunner, TokioSpawner,
};
use devgrid_health::{
    HttpProber, HyperProber, PollPolicy, PollSummary, http_outcome, poll_until_ready,
};

use crate::bootstrap::Bootstrapper;
use crate::deployer::{Deployment, JobDeployer};
use crate::error::{DevgridError, DevgridResult};
use crate::instance::Instance;
use crate::lifecycle::{BootstrapTicket, LifecycleManager, StopOutcome};

/// Current phase of the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelinePhase {
    Idle,
    Bootstrapping,
    ProxyDeploying,
    StorageDeploying,
    RegistryDeploying,
    AwaitingExternalHealth,
    Ready,
    Failed { stage: Stage, reason: String },
    Stopped,
}

impl PipelinePhase {
    pub fn deploying(role: JobRole) -> Self {
        match role {
            JobRole::Proxy => PipelinePhase::ProxyDeploying,
            JobRole::Storage => PipelinePhase::StorageDeploying,
            JobRole::Registry => PipelinePhase::RegistryDeploying,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelinePhase::Ready | PipelinePhase::Failed { .. } | PipelinePhase::Stopped
        )
    }
}

impl fmt::Display for PipelinePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelinePhase::Idle => f.write_str("idle"),
            PipelinePhase::Bootstrapping => f.write_str("starting agents"),
            PipelinePhase::ProxyDeploying => f.write_str("deploying proxy"),
            PipelinePhase::StorageDeploying => f.write_str("deploying storage"),
            PipelinePhase::RegistryDeploying => f.write_str("deploying registry"),
            PipelinePhase::AwaitingExternalHealth => f.write_str("waiting for external health"),
            PipelinePhase::Ready => f.write_str("ready"),
            PipelinePhase::Failed { stage, reason } => write!(f, "failed during {stage}: {reason}"),
            PipelinePhase::Stopped => f.write_str("stopped"),
        }
    }
}

/// Called on every phase transition.
pub type PhaseObserver = Arc<dyn Fn(&PipelinePhase) + Send + Sync>;

/// Everything the pipeline talks to outside the process.
#[derive(Clone)]
pub struct PipelineDeps {
    pub runner: Arc<dyn CommandRunner>,
    pub spawner: Arc<dyn ProcessSpawner>,
    pub prober: Arc<dyn HttpProber>,
}

impl PipelineDeps {
    /// Real commands, real processes, real HTTP.
    pub fn system(config: &DevgridConfig) -> DevgridResult<Self> {
        let timeout = config
            .scheduler
            .command_timeout
            .as_deref()
            .map(|value| require_duration("scheduler.command_timeout", value))
            .transpose()?;
        Ok(Self {
            runner: Arc::new(TokioRunner::new().with_timeout(timeout)),
            spawner: Arc::new(TokioSpawner),
            prober: Arc::new(HyperProber),
        })
    }
}

/// Result of a pipeline that reached `Ready`.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub deployments: Vec<Deployment>,
    /// `None` when the external check is disabled.
    pub external_health: Option<PollSummary>,
    pub discovery_pid: Option<u32>,
    pub scheduler_pid: Option<u32>,
    pub elapsed: Duration,
}

/// Bootstraps the cluster and deploys the job sequence on it.
pub struct Pipeline {
    config: DevgridConfig,
    deps: PipelineDeps,
    membership: PollPolicy,
    job_health: PollPolicy,
    external_health: PollPolicy,
    request_timeout: Duration,
    termination: TerminationPolicy,
    observer: Option<PhaseObserver>,
    phase: Mutex<PipelinePhase>,
}

impl Pipeline {
    pub fn new(config: DevgridConfig, deps: PipelineDeps) -> DevgridResult<Self> {
        config.validate()?;
        let polling = &config.polling;
        Ok(Self {
            membership: PollPolicy::from_config("polling.membership", &polling.membership)?,
            job_health: PollPolicy::from_config("polling.job_health", &polling.job_health)?,
            external_health: PollPolicy::from_config(
                "polling.external_health",
                &polling.external_health,
            )?,
            request_timeout: require_duration(
                "external_health.request_timeout",
                &config.external_health.request_timeout,
            )?,
            termination: TerminationPolicy::from_config(&config.termination)?,
            config,
            deps,
            observer: None,
            phase: Mutex::new(PipelinePhase::Idle),
        })
    }

    pub fn with_observer(mut self, observer: PhaseObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn config(&self) -> &DevgridConfig {
        &self.config
    }

    pub fn termination_policy(&self) -> &TerminationPolicy {
        &self.termination
    }

    pub fn phase(&self) -> PipelinePhase {
        self.phase
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn transition(&self, next: PipelinePhase) {
        info!(phase = %next, "pipeline phase");
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner) = next.clone();
        if let Some(observer) = &self.observer {
            observer(&next);
        }
    }

    /// Run every stage in order.
    ///
    /// The instance is published to `manager` only once every readiness
    /// check passed (or on failure under `on_failure = "keep"`).
    pub async fn run(&self, manager: &LifecycleManager) -> DevgridResult<PipelineReport> {
        let ticket = manager.begin().await?;
        let mut cancel = ticket.cancellation();
        let mut instance = Instance::new();
        let started = Instant::now();

        self.transition(PipelinePhase::Bootstrapping);
        let bootstrapper = Bootstrapper::new(
            &self.config,
            self.deps.runner.as_ref(),
            self.deps.spawner.as_ref(),
            &self.membership,
        );
        if let Err(err) = bootstrapper.run(&mut instance, &mut cancel).await {
            return Err(self.fail(manager, ticket, instance, err, false).await);
        }

        let deployer = JobDeployer::new(&self.config, self.deps.runner.as_ref(), &self.job_health);
        let mut deployments = Vec::with_capacity(JobRole::SEQUENCE.len());
        for role in JobRole::SEQUENCE {
            self.transition(PipelinePhase::deploying(role));
            let job = self.config.jobs.descriptor(role, &self.config.cluster);
            match deployer.deploy(role, &job, &mut cancel).await {
                Ok(deployment) => deployments.push(deployment),
                Err(err) => return Err(self.fail(manager, ticket, instance, err, true).await),
            }
        }

        let external_health = if self.config.external_health.enabled {
            self.transition(PipelinePhase::AwaitingExternalHealth);
            match self.await_external_health(&mut cancel).await {
                Ok(summary) => Some(summary),
                Err(err) => return Err(self.fail(manager, ticket, instance, err, true).await),
            }
        } else {
            None
        };

        let report = PipelineReport {
            deployments,
            external_health,
            discovery_pid: instance.pid(AgentRole::Discovery),
            scheduler_pid: instance.pid(AgentRole::Scheduler),
            elapsed: started.elapsed(),
        };
        if let Err(err) = manager.publish(ticket, instance).await {
            let stage = err.stage().unwrap_or(Stage::Bootstrap);
            self.transition(PipelinePhase::Failed {
                stage,
                reason: err.to_string(),
            });
            return Err(err);
        }

        self.transition(PipelinePhase::Ready);
        info!(elapsed = ?report.elapsed, "cluster ready");
        Ok(report)
    }

    async fn await_external_health(
        &self,
        cancel: &mut watch::Receiver<bool>,
    ) -> DevgridResult<PollSummary> {
        let prober = self.deps.prober.as_ref();
        let url = self.config.external_health.url.as_str();
        let expect = self.config.external_health.expect_body.as_str();
        let timeout = self.request_timeout;

        poll_until_ready("external health", &self.external_health, cancel, || async move {
            http_outcome(prober.get(url, timeout).await, expect)
        })
        .await
        .map_err(|e| DevgridError::from_poll(Stage::ExternalHealth, e))
    }

    /// Record the failure and dispose of the instance per the failure policy.
    async fn fail(
        &self,
        manager: &LifecycleManager,
        ticket: BootstrapTicket,
        mut instance: Instance,
        err: DevgridError,
        agents_up: bool,
    ) -> DevgridError {
        let stage = err.stage().unwrap_or(Stage::Bootstrap);
        warn!(%stage, error = %err, "pipeline failed");
        self.transition(PipelinePhase::Failed {
            stage,
            reason: err.to_string(),
        });

        let keep = self.config.cluster.on_failure == FailurePolicy::Keep;
        if keep && agents_up && !err.is_cancelled() {
            warn!("keeping the instance running, stop it to clean up");
            if let Err(publish_err) = manager.publish(ticket, instance).await {
                error!(error = %publish_err, "failed to keep instance");
            }
            return err;
        }

        let report = instance.stop(&self.termination).await;
        if let Err(stop_err) = report.into_result() {
            error!(error = %stop_err, "teardown incomplete");
        }
        manager.abandon(ticket).await;
        err
    }

    /// Stop the active instance (or cancel the bootstrap in flight).
    pub async fn stop(&self, manager: &LifecycleManager) -> DevgridResult<StopOutcome> {
        let outcome = manager.stop_active().await;
        if let StopOutcome::Stopped(report) = outcome {
            self.transition(PipelinePhase::Stopped);
            report.into_result()?;
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_names() {
        assert_eq!(PipelinePhase::deploying(JobRole::Storage), PipelinePhase::StorageDeploying);
        assert_eq!(PipelinePhase::RegistryDeploying.to_string(), "deploying registry");
        let failed = PipelinePhase::Failed {
            stage: Stage::Deploy(JobRole::Proxy),
            reason: "boom".into(),
        };
        assert_eq!(failed.to_string(), "failed during proxy deployment: boom");
        assert!(failed.is_terminal());
        assert!(!PipelinePhase::Bootstrapping.is_terminal());
    }

    #[test]
    fn system_deps_reject_bad_timeout() {
        let mut config = DevgridConfig::default();
        config.scheduler.command_timeout = Some("soon".into());
        assert!(matches!(
            PipelineDeps::system(&config),
            Err(DevgridError::Config(_))
        ));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = DevgridConfig::default();
        config.polling.job_health.interval = "often".into();
        let deps = PipelineDeps::system(&DevgridConfig::default()).unwrap();
        assert!(matches!(Pipeline::new(config, deps), Err(DevgridError::Config(_))));
    }
}
