//! Job submission and deployment health polling.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info};

use devgrid_core::{DevgridConfig, JobDescriptor, JobRole, Stage};
use devgrid_exec::{CommandOutput, CommandRunner, ExecResult};
use devgrid_health::{PollOutcome, PollPolicy, is_deployment_healthy, poll_until_ready};

use crate::agents;
use crate::error::{DevgridError, DevgridResult};

/// A job the scheduler reported healthy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deployment {
    pub role: JobRole,
    pub job: String,
    /// Status queries it took.
    pub attempts: u32,
    pub elapsed: Duration,
}

pub type DeploymentResult = DevgridResult<Deployment>;

/// Submits jobs in detached mode and waits for each to become healthy.
pub struct JobDeployer<'a> {
    config: &'a DevgridConfig,
    runner: &'a dyn CommandRunner,
    policy: &'a PollPolicy,
}

impl<'a> JobDeployer<'a> {
    pub fn new(config: &'a DevgridConfig, runner: &'a dyn CommandRunner, policy: &'a PollPolicy) -> Self {
        Self {
            config,
            runner,
            policy,
        }
    }

    pub async fn deploy(
        &self,
        role: JobRole,
        job: &JobDescriptor,
        cancel: &mut watch::Receiver<bool>,
    ) -> DeploymentResult {
        let stage = Stage::Deploy(role);
        if *cancel.borrow() {
            return Err(DevgridError::Cancelled { stage });
        }

        let submit = agents::job_run(self.config, job);
        info!(%role, job = %job.name, command = %submit, "submitting job");
        let output = self
            .runner
            .run(&submit)
            .await
            .map_err(|e| DevgridError::Dispatch {
                stage,
                command: submit.to_string(),
                reason: e.to_string(),
            })?;
        if !output.success() {
            return Err(DevgridError::NonZeroExit {
                stage,
                command: submit.to_string(),
                code: output.code,
                stderr: output.stderr,
            });
        }

        let status = agents::job_status(self.config, &job.name);
        let status = &status;
        let runner = self.runner;
        let name = job.name.as_str();
        let summary = poll_until_ready(name, self.policy, cancel, || async move {
            status_outcome(runner.run(status).await, name)
        })
        .await
        .map_err(|e| DevgridError::from_poll(stage, e))?;

        info!(%role, job = %job.name, attempts = summary.attempts, elapsed = ?summary.elapsed, "deployment healthy");
        Ok(Deployment {
            role,
            job: job.name.clone(),
            attempts: summary.attempts,
            elapsed: summary.elapsed,
        })
    }
}

/// A failed status query counts towards the error streak; a successful one
/// that is not healthy yet resets it.
fn status_outcome(result: ExecResult<CommandOutput>, job: &str) -> PollOutcome {
    match result {
        Ok(output) if output.success() => {
            if is_deployment_healthy(&output.stdout, job) {
                PollOutcome::Ready
            } else {
                debug!(%job, "deployment not healthy yet");
                PollOutcome::Pending
            }
        }
        Ok(output) => PollOutcome::ProbeError(format!(
            "exit code {}: {}",
            output.code,
            output.stderr.trim()
        )),
        Err(e) => PollOutcome::ProbeError(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devgrid_exec::ExecError;
    use devgrid_exec::testing::ScriptedRunner;

    const HEALTHY: &str = "Deployed\nTask Group  Desired  Placed  Healthy  Unhealthy  Progress Deadline\ntraefik  1  1  1  0  2022-01-21T10:23:12Z";
    const PLACING: &str = "Deployed\nTask Group  Desired  Placed  Healthy  Unhealthy  Progress Deadline\ntraefik  1  1  0  0  2022-01-21T10:23:12Z";

    fn job() -> JobDescriptor {
        JobDescriptor::new("traefik", "/opt/installer/job/traefik.nomad")
    }

    fn policy() -> PollPolicy {
        PollPolicy::new(Duration::from_secs(1), Duration::from_secs(300)).with_max_consecutive_errors(5)
    }

    const SUBMIT: &str = "nomad job run -detach /opt/installer/job/traefik.nomad";
    const STATUS: &str = "nomad job status traefik";

    #[tokio::test(start_paused = true)]
    async fn deploys_once_healthy() {
        let config = DevgridConfig::default();
        let runner = ScriptedRunner::new()
            .on(SUBMIT, CommandOutput::ok("==> Monitoring evaluation"))
            .on_sequence(
                STATUS,
                [
                    Ok(CommandOutput::ok("")),
                    Ok(CommandOutput::ok(PLACING)),
                    Ok(CommandOutput::ok(HEALTHY)),
                ],
            );
        let policy = policy();
        let (_tx, mut rx) = watch::channel(false);

        let deployment = JobDeployer::new(&config, &runner, &policy)
            .deploy(JobRole::Proxy, &job(), &mut rx)
            .await
            .unwrap();
        assert_eq!(deployment.job, "traefik");
        assert_eq!(deployment.attempts, 3);
        assert_eq!(runner.call_count(SUBMIT), 1);
    }

    #[tokio::test]
    async fn submit_failure_carries_stderr() {
        let config = DevgridConfig::default();
        let runner = ScriptedRunner::new().on(
            SUBMIT,
            CommandOutput::failed(1, "Error getting job struct: no such file"),
        );
        let policy = policy();
        let (_tx, mut rx) = watch::channel(false);

        let err = JobDeployer::new(&config, &runner, &policy)
            .deploy(JobRole::Proxy, &job(), &mut rx)
            .await
            .unwrap_err();
        match err {
            DevgridError::NonZeroExit {
                stage, code, stderr, ..
            } => {
                assert_eq!(stage, Stage::Deploy(JobRole::Proxy));
                assert_eq!(code, 1);
                assert!(stderr.contains("no such file"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(runner.call_count(STATUS), 0);
    }

    #[tokio::test]
    async fn submit_dispatch_failure() {
        let config = DevgridConfig::default();
        let runner = ScriptedRunner::new().on_error(
            SUBMIT,
            ExecError::Dispatch {
                program: "nomad".into(),
                reason: "No such file or directory (os error 2)".into(),
            },
        );
        let policy = policy();
        let (_tx, mut rx) = watch::channel(false);

        let err = JobDeployer::new(&config, &runner, &policy)
            .deploy(JobRole::Proxy, &job(), &mut rx)
            .await
            .unwrap_err();
        assert!(matches!(err, DevgridError::Dispatch { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn six_consecutive_status_failures_fail() {
        let config = DevgridConfig::default();
        let runner = ScriptedRunner::new()
            .on(SUBMIT, CommandOutput::ok(""))
            .on(STATUS, CommandOutput::failed(1, "Error querying job: 500"));
        let policy = policy();
        let (_tx, mut rx) = watch::channel(false);

        let err = JobDeployer::new(&config, &runner, &policy)
            .deploy(JobRole::Proxy, &job(), &mut rx)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DevgridError::RepeatedStatusQueryFailure { failures: 6, .. }
        ));
        assert_eq!(runner.call_count(STATUS), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn successful_query_resets_failure_streak() {
        let config = DevgridConfig::default();
        let failure = || -> ExecResult<CommandOutput> {
            Ok(CommandOutput::failed(1, "Error querying job: 500"))
        };
        let mut responses: Vec<_> = (0..5).map(|_| failure()).collect();
        responses.push(Ok(CommandOutput::ok(PLACING)));
        responses.extend((0..5).map(|_| failure()));
        responses.push(Ok(CommandOutput::ok(HEALTHY)));

        let runner = ScriptedRunner::new()
            .on(SUBMIT, CommandOutput::ok(""))
            .on_sequence(STATUS, responses);
        let policy = policy();
        let (_tx, mut rx) = watch::channel(false);

        let deployment = JobDeployer::new(&config, &runner, &policy)
            .deploy(JobRole::Proxy, &job(), &mut rx)
            .await
            .unwrap();
        assert_eq!(deployment.attempts, 12);
    }

    #[tokio::test(start_paused = true)]
    async fn unhealthy_forever_exhausts_the_check() {
        let config = DevgridConfig::default();
        let runner = ScriptedRunner::new()
            .on(SUBMIT, CommandOutput::ok(""))
            .on(STATUS, CommandOutput::ok(PLACING));
        let policy = PollPolicy::new(Duration::from_secs(1), Duration::from_secs(10));
        let (_tx, mut rx) = watch::channel(false);

        let err = JobDeployer::new(&config, &runner, &policy)
            .deploy(JobRole::Proxy, &job(), &mut rx)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DevgridError::HealthCheckExhausted {
                stage: Stage::Deploy(JobRole::Proxy),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn cancelled_before_submit() {
        let config = DevgridConfig::default();
        let runner = ScriptedRunner::new();
        let policy = policy();
        let (tx, mut rx) = watch::channel(false);
        tx.send(true).unwrap();

        let err = JobDeployer::new(&config, &runner, &policy)
            .deploy(JobRole::Proxy, &job(), &mut rx)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert!(runner.calls().is_empty());
    }
}
