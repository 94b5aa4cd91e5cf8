//! Bounded retry-until-ready loop shared by every readiness check.
//!
//! A probe is any closure returning a future of [`PollOutcome`]. The loop
//! sleeps a fixed interval between attempts and ends on the first `Ready`,
//! on a `Fatal` outcome, when the error streak limit is exceeded, when the
//! policy's timeout or attempt budget runs out, or on cancellation.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info};

use devgrid_core::config::PollConfig;
use devgrid_core::duration::require_nonzero_duration;
use devgrid_exec::deadline_after;

/// Result of one readiness check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Ready,
    /// The probe worked but the target is not ready yet.
    Pending,
    /// The probe itself failed. Retryable, counts towards the error streak.
    ProbeError(String),
    /// Not worth retrying; ends the poll immediately.
    Fatal(String),
}

/// Bounds for a poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub timeout: Duration,
    pub max_attempts: Option<u32>,
    /// Fail once more than this many `ProbeError`s occur in a row.
    pub max_consecutive_errors: Option<u32>,
}

impl PollPolicy {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            max_attempts: None,
            max_consecutive_errors: None,
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    pub fn with_max_consecutive_errors(mut self, errors: u32) -> Self {
        self.max_consecutive_errors = Some(errors);
        self
    }

    /// Build a policy from a `[polling.*]` section. `section` names it in errors.
    pub fn from_config(section: &str, config: &PollConfig) -> anyhow::Result<Self> {
        Ok(Self {
            interval: require_nonzero_duration(&format!("{section}.interval"), &config.interval)?,
            timeout: require_nonzero_duration(&format!("{section}.timeout"), &config.timeout)?,
            max_attempts: config.max_attempts,
            max_consecutive_errors: config.max_consecutive_errors,
        })
    }
}

/// How a successful poll went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSummary {
    pub attempts: u32,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PollError {
    #[error("not ready after {attempts} attempts over {waited:?}")]
    TimedOut { attempts: u32, waited: Duration },

    #[error("probe failed {failures} times in a row: {last_error}")]
    ErrorStreak { failures: u32, last_error: String },

    #[error("{0}")]
    Aborted(String),

    #[error("cancelled after {attempts} attempts")]
    Cancelled { attempts: u32 },
}

/// Run `probe` until it reports ready or the policy gives up.
///
/// `cancel` is checked before every attempt and raced against both the
/// probe and the sleep; a `true` value ends the poll with
/// [`PollError::Cancelled`].
pub async fn poll_until_ready<F, Fut>(
    label: &str,
    policy: &PollPolicy,
    cancel: &mut watch::Receiver<bool>,
    mut probe: F,
) -> Result<PollSummary, PollError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = PollOutcome>,
{
    let started = Instant::now();
    let deadline = deadline_after(policy.timeout);
    let mut attempts = 0u32;
    let mut consecutive_errors = 0u32;

    loop {
        if *cancel.borrow_and_update() {
            return Err(PollError::Cancelled { attempts });
        }
        if attempts > 0 && Instant::now() >= deadline {
            return Err(PollError::TimedOut {
                attempts,
                waited: started.elapsed(),
            });
        }
        if policy.max_attempts.is_some_and(|max| attempts >= max) {
            return Err(PollError::TimedOut {
                attempts,
                waited: started.elapsed(),
            });
        }

        attempts += 1;
        let outcome = tokio::select! {
            outcome = probe() => outcome,
            _ = tokio::time::sleep_until(deadline) => {
                debug!(%label, attempts, "probe still running at deadline");
                return Err(PollError::TimedOut { attempts, waited: started.elapsed() });
            }
            _ = cancelled(cancel) => return Err(PollError::Cancelled { attempts }),
        };

        match outcome {
            PollOutcome::Ready => {
                let elapsed = started.elapsed();
                info!(%label, attempts, ?elapsed, "ready");
                return Ok(PollSummary { attempts, elapsed });
            }
            PollOutcome::Pending => {
                consecutive_errors = 0;
                debug!(%label, attempts, "not ready yet");
            }
            PollOutcome::ProbeError(error) => {
                consecutive_errors += 1;
                if policy
                    .max_consecutive_errors
                    .is_some_and(|max| consecutive_errors > max)
                {
                    return Err(PollError::ErrorStreak {
                        failures: consecutive_errors,
                        last_error: error,
                    });
                }
                debug!(%label, attempts, consecutive_errors, %error, "probe error tolerated");
            }
            PollOutcome::Fatal(reason) => return Err(PollError::Aborted(reason)),
        }

        let now = Instant::now();
        if now >= deadline {
            continue;
        }
        let wait = policy.interval.min(deadline - now);
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = cancelled(cancel) => return Err(PollError::Cancelled { attempts }),
        }
    }
}

/// Resolves once the flag turns `true`. Never resolves if the sender is gone.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    fn policy() -> PollPolicy {
        PollPolicy::new(Duration::from_secs(1), Duration::from_secs(60))
    }

    /// A probe that replays `outcomes`, then repeats the last one.
    fn scripted(outcomes: Vec<PollOutcome>) -> (impl FnMut() -> std::future::Ready<PollOutcome>, Arc<Mutex<u32>>) {
        let calls = Arc::new(Mutex::new(0));
        let counter = calls.clone();
        let mut queue: VecDeque<PollOutcome> = outcomes.into();
        let probe = move || {
            *counter.lock().unwrap() += 1;
            let next = if queue.len() > 1 {
                queue.pop_front().unwrap()
            } else {
                queue.front().cloned().unwrap()
            };
            std::future::ready(next)
        };
        (probe, calls)
    }

    #[tokio::test(start_paused = true)]
    async fn returns_on_first_ready() {
        let (_tx, mut rx) = watch::channel(false);
        let (probe, calls) = scripted(vec![
            PollOutcome::Pending,
            PollOutcome::ProbeError("connection refused".into()),
            PollOutcome::Ready,
            PollOutcome::Pending,
        ]);

        let summary = poll_until_ready("test", &policy(), &mut rx, probe).await.unwrap();
        assert_eq!(summary.attempts, 3);
        assert_eq!(*calls.lock().unwrap(), 3);
        assert_eq!(summary.elapsed, Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn probe_errors_are_tolerated_without_limit() {
        let (_tx, mut rx) = watch::channel(false);
        let mut outcomes = vec![PollOutcome::ProbeError("404".into()); 20];
        outcomes.push(PollOutcome::Ready);
        let (probe, _) = scripted(outcomes);

        let summary = poll_until_ready("test", &policy(), &mut rx, probe).await.unwrap();
        assert_eq!(summary.attempts, 21);
    }

    #[tokio::test(start_paused = true)]
    async fn error_streak_fails_after_more_than_max() {
        let (_tx, mut rx) = watch::channel(false);
        let (probe, calls) = scripted(vec![PollOutcome::ProbeError("exit code 1".into())]);
        let policy = policy().with_max_consecutive_errors(5);

        let err = poll_until_ready("test", &policy, &mut rx, probe).await.unwrap_err();
        assert_eq!(
            err,
            PollError::ErrorStreak {
                failures: 6,
                last_error: "exit code 1".into()
            }
        );
        assert_eq!(*calls.lock().unwrap(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn pending_resets_error_streak() {
        let (_tx, mut rx) = watch::channel(false);
        let err = |msg: &str| PollOutcome::ProbeError(msg.to_string());
        let mut outcomes = vec![err("a"), err("b"), err("c"), err("d"), err("e")];
        outcomes.push(PollOutcome::Pending);
        outcomes.extend([err("f"), err("g"), err("h"), err("i"), err("j")]);
        outcomes.push(PollOutcome::Ready);
        let (probe, _) = scripted(outcomes);
        let policy = policy().with_max_consecutive_errors(5);

        let summary = poll_until_ready("test", &policy, &mut rx, probe).await.unwrap();
        assert_eq!(summary.attempts, 12);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_with_attempt_count() {
        let (_tx, mut rx) = watch::channel(false);
        let (probe, _) = scripted(vec![PollOutcome::Pending]);
        let policy = PollPolicy::new(Duration::from_secs(1), Duration::from_secs(5));

        let err = poll_until_ready("test", &policy, &mut rx, probe).await.unwrap_err();
        match err {
            PollError::TimedOut { attempts, waited } => {
                assert_eq!(attempts, 5);
                assert_eq!(waited, Duration::from_secs(5));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn max_attempts_bounds_the_loop() {
        let (_tx, mut rx) = watch::channel(false);
        let (probe, calls) = scripted(vec![PollOutcome::Pending]);
        let policy = policy().with_max_attempts(3);

        let err = poll_until_ready("test", &policy, &mut rx, probe).await.unwrap_err();
        assert!(matches!(err, PollError::TimedOut { attempts: 3, .. }));
        assert_eq!(*calls.lock().unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_probe_is_abandoned_at_deadline() {
        let (_tx, mut rx) = watch::channel(false);
        let policy = PollPolicy::new(Duration::from_secs(1), Duration::from_secs(3));

        let err = poll_until_ready("test", &policy, &mut rx, || {
            std::future::pending::<PollOutcome>()
        })
        .await
        .unwrap_err();
        assert!(matches!(err, PollError::TimedOut { attempts: 1, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn unrepresentable_timeout_still_polls() {
        let (_tx, mut rx) = watch::channel(false);
        let (probe, _) = scripted(vec![PollOutcome::Pending, PollOutcome::Ready]);
        let policy = PollPolicy::new(Duration::from_secs(1), Duration::from_secs(u64::MAX));

        let summary = poll_until_ready("test", &policy, &mut rx, probe).await.unwrap();
        assert_eq!(summary.attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_outcome_aborts() {
        let (_tx, mut rx) = watch::channel(false);
        let (probe, calls) = scripted(vec![
            PollOutcome::Pending,
            PollOutcome::Fatal("agent exited".into()),
        ]);

        let err = poll_until_ready("test", &policy(), &mut rx, probe).await.unwrap_err();
        assert_eq!(err, PollError::Aborted("agent exited".into()));
        assert_eq!(*calls.lock().unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_sleep() {
        let (tx, mut rx) = watch::channel(false);
        let (probe, _) = scripted(vec![PollOutcome::Pending]);

        let handle = tokio::spawn(async move {
            poll_until_ready("test", &policy(), &mut rx, probe).await
        });
        tokio::time::sleep(Duration::from_millis(2500)).await;
        tx.send(true).unwrap();

        let err = handle.await.unwrap().unwrap_err();
        assert_eq!(err, PollError::Cancelled { attempts: 3 });
    }

    #[tokio::test(start_paused = true)]
    async fn already_cancelled_never_probes() {
        let (_tx, mut rx) = watch::channel(true);
        let (probe, calls) = scripted(vec![PollOutcome::Ready]);

        let err = poll_until_ready("test", &policy(), &mut rx, probe).await.unwrap_err();
        assert_eq!(err, PollError::Cancelled { attempts: 0 });
        assert_eq!(*calls.lock().unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_sender_never_cancels() {
        let (tx, mut rx) = watch::channel(false);
        drop(tx);
        let (probe, _) = scripted(vec![PollOutcome::Pending, PollOutcome::Ready]);

        let summary = poll_until_ready("test", &policy(), &mut rx, probe).await.unwrap();
        assert_eq!(summary.attempts, 2);
    }

    #[test]
    fn policy_from_config() {
        let config = PollConfig {
            interval: "500ms".into(),
            timeout: "2m".into(),
            max_attempts: None,
            max_consecutive_errors: Some(5),
        };
        let policy = PollPolicy::from_config("polling.job_health", &config).unwrap();
        assert_eq!(policy.interval, Duration::from_millis(500));
        assert_eq!(policy.timeout, Duration::from_secs(120));
        assert_eq!(policy.max_consecutive_errors, Some(5));

        let zero = PollConfig {
            timeout: "0s".into(),
            ..config.clone()
        };
        assert!(PollPolicy::from_config("polling.job_health", &zero).is_err());

        let bad = PollConfig {
            interval: "often".into(),
            ..config
        };
        assert!(PollPolicy::from_config("polling.job_health", &bad).is_err());
    }
}
