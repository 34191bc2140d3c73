//! The one status-polling routine used by every payment flow.
//!
//! Single-fee and bulk payments historically polled with different
//! intervals, budgets and error handling. Both behaviours are kept as
//! presets of [`PollPolicy`] so they can be tuned (or unified) through
//! configuration without touching the loop.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::ProviderStatus;
use crate::error::{AppError, Result};

/// What a failed status check does to the poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckErrorPolicy {
    /// Count the check against the budget and keep polling.
    Continue,
    /// Stop polling and fail the payment.
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Delay before every check, including the first.
    pub interval: Duration,
    /// `None` polls until a terminal status or cancellation.
    pub max_attempts: Option<u32>,
    pub on_check_error: CheckErrorPolicy,
}

impl PollPolicy {
    /// Single-fee dialog: every 10 s, 30 checks (about five minutes),
    /// transient errors tolerated.
    pub const fn single_fee() -> Self {
        Self {
            interval: Duration::from_secs(10),
            max_attempts: Some(30),
            on_check_error: CheckErrorPolicy::Continue,
        }
    }

    /// Bulk dialog: every 3 s with no budget; any failed check ends the poll.
    pub const fn bulk() -> Self {
        Self {
            interval: Duration::from_secs(3),
            max_attempts: None,
            on_check_error: CheckErrorPolicy::Fail,
        }
    }
}

/// Anything that can report the provider status of a reference.
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn check_status(&self, reference_id: &str) -> Result<ProviderStatus>;
}

/// Result of one status check, handed to the poll observer.
#[derive(Debug)]
pub enum CheckReport<'a> {
    Status(&'a ProviderStatus),
    Error(&'a AppError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollFailure {
    Provider(ProviderStatus),
    CheckError(String),
    AttemptsExhausted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Successful { checks: u32 },
    Failed { checks: u32, failure: PollFailure },
    Cancelled { checks: u32 },
}

impl PollOutcome {
    pub fn checks(&self) -> u32 {
        match self {
            PollOutcome::Successful { checks }
            | PollOutcome::Failed { checks, .. }
            | PollOutcome::Cancelled { checks } => *checks,
        }
    }
}

/// Polls `source` until the provider reports a terminal status, the
/// attempt budget runs out, a check fails under [`CheckErrorPolicy::Fail`],
/// or `cancel` fires.
///
/// At most one check is in flight; the next one is scheduled only after
/// the previous answer arrived. Cancellation is observed both while
/// waiting and while a check is outstanding.
pub async fn poll_until_settled<S, F>(
    source: &S,
    reference_id: &str,
    policy: &PollPolicy,
    cancel: &CancellationToken,
    mut observer: F,
) -> PollOutcome
where
    S: StatusSource + ?Sized,
    F: FnMut(u32, CheckReport<'_>),
{
    let mut checks = 0u32;

    loop {
        if let Some(max) = policy.max_attempts {
            if checks >= max {
                warn!(reference_id, checks, "payment status polling budget exhausted");
                return PollOutcome::Failed { checks, failure: PollFailure::AttemptsExhausted };
            }
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return PollOutcome::Cancelled { checks },
            _ = tokio::time::sleep(policy.interval) => {}
        }

        checks += 1;
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return PollOutcome::Cancelled { checks },
            result = source.check_status(reference_id) => result,
        };

        match result {
            Ok(status) => {
                debug!(reference_id, checks, status = %status, "payment status checked");
                observer(checks, CheckReport::Status(&status));

                if status == ProviderStatus::Successful {
                    return PollOutcome::Successful { checks };
                }
                if status.is_failure() {
                    return PollOutcome::Failed { checks, failure: PollFailure::Provider(status) };
                }
            }
            Err(e) => {
                warn!(reference_id, checks, error = %e, "payment status check failed");
                observer(checks, CheckReport::Error(&e));

                if policy.on_check_error == CheckErrorPolicy::Fail {
                    return PollOutcome::Failed {
                        checks,
                        failure: PollFailure::CheckError(e.public_message()),
                    };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Replays scripted answers, then repeats the last one forever.
    struct ScriptedSource {
        answers: Mutex<VecDeque<Option<ProviderStatus>>>,
        calls: AtomicU32,
    }

    impl ScriptedSource {
        fn new(answers: Vec<Option<ProviderStatus>>) -> Self {
            Self { answers: Mutex::new(answers.into()), calls: AtomicU32::new(0) }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl StatusSource for ScriptedSource {
        async fn check_status(&self, _reference_id: &str) -> Result<ProviderStatus> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let answer = {
                let mut answers = self.answers.lock().unwrap();
                if answers.len() > 1 { answers.pop_front().unwrap() } else { answers[0].clone() }
            };
            answer.ok_or_else(|| AppError::External("network error".to_string()))
        }
    }

    fn statuses(list: &[ProviderStatus]) -> Vec<Option<ProviderStatus>> {
        list.iter().cloned().map(Some).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn single_fee_succeeds_after_third_check() {
        let source = ScriptedSource::new(statuses(&[
            ProviderStatus::Pending,
            ProviderStatus::Pending,
            ProviderStatus::Successful,
        ]));
        let cancel = CancellationToken::new();
        let started = tokio::time::Instant::now();

        let outcome = poll_until_settled(&source, "ref", &PollPolicy::single_fee(), &cancel, |_, _| {}).await;

        assert_eq!(outcome, PollOutcome::Successful { checks: 3 });
        assert_eq!(source.calls(), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn single_fee_times_out_after_thirty_pending_checks() {
        let source = ScriptedSource::new(statuses(&[ProviderStatus::Pending]));
        let cancel = CancellationToken::new();

        let outcome = poll_until_settled(&source, "ref", &PollPolicy::single_fee(), &cancel, |_, _| {}).await;

        assert_eq!(
            outcome,
            PollOutcome::Failed { checks: 30, failure: PollFailure::AttemptsExhausted }
        );
        assert_eq!(source.calls(), 30);
    }

    #[tokio::test(start_paused = true)]
    async fn bulk_keeps_polling_pending_where_single_gives_up() {
        let source = ScriptedSource::new(statuses(&[ProviderStatus::Pending]));
        let cancel = CancellationToken::new();
        let observer_cancel = cancel.clone();

        // Stop the unbounded poll well past the single-fee budget.
        let outcome = poll_until_settled(&source, "ref", &PollPolicy::bulk(), &cancel, |checks, _| {
            if checks == 100 {
                observer_cancel.cancel();
            }
        })
        .await;

        assert_eq!(outcome, PollOutcome::Cancelled { checks: 100 });
        assert_eq!(source.calls(), 100);
    }

    #[tokio::test(start_paused = true)]
    async fn provider_failures_end_both_presets() {
        for failed in [ProviderStatus::Failed, ProviderStatus::Rejected, ProviderStatus::Timeout] {
            for policy in [PollPolicy::single_fee(), PollPolicy::bulk()] {
                let source = ScriptedSource::new(statuses(&[ProviderStatus::Pending, failed.clone()]));
                let cancel = CancellationToken::new();

                let outcome = poll_until_settled(&source, "ref", &policy, &cancel, |_, _| {}).await;

                assert_eq!(
                    outcome,
                    PollOutcome::Failed { checks: 2, failure: PollFailure::Provider(failed.clone()) }
                );
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn check_errors_are_fatal_only_for_bulk() {
        let script = vec![None, Some(ProviderStatus::Pending), Some(ProviderStatus::Successful)];
        let cancel = CancellationToken::new();

        let single = ScriptedSource::new(script.clone());
        let outcome = poll_until_settled(&single, "ref", &PollPolicy::single_fee(), &cancel, |_, _| {}).await;
        assert_eq!(outcome, PollOutcome::Successful { checks: 3 });

        let bulk = ScriptedSource::new(script);
        let outcome = poll_until_settled(&bulk, "ref", &PollPolicy::bulk(), &cancel, |_, _| {}).await;
        assert_eq!(
            outcome,
            PollOutcome::Failed { checks: 1, failure: PollFailure::CheckError("network error".to_string()) }
        );
        assert_eq!(bulk.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_before_first_check_issues_no_requests() {
        let source = ScriptedSource::new(statuses(&[ProviderStatus::Pending]));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = poll_until_settled(&source, "ref", &PollPolicy::bulk(), &cancel, |_, _| {}).await;

        assert_eq!(outcome, PollOutcome::Cancelled { checks: 0 });
        assert_eq!(source.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn observer_sees_every_check() {
        let source = ScriptedSource::new(vec![
            Some(ProviderStatus::Pending),
            None,
            Some(ProviderStatus::Successful),
        ]);
        let cancel = CancellationToken::new();
        let mut seen = Vec::new();

        poll_until_settled(&source, "ref", &PollPolicy::single_fee(), &cancel, |checks, report| {
            seen.push((checks, matches!(report, CheckReport::Error(_))));
        })
        .await;

        assert_eq!(seen, vec![(1, false), (2, true), (3, false)]);
    }
}
