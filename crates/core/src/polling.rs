//! Run Polling
//!
//! Runs are processed asynchronously by the provider, so every request that
//! starts one has to come back and ask how it is going. This module owns that
//! loop: check the run, sleep, check again, until the run settles or the
//! budget for the operation runs out.

use crate::assistants::{AssistantsApi, RunStatus};
use crate::error::VpeError;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{debug, error, info};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_CHAT_TIMEOUT: Duration = Duration::from_secs(90);
pub const DEFAULT_FEEDBACK_TIMEOUT: Duration = Duration::from_secs(180);

/// What a run is being waited on for; used in logs and user-facing errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    ChatResponse,
    FeedbackGeneration,
}

impl Operation {
    /// Capitalised form for the start of a sentence.
    pub fn title(self) -> &'static str {
        match self {
            Operation::ChatResponse => "Chat response",
            Operation::FeedbackGeneration => "Feedback generation",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::ChatResponse => write!(f, "chat response"),
            Operation::FeedbackGeneration => write!(f, "feedback generation"),
        }
    }
}

/// How often to check a run and how long to keep checking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub timeout: Duration,
}

impl PollPolicy {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    pub fn chat() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL, DEFAULT_CHAT_TIMEOUT)
    }

    pub fn feedback() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL, DEFAULT_FEEDBACK_TIMEOUT)
    }
}

/// Polls a run until it completes, fails, or the policy's timeout elapses.
///
/// `on_tick` is called with the elapsed time before every status check.
/// Returns `Ok(())` only for `completed`. A run that is still pending when the
/// deadline passes is abandoned, not cancelled.
pub async fn wait_for_run(
    api: &dyn AssistantsApi,
    thread_id: &str,
    run_id: &str,
    operation: Operation,
    policy: PollPolicy,
    on_tick: &mut (dyn FnMut(Duration) + Send),
) -> Result<(), VpeError> {
    let started = Instant::now();

    while started.elapsed() < policy.timeout {
        let elapsed = started.elapsed();
        on_tick(elapsed);

        let state = api.run_state(thread_id, run_id).await.map_err(|e| {
            error!(%operation, thread_id, run_id, error = ?e, "Error checking run status");
            VpeError::Provider(e.context(format!("error checking {operation} status")))
        })?;
        debug!(
            %operation,
            run_id,
            status = %state.status,
            elapsed_secs = elapsed.as_secs(),
            "Polled run"
        );

        match state.status {
            RunStatus::Completed => {
                info!(
                    %operation,
                    run_id,
                    elapsed_secs = started.elapsed().as_secs(),
                    "Run completed"
                );
                return Ok(());
            }
            RunStatus::RequiresAction => {
                error!(
                    %operation,
                    run_id,
                    "Run requires action; no tool outputs are ever supplied"
                );
                return Err(VpeError::RequiresAction { operation });
            }
            status if status.is_pending() => sleep(policy.interval).await,
            status => {
                error!(
                    %operation,
                    run_id,
                    %status,
                    detail = ?state.last_error,
                    "Run ended without completing"
                );
                return Err(VpeError::RunFailed {
                    operation,
                    status,
                    detail: state.last_error,
                });
            }
        }
    }

    error!(%operation, run_id, timeout_secs = policy.timeout.as_secs(), "Run timed out");
    Err(VpeError::Timeout {
        operation,
        after: policy.timeout,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assistants::{MockAssistantsApi, RunState};
    use anyhow::anyhow;
    use std::collections::VecDeque;

    fn scripted(statuses: Vec<RunStatus>) -> MockAssistantsApi {
        let mut script: VecDeque<RunStatus> = statuses.into();
        let mut api = MockAssistantsApi::new();
        api.expect_run_state().returning(move |_, _| {
            let status = script.pop_front().unwrap_or(RunStatus::InProgress);
            Ok(RunState::new(status))
        });
        api
    }

    #[tokio::test(start_paused = true)]
    async fn test_completed_run_returns_ok() {
        let api = scripted(vec![
            RunStatus::Queued,
            RunStatus::InProgress,
            RunStatus::Completed,
        ]);
        let mut ticks = Vec::new();
        let result = wait_for_run(
            &api,
            "thread_1",
            "run_1",
            Operation::ChatResponse,
            PollPolicy::chat(),
            &mut |elapsed| ticks.push(elapsed),
        )
        .await;

        assert!(result.is_ok());
        assert_eq!(
            ticks,
            vec![Duration::ZERO, Duration::from_secs(2), Duration::from_secs(4)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_run_times_out() {
        let api = scripted(vec![]);
        let started = Instant::now();
        let err = wait_for_run(
            &api,
            "thread_1",
            "run_1",
            Operation::ChatResponse,
            PollPolicy::new(Duration::from_secs(2), Duration::from_secs(10)),
            &mut |_| {},
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            VpeError::Timeout {
                operation: Operation::ChatResponse,
                after,
            } if after == Duration::from_secs(10)
        ));
        assert!(started.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_requires_action_fails_without_further_polling() {
        let mut api = MockAssistantsApi::new();
        api.expect_run_state()
            .times(1)
            .returning(|_, _| Ok(RunState::new(RunStatus::RequiresAction)));

        let err = wait_for_run(
            &api,
            "thread_1",
            "run_1",
            Operation::FeedbackGeneration,
            PollPolicy::feedback(),
            &mut |_| {},
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            VpeError::RequiresAction { operation: Operation::FeedbackGeneration }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_run_carries_provider_detail() {
        let mut api = MockAssistantsApi::new();
        api.expect_run_state().times(1).returning(|_, _| {
            Ok(RunState {
                status: RunStatus::Failed,
                last_error: Some("ServerError: upstream overloaded".to_string()),
            })
        });

        let err = wait_for_run(
            &api,
            "thread_1",
            "run_1",
            Operation::ChatResponse,
            PollPolicy::chat(),
            &mut |_| {},
        )
        .await
        .unwrap_err();

        match err {
            VpeError::RunFailed { status, detail, .. } => {
                assert_eq!(status, RunStatus::Failed);
                assert_eq!(detail.as_deref(), Some("ServerError: upstream overloaded"));
            }
            other => panic!("expected RunFailed, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_and_expired_are_failures() {
        for terminal in [RunStatus::Cancelled, RunStatus::Expired, RunStatus::Incomplete] {
            let api = scripted(vec![RunStatus::InProgress, terminal]);
            let err = wait_for_run(
                &api,
                "t",
                "r",
                Operation::ChatResponse,
                PollPolicy::chat(),
                &mut |_| {},
            )
            .await
            .unwrap_err();
            assert!(matches!(err, VpeError::RunFailed { status, .. } if status == terminal));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_check_error_is_a_provider_error() {
        let mut api = MockAssistantsApi::new();
        api.expect_run_state()
            .times(1)
            .returning(|_, _| Err(anyhow!("connection reset")));

        let err = wait_for_run(
            &api,
            "t",
            "r",
            Operation::ChatResponse,
            PollPolicy::chat(),
            &mut |_| {},
        )
        .await
        .unwrap_err();

        assert!(matches!(err, VpeError::Provider(_)));
        assert!(err.to_string().contains("error checking chat response status"));
    }
}
