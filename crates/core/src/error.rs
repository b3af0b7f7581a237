//! Error kinds surfaced by the encounter and feedback orchestration.

use crate::assistants::RunStatus;
use crate::polling::Operation;
use std::time::Duration;

/// Guidance shown to the student when feedback generation does not complete.
pub const FEEDBACK_RETRY_GUIDANCE: &str = "What you can try:\n\
- Click the 'Generate Feedback!' button again to retry\n\
- Check your internet connection\n\
- If this persists, the OpenAI servers may be experiencing high load";

/// Every way a user action against the virtual patient can fail.
///
/// Variants fall into four groups: configuration problems, provider request
/// failures, runs that ended without completing, and exhausted polling
/// budgets. The remaining variants reject a request before anything is sent
/// to the provider.
#[derive(Debug, thiserror::Error)]
pub enum VpeError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("provider request failed: {0:#}")]
    Provider(anyhow::Error),

    #[error("{} failed with status: {status}{}", .operation.title(), detail_suffix(.detail))]
    RunFailed {
        operation: Operation,
        status: RunStatus,
        detail: Option<String>,
    },

    #[error("{} requires action. This shouldn't happen with these assistants.", .operation.title())]
    RequiresAction { operation: Operation },

    #[error(
        "{} timed out after {} seconds. Please try again.",
        .operation.title(),
        .after.as_secs()
    )]
    Timeout {
        operation: Operation,
        after: Duration,
    },

    #[error("unknown encounter '{0}'")]
    UnknownEncounter(String),

    #[error("no encounter has been selected for this session")]
    NoEncounterSelected,

    #[error("message content must not be empty")]
    EmptyMessage,

    #[error("failed to retrieve conversation transcript: the conversation is empty")]
    EmptyTranscript,

    #[error("no response received from {0}")]
    NoResponse(&'static str),
}

fn detail_suffix(detail: &Option<String>) -> String {
    detail
        .as_ref()
        .map(|d| format!(" (error details: {d})"))
        .unwrap_or_default()
}

impl VpeError {
    /// Actionable advice for failures the student can work around by retrying.
    ///
    /// Only feedback generation carries guidance; a failed chat turn is simply
    /// re-sent.
    pub fn guidance(&self) -> Option<&'static str> {
        match self {
            VpeError::RunFailed { operation, .. }
            | VpeError::RequiresAction { operation }
            | VpeError::Timeout { operation, .. }
                if *operation == Operation::FeedbackGeneration =>
            {
                Some(FEEDBACK_RETRY_GUIDANCE)
            }
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, VpeError::Timeout { .. })
    }
}
