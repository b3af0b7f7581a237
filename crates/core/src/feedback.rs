//! Feedback Generation
//!
//! Once the student has asked enough questions, the whole conversation is
//! replayed as a transcript to a rating assistant on a thread of its own. The
//! conversation thread is only ever read here, never written to.

use crate::assistants::{AssistantsApi, MessageQuery, Role, ThreadMessage};
use crate::conversation::{latest_message, post_user_message, run_to_completion};
use crate::encounter::{self, EncounterDirectory};
use crate::error::VpeError;
use crate::polling::{Operation, PollPolicy};
use crate::session::Session;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Messages fetched per request while reading a transcript.
pub const TRANSCRIPT_PAGE_SIZE: u32 = 100;

/// Incremental notifications emitted while feedback is being produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedbackUpdate {
    /// A non-fatal problem the student should know about.
    Warning(String),
    /// Feedback generation is still running.
    Progress { elapsed: Duration },
}

/// The evaluation produced for one conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedbackReport {
    pub patient_name: String,
    pub feedback: String,
    pub warnings: Vec<String>,
}

/// Role label used for each side of the conversation in a transcript.
pub fn role_label(role: Role) -> &'static str {
    match role {
        Role::User => "STUDENT",
        Role::Assistant => "PATIENT",
    }
}

/// Renders messages, oldest first, as `LABEL: content` blocks.
pub fn render_transcript(messages: &[ThreadMessage]) -> String {
    messages
        .iter()
        .map(|m| format!("{}: {}\n\n", role_label(m.role), m.content))
        .collect()
}

/// The message sent to the rating assistant.
pub fn feedback_prompt(patient_name: &str, transcript: &str) -> String {
    format!(
        "\nYou are an expert clinical skills rater. Use the five-domain assessment framework.\n\n\
         Transcript of the student's chat with virtual standardized patient {patient_name}:\n\n\
         {transcript}\n"
    )
}

/// Produces clinical-skills feedback for a finished interview.
pub struct FeedbackService {
    api: Arc<dyn AssistantsApi>,
    policy: PollPolicy,
}

impl FeedbackService {
    pub fn new(api: Arc<dyn AssistantsApi>, policy: PollPolicy) -> Self {
        Self { api, policy }
    }

    pub fn policy(&self) -> PollPolicy {
        self.policy
    }

    /// Reads the whole conversation thread back as a transcript, oldest
    /// message first.
    pub async fn transcript(&self, thread_id: &str) -> Result<String, VpeError> {
        let mut messages = Vec::new();
        let mut query = MessageQuery::chronological(TRANSCRIPT_PAGE_SIZE);
        loop {
            let page = self
                .api
                .list_messages(thread_id, query.clone())
                .await
                .map_err(|e| {
                    error!(thread_id, error = ?e, "Failed to retrieve transcript");
                    VpeError::Provider(e.context("failed to retrieve transcript"))
                })?;
            let fetched = page.messages.len();
            messages.extend(page.messages);
            match page.last_id {
                Some(cursor) if page.has_more && fetched > 0 => query = query.after(cursor),
                _ => break,
            }
        }
        debug!(thread_id, messages = messages.len(), "Transcript retrieved");
        Ok(render_transcript(&messages))
    }

    /// Rates the session's conversation with the feedback assistant of its
    /// selected encounter.
    ///
    /// The minimum-turn gate is the caller's responsibility. `updates`
    /// receives the substitution warning, if any, and one progress tick per
    /// poll; a full or closed channel never interrupts generation.
    pub async fn generate_feedback(
        &self,
        session: &Session,
        directory: &EncounterDirectory,
        updates: Option<mpsc::Sender<FeedbackUpdate>>,
    ) -> Result<FeedbackReport, VpeError> {
        let label = session
            .selected_encounter()
            .ok_or(VpeError::NoEncounterSelected)?;
        let thread_id = session.thread_id().ok_or(VpeError::NoEncounterSelected)?;
        let assignment = directory.assign_feedback(label)?;
        let patient_name = encounter::patient_name(label).to_string();

        let mut warnings = Vec::new();
        if let Some(warning) = &assignment.substitution_warning {
            warnings.push(warning.clone());
            notify(&updates, FeedbackUpdate::Warning(warning.clone()));
        }

        let transcript = self.transcript(thread_id).await?;
        if transcript.is_empty() {
            return Err(VpeError::EmptyTranscript);
        }

        let feedback_thread = self.api.create_thread().await.map_err(|e| {
            error!(error = ?e, "Failed to create feedback thread");
            VpeError::Provider(e.context("failed to create feedback thread"))
        })?;
        info!(
            patient = %patient_name,
            feedback_assistant = %assignment.key,
            %feedback_thread,
            "Generating feedback"
        );

        post_user_message(
            self.api.as_ref(),
            &feedback_thread,
            &feedback_prompt(&patient_name, &transcript),
        )
        .await?;

        run_to_completion(
            self.api.as_ref(),
            &feedback_thread,
            &assignment.assistant_id,
            Operation::FeedbackGeneration,
            self.policy,
            &mut |elapsed| notify(&updates, FeedbackUpdate::Progress { elapsed }),
        )
        .await?;

        let feedback = match latest_message(self.api.as_ref(), &feedback_thread).await? {
            Some(message) if message.role == Role::Assistant => message.content,
            _ => return Err(VpeError::NoResponse("feedback assistant")),
        };

        Ok(FeedbackReport {
            patient_name,
            feedback,
            warnings,
        })
    }
}

fn notify(updates: &Option<mpsc::Sender<FeedbackUpdate>>, update: FeedbackUpdate) {
    let Some(tx) = updates else { return };
    match tx.try_send(update) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(update)) => {
            debug!(?update, "Feedback update dropped: channel full");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            warn!("Failed to send feedback update: receiver dropped.");
        }
    }
}
