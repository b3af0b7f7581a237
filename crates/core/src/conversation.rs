//! Conversation Orchestration
//!
//! Drives a student's interview with a virtual patient: binding a session to
//! an encounter's thread, posting each question, running the patient
//! assistant and reading back its answer.

use crate::assistants::{AssistantsApi, MessageQuery, Role, ThreadMessage};
use crate::encounter::{EncounterDirectory, PatientEncounter};
use crate::error::VpeError;
use crate::polling::{Operation, PollPolicy, wait_for_run};
use crate::session::Session;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Outcome of selecting an encounter for a session.
#[derive(Debug, Clone)]
pub struct EncounterSelection {
    pub encounter: PatientEncounter,
    /// `true` when a new thread was created and the history wiped.
    pub switched: bool,
}

/// Runs the patient side of the interview against the assistants API.
pub struct ConversationService {
    api: Arc<dyn AssistantsApi>,
    policy: PollPolicy,
}

impl ConversationService {
    pub fn new(api: Arc<dyn AssistantsApi>, policy: PollPolicy) -> Self {
        Self { api, policy }
    }

    pub fn policy(&self) -> PollPolicy {
        self.policy
    }

    /// Points the session at `label`, starting a fresh thread if it changed.
    pub async fn select_encounter(
        &self,
        session: &mut Session,
        directory: &EncounterDirectory,
        label: &str,
    ) -> Result<EncounterSelection, VpeError> {
        let encounter = directory.resolve(label)?;
        if session.is_selected(label) {
            return Ok(EncounterSelection {
                encounter,
                switched: false,
            });
        }

        let previous = session.selected_encounter().map(str::to_string);
        let thread_id = self.api.create_thread().await.map_err(|e| {
            error!(error = ?e, "Failed to create thread");
            VpeError::Provider(e.context("failed to create thread"))
        })?;
        session.switch_encounter(label, thread_id.as_str());
        info!(
            encounter = label,
            previous = previous.as_deref().unwrap_or("<none>"),
            %thread_id,
            "Switched encounter"
        );

        Ok(EncounterSelection {
            encounter,
            switched: true,
        })
    }

    /// Posts `prompt` to a thread, runs `assistant_id` and returns its reply.
    pub async fn send_message(
        &self,
        thread_id: &str,
        assistant_id: &str,
        prompt: &str,
    ) -> Result<String, VpeError> {
        post_user_message(self.api.as_ref(), thread_id, prompt).await?;
        self.reply(thread_id, assistant_id).await
    }

    /// One full chat turn for a session.
    ///
    /// The question is recorded in the session once the thread has accepted
    /// it; the patient's answer is recorded only if the run completes.
    pub async fn chat(
        &self,
        session: &mut Session,
        directory: &EncounterDirectory,
        prompt: &str,
    ) -> Result<String, VpeError> {
        if prompt.trim().is_empty() {
            return Err(VpeError::EmptyMessage);
        }
        let label = session
            .selected_encounter()
            .ok_or(VpeError::NoEncounterSelected)?;
        let encounter = directory
            .encounter(label)
            .ok_or_else(|| VpeError::UnknownEncounter(label.to_string()))?;
        let assistant_id = encounter.assistant_id.clone();
        let thread_id = session
            .thread_id()
            .ok_or(VpeError::NoEncounterSelected)?
            .to_string();

        post_user_message(self.api.as_ref(), &thread_id, prompt).await?;
        session.append_message(Role::User, prompt);

        let reply = self.reply(&thread_id, &assistant_id).await?;
        session.append_message(Role::Assistant, reply.as_str());
        Ok(reply)
    }

    async fn reply(&self, thread_id: &str, assistant_id: &str) -> Result<String, VpeError> {
        run_to_completion(
            self.api.as_ref(),
            thread_id,
            assistant_id,
            Operation::ChatResponse,
            self.policy,
            &mut |_| {},
        )
        .await?;

        let latest = latest_message(self.api.as_ref(), thread_id)
            .await?
            .ok_or(VpeError::NoResponse("virtual patient"))?;
        Ok(latest.content)
    }
}

pub(crate) async fn post_user_message(
    api: &dyn AssistantsApi,
    thread_id: &str,
    content: &str,
) -> Result<(), VpeError> {
    api.add_user_message(thread_id, content).await.map_err(|e| {
        error!(thread_id, error = ?e, "Failed to post message");
        VpeError::Provider(e.context("failed to send message"))
    })
}

/// Starts a run and waits for it to complete.
pub(crate) async fn run_to_completion(
    api: &dyn AssistantsApi,
    thread_id: &str,
    assistant_id: &str,
    operation: Operation,
    policy: PollPolicy,
    on_tick: &mut (dyn FnMut(Duration) + Send),
) -> Result<(), VpeError> {
    let run_id = api.start_run(thread_id, assistant_id).await.map_err(|e| {
        error!(thread_id, assistant_id, error = ?e, "Failed to start run");
        VpeError::Provider(e.context(format!("failed to start {operation}")))
    })?;
    info!(%operation, thread_id, %run_id, assistant_id, "Run started");
    wait_for_run(api, thread_id, &run_id, operation, policy, on_tick).await
}

/// The newest message on a thread, if any.
pub(crate) async fn latest_message(
    api: &dyn AssistantsApi,
    thread_id: &str,
) -> Result<Option<ThreadMessage>, VpeError> {
    let page = api
        .list_messages(thread_id, MessageQuery::latest())
        .await
        .map_err(|e| VpeError::Provider(e.context("failed to read response")))?;
    Ok(page.messages.into_iter().next())
}
