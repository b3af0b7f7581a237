//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds the encounter
//! directory, the session registry and the orchestration services.

use crate::config::Config;
use crate::store::SessionStore;
use std::sync::Arc;
use vpe_core::assistants::AssistantsApi;
use vpe_core::conversation::ConversationService;
use vpe_core::encounter::EncounterDirectory;
use vpe_core::feedback::FeedbackService;

/// The shared application state, created once at startup and passed to all handlers.
/// All fields are public to be accessible from other modules.
#[derive(Clone)]
pub struct AppState {
    pub directory: Arc<EncounterDirectory>,
    pub sessions: Arc<SessionStore>,
    pub conversation: Arc<ConversationService>,
    pub feedback: Arc<FeedbackService>,
    pub config: Arc<Config>,
}

impl AppState {
    /// Wires both orchestration services to the same assistants API.
    pub fn new(config: Config, directory: EncounterDirectory, api: Arc<dyn AssistantsApi>) -> Self {
        Self {
            directory: Arc::new(directory),
            sessions: Arc::new(SessionStore::new()),
            conversation: Arc::new(ConversationService::new(api.clone(), config.chat_policy())),
            feedback: Arc::new(FeedbackService::new(api, config.feedback_policy())),
            config: Arc::new(config),
        }
    }
}
