use crate::assistants::Role;
use serde::{Deserialize, Serialize};

/// Number of student questions required before feedback can be requested.
pub const DEFAULT_MIN_TURNS: usize = 5;

/// One exchanged message as shown in the chat history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

/// The per-student conversation state.
///
/// A session holds at most one live thread, bound to the selected encounter.
/// Selecting a different encounter replaces the thread and wipes the history,
/// so messages never leak from one patient to another.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    thread_id: Option<String>,
    messages: Vec<ChatMessage>,
    selected_encounter: Option<String>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn thread_id(&self) -> Option<&str> {
        self.thread_id.as_deref()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn selected_encounter(&self) -> Option<&str> {
        self.selected_encounter.as_deref()
    }

    /// Whether selecting `label` would leave the session untouched.
    pub fn is_selected(&self, label: &str) -> bool {
        self.selected_encounter.as_deref() == Some(label)
    }

    /// Binds the session to a new encounter and its fresh thread.
    ///
    /// Returns `false` without touching anything if `label` is already
    /// selected; the caller should not have created a thread in that case.
    pub fn switch_encounter(
        &mut self,
        label: impl Into<String>,
        thread_id: impl Into<String>,
    ) -> bool {
        let label = label.into();
        if self.is_selected(&label) {
            return false;
        }
        self.selected_encounter = Some(label);
        self.thread_id = Some(thread_id.into());
        self.messages.clear();
        true
    }

    pub fn append_message(&mut self, role: Role, content: impl Into<String>) {
        self.messages.push(ChatMessage {
            role,
            content: content.into(),
        });
    }

    pub fn count_user_turns(&self) -> usize {
        self.messages.iter().filter(|m| m.role == Role::User).count()
    }

    /// Whether the student has asked enough questions to request feedback.
    pub fn feedback_ready(&self, min_turns: usize) -> bool {
        self.count_user_turns() >= min_turns
    }
}
