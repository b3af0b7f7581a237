//! API Models
//!
//! Request payloads and response bodies of the HTTP API, with `utoipa`
//! schemas for the OpenAPI document.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;
use uuid::Uuid;
use vpe_core::assistants::Role;
use vpe_core::conversation::EncounterSelection;
use vpe_core::encounter::Encounter;
use vpe_core::feedback::FeedbackReport;
use vpe_core::session::{ChatMessage, Session};

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, Copy, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

// Implement Display for easy conversion to a string, useful for logging and debugging.
impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
        }
    }
}

impl From<Role> for MessageRole {
    fn from(role: Role) -> Self {
        match role {
            Role::User => MessageRole::User,
            Role::Assistant => MessageRole::Assistant,
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct Message {
    #[schema(example = "user")]
    pub role: MessageRole,
    pub content: String,
}

impl From<&ChatMessage> for Message {
    fn from(message: &ChatMessage) -> Self {
        Self {
            role: message.role.into(),
            content: message.content.clone(),
        }
    }
}

/// One entry of the encounter directory.
#[derive(Serialize, Deserialize, ToSchema, Debug, Clone)]
pub struct EncounterSummary {
    #[schema(example = "Mr. Aiken (Geriatrics 15)")]
    pub label: String,
    #[schema(example = "Mr. Aiken")]
    pub patient_name: String,
    pub has_briefing: bool,
}

impl EncounterSummary {
    pub fn new(encounter: &Encounter, has_briefing: bool) -> Self {
        Self {
            label: encounter.label.clone(),
            patient_name: encounter.patient_name().to_string(),
            has_briefing,
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone)]
pub struct SessionView {
    #[schema(value_type = String, format = Uuid)]
    pub id: Uuid,
    pub encounter: Option<String>,
    pub thread_id: Option<String>,
    pub messages: Vec<Message>,
    pub user_turns: usize,
    pub min_turns_for_feedback: usize,
    pub feedback_available: bool,
    pub created_at: DateTime<Utc>,
}

impl SessionView {
    pub fn new(id: Uuid, created_at: DateTime<Utc>, session: &Session, min_turns: usize) -> Self {
        Self {
            id,
            encounter: session.selected_encounter().map(str::to_string),
            thread_id: session.thread_id().map(str::to_string),
            messages: session.messages().iter().map(Message::from).collect(),
            user_turns: session.count_user_turns(),
            min_turns_for_feedback: min_turns,
            feedback_available: session.feedback_ready(min_turns),
            created_at,
        }
    }
}

#[derive(Deserialize, ToSchema)]
pub struct SelectEncounterPayload {
    #[schema(example = "Mr. Aiken (Geriatrics 15)")]
    pub label: String,
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone)]
pub struct EncounterSelectionView {
    pub label: String,
    pub patient_name: String,
    /// Case introduction to show the student for this encounter.
    pub briefing: Option<String>,
    /// `true` when the conversation history was reset.
    pub switched: bool,
    pub session: SessionView,
}

impl EncounterSelectionView {
    pub fn new(selection: EncounterSelection, session: SessionView) -> Self {
        Self {
            patient_name: selection.encounter.patient_name().to_string(),
            label: selection.encounter.label,
            briefing: selection.encounter.intro_text,
            switched: selection.switched,
            session,
        }
    }
}

#[derive(Deserialize, ToSchema)]
pub struct SendMessagePayload {
    #[schema(example = "What brings you in today?")]
    pub content: String,
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone)]
pub struct ReplyView {
    pub reply: Message,
    pub user_turns: usize,
    pub feedback_available: bool,
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct FeedbackView {
    pub patient_name: String,
    pub feedback: String,
    pub warnings: Vec<String>,
}

impl From<FeedbackReport> for FeedbackView {
    fn from(report: FeedbackReport) -> Self {
        Self {
            patient_name: report.patient_name,
            feedback: report.feedback,
            warnings: report.warnings,
        }
    }
}

/// Payload of a `progress` event on the feedback stream.
#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct FeedbackProgress {
    pub elapsed_secs: u64,
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct ErrorResponse {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guidance: Option<String>,
}
