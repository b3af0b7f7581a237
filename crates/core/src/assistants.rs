use anyhow::{Result, anyhow};
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{
        CreateMessageRequestArgs, CreateRunRequestArgs, CreateThreadRequest, MessageContent,
        MessageObject, MessageRole, RunObject,
    },
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle states of a run, as reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    Cancelling,
    RequiresAction,
    Completed,
    Failed,
    Cancelled,
    Expired,
    Incomplete,
}

impl RunStatus {
    /// Whether the run is still being processed and should be polled again.
    pub fn is_pending(self) -> bool {
        matches!(
            self,
            RunStatus::Queued | RunStatus::InProgress | RunStatus::Cancelling
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Queued => "queued",
            RunStatus::InProgress => "in_progress",
            RunStatus::Cancelling => "cancelling",
            RunStatus::RequiresAction => "requires_action",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Expired => "expired",
            RunStatus::Incomplete => "incomplete",
        };
        f.write_str(s)
    }
}

/// A snapshot of a run taken by one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunState {
    pub status: RunStatus,
    /// Provider-supplied error detail, present on failed runs.
    pub last_error: Option<String>,
}

impl RunState {
    pub fn new(status: RunStatus) -> Self {
        Self {
            status,
            last_error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// The text of one message stored on a provider thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadMessage {
    pub role: Role,
    pub content: String,
}

impl ThreadMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Sort order for listing thread messages by creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOrder {
    /// Oldest first.
    Ascending,
    /// Newest first.
    Descending,
}

impl MessageOrder {
    fn as_query(self) -> &'static str {
        match self {
            MessageOrder::Ascending => "asc",
            MessageOrder::Descending => "desc",
        }
    }
}

/// One page request against a thread's message list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageQuery {
    pub limit: u32,
    pub order: MessageOrder,
    /// Cursor: only messages after this message id, in `order`.
    pub after: Option<String>,
}

impl MessageQuery {
    /// The newest message only.
    pub fn latest() -> Self {
        Self {
            limit: 1,
            order: MessageOrder::Descending,
            after: None,
        }
    }

    /// Oldest-first pages of `page_size` messages.
    pub fn chronological(page_size: u32) -> Self {
        Self {
            limit: page_size,
            order: MessageOrder::Ascending,
            after: None,
        }
    }

    pub fn after(self, cursor: impl Into<String>) -> Self {
        Self {
            after: Some(cursor.into()),
            ..self
        }
    }
}

/// A page of thread messages plus the cursor needed to fetch the next one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessagePage {
    pub messages: Vec<ThreadMessage>,
    /// Id of the last message in this page.
    pub last_id: Option<String>,
    pub has_more: bool,
}

impl MessagePage {
    /// A page that is the whole result.
    pub fn complete(messages: Vec<ThreadMessage>) -> Self {
        Self {
            messages,
            last_id: None,
            has_more: false,
        }
    }
}

/// The slice of a hosted assistants API this service relies on.
///
/// Threads hold the conversation; runs ask an assistant to process a thread
/// and append its reply.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AssistantsApi: Send + Sync {
    /// Creates an empty thread and returns its id.
    async fn create_thread(&self) -> Result<String>;

    /// Appends a user-role message to a thread.
    async fn add_user_message(&self, thread_id: &str, content: &str) -> Result<()>;

    /// Starts a run of `assistant_id` over a thread and returns the run id.
    async fn start_run(&self, thread_id: &str, assistant_id: &str) -> Result<String>;

    async fn run_state(&self, thread_id: &str, run_id: &str) -> Result<RunState>;

    /// Lists one page of a thread's messages.
    async fn list_messages(&self, thread_id: &str, query: MessageQuery) -> Result<MessagePage>;
}

/// `AssistantsApi` backed by the OpenAI Assistants v2 endpoints.
pub struct OpenAIAssistantsClient {
    client: Client<OpenAIConfig>,
}

impl OpenAIAssistantsClient {
    /// Creates a new client.
    ///
    /// # Arguments
    ///
    /// * `config` - API key and base URL of the OpenAI-compatible service.
    pub fn new(config: OpenAIConfig) -> Self {
        Self {
            client: Client::with_config(config),
        }
    }
}

fn run_state_from(run: &RunObject) -> RunState {
    use async_openai::types::RunStatus as Remote;

    let status = match run.status {
        Remote::Queued => RunStatus::Queued,
        Remote::InProgress => RunStatus::InProgress,
        Remote::RequiresAction => RunStatus::RequiresAction,
        Remote::Cancelling => RunStatus::Cancelling,
        Remote::Cancelled => RunStatus::Cancelled,
        Remote::Failed => RunStatus::Failed,
        Remote::Completed => RunStatus::Completed,
        Remote::Incomplete => RunStatus::Incomplete,
        Remote::Expired => RunStatus::Expired,
    };
    RunState {
        status,
        last_error: run
            .last_error
            .as_ref()
            .map(|e| format!("{}: {}", provider_code(&e.code), e.message)),
    }
}

/// The provider's own wire name for an enum value, e.g. `server_error`.
fn provider_code<T: Serialize>(code: &T) -> String {
    match serde_json::to_value(code) {
        Ok(serde_json::Value::String(name)) => name,
        Ok(other) => other.to_string(),
        Err(_) => "unknown_error".to_string(),
    }
}

fn thread_message_from(message: &MessageObject) -> ThreadMessage {
    let role = match message.role {
        MessageRole::User => Role::User,
        MessageRole::Assistant => Role::Assistant,
    };
    let content = message
        .content
        .iter()
        .filter_map(|part| match part {
            MessageContent::Text(text) => Some(text.text.value.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n");
    ThreadMessage { role, content }
}

#[async_trait]
impl AssistantsApi for OpenAIAssistantsClient {
    async fn create_thread(&self) -> Result<String> {
        let thread = self
            .client
            .threads()
            .create(CreateThreadRequest::default())
            .await?;
        Ok(thread.id)
    }

    async fn add_user_message(&self, thread_id: &str, content: &str) -> Result<()> {
        let request = CreateMessageRequestArgs::default()
            .role(MessageRole::User)
            .content(content.to_string())
            .build()?;
        self.client
            .threads()
            .messages(thread_id)
            .create(request)
            .await?;
        Ok(())
    }

    async fn start_run(&self, thread_id: &str, assistant_id: &str) -> Result<String> {
        let request = CreateRunRequestArgs::default()
            .assistant_id(assistant_id)
            .build()?;
        let run = self.client.threads().runs(thread_id).create(request).await?;
        Ok(run.id)
    }

    async fn run_state(&self, thread_id: &str, run_id: &str) -> Result<RunState> {
        let run = self
            .client
            .threads()
            .runs(thread_id)
            .retrieve(run_id)
            .await?;
        Ok(run_state_from(&run))
    }

    async fn list_messages(&self, thread_id: &str, query: MessageQuery) -> Result<MessagePage> {
        if query.limit == 0 {
            return Err(anyhow!("message listing limit must be at least 1"));
        }
        let mut params = vec![
            ("limit", query.limit.to_string()),
            ("order", query.order.as_query().to_string()),
        ];
        if let Some(after) = query.after {
            params.push(("after", after));
        }
        let response = self
            .client
            .threads()
            .messages(thread_id)
            .list(&params)
            .await?;
        Ok(MessagePage {
            messages: response.data.iter().map(thread_message_from).collect(),
            last_id: response.last_id,
            has_more: response.has_more,
        })
    }
}
