//! Axum Handlers for the REST API
//!
//! This module contains the logic for handling HTTP requests for encounters,
//! sessions, chat turns and feedback. It uses `utoipa` doc comments to
//! generate OpenAPI documentation.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        IntoResponse, Json, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use futures_util::stream::{self, Stream, StreamExt};
use serde::Serialize;
use std::{convert::Infallible, sync::Arc};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;
use vpe_core::{
    VpeError, assistants::Role, feedback::FeedbackUpdate, session::Session,
};

use crate::{
    models::{
        EncounterSelectionView, EncounterSummary, ErrorResponse, FeedbackProgress, FeedbackView,
        Message, ReplyView, SelectEncounterPayload, SendMessagePayload, SessionView,
    },
    state::AppState,
    store::SessionHandle,
};

pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Service(VpeError),
    InternalServerError(anyhow::Error),
}

impl ApiError {
    /// Status code and body for this error; shared by JSON and SSE responses.
    pub fn to_error_response(&self) -> (StatusCode, ErrorResponse) {
        let plain = |status: StatusCode, message: &str| {
            (
                status,
                ErrorResponse {
                    message: message.to_string(),
                    guidance: None,
                },
            )
        };
        match self {
            ApiError::BadRequest(message) => plain(StatusCode::BAD_REQUEST, message),
            ApiError::NotFound(message) => plain(StatusCode::NOT_FOUND, message),
            ApiError::Conflict(message) => plain(StatusCode::CONFLICT, message),
            ApiError::Service(err) => {
                let status = match err {
                    VpeError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
                    VpeError::Provider(_)
                    | VpeError::RunFailed { .. }
                    | VpeError::RequiresAction { .. }
                    | VpeError::NoResponse(_) => StatusCode::BAD_GATEWAY,
                    VpeError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                    VpeError::UnknownEncounter(_) => StatusCode::NOT_FOUND,
                    VpeError::NoEncounterSelected
                    | VpeError::EmptyMessage
                    | VpeError::EmptyTranscript => StatusCode::BAD_REQUEST,
                };
                (
                    status,
                    ErrorResponse {
                        message: err.to_string(),
                        guidance: err.guidance().map(str::to_string),
                    },
                )
            }
            ApiError::InternalServerError(_) => plain(
                StatusCode::INTERNAL_SERVER_ERROR,
                "An internal server error occurred.",
            ),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = self.to_error_response();
        match &self {
            ApiError::InternalServerError(err) => error!("Internal Server Error: {:?}", err),
            ApiError::Service(err) if status.is_server_error() => {
                error!(status = %status, "Request failed: {}", err)
            }
            _ => {}
        }
        (status, Json(body)).into_response()
    }
}

impl From<VpeError> for ApiError {
    fn from(err: VpeError) -> Self {
        Self::Service(err)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::InternalServerError(err)
    }
}

async fn find_session(state: &AppState, id: Uuid) -> Result<SessionHandle, ApiError> {
    state
        .sessions
        .get(id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("Session with id '{}' not found", id)))
}

fn session_view(state: &AppState, entry: &SessionHandle, session: &Session) -> SessionView {
    SessionView::new(
        entry.id,
        entry.created_at,
        session,
        state.config.min_turns_for_feedback,
    )
}

/// Enforces the minimum-turn gate before any feedback work starts.
fn check_feedback_gate(state: &AppState, session: &Session) -> Result<(), ApiError> {
    if session.selected_encounter().is_none() {
        return Err(VpeError::NoEncounterSelected.into());
    }
    let min_turns = state.config.min_turns_for_feedback;
    let turns = session.count_user_turns();
    if !session.feedback_ready(min_turns) {
        return Err(ApiError::Conflict(format!(
            "Feedback is available after at least {min_turns} questions; {turns} asked so far."
        )));
    }
    Ok(())
}

/// List the virtual patient encounters in directory order.
#[utoipa::path(
    get,
    path = "/encounters",
    responses(
        (status = 200, description = "Encounter directory", body = [EncounterSummary])
    )
)]
pub async fn list_encounters(State(state): State<Arc<AppState>>) -> Json<Vec<EncounterSummary>> {
    let encounters = state
        .directory
        .encounters()
        .iter()
        .map(|e| EncounterSummary::new(e, state.directory.briefing(e.patient_name()).is_some()))
        .collect();
    Json(encounters)
}

/// Start a new student session.
#[utoipa::path(
    post,
    path = "/sessions",
    responses(
        (status = 201, description = "Session created successfully", body = SessionView)
    )
)]
pub async fn create_session(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let entry = state.sessions.create().await;
    let session = entry.state.lock().await;
    let view = session_view(&state, &entry, &session);
    (StatusCode::CREATED, Json(view))
}

/// Get a session with its conversation history.
#[utoipa::path(
    get,
    path = "/sessions/{id}",
    responses(
        (status = 200, description = "Session details", body = SessionView),
        (status = 404, description = "Session not found", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Session ID")
    )
)]
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionView>, ApiError> {
    let entry = find_session(&state, id).await?;
    let session = entry.state.lock().await;
    Ok(Json(session_view(&state, &entry, &session)))
}

/// End a session and discard its state.
#[utoipa::path(
    delete,
    path = "/sessions/{id}",
    responses(
        (status = 204, description = "Session ended"),
        (status = 404, description = "Session not found", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Session ID")
    )
)]
pub async fn end_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    if state.sessions.remove(id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!(
            "Session with id '{}' not found",
            id
        )))
    }
}

/// Select the encounter for a session.
///
/// Choosing a different encounter starts a new conversation thread and clears
/// the history; re-selecting the current one changes nothing.
#[utoipa::path(
    put,
    path = "/sessions/{id}/encounter",
    request_body = SelectEncounterPayload,
    responses(
        (status = 200, description = "Encounter selected", body = EncounterSelectionView),
        (status = 404, description = "Session or encounter not found", body = ErrorResponse),
        (status = 502, description = "Provider error", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Session ID")
    )
)]
pub async fn select_encounter(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<SelectEncounterPayload>,
) -> Result<Json<EncounterSelectionView>, ApiError> {
    let entry = find_session(&state, id).await?;
    let mut session = entry.state.lock().await;

    let selection = state
        .conversation
        .select_encounter(&mut session, &state.directory, &payload.label)
        .await?;
    if selection.switched {
        info!(session_id = %id, encounter = %payload.label, "Encounter selected");
    }

    let view = session_view(&state, &entry, &session);
    Ok(Json(EncounterSelectionView::new(selection, view)))
}

/// Ask the virtual patient a question.
#[utoipa::path(
    post,
    path = "/sessions/{id}/messages",
    request_body = SendMessagePayload,
    responses(
        (status = 200, description = "The patient's reply", body = ReplyView),
        (status = 400, description = "Empty message or no encounter", body = ErrorResponse),
        (status = 404, description = "Session not found", body = ErrorResponse),
        (status = 502, description = "Provider or run failure", body = ErrorResponse),
        (status = 504, description = "The patient did not answer in time", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Session ID")
    )
)]
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<SendMessagePayload>,
) -> Result<Json<ReplyView>, ApiError> {
    let entry = find_session(&state, id).await?;
    let mut session = entry.state.lock().await;

    let reply = state
        .conversation
        .chat(&mut session, &state.directory, &payload.content)
        .await?;

    Ok(Json(ReplyView {
        reply: Message {
            role: Role::Assistant.into(),
            content: reply,
        },
        user_turns: session.count_user_turns(),
        feedback_available: session.feedback_ready(state.config.min_turns_for_feedback),
    }))
}

/// Generate clinical-skills feedback for the conversation.
#[utoipa::path(
    post,
    path = "/sessions/{id}/feedback",
    responses(
        (status = 200, description = "Feedback report", body = FeedbackView),
        (status = 404, description = "Session not found", body = ErrorResponse),
        (status = 409, description = "Not enough questions asked yet", body = ErrorResponse),
        (status = 502, description = "Provider or run failure", body = ErrorResponse),
        (status = 504, description = "Feedback generation timed out", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Session ID")
    )
)]
pub async fn generate_feedback(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<FeedbackView>, ApiError> {
    let entry = find_session(&state, id).await?;
    let session = entry.state.lock().await;
    check_feedback_gate(&state, &session)?;

    let report = state
        .feedback
        .generate_feedback(&session, &state.directory, None)
        .await?;
    Ok(Json(report.into()))
}

fn sse_event<T: Serialize>(name: &str, payload: &T) -> Event {
    Event::default()
        .event(name)
        .json_data(payload)
        .unwrap_or_else(|e| Event::default().event("error").data(e.to_string()))
}

fn update_event(update: FeedbackUpdate) -> Event {
    match update {
        FeedbackUpdate::Warning(message) => Event::default().event("warning").data(message),
        FeedbackUpdate::Progress { elapsed } => sse_event(
            "progress",
            &FeedbackProgress {
                elapsed_secs: elapsed.as_secs(),
            },
        ),
    }
}

/// Generate feedback as a server-sent event stream.
///
/// Emits `warning` and `progress` events while the rating assistant works,
/// then a single `feedback` or `error` event.
#[utoipa::path(
    get,
    path = "/sessions/{id}/feedback/stream",
    responses(
        (
            status = 200,
            description = "Event stream of progress, then feedback or error",
            body = String,
            content_type = "text/event-stream"
        ),
        (status = 404, description = "Session not found", body = ErrorResponse),
        (status = 409, description = "Not enough questions asked yet", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Session ID")
    )
)]
pub async fn stream_feedback(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let entry = find_session(&state, id).await?;
    check_feedback_gate(&state, &*entry.state.lock().await)?;

    let (updates_tx, updates_rx) = mpsc::channel(32);
    let (done_tx, done_rx) = oneshot::channel::<Result<FeedbackView, ApiError>>();

    let span = info_span!("feedback_stream", session_id = %id);
    tokio::spawn(
        async move {
            let session = entry.state.lock().await;
            // The gate is checked again: the session may have changed while unlocked.
            let result = match check_feedback_gate(&state, &session) {
                Ok(()) => state
                    .feedback
                    .generate_feedback(&session, &state.directory, Some(updates_tx))
                    .await
                    .map(FeedbackView::from)
                    .map_err(ApiError::from),
                Err(e) => Err(e),
            };
            if done_tx.send(result).is_err() {
                warn!("Feedback finished after the client disconnected.");
            }
        }
        .instrument(span),
    );

    let updates = ReceiverStream::new(updates_rx).map(|update| Ok(update_event(update)));
    let outcome = stream::once(async move {
        let event = match done_rx.await {
            Ok(Ok(view)) => sse_event("feedback", &view),
            Ok(Err(err)) => {
                let (status, body) = err.to_error_response();
                if status.is_server_error() {
                    error!(status = %status, message = %body.message, "Feedback stream failed");
                }
                sse_event("error", &body)
            }
            Err(_) => sse_event(
                "error",
                &ErrorResponse {
                    message: "Feedback generation ended unexpectedly.".to_string(),
                    guidance: None,
                },
            ),
        };
        Ok(event)
    });

    Ok(Sse::new(updates.chain(outcome)).keep_alive(KeepAlive::default()))
}
