//! Axum Router Configuration
//!
//! This module defines the complete HTTP routing for the application,
//! including the REST API, the feedback event stream, and OpenAPI documentation.

use crate::{
    handlers,
    models::{
        EncounterSelectionView, EncounterSummary, ErrorResponse, FeedbackProgress, FeedbackView,
        Message, MessageRole, ReplyView, SelectEncounterPayload, SendMessagePayload, SessionView,
    },
    state::AppState,
};

use axum::{
    Router,
    routing::{get, post, put},
};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::list_encounters,
        handlers::create_session,
        handlers::get_session,
        handlers::end_session,
        handlers::select_encounter,
        handlers::send_message,
        handlers::generate_feedback,
        handlers::stream_feedback,
    ),
    components(
        schemas(
            EncounterSummary, SessionView, Message, MessageRole, SelectEncounterPayload,
            EncounterSelectionView, SendMessagePayload, ReplyView, FeedbackView,
            FeedbackProgress, ErrorResponse
        )
    ),
    tags(
        (name = "VPE API", description = "Virtual patient encounters and clinical-skills feedback")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    let api_router = Router::new()
        .route("/encounters", get(handlers::list_encounters))
        .route("/sessions", post(handlers::create_session))
        .route(
            "/sessions/{id}",
            get(handlers::get_session).delete(handlers::end_session),
        )
        .route("/sessions/{id}/encounter", put(handlers::select_encounter))
        .route("/sessions/{id}/messages", post(handlers::send_message))
        .route("/sessions/{id}/feedback", post(handlers::generate_feedback))
        .route(
            "/sessions/{id}/feedback/stream",
            get(handlers::stream_feedback),
        )
        .with_state(app_state);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
}
