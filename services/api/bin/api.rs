//! Main Entrypoint for the VPE API Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Loading the encounter directory.
//! 3. Initializing the assistants API client and orchestration services.
//! 4. Constructing the Axum router and applying middleware.
//! 5. Starting the web server and handling graceful shutdown.

use anyhow::Context;
use async_openai::config::OpenAIConfig;
use secrecy::ExposeSecret;
use std::{net::SocketAddr, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use vpe_api::{config::Config, router::create_router, state::AppState};
use vpe_core::{
    assistants::{AssistantsApi, OpenAIAssistantsClient},
    encounter::EncounterDirectory,
};

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install Ctrl+C handler");
        return;
    }
    info!("Received shutdown signal. Shutting down gracefully...");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    // --- 3. Load the Encounter Directory ---
    let directory = match &config.encounters_path {
        Some(path) => EncounterDirectory::from_path(path),
        None => EncounterDirectory::builtin(),
    }
    .context("Failed to load encounter directory")?;
    info!(
        encounters = directory.encounters().len(),
        feedback_assistants = directory.feedback_assistants().len(),
        source = ?config.encounters_path,
        "Encounter directory loaded."
    );

    // --- 4. Initialize Shared Services ---
    let openai_config = OpenAIConfig::new()
        .with_api_key(config.openai_api_key.expose_secret())
        .with_api_base(&config.openai_api_base);
    let api: Arc<dyn AssistantsApi> = Arc::new(OpenAIAssistantsClient::new(openai_config));
    let app_state = Arc::new(AppState::new(config.clone(), directory, api));
    app_state
        .sessions
        .spawn_idle_sweeper(config.session_idle_timeout);

    // --- 5. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state).layer(cors);

    // --- 6. Start Server ---
    info!(
        api_base = %config.openai_api_base,
        bind_address = %config.bind_address,
        chat_timeout_secs = config.chat_timeout.as_secs(),
        feedback_timeout_secs = config.feedback_timeout.as_secs(),
        min_turns = config.min_turns_for_feedback,
        session_idle_secs = config.session_idle_timeout.as_secs(),
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server has shut down.");
    Ok(())
}
