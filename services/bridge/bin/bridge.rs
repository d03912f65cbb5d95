//! Main Entrypoint for the Voice Agent Bridge
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Connecting to the agent database.
//! 3. Building the agent connector and call-record sink.
//! 4. Constructing the Axum router and applying middleware.
//! 5. Starting the listener and handling graceful shutdown.

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use std::{net::SocketAddr, sync::Arc};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info};
use voiceagent_bridge::{
    config::Config, db::Db, registry::SessionRegistry, router::create_router, state::AppState,
    webhook::WebhookCallRecordSink, ws::agent::WsAgentConnector,
};

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received shutdown signal. Shutting down gracefully..."),
        Err(e) => error!(error = %e, "Failed to install Ctrl+C handler"),
    }
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

    // --- 3. Initialize Database ---
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    info!("Database connection established.");

    // --- 4. Initialize Shared Services ---
    let connector = Arc::new(WsAgentConnector::from_config(&config));
    let call_records = Arc::new(WebhookCallRecordSink::new(config.call_record_url.clone())?);
    let bind_address = config.bind_address;
    info!(
        bind_address = %bind_address,
        stream_url = %config.stream_url(),
        agent_transport = %config.agent_transport_url,
        frame_bytes = config.frame_bytes,
        "Service configured. Starting server..."
    );

    let app_state = Arc::new(AppState {
        config: Arc::new(config),
        agents: Arc::new(Db::new(pool)),
        connector,
        call_records,
        registry: SessionRegistry::new(),
    });

    // --- 5. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    // --- 6. Start Server ---
    let listener = tokio::net::TcpListener::bind(bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server has shut down.");
    Ok(())
}
