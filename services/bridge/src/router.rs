//! Axum Router Configuration
//!
//! The signaling and observability routes, the media-stream WebSocket
//! endpoint, and the OpenAPI documentation.

use crate::{
    handlers,
    models::{ErrorResponse, HealthResponse, SignalingForm},
    registry::SessionSummary,
    state::AppState,
    ws::ws_handler,
};

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::signaling,
        handlers::list_sessions,
        handlers::health,
    ),
    components(
        schemas(SignalingForm, SessionSummary, HealthResponse, ErrorResponse)
    ),
    tags(
        (name = "Voice Agent Bridge", description = "Telephony signaling and media-stream bridging for voice agents")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    let api_router = Router::new()
        .route("/signaling/{agent_id}", post(handlers::signaling))
        .route("/sessions", get(handlers::list_sessions))
        .route("/health", get(handlers::health))
        .route("/media-stream", get(ws_handler))
        .with_state(app_state);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
}
