//! Axum Handlers for the REST API
//!
//! The signaling endpoint the telephony provider calls on call setup, plus
//! read-only views of the bridge's state. `utoipa` doc comments feed the
//! OpenAPI document.

use axum::{
    extract::{Form, Path, State, rejection::FormRejection},
    http::{StatusCode, header},
    response::{IntoResponse, Json, Response},
};
use std::sync::Arc;
use tracing::{error, info, warn};
use voiceagent_core::protocol::telephony::{AGENT_ID_PARAMETER, FROM_PARAMETER, TO_PARAMETER};

use crate::{
    models::{ErrorResponse, HealthResponse, SignalingForm},
    registry::SessionSummary,
    state::AppState,
};

pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    InternalServerError(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(ErrorResponse { message })).into_response()
            }
            ApiError::NotFound(message) => {
                (StatusCode::NOT_FOUND, Json(ErrorResponse { message })).into_response()
            }
            ApiError::InternalServerError(err) => {
                error!("Internal Server Error: {:?}", err);
                let message = "An internal server error occurred.".to_string();
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse { message }),
                )
                    .into_response()
            }
        }
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::InternalServerError(err.into())
    }
}

fn xml_escape(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// Builds the markup that tells the provider to open a media stream to us.
pub fn stream_markup(
    stream_url: &str,
    greeting: Option<&str>,
    agent_id: &str,
    form: &SignalingForm,
) -> String {
    let mut xml = String::from(r#"<?xml version="1.0" encoding="UTF-8"?><Response>"#);
    if let Some(greeting) = greeting {
        xml.push_str(&format!(r#"<Say language="en">{}</Say>"#, xml_escape(greeting)));
    }
    xml.push_str(&format!(
        r#"<Connect><Stream url="{}">"#,
        xml_escape(stream_url)
    ));

    let parameters = [
        (AGENT_ID_PARAMETER, Some(agent_id)),
        (FROM_PARAMETER, form.from.as_deref()),
        (TO_PARAMETER, form.to.as_deref()),
    ];
    for (name, value) in parameters {
        if let Some(value) = value.filter(|v| !v.is_empty()) {
            xml.push_str(&format!(
                r#"<Parameter name="{}" value="{}"/>"#,
                name,
                xml_escape(value)
            ));
        }
    }
    xml.push_str("</Stream></Connect></Response>");
    xml
}

/// Answer an incoming call by connecting it to the agent's media stream.
#[utoipa::path(
    post,
    path = "/signaling/{agent_id}",
    request_body(content = SignalingForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Stream instructions", content_type = "text/xml", body = String),
        (status = 400, description = "Bad request", body = ErrorResponse),
        (status = 404, description = "Agent not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    params(
        ("agent_id" = String, Path, description = "The agent that should take the call")
    )
)]
pub async fn signaling(
    State(state): State<Arc<AppState>>,
    Path(agent_id): Path<String>,
    form: Result<Form<SignalingForm>, FormRejection>,
) -> Result<Response, ApiError> {
    let agent_id = agent_id.trim().to_string();
    if agent_id.is_empty() {
        return Err(ApiError::BadRequest("agent_id is required".to_string()));
    }

    // Providers differ in what they post; the form is informational only.
    let form = match form {
        Ok(Form(form)) => form,
        Err(rejection) => {
            warn!(error = %rejection, "Ignoring unreadable signaling form");
            SignalingForm::default()
        }
    };

    if !state.agents.agent_exists(&agent_id).await? {
        return Err(ApiError::NotFound(format!(
            "Agent with id '{}' not found",
            agent_id
        )));
    }

    info!(%agent_id, call_sid = ?form.call_sid, "Answering incoming call");
    let xml = stream_markup(
        &state.config.stream_url(),
        state.config.signaling_greeting.as_deref(),
        &agent_id,
        &form,
    );
    Ok(([(header::CONTENT_TYPE, "text/xml")], xml).into_response())
}

/// List the calls currently being bridged.
#[utoipa::path(
    get,
    path = "/sessions",
    responses(
        (status = 200, description = "Active sessions", body = [SessionSummary])
    )
)]
pub async fn list_sessions(State(state): State<Arc<AppState>>) -> Json<Vec<SessionSummary>> {
    Json(state.registry.snapshot())
}

/// Liveness probe.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is up", body = HealthResponse)
    )
)]
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        active_sessions: state.registry.len(),
    })
}
