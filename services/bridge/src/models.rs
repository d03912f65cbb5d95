//! API Models
//!
//! Request and response bodies of the REST surface, with `utoipa` schemas for
//! the generated OpenAPI document.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct ErrorResponse {
    pub message: String,
}

#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct HealthResponse {
    #[schema(example = "ok")]
    pub status: String,
    pub active_sessions: usize,
}

/// The fields of the provider's call-setup callback the bridge cares about.
/// Everything else in the form is ignored.
#[derive(Deserialize, ToSchema, Debug, Default, Clone)]
pub struct SignalingForm {
    #[serde(rename = "CallSid", default)]
    #[schema(example = "CA0123456789abcdef")]
    pub call_sid: Option<String>,
    #[serde(rename = "From", default)]
    #[schema(example = "+15550001111")]
    pub from: Option<String>,
    #[serde(rename = "To", default)]
    #[schema(example = "+15550002222")]
    pub to: Option<String>,
}
