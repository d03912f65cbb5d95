//! Wire protocols of the two bridged transports.
//!
//! - `telephony`: JSON text frames exchanged with the telephony media stream.
//! - `agent`: the speech-to-speech agent's JSON control events and binary audio.

pub mod agent;
pub mod telephony;

/// A message that could not be decoded at the protocol boundary.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid JSON message: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid base64 audio payload: {0}")]
    Base64(#[from] base64::DecodeError),
}
