//! Agent transport protocol.
//!
//! The agent speaks JSON control events tagged by `type` and sends synthesized
//! audio as raw binary frames. The bridge sends one `Settings` handshake and
//! then raw binary caller audio.

use super::ProtocolError;
use crate::settings::AgentSettings;
use bytes::Bytes;
use serde::Deserialize;

/// Control events sent by the agent.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum AgentEvent {
    /// The caller started talking; queued playback must be discarded.
    UserStartedSpeaking,
    Welcome {
        #[serde(default)]
        request_id: Option<String>,
    },
    SettingsApplied,
    /// A finalized utterance from either party.
    ConversationText { role: String, content: String },
    AgentStartedSpeaking,
    AgentAudioDone,
    Error {
        #[serde(default)]
        description: Option<String>,
        #[serde(default)]
        code: Option<String>,
    },
    Warning {
        #[serde(default)]
        description: Option<String>,
    },
    #[serde(other)]
    Unrecognized,
}

/// Decodes one agent text frame.
pub fn decode(text: &str) -> Result<AgentEvent, ProtocolError> {
    Ok(serde_json::from_str(text)?)
}

/// Anything the agent can deliver to the bridge.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentInbound {
    Event(AgentEvent),
    /// Synthesized audio, already chunked for playback.
    Audio(Bytes),
}

/// Anything the bridge sends to the agent.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentOutbound {
    /// The one-time handshake.
    Settings(Box<AgentSettings>),
    /// One fixed-size frame of caller audio.
    Audio(Bytes),
}
