//! Telephony media-stream protocol.
//!
//! Inbound events arrive as JSON text frames tagged by `event`. The bridge
//! answers with `media` (audio to play) and `clear` (flush queued playback)
//! commands, each tagged with the stream identifier.

use super::ProtocolError;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Stream parameter carrying the agent identifier.
pub const AGENT_ID_PARAMETER: &str = "agent_id";
pub const FROM_PARAMETER: &str = "from";
pub const TO_PARAMETER: &str = "to";

/// Events sent by the telephony side.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum TelephonyEvent {
    /// The socket is open; informational only.
    Connected {
        #[serde(default)]
        protocol: Option<String>,
    },
    /// The media stream started. Carries the stream identifier.
    Start { start: StreamStart },
    /// A chunk of call audio.
    Media { media: MediaChunk },
    /// The media stream ended gracefully.
    Stop {
        #[serde(default)]
        stop: Option<serde_json::Value>,
    },
    /// Playback of a previously sent mark completed.
    Mark { mark: MarkPayload },
    /// A keypad digit was pressed.
    Dtmf { dtmf: DtmfPayload },
    /// Any event this build does not understand.
    #[serde(other)]
    Unrecognized,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct StreamStart {
    pub stream_sid: String,
    #[serde(default)]
    pub call_sid: Option<String>,
    #[serde(default)]
    pub account_sid: Option<String>,
    #[serde(default)]
    pub tracks: Vec<String>,
    #[serde(default)]
    pub custom_parameters: HashMap<String, String>,
}

impl StreamStart {
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.custom_parameters
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn agent_id(&self) -> Option<&str> {
        self.parameter(AGENT_ID_PARAMETER)
    }
}

/// Which leg of the call a media chunk belongs to.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Track {
    /// Audio spoken by the caller.
    Inbound,
    /// Audio played to the caller; forwarding it back would create a loop.
    Outbound,
    #[serde(other)]
    Other,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct MediaChunk {
    #[serde(default)]
    pub track: Option<Track>,
    pub payload: String,
}

impl MediaChunk {
    pub fn is_inbound(&self) -> bool {
        self.track == Some(Track::Inbound)
    }

    pub fn decode_payload(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(STANDARD.decode(&self.payload)?)
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct MarkPayload {
    pub name: String,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct DtmfPayload {
    pub digit: String,
}

/// Commands sent to the telephony side.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum TelephonyCommand {
    /// Play the given audio on the call.
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        media: OutboundMedia,
    },
    /// Discard any audio queued for playback.
    Clear {
        #[serde(rename = "streamSid")]
        stream_sid: String,
    },
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct OutboundMedia {
    pub payload: String,
}

impl TelephonyCommand {
    /// Wraps raw audio in a media command, base64-encoding the payload.
    pub fn media(stream_sid: &str, audio: &[u8]) -> Self {
        TelephonyCommand::Media {
            stream_sid: stream_sid.to_string(),
            media: OutboundMedia {
                payload: STANDARD.encode(audio),
            },
        }
    }

    pub fn clear(stream_sid: &str) -> Self {
        TelephonyCommand::Clear {
            stream_sid: stream_sid.to_string(),
        }
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Decodes one telephony text frame.
pub fn decode(text: &str) -> Result<TelephonyEvent, ProtocolError> {
    Ok(serde_json::from_str(text)?)
}
