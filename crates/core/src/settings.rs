//! Agent Transport Handshake
//!
//! Translates an [`AgentConfiguration`] into the single `Settings` message the
//! agent transport expects as the first frame of every connection. When the
//! handshake schema changes, only this module changes.

use crate::agent_config::AgentConfiguration;
use serde::Serialize;

/// Telephony audio is 8-bit mu-law at 8kHz in both directions.
pub const TELEPHONY_ENCODING: &str = "mulaw";
pub const TELEPHONY_SAMPLE_RATE: u32 = 8000;

const LISTEN_PROVIDER: &str = "deepgram";
const LISTEN_MODEL: &str = "nova-3";
const LISTEN_KEYTERMS: [&str; 2] = ["hello", "goodbye"];
const SPEAK_PROVIDER: &str = "deepgram";
const SPEAK_MODEL: &str = "aura-2-thalia-en";

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct AgentSettings {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub audio: AudioSettings,
    pub agent: AgentBehaviour,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct AudioSettings {
    pub input: AudioFormat,
    pub output: AudioFormat,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct AudioFormat {
    pub encoding: &'static str,
    pub sample_rate: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container: Option<&'static str>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct AgentBehaviour {
    pub language: String,
    pub listen: ListenStage,
    pub think: ThinkStage,
    pub speak: SpeakStage,
    pub greeting: String,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ListenStage {
    pub provider: ListenProvider,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ListenProvider {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub model: &'static str,
    pub keyterms: Vec<&'static str>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ThinkStage {
    pub provider: ThinkProvider,
    pub prompt: String,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ThinkProvider {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub model: &'static str,
    pub temperature: f64,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct SpeakStage {
    pub provider: SpeakProvider,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct SpeakProvider {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub model: &'static str,
}

/// Builds the handshake message for the given configuration.
///
/// Deterministic and side-effect free; the configuration is only borrowed.
pub fn build_settings(config: &AgentConfiguration) -> AgentSettings {
    AgentSettings {
        kind: "Settings",
        audio: AudioSettings {
            input: AudioFormat {
                encoding: TELEPHONY_ENCODING,
                sample_rate: TELEPHONY_SAMPLE_RATE,
                container: None,
            },
            output: AudioFormat {
                encoding: TELEPHONY_ENCODING,
                sample_rate: TELEPHONY_SAMPLE_RATE,
                container: Some("none"),
            },
        },
        agent: AgentBehaviour {
            language: config.agent_language.to_lowercase(),
            listen: ListenStage {
                provider: ListenProvider {
                    kind: LISTEN_PROVIDER,
                    model: LISTEN_MODEL,
                    keyterms: LISTEN_KEYTERMS.to_vec(),
                },
            },
            think: ThinkStage {
                provider: ThinkProvider {
                    kind: config.llm_model.provider_type(),
                    model: config.llm_model.model_id(),
                    temperature: config.temperature,
                },
                prompt: config.system_prompt.clone(),
            },
            speak: SpeakStage {
                provider: SpeakProvider {
                    kind: SPEAK_PROVIDER,
                    model: SPEAK_MODEL,
                },
            },
            greeting: config.first_message.clone(),
        },
    }
}
