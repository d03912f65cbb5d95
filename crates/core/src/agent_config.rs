//! Agent Configuration Record
//!
//! The behavioural configuration the web application stores for each agent.
//! It is looked up once per call and translated into the agent transport's
//! handshake by [`crate::settings::build_settings`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// The LLM selected for an agent's "think" stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum LlmModel {
    #[default]
    #[serde(rename = "OPENAI_GPT_4O_MINI")]
    OpenAiGpt4oMini,
    #[serde(rename = "OPENAI_GPT_4O")]
    OpenAiGpt4o,
    #[serde(rename = "OPENAI_GPT_3_5_TURBO")]
    OpenAiGpt35Turbo,
}

impl LlmModel {
    /// Parses the stored enum name, falling back to the default model for
    /// values this build does not know about.
    pub fn from_stored(value: &str) -> Self {
        match value {
            "OPENAI_GPT_4O_MINI" => LlmModel::OpenAiGpt4oMini,
            "OPENAI_GPT_4O" => LlmModel::OpenAiGpt4o,
            "OPENAI_GPT_3_5_TURBO" => LlmModel::OpenAiGpt35Turbo,
            other => {
                tracing::warn!(model = %other, "Unknown LLM model, using default");
                LlmModel::default()
            }
        }
    }

    /// The provider type understood by the agent transport.
    pub fn provider_type(&self) -> &'static str {
        "open_ai"
    }

    /// The provider-side model identifier.
    pub fn model_id(&self) -> &'static str {
        match self {
            LlmModel::OpenAiGpt4oMini => "gpt-4o-mini",
            LlmModel::OpenAiGpt4o => "gpt-4o",
            LlmModel::OpenAiGpt35Turbo => "gpt-3.5-turbo",
        }
    }
}

impl fmt::Display for LlmModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.model_id())
    }
}

/// Per-agent configuration fetched at session start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfiguration {
    #[serde(rename = "agentId")]
    pub agent_id: String,
    /// Language code as stored (e.g. `EN`); lower-cased for the handshake.
    pub agent_language: String,
    /// Greeting spoken by the agent when the call connects.
    #[serde(rename = "firstMessage")]
    pub first_message: String,
    #[serde(rename = "systemPrompt")]
    pub system_prompt: String,
    #[serde(rename = "llmModel", default)]
    pub llm_model: LlmModel,
    pub temperature: f64,
    #[serde(rename = "tokenLimit")]
    pub token_limit: i32,
    #[serde(rename = "voiceId", default)]
    pub voice_id: String,
    #[serde(default)]
    pub post_call_webhook_url: Option<String>,
    #[serde(default)]
    pub turn_timeout_seconds: u32,
    #[serde(default)]
    pub silence_end_call_timeout_seconds: u32,
    /// Hard cap on call length enforced by the bridge; `0` means no cap.
    #[serde(default)]
    pub max_conversation_duration_seconds: u32,
    #[serde(default = "default_true")]
    pub store_call_audio: bool,
    /// When set, transcripts are not attached to call records.
    #[serde(default)]
    pub zero_pii_retention: bool,
}

fn default_true() -> bool {
    true
}

impl Default for AgentConfiguration {
    fn default() -> Self {
        Self {
            agent_id: String::new(),
            agent_language: "EN".to_string(),
            first_message: "Hello! How can I help you today?".to_string(),
            system_prompt: "You are a helpful AI assistant focused on customer service."
                .to_string(),
            llm_model: LlmModel::default(),
            temperature: 0.7,
            token_limit: 4096,
            voice_id: String::new(),
            post_call_webhook_url: None,
            turn_timeout_seconds: 0,
            silence_end_call_timeout_seconds: 0,
            max_conversation_duration_seconds: 0,
            store_call_audio: true,
            zero_pii_retention: false,
        }
    }
}

impl AgentConfiguration {
    /// Builds the default configuration for the given agent.
    pub fn for_agent(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            ..Default::default()
        }
    }
}
