//! Data Access Layer
//!
//! Read-only access to the web application's agent tables. The bridge never
//! writes here and does not own the schema, so there are no migrations and the
//! queries are checked at runtime rather than at compile time.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use voiceagent_core::{
    agent_config::{AgentConfiguration, LlmModel},
    store::AgentStore,
};

/// A wrapper around the `PgPool` to provide a clear data access interface.
#[derive(Clone)]
pub struct Db {
    pool: PgPool,
}

/// One row of `"AgentConfiguration"` as stored.
#[derive(FromRow, Debug)]
struct AgentConfigurationRow {
    agent_id: String,
    agent_language: String,
    first_message: String,
    system_prompt: String,
    llm_model: String,
    temperature: f64,
    token_limit: i32,
    voice_id: Option<String>,
    post_call_webhook_url: Option<String>,
    turn_timeout_seconds: i32,
    silence_end_call_timeout_seconds: i32,
    max_conversation_duration_seconds: i32,
    store_call_audio: bool,
    zero_pii_retention: bool,
}

impl From<AgentConfigurationRow> for AgentConfiguration {
    fn from(row: AgentConfigurationRow) -> Self {
        let seconds = |v: i32| u32::try_from(v).unwrap_or(0);
        Self {
            agent_id: row.agent_id,
            agent_language: row.agent_language,
            first_message: row.first_message,
            system_prompt: row.system_prompt,
            llm_model: LlmModel::from_stored(&row.llm_model),
            temperature: row.temperature,
            token_limit: row.token_limit,
            voice_id: row.voice_id.unwrap_or_default(),
            post_call_webhook_url: row.post_call_webhook_url.filter(|u| !u.trim().is_empty()),
            turn_timeout_seconds: seconds(row.turn_timeout_seconds),
            silence_end_call_timeout_seconds: seconds(row.silence_end_call_timeout_seconds),
            max_conversation_duration_seconds: seconds(row.max_conversation_duration_seconds),
            store_call_audio: row.store_call_audio,
            zero_pii_retention: row.zero_pii_retention,
        }
    }
}

impl Db {
    /// Creates a new `Db` instance.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AgentStore for Db {
    async fn agent_exists(&self, agent_id: &str) -> Result<bool> {
        let exists: bool =
            sqlx::query_scalar(r#"SELECT EXISTS(SELECT 1 FROM "Agent" WHERE id = $1)"#)
                .bind(agent_id)
                .fetch_one(&self.pool)
                .await
                .context("Failed to check agent existence")?;
        Ok(exists)
    }

    async fn agent_configuration(&self, agent_id: &str) -> Result<Option<AgentConfiguration>> {
        let row = sqlx::query_as::<_, AgentConfigurationRow>(
            r#"
            SELECT
                "agentId" AS agent_id,
                agent_language::text AS agent_language,
                "firstMessage" AS first_message,
                "systemPrompt" AS system_prompt,
                "llmModel"::text AS llm_model,
                temperature,
                "tokenLimit" AS token_limit,
                "voiceId" AS voice_id,
                post_call_webhook_url,
                turn_timeout_seconds,
                silence_end_call_timeout_seconds,
                max_conversation_duration_seconds,
                store_call_audio,
                zero_pii_retention
            FROM "AgentConfiguration"
            WHERE "agentId" = $1
            "#,
        )
        .bind(agent_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to load agent configuration")?;

        Ok(row.map(AgentConfiguration::from))
    }
}
