//! Call Records
//!
//! When a session ends the bridge hands a [`CallRecord`] to a
//! [`CallRecordSink`]. What happens to it afterwards (storage, recording
//! retrieval, analytics) is outside the bridge.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    /// The call was bridged and ended normally.
    Completed,
    /// The call never reached the agent or was cut short by a fault.
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Agent,
}

impl Speaker {
    /// Maps the agent transport's role names.
    pub fn from_role(role: &str) -> Self {
        if role.eq_ignore_ascii_case("user") {
            Speaker::User
        } else {
            Speaker::Agent
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub role: Speaker,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Audio traffic counters for one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficStats {
    /// Caller audio bytes accepted from the inbound track.
    pub inbound_bytes: u64,
    /// Fixed-size frames forwarded to the agent.
    pub frames_forwarded: u64,
    /// Synthesized audio chunks forwarded to the caller.
    pub outbound_chunks: u64,
    pub outbound_bytes: u64,
    /// Barge-in clears sent to the telephony side.
    pub interruptions: u64,
}

/// The final summary of one bridged call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRecord {
    pub session_id: String,
    pub agent_id: Option<String>,
    pub stream_sid: Option<String>,
    pub call_sid: Option<String>,
    pub from_number: Option<String>,
    pub to_number: Option<String>,
    pub direction: String,
    pub status: CallStatus,
    pub end_reason: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub call_duration_secs: f64,
    pub traffic: TrafficStats,
    pub conversation_history: Vec<TranscriptEntry>,
    /// Per-agent destination for this record, if the agent configured one.
    #[serde(skip)]
    pub callback_url: Option<String>,
}

/// Receives call records once a session has been torn down.
#[async_trait]
pub trait CallRecordSink: Send + Sync {
    async fn record(&self, record: CallRecord) -> Result<()>;
}

/// A sink that only logs, for deployments without a call-log consumer.
pub struct LoggingCallRecordSink;

#[async_trait]
impl CallRecordSink for LoggingCallRecordSink {
    async fn record(&self, record: CallRecord) -> Result<()> {
        tracing::info!(
            session_id = %record.session_id,
            agent_id = ?record.agent_id,
            status = ?record.status,
            reason = %record.end_reason,
            duration_secs = record.call_duration_secs,
            frames = record.traffic.frames_forwarded,
            "Call finished"
        );
        Ok(())
    }
}
