//! Call-record delivery over HTTP.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info};
use voiceagent_core::call_record::{CallRecord, CallRecordSink, LoggingCallRecordSink};

/// Posts each finished call as JSON. The agent's own post-call webhook wins
/// over the process-wide fallback; with neither, the record is only logged.
pub struct WebhookCallRecordSink {
    client: reqwest::Client,
    fallback_url: Option<String>,
}

impl WebhookCallRecordSink {
    pub fn new(fallback_url: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            fallback_url,
        })
    }
}

#[async_trait]
impl CallRecordSink for WebhookCallRecordSink {
    async fn record(&self, record: CallRecord) -> Result<()> {
        let Some(url) = record
            .callback_url
            .clone()
            .or_else(|| self.fallback_url.clone())
        else {
            return LoggingCallRecordSink.record(record).await;
        };

        debug!(%url, session_id = %record.session_id, "Posting call record");
        self.client
            .post(&url)
            .json(&record)
            .send()
            .await
            .with_context(|| format!("Failed to post call record to {url}"))?
            .error_for_status()
            .context("Call record endpoint rejected the record")?;
        info!(session_id = %record.session_id, status = ?record.status, "Call record delivered");
        Ok(())
    }
}
