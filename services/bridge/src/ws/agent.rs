//! Opens the agent transport.

use super::transport::Link;
use crate::config::Config;
use anyhow::{Context, Result};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        client::IntoClientRequest,
        http::{HeaderValue, header::AUTHORIZATION},
    },
};
use tracing::info;

/// Something that can open a fresh agent-transport connection for one call.
#[async_trait]
pub trait AgentConnector: Send + Sync {
    async fn connect(&self, stream_sid: &str) -> Result<Link>;
}

/// Connects to the agent transport over a WebSocket, authenticating with
/// `Authorization: Token <key>`.
pub struct WsAgentConnector {
    url: String,
    api_key: SecretString,
}

impl WsAgentConnector {
    pub fn new(url: impl Into<String>, api_key: SecretString) -> Self {
        Self {
            url: url.into(),
            api_key,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.agent_transport_url.clone(),
            SecretString::from(config.agent_api_key.expose_secret().to_owned()),
        )
    }
}

#[async_trait]
impl AgentConnector for WsAgentConnector {
    async fn connect(&self, stream_sid: &str) -> Result<Link> {
        let mut request = self.url.as_str().into_client_request()?;
        let token = HeaderValue::from_str(&format!("Token {}", self.api_key.expose_secret()))
            .context("Agent API key is not a valid header value")?;
        request.headers_mut().insert(AUTHORIZATION, token);

        let (ws_stream, _) = connect_async(request)
            .await
            .context("Failed to connect to agent transport")?;
        info!(%stream_sid, "Connected to agent transport.");
        Ok(Link::from_tungstenite("agent", ws_stream))
    }
}
