//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds the process-wide
//! collaborators every handler and session needs.

use crate::{config::Config, registry::SessionRegistry, ws::agent::AgentConnector};
use std::sync::Arc;
use voiceagent_core::{call_record::CallRecordSink, store::AgentStore};

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub agents: Arc<dyn AgentStore>,
    pub connector: Arc<dyn AgentConnector>,
    pub call_records: Arc<dyn CallRecordSink>,
    pub registry: SessionRegistry,
}
