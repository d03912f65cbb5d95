//! Active Session Registry
//!
//! The only process-wide shared state in the bridge. Each accepted media-stream
//! connection gets a [`SessionHandle`]; the handle keeps the registry entry up
//! to date and removes it when dropped, so an entry can never outlive its
//! session task.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};
use utoipa::ToSchema;
use uuid::Uuid;
use voiceagent_core::session::SessionState;

/// A point-in-time view of one bridged call.
#[derive(Serialize, ToSchema, Debug, Clone, PartialEq)]
pub struct SessionSummary {
    #[schema(value_type = String, format = Uuid)]
    pub id: Uuid,
    #[schema(example = "streaming")]
    pub state: String,
    pub agent_id: Option<String>,
    pub stream_sid: Option<String>,
    pub started_at: DateTime<Utc>,
}

#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<Mutex<HashMap<Uuid, SessionSummary>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, SessionSummary>> {
        // A panicking session must not take the registry down with it.
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Registers a newly accepted connection. Never fails.
    pub fn accept(&self) -> SessionHandle {
        let id = Uuid::new_v4();
        self.lock().insert(
            id,
            SessionSummary {
                id,
                state: SessionState::AwaitingStart.as_str().to_string(),
                agent_id: None,
                stream_sid: None,
                started_at: Utc::now(),
            },
        );
        SessionHandle {
            id,
            registry: self.clone(),
        }
    }

    /// All active sessions, oldest first.
    pub fn snapshot(&self) -> Vec<SessionSummary> {
        let mut sessions: Vec<_> = self.lock().values().cloned().collect();
        sessions.sort_by(|a, b| a.started_at.cmp(&b.started_at).then(a.id.cmp(&b.id)));
        sessions
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn update(&self, id: Uuid, f: impl FnOnce(&mut SessionSummary)) {
        if let Some(summary) = self.lock().get_mut(&id) {
            f(summary);
        }
    }

    fn remove(&self, id: Uuid) {
        self.lock().remove(&id);
    }
}

/// Ownership token for one registry entry.
pub struct SessionHandle {
    id: Uuid,
    registry: SessionRegistry,
}

impl SessionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn set_state(&self, state: SessionState) {
        self.registry
            .update(self.id, |s| s.state = state.as_str().to_string());
    }

    pub fn set_stream(&self, stream_sid: &str, agent_id: Option<&str>) {
        self.registry.update(self.id, |s| {
            s.stream_sid = Some(stream_sid.to_string());
            s.agent_id = agent_id.map(str::to_string);
        });
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.registry.remove(self.id);
    }
}
