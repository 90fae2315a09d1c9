use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use causeway_signal::generate_session_id;

use crate::connection::ClientHandle;
use crate::registry::Registry;

/// Lifecycle of a call attempt as the broker sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Ringing,
    Accepted,
    Negotiating,
}

/// One live call attempt: the requester's transport paired with the
/// responder's registered id. The responder side is resolved through the
/// registry at delivery time, never cached.
#[derive(Clone, Debug)]
pub struct Session {
    pub session_id: String,
    pub requester: ClientHandle,
    pub responder_id: String,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("responder {0} is not registered")]
    ResponderUnavailable(String),
    #[error("session {0} already exists")]
    DuplicateSession(String),
}

/// Maps session ids to live sessions. Holds the registry only to validate
/// that a responder exists at creation time and to resolve responder-side
/// cleanup.
pub struct SessionTable {
    registry: Arc<Registry>,
    sessions: DashMap<String, Session>,
}

impl SessionTable {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            sessions: DashMap::new(),
        }
    }

    /// Creates a session for `requester` calling `responder_id`. A broker
    /// id is minted unless the request carried a pre-provisioned one.
    pub fn create_session(
        &self,
        session_id: Option<String>,
        requester: ClientHandle,
        responder_id: &str,
    ) -> Result<Session, SessionError> {
        if self.registry.lookup(responder_id).is_none() {
            return Err(SessionError::ResponderUnavailable(responder_id.to_string()));
        }

        let session_id = session_id.unwrap_or_else(generate_session_id);
        let session = Session {
            session_id: session_id.clone(),
            requester,
            responder_id: responder_id.to_string(),
            state: SessionState::Ringing,
            created_at: Utc::now(),
        };

        match self.sessions.entry(session_id.clone()) {
            Entry::Occupied(_) => Err(SessionError::DuplicateSession(session_id)),
            Entry::Vacant(slot) => {
                slot.insert(session.clone());
                info!(session_id = %session.session_id, responder = responder_id, "session created");
                Ok(session)
            }
        }
    }

    pub fn get(&self, session_id: &str) -> Option<Session> {
        self.sessions
            .get(session_id)
            .map(|entry| entry.value().clone())
    }

    pub fn set_state(&self, session_id: &str, state: SessionState) {
        if let Some(mut entry) = self.sessions.get_mut(session_id) {
            entry.state = state;
        }
    }

    /// Idempotent; removing an unknown session is a no-op.
    pub fn remove(&self, session_id: &str) -> Option<Session> {
        self.sessions.remove(session_id).map(|(_, session)| {
            debug!(session_id, "session removed");
            session
        })
    }

    /// Removes every session this transport participates in, either as the
    /// requester or as the currently registered transport for the session's
    /// responder id. Returns the removed sessions so the caller can notify
    /// counterparts.
    pub fn remove_all_referencing(&self, transport_id: Uuid) -> Vec<Session> {
        let doomed: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| {
                entry.requester.transport_id() == transport_id
                    || self
                        .registry
                        .lookup(&entry.responder_id)
                        .map(|handle| handle.transport_id() == transport_id)
                        .unwrap_or(false)
            })
            .map(|entry| entry.key().clone())
            .collect();

        doomed.into_iter().filter_map(|id| self.remove(&id)).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
