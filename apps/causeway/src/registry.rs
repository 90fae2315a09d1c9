use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info};
use uuid::Uuid;

use crate::connection::ClientHandle;

/// Outcome of a registration attempt. The first binding for an id wins;
/// later attempts are rejected and the transport is told so.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    Registered,
    Rejected,
}

/// Maps a stable participant id to its live transport connection.
#[derive(Default)]
pub struct Registry {
    endpoints: DashMap<String, ClientHandle>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `id` to `handle` unless the id is already bound.
    pub fn register(&self, id: &str, handle: ClientHandle) -> RegisterOutcome {
        match self.endpoints.entry(id.to_string()) {
            Entry::Occupied(_) => {
                info!(id, "registration rejected, id already bound");
                RegisterOutcome::Rejected
            }
            Entry::Vacant(slot) => {
                slot.insert(handle);
                info!(id, "endpoint registered");
                RegisterOutcome::Registered
            }
        }
    }

    pub fn lookup(&self, id: &str) -> Option<ClientHandle> {
        self.endpoints.get(id).map(|entry| entry.value().clone())
    }

    /// Removes whichever id is bound to this transport, if any. Safe to
    /// call for transports that never registered.
    pub fn unregister_by_transport(&self, transport_id: Uuid) -> Option<String> {
        let id = self.endpoints.iter().find_map(|entry| {
            (entry.value().transport_id() == transport_id).then(|| entry.key().clone())
        })?;
        self.endpoints.remove(&id);
        debug!(id, "endpoint unregistered");
        Some(id)
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}
