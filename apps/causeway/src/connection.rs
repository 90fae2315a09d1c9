use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use causeway_signal::Envelope;

/// Frames queued onto a connection's writer task.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundFrame {
    Envelope(Envelope),
    Ping,
    Close,
}

/// Cheap cloneable handle to one live transport connection.
///
/// The handle owns nothing; the writer task behind `tx` owns the socket
/// half, and dropping the last sender is what actually ends it.
#[derive(Clone, Debug)]
pub struct ClientHandle {
    transport_id: Uuid,
    tx: mpsc::UnboundedSender<OutboundFrame>,
    alive: Arc<AtomicBool>,
}

impl ClientHandle {
    pub fn new(tx: mpsc::UnboundedSender<OutboundFrame>) -> Self {
        Self {
            transport_id: Uuid::new_v4(),
            tx,
            alive: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn transport_id(&self) -> Uuid {
        self.transport_id
    }

    /// Queue an envelope for delivery. Sending to a closed transport is a
    /// silent drop, never an error that reaches the peer.
    pub fn send(&self, envelope: Envelope) {
        if self.tx.send(OutboundFrame::Envelope(envelope)).is_err() {
            debug!(transport = %self.transport_id, "dropping message for closed transport");
        }
    }

    pub fn probe(&self) {
        let _ = self.tx.send(OutboundFrame::Ping);
    }

    pub fn force_close(&self) {
        let _ = self.tx.send(OutboundFrame::Close);
    }

    pub fn mark_alive(&self) {
        self.alive.store(true, Ordering::SeqCst);
    }

    /// Clears the alive flag, reporting whether it was set since the last
    /// sweep.
    pub fn take_alive(&self) -> bool {
        self.alive.swap(false, Ordering::SeqCst)
    }

    pub fn is_transport(&self, other: &ClientHandle) -> bool {
        self.transport_id == other.transport_id
    }
}

/// Every open WebSocket, registered or not. The liveness sweep walks this
/// table; the registry only knows connections that claimed an id.
#[derive(Default)]
pub struct ConnectionTable {
    connections: DashMap<Uuid, ClientHandle>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, handle: ClientHandle) {
        self.connections.insert(handle.transport_id(), handle);
    }

    pub fn remove(&self, transport_id: Uuid) {
        self.connections.remove(&transport_id);
    }

    /// Snapshot of the live handles, cloned out so callers never hold a
    /// map guard while working on them.
    pub fn handles(&self) -> Vec<ClientHandle> {
        self.connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
pub(crate) fn test_handle() -> (ClientHandle, mpsc::UnboundedReceiver<OutboundFrame>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ClientHandle::new(tx), rx)
}
