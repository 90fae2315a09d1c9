use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::media::LocalMedia;

/// Transport-level state of the direct peer link, normalized away from any
/// particular engine's vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerLinkState {
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Asynchronous output of a negotiator: connectivity candidates discovered
/// locally, and peer link state transitions.
#[derive(Debug, Clone, PartialEq)]
pub enum NegotiatorEvent {
    LocalCandidate(Value),
    LinkState(PeerLinkState),
}

#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("peer engine error: {0}")]
    Engine(String),
    #[error("malformed description or candidate: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("negotiator already closed")]
    Closed,
}

/// Seam between the call state machine and the media engine.
///
/// Descriptions and candidates cross this boundary as raw JSON values, the
/// same shape they travel over the signaling wire, so the state machine
/// never interprets them.
#[async_trait]
pub trait Negotiator: Send {
    /// Prepares the peer connection with the local tracks attached and
    /// returns the event stream. Must be called before any other method.
    async fn start(
        &mut self,
        media: LocalMedia,
    ) -> Result<mpsc::UnboundedReceiver<NegotiatorEvent>, NegotiationError>;

    async fn create_offer(&mut self) -> Result<Value, NegotiationError>;

    async fn apply_remote_offer(&mut self, description: Value) -> Result<(), NegotiationError>;

    async fn create_answer(&mut self) -> Result<Value, NegotiationError>;

    async fn apply_remote_answer(&mut self, description: Value) -> Result<(), NegotiationError>;

    async fn add_remote_candidate(&mut self, candidate: Value) -> Result<(), NegotiationError>;

    /// Tears down the peer connection. Safe to call more than once.
    async fn close(&mut self);
}
