use std::sync::Arc;

use tracing::{debug, info, warn};

use causeway_signal::{Envelope, RegisterStatus};

use crate::connection::ClientHandle;
use crate::registry::{RegisterOutcome, Registry};
use crate::sessions::{SessionState, SessionTable};

/// Routes envelopes between the two sides of a session.
///
/// The relay is a pure router keyed by session id and sender identity; it
/// never reads or rewrites offer/answer/candidate payloads.
pub struct Relay {
    registry: Arc<Registry>,
    sessions: Arc<SessionTable>,
}

impl Relay {
    pub fn new(registry: Arc<Registry>, sessions: Arc<SessionTable>) -> Self {
        Self { registry, sessions }
    }

    pub fn handle_message(&self, sender: &ClientHandle, envelope: Envelope) {
        match envelope {
            Envelope::RegisterResponder { id } => self.handle_register(sender, id),
            Envelope::CallRequest {
                target_id,
                session_id,
                caller_name,
            } => self.handle_call_request(sender, target_id, session_id, caller_name),
            Envelope::CallAccepted { session_id } => {
                self.sessions.set_state(&session_id, SessionState::Accepted);
                self.forward(sender, Envelope::CallAccepted { session_id });
            }
            Envelope::Offer {
                session_id,
                description,
            } => {
                self.sessions
                    .set_state(&session_id, SessionState::Negotiating);
                self.forward(
                    sender,
                    Envelope::Offer {
                        session_id,
                        description,
                    },
                );
            }
            envelope @ (Envelope::Answer { .. } | Envelope::Candidate { .. }) => {
                self.forward(sender, envelope);
            }
            Envelope::CallTerminated { session_id, reason } => {
                self.forward(
                    sender,
                    Envelope::CallTerminated {
                        session_id: session_id.clone(),
                        reason,
                    },
                );
                self.sessions.remove(&session_id);
            }
            other => {
                warn!(?other, "ignoring envelope endpoints may not send");
            }
        }
    }

    /// Common cleanup for graceful closes and liveness-forced closes.
    /// Sessions are swept before the registry binding so responder-side
    /// sessions still resolve through the registry.
    pub fn handle_disconnect(&self, transport: &ClientHandle) {
        let removed = self
            .sessions
            .remove_all_referencing(transport.transport_id());
        for session in &removed {
            let counterpart = if session.requester.is_transport(transport) {
                self.registry.lookup(&session.responder_id)
            } else {
                Some(session.requester.clone())
            };
            if let Some(peer) = counterpart {
                peer.send(Envelope::CallTerminated {
                    session_id: session.session_id.clone(),
                    reason: Some("peer_disconnected".to_string()),
                });
            }
        }

        if let Some(id) = self.registry.unregister_by_transport(transport.transport_id()) {
            info!(id = %id, "endpoint disconnected");
        }
    }

    fn handle_register(&self, sender: &ClientHandle, id: String) {
        let status = match self.registry.register(&id, sender.clone()) {
            RegisterOutcome::Registered => RegisterStatus::Registered,
            RegisterOutcome::Rejected => RegisterStatus::Rejected,
        };
        sender.send(Envelope::RegisterAck { id, status });
    }

    fn handle_call_request(
        &self,
        sender: &ClientHandle,
        target_id: String,
        session_id: Option<String>,
        caller_name: Option<String>,
    ) {
        match self
            .sessions
            .create_session(session_id, sender.clone(), &target_id)
        {
            Ok(session) => {
                if let Some(responder) = self.registry.lookup(&target_id) {
                    responder.send(Envelope::CallIncoming {
                        session_id: session.session_id.clone(),
                        caller_name,
                    });
                }
                sender.send(Envelope::CallWaiting);
            }
            Err(err) => {
                info!(target = %target_id, error = %err, "call request rejected");
                sender.send(Envelope::Error {
                    message: err.to_string(),
                });
            }
        }
    }

    /// Sends `envelope` to the other side of its session. Unknown sessions
    /// and dead destinations are dropped, never surfaced to the sender.
    fn forward(&self, sender: &ClientHandle, envelope: Envelope) {
        let Some(session_id) = envelope.session_id().map(str::to_string) else {
            warn!("unroutable envelope without a session id");
            return;
        };
        let Some(session) = self.sessions.get(&session_id) else {
            debug!(session_id = %session_id, "dropping message for unknown session");
            return;
        };

        let destination = if session.requester.is_transport(sender) {
            self.registry.lookup(&session.responder_id)
        } else {
            Some(session.requester.clone())
        };

        match destination {
            Some(peer) => peer.send(envelope),
            None => {
                warn!(session_id = %session_id, "responder transport gone, dropping message")
            }
        }
    }
}
