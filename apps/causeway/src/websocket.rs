use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use causeway_signal::Envelope;

use crate::connection::{ClientHandle, ConnectionTable, OutboundFrame};
use crate::registry::Registry;
use crate::relay::Relay;
use crate::sessions::SessionTable;

/// Shared broker state handed to every route.
#[derive(Clone)]
pub struct BrokerState {
    pub connections: Arc<ConnectionTable>,
    pub registry: Arc<Registry>,
    pub sessions: Arc<SessionTable>,
    pub relay: Arc<Relay>,
    pub started_at: DateTime<Utc>,
}

impl BrokerState {
    pub fn new() -> Self {
        let connections = Arc::new(ConnectionTable::new());
        let registry = Arc::new(Registry::new());
        let sessions = Arc::new(SessionTable::new(registry.clone()));
        let relay = Arc::new(Relay::new(registry.clone(), sessions.clone()));
        Self {
            connections,
            registry,
            sessions,
            relay,
            started_at: Utc::now(),
        }
    }
}

impl Default for BrokerState {
    fn default() -> Self {
        Self::new()
    }
}

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<BrokerState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: BrokerState) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<OutboundFrame>();

    let handle = ClientHandle::new(tx);
    let transport_id = handle.transport_id();
    state.connections.insert(handle.clone());
    info!(transport = %transport_id, "transport connected");

    // Writer task: the only owner of the socket's send half. It drains the
    // outbound queue until the queue closes, a send fails, or a Close frame
    // is requested.
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            match frame {
                OutboundFrame::Envelope(envelope) => {
                    let json = match serde_json::to_string(&envelope) {
                        Ok(json) => json,
                        Err(err) => {
                            warn!(transport = %transport_id, error = %err, "failed to serialize envelope");
                            continue;
                        }
                    };
                    if sender.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                OutboundFrame::Ping => {
                    if sender.send(Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                }
                OutboundFrame::Close => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => handle_text(&state, &handle, &text),
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                Ok(text) => handle_text(&state, &handle, &text),
                Err(_) => {
                    debug!(transport = %transport_id, "ignoring non-utf8 binary frame");
                }
            },
            // Only protocol pongs count as liveness. Data traffic from a
            // peer whose pongs stopped does not keep it alive.
            Ok(Message::Pong(_)) => handle.mark_alive(),
            Ok(Message::Ping(_)) => {}
            Ok(Message::Close(_)) => break,
            Err(err) => {
                debug!(transport = %transport_id, error = %err, "transport read error");
                break;
            }
        }
    }

    info!(transport = %transport_id, "transport disconnected");
    state.connections.remove(transport_id);
    state.relay.handle_disconnect(&handle);
    writer.abort();
}

fn handle_text(state: &BrokerState, handle: &ClientHandle, text: &str) {
    match serde_json::from_str::<Envelope>(text) {
        Ok(envelope) => state.relay.handle_message(handle, envelope),
        Err(err) => {
            warn!(transport = %handle.transport_id(), error = %err, "rejecting malformed message");
            handle.send(Envelope::Error {
                message: format!("invalid message format: {err}"),
            });
        }
    }
}
