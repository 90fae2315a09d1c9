use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use causeway_signal::Envelope;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Bounded reconnect schedule for the signaling link.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("could not reach signaling broker after {attempts} attempts: {source}")]
    Exhausted {
        attempts: u32,
        source: tokio_tungstenite::tungstenite::Error,
    },
}

/// The two channel ends a call attempt talks through. Envelopes written to
/// `outbound` go to the broker; envelopes from the broker arrive on
/// `inbound`. The inbound channel closing means the link is gone for good.
#[derive(Debug)]
pub struct SignalingChannels {
    pub outbound: mpsc::UnboundedSender<Envelope>,
    pub inbound: mpsc::UnboundedReceiver<Envelope>,
}

/// Owns the broker WebSocket on behalf of a call attempt.
///
/// One task holds the socket for its whole life: it forwards outbound
/// envelopes, parses inbound text frames, and on socket loss runs the retry
/// schedule itself. Each successful (re)connect resends the hello envelope
/// so the broker-side registration survives the outage. When the schedule
/// is exhausted the task drops its inbound sender and exits.
pub struct SignalingLink;

impl SignalingLink {
    pub async fn connect(
        url: &str,
        hello: Option<Envelope>,
        retry: RetryPolicy,
    ) -> Result<SignalingChannels, LinkError> {
        let socket = connect_with_retry(url, &retry).await?;
        info!(url, "signaling link established");

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_link(
            url.to_string(),
            hello,
            retry,
            socket,
            outbound_rx,
            inbound_tx,
        ));

        Ok(SignalingChannels {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

async fn connect_with_retry(url: &str, retry: &RetryPolicy) -> Result<WsStream, LinkError> {
    let mut attempt = 1u32;
    loop {
        match tokio_tungstenite::connect_async(url).await {
            Ok((socket, _)) => return Ok(socket),
            Err(source) => {
                if attempt >= retry.max_attempts {
                    return Err(LinkError::Exhausted {
                        attempts: attempt,
                        source,
                    });
                }
                warn!(url, attempt, error = %source, "broker connect failed, retrying");
                tokio::time::sleep(retry.delay).await;
                attempt += 1;
            }
        }
    }
}

async fn run_link(
    url: String,
    hello: Option<Envelope>,
    retry: RetryPolicy,
    mut socket: WsStream,
    mut outbound_rx: mpsc::UnboundedReceiver<Envelope>,
    inbound_tx: mpsc::UnboundedSender<Envelope>,
) {
    loop {
        let (mut sink, mut stream) = socket.split();

        if let Some(hello) = &hello {
            match serde_json::to_string(hello) {
                Ok(json) => {
                    if sink.send(Message::Text(json.into())).await.is_err() {
                        debug!(url, "hello send failed, reconnecting");
                    }
                }
                Err(err) => warn!(error = %err, "failed to serialize hello envelope"),
            }
        }

        loop {
            tokio::select! {
                envelope = outbound_rx.recv() => match envelope {
                    Some(envelope) => {
                        let json = match serde_json::to_string(&envelope) {
                            Ok(json) => json,
                            Err(err) => {
                                warn!(error = %err, "failed to serialize outbound envelope");
                                continue;
                            }
                        };
                        if sink.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    // Call attempt dropped its sender; close cleanly and stop.
                    None => {
                        let _ = sink.send(Message::Close(None)).await;
                        return;
                    }
                },
                message = stream.next() => match message {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<Envelope>(text.as_str()) {
                            Ok(envelope) => {
                                if inbound_tx.send(envelope).is_err() {
                                    return;
                                }
                            }
                            Err(err) => {
                                warn!(error = %err, "dropping unparseable broker message");
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        debug!(url, error = %err, "signaling socket error");
                        break;
                    }
                },
            }
        }

        match connect_with_retry(&url, &retry).await {
            Ok(reconnected) => {
                info!(url, "signaling link re-established");
                socket = reconnected;
            }
            Err(err) => {
                warn!(url, error = %err, "signaling link lost for good");
                return;
            }
        }
    }
}
