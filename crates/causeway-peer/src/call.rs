use std::collections::VecDeque;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use causeway_signal::Envelope;

use crate::link::SignalingChannels;
use crate::media::{LocalMedia, MediaError, MediaSource};
use crate::negotiator::{NegotiationError, Negotiator, NegotiatorEvent, PeerLinkState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallRole {
    Requester,
    Responder,
}

/// Why a call attempt reached `Ended`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// This side hung up.
    Hangup,
    /// The counterpart hung up.
    RemoteHangup,
    /// The broker or engine closed the session out from under us.
    SessionClosed,
    MediaError,
    NegotiationFailed,
    /// The signaling link died and its retry schedule ran out.
    LinkLost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Idle,
    AwaitingPeer,
    AcquiringMedia,
    Offering,
    Answering,
    Connected,
    Ended(EndReason),
}

/// Ringing details surfaced to the responder's application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingCall {
    pub session_id: String,
    pub caller_name: Option<String>,
}

enum Command {
    Accept,
    HangUp,
}

/// One call attempt, requester or responder side.
///
/// All signaling, commands, media completion, and engine events funnel into
/// a single long-lived event loop, so every state transition happens on one
/// task and nothing needs locking. Remote candidates that arrive before the
/// remote description are buffered in arrival order and flushed exactly
/// once, right after the description is applied.
pub struct CallAttempt {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<CallState>,
    incoming: watch::Receiver<Option<IncomingCall>>,
}

impl CallAttempt {
    /// Starts the requester side: sends the call request immediately and
    /// waits for the responder to accept.
    pub fn requester(
        signaling: SignalingChannels,
        target_id: String,
        caller_name: Option<String>,
        session_id: Option<String>,
        media_source: Arc<dyn MediaSource>,
        negotiator: Box<dyn Negotiator>,
    ) -> Self {
        Self::spawn(
            CallRole::Requester,
            signaling,
            Some(target_id),
            caller_name,
            session_id,
            media_source,
            negotiator,
        )
    }

    /// Starts the responder side: waits for an incoming call on the link.
    /// Registration itself is the link's hello envelope, not ours.
    pub fn responder(
        signaling: SignalingChannels,
        media_source: Arc<dyn MediaSource>,
        negotiator: Box<dyn Negotiator>,
    ) -> Self {
        Self::spawn(
            CallRole::Responder,
            signaling,
            None,
            None,
            None,
            media_source,
            negotiator,
        )
    }

    fn spawn(
        role: CallRole,
        signaling: SignalingChannels,
        target_id: Option<String>,
        caller_name: Option<String>,
        session_id: Option<String>,
        media_source: Arc<dyn MediaSource>,
        negotiator: Box<dyn Negotiator>,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(CallState::Idle);
        let (incoming_tx, incoming_rx) = watch::channel(None);

        let task = AttemptTask {
            role,
            state_tx,
            incoming_tx,
            outbound: signaling.outbound,
            media_source,
            negotiator,
            target_id,
            caller_name,
            session_id,
            pending_candidates: VecDeque::new(),
            remote_description_applied: false,
            stashed_offer: None,
            accepted: false,
            cleaned_up: false,
        };
        tokio::spawn(task.run(signaling.inbound, commands_rx));

        Self {
            commands: commands_tx,
            state: state_rx,
            incoming: incoming_rx,
        }
    }

    /// Responder only: take the ringing call.
    pub fn accept(&self) {
        let _ = self.commands.send(Command::Accept);
    }

    pub fn hang_up(&self) {
        let _ = self.commands.send(Command::HangUp);
    }

    pub fn state(&self) -> watch::Receiver<CallState> {
        self.state.clone()
    }

    pub fn incoming(&self) -> watch::Receiver<Option<IncomingCall>> {
        self.incoming.clone()
    }
}

struct AttemptTask {
    role: CallRole,
    state_tx: watch::Sender<CallState>,
    incoming_tx: watch::Sender<Option<IncomingCall>>,
    outbound: mpsc::UnboundedSender<Envelope>,
    media_source: Arc<dyn MediaSource>,
    negotiator: Box<dyn Negotiator>,
    target_id: Option<String>,
    caller_name: Option<String>,
    session_id: Option<String>,
    pending_candidates: VecDeque<Value>,
    remote_description_applied: bool,
    stashed_offer: Option<Value>,
    accepted: bool,
    cleaned_up: bool,
}

type MediaResult = Result<LocalMedia, MediaError>;

impl AttemptTask {
    async fn run(
        mut self,
        mut signaling_rx: mpsc::UnboundedReceiver<Envelope>,
        mut commands_rx: mpsc::UnboundedReceiver<Command>,
    ) {
        let (media_tx, mut media_rx) = mpsc::unbounded_channel::<MediaResult>();
        let mut engine_events: Option<mpsc::UnboundedReceiver<NegotiatorEvent>> = None;

        if self.role == CallRole::Requester {
            let envelope = Envelope::CallRequest {
                target_id: self.target_id.take().unwrap_or_default(),
                session_id: self.session_id.clone(),
                caller_name: self.caller_name.take(),
            };
            self.send_envelope(envelope);
            self.set_state(CallState::AwaitingPeer);
        }

        loop {
            if matches!(self.state(), CallState::Ended(_)) {
                break;
            }
            tokio::select! {
                command = commands_rx.recv() => match command {
                    Some(command) => self.on_command(command).await,
                    // Handle dropped; tear the call down like a hangup.
                    None => self.terminate(EndReason::Hangup, true).await,
                },
                envelope = signaling_rx.recv() => match envelope {
                    Some(envelope) => self.on_signal(envelope, &media_tx).await,
                    None => self.terminate(EndReason::LinkLost, false).await,
                },
                result = media_rx.recv() => {
                    if let Some(result) = result {
                        self.on_media(result, &mut engine_events).await;
                    }
                },
                event = next_engine_event(&mut engine_events) => match event {
                    Some(event) => self.on_engine_event(event).await,
                    None => engine_events = None,
                },
            }
        }
    }

    fn state(&self) -> CallState {
        *self.state_tx.borrow()
    }

    fn set_state(&self, state: CallState) {
        debug!(from = ?self.state(), to = ?state, "call state change");
        self.state_tx.send_replace(state);
    }

    fn send_envelope(&self, envelope: Envelope) {
        if self.outbound.send(envelope).is_err() {
            debug!("signaling link closed, envelope dropped");
        }
    }

    fn is_session(&self, session_id: &str) -> bool {
        self.session_id.as_deref() == Some(session_id)
    }

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::Accept => {
                if self.role != CallRole::Responder || self.accepted {
                    return;
                }
                let Some(session_id) = self.session_id.clone() else {
                    debug!("accept before any incoming call, ignoring");
                    return;
                };
                self.accepted = true;
                info!(session_id, "accepting call");
                self.send_envelope(Envelope::CallAccepted { session_id });
            }
            Command::HangUp => self.terminate(EndReason::Hangup, true).await,
        }
    }

    async fn on_signal(&mut self, envelope: Envelope, media_tx: &mpsc::UnboundedSender<MediaResult>) {
        match envelope {
            Envelope::CallIncoming {
                session_id,
                caller_name,
            } => {
                if self.role != CallRole::Responder || self.state() != CallState::Idle {
                    debug!(session_id, "already in a call, ignoring incoming");
                    return;
                }
                self.session_id = Some(session_id.clone());
                self.incoming_tx.send_replace(Some(IncomingCall {
                    session_id,
                    caller_name,
                }));
                self.set_state(CallState::AwaitingPeer);
            }
            Envelope::CallAccepted { session_id } => {
                if self.role != CallRole::Requester || self.state() != CallState::AwaitingPeer {
                    debug!(session_id, "unexpected accept, ignoring");
                    return;
                }
                self.session_id = Some(session_id);
                self.begin_media(media_tx);
            }
            Envelope::Offer {
                session_id,
                description,
            } => {
                if self.role != CallRole::Responder || !self.is_session(&session_id) {
                    debug!(session_id, "offer for unknown session, dropping");
                    return;
                }
                if self.state() != CallState::AwaitingPeer {
                    debug!(session_id, "renegotiation offer not supported, dropping");
                    return;
                }
                self.stashed_offer = Some(description);
                self.begin_media(media_tx);
            }
            Envelope::Answer {
                session_id,
                description,
            } => {
                if self.role != CallRole::Requester
                    || !self.is_session(&session_id)
                    || self.state() != CallState::Offering
                {
                    debug!(session_id, "answer for unknown session, dropping");
                    return;
                }
                if let Err(err) = self.apply_answer(description).await {
                    warn!(error = %err, "applying remote answer failed");
                    self.terminate(EndReason::NegotiationFailed, true).await;
                }
            }
            Envelope::Candidate {
                session_id,
                candidate,
            } => {
                if !self.is_session(&session_id) {
                    debug!(session_id, "candidate for unknown session, dropping");
                    return;
                }
                if self.remote_description_applied {
                    if let Err(err) = self.negotiator.add_remote_candidate(candidate).await {
                        warn!(error = %err, "remote candidate rejected");
                    }
                } else {
                    self.pending_candidates.push_back(candidate);
                }
            }
            Envelope::CallTerminated { session_id, reason } => {
                if !self.is_session(&session_id) {
                    debug!(session_id, "terminate for unknown session, dropping");
                    return;
                }
                let reason = match reason.as_deref() {
                    Some("peer_disconnected") => EndReason::SessionClosed,
                    _ => EndReason::RemoteHangup,
                };
                self.terminate(reason, false).await;
            }
            Envelope::RegisterAck { id, status } => match status {
                causeway_signal::RegisterStatus::Registered => {
                    info!(id, "registered with broker");
                }
                causeway_signal::RegisterStatus::Rejected => {
                    warn!(id, "broker rejected registration, id already bound");
                    self.terminate(EndReason::SessionClosed, false).await;
                }
            },
            Envelope::CallWaiting => {
                debug!("broker acknowledged call request");
            }
            Envelope::Error { message } => {
                warn!(message, "broker error");
                // An error while the request is still pending means the call
                // can never proceed.
                if self.state() == CallState::AwaitingPeer {
                    self.terminate(EndReason::SessionClosed, false).await;
                }
            }
            other => {
                debug!(envelope = ?other, "ignoring envelope not meant for endpoints");
            }
        }
    }

    fn begin_media(&mut self, media_tx: &mpsc::UnboundedSender<MediaResult>) {
        self.set_state(CallState::AcquiringMedia);
        let source = self.media_source.clone();
        let tx = media_tx.clone();
        tokio::spawn(async move {
            let _ = tx.send(source.acquire().await);
        });
    }

    async fn on_media(
        &mut self,
        result: MediaResult,
        engine_events: &mut Option<mpsc::UnboundedReceiver<NegotiatorEvent>>,
    ) {
        let media = match result {
            Ok(media) => media,
            Err(err) => {
                warn!(error = %err, "media acquisition failed");
                self.terminate(EndReason::MediaError, true).await;
                return;
            }
        };

        let outcome = match self.role {
            CallRole::Requester => self.start_and_offer(media, engine_events).await,
            CallRole::Responder => self.start_and_answer(media, engine_events).await,
        };
        if let Err(err) = outcome {
            warn!(error = %err, "negotiation setup failed");
            self.terminate(EndReason::NegotiationFailed, true).await;
        }
    }

    async fn start_and_offer(
        &mut self,
        media: LocalMedia,
        engine_events: &mut Option<mpsc::UnboundedReceiver<NegotiatorEvent>>,
    ) -> Result<(), NegotiationError> {
        *engine_events = Some(self.negotiator.start(media).await?);
        let description = self.negotiator.create_offer().await?;
        if let Some(session_id) = self.session_id.clone() {
            self.send_envelope(Envelope::Offer {
                session_id,
                description,
            });
        }
        self.set_state(CallState::Offering);
        Ok(())
    }

    async fn start_and_answer(
        &mut self,
        media: LocalMedia,
        engine_events: &mut Option<mpsc::UnboundedReceiver<NegotiatorEvent>>,
    ) -> Result<(), NegotiationError> {
        *engine_events = Some(self.negotiator.start(media).await?);
        let Some(offer) = self.stashed_offer.take() else {
            return Err(NegotiationError::Engine(
                "media ready without a remote offer".to_string(),
            ));
        };
        self.negotiator.apply_remote_offer(offer).await?;
        self.remote_description_applied = true;
        self.flush_candidates().await?;
        let description = self.negotiator.create_answer().await?;
        if let Some(session_id) = self.session_id.clone() {
            self.send_envelope(Envelope::Answer {
                session_id,
                description,
            });
        }
        self.set_state(CallState::Answering);
        Ok(())
    }

    async fn apply_answer(&mut self, description: Value) -> Result<(), NegotiationError> {
        self.negotiator.apply_remote_answer(description).await?;
        self.remote_description_applied = true;
        self.flush_candidates().await
    }

    /// Drains the buffer in arrival order. Runs at most once per call; after
    /// this, candidates are applied as they arrive.
    async fn flush_candidates(&mut self) -> Result<(), NegotiationError> {
        while let Some(candidate) = self.pending_candidates.pop_front() {
            self.negotiator.add_remote_candidate(candidate).await?;
        }
        Ok(())
    }

    async fn on_engine_event(&mut self, event: NegotiatorEvent) {
        match event {
            NegotiatorEvent::LocalCandidate(candidate) => {
                if let Some(session_id) = self.session_id.clone() {
                    self.send_envelope(Envelope::Candidate {
                        session_id,
                        candidate,
                    });
                }
            }
            NegotiatorEvent::LinkState(PeerLinkState::Connected) => {
                if matches!(self.state(), CallState::Offering | CallState::Answering) {
                    info!("peer link connected");
                    self.set_state(CallState::Connected);
                }
            }
            NegotiatorEvent::LinkState(PeerLinkState::Disconnected) => {
                warn!("peer link disconnected, waiting for recovery");
            }
            NegotiatorEvent::LinkState(PeerLinkState::Failed) => {
                self.terminate(EndReason::NegotiationFailed, true).await;
            }
            NegotiatorEvent::LinkState(PeerLinkState::Closed) => {
                self.terminate(EndReason::SessionClosed, false).await;
            }
        }
    }

    /// Single teardown path for every way a call can end. Idempotent; the
    /// second and later calls do nothing.
    async fn terminate(&mut self, reason: EndReason, notify_peer: bool) {
        if self.cleaned_up {
            return;
        }
        self.cleaned_up = true;

        if notify_peer {
            if let Some(session_id) = self.session_id.clone() {
                self.send_envelope(Envelope::CallTerminated {
                    session_id,
                    reason: wire_reason(reason).map(str::to_string),
                });
            }
        }
        self.negotiator.close().await;
        self.pending_candidates.clear();
        info!(reason = ?reason, "call ended");
        self.set_state(CallState::Ended(reason));
    }
}

fn wire_reason(reason: EndReason) -> Option<&'static str> {
    match reason {
        EndReason::Hangup => Some("user_initiated"),
        EndReason::MediaError => Some("media_error"),
        EndReason::NegotiationFailed => Some("negotiation_failed"),
        _ => None,
    }
}

async fn next_engine_event(
    events: &mut Option<mpsc::UnboundedReceiver<NegotiatorEvent>>,
) -> Option<NegotiatorEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
