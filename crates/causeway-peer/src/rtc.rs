use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::warn;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use causeway_signal::{CandidatePayload, DescriptionPayload};

use crate::media::LocalMedia;
use crate::negotiator::{NegotiationError, Negotiator, NegotiatorEvent, PeerLinkState};

#[derive(Debug, Clone)]
pub struct RtcConfig {
    pub ice_servers: Vec<String>,
}

impl Default for RtcConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec!["stun:stun.l.google.com:19302".to_string()],
        }
    }
}

/// Production negotiator backed by a real peer connection.
///
/// Descriptions and candidates keep their wire JSON shape at this boundary
/// and are converted to engine types only here.
pub struct RtcNegotiator {
    config: RtcConfig,
    peer: Option<Arc<RTCPeerConnection>>,
}

impl RtcNegotiator {
    pub fn new(config: RtcConfig) -> Self {
        Self { config, peer: None }
    }

    fn peer(&self) -> Result<&Arc<RTCPeerConnection>, NegotiationError> {
        self.peer.as_ref().ok_or(NegotiationError::Closed)
    }
}

fn engine(err: webrtc::Error) -> NegotiationError {
    NegotiationError::Engine(err.to_string())
}

#[async_trait]
impl Negotiator for RtcNegotiator {
    async fn start(
        &mut self,
        media: LocalMedia,
    ) -> Result<mpsc::UnboundedReceiver<NegotiatorEvent>, NegotiationError> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs().map_err(engine)?;
        let api = APIBuilder::new().with_media_engine(media_engine).build();

        let rtc_config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: self.config.ice_servers.clone(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let peer = Arc::new(
            api.new_peer_connection(rtc_config)
                .await
                .map_err(engine)?,
        );

        // Tracks go on before any description is created so they show up in
        // the first offer or answer.
        for track in media.tracks {
            peer.add_track(track).await.map_err(engine)?;
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let candidate_tx = events_tx.clone();
        peer.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let tx = candidate_tx.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    return;
                };
                let init = match candidate.to_json() {
                    Ok(init) => init,
                    Err(err) => {
                        warn!(error = %err, "failed to export local candidate");
                        return;
                    }
                };
                let payload = CandidatePayload {
                    candidate: init.candidate,
                    sdp_mid: init.sdp_mid,
                    sdp_mline_index: init.sdp_mline_index.map(u32::from),
                };
                match serde_json::to_value(&payload) {
                    Ok(value) => {
                        let _ = tx.send(NegotiatorEvent::LocalCandidate(value));
                    }
                    Err(err) => warn!(error = %err, "failed to encode local candidate"),
                }
            })
        }));

        let state_tx = events_tx;
        peer.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let tx = state_tx.clone();
            Box::pin(async move {
                let mapped = match state {
                    RTCPeerConnectionState::Connected => Some(PeerLinkState::Connected),
                    RTCPeerConnectionState::Disconnected => Some(PeerLinkState::Disconnected),
                    RTCPeerConnectionState::Failed => Some(PeerLinkState::Failed),
                    RTCPeerConnectionState::Closed => Some(PeerLinkState::Closed),
                    _ => None,
                };
                if let Some(mapped) = mapped {
                    let _ = tx.send(NegotiatorEvent::LinkState(mapped));
                }
            })
        }));

        self.peer = Some(peer);
        Ok(events_rx)
    }

    async fn create_offer(&mut self) -> Result<Value, NegotiationError> {
        let peer = self.peer()?;
        let offer = peer.create_offer(None).await.map_err(engine)?;
        peer.set_local_description(offer.clone())
            .await
            .map_err(engine)?;
        Ok(serde_json::to_value(DescriptionPayload::offer(offer.sdp))?)
    }

    async fn apply_remote_offer(&mut self, description: Value) -> Result<(), NegotiationError> {
        let payload: DescriptionPayload = serde_json::from_value(description)?;
        let offer = RTCSessionDescription::offer(payload.sdp).map_err(engine)?;
        self.peer()?
            .set_remote_description(offer)
            .await
            .map_err(engine)
    }

    async fn create_answer(&mut self) -> Result<Value, NegotiationError> {
        let peer = self.peer()?;
        let answer = peer.create_answer(None).await.map_err(engine)?;
        peer.set_local_description(answer.clone())
            .await
            .map_err(engine)?;
        Ok(serde_json::to_value(DescriptionPayload::answer(answer.sdp))?)
    }

    async fn apply_remote_answer(&mut self, description: Value) -> Result<(), NegotiationError> {
        let payload: DescriptionPayload = serde_json::from_value(description)?;
        let answer = RTCSessionDescription::answer(payload.sdp).map_err(engine)?;
        self.peer()?
            .set_remote_description(answer)
            .await
            .map_err(engine)
    }

    async fn add_remote_candidate(&mut self, candidate: Value) -> Result<(), NegotiationError> {
        let payload: CandidatePayload = serde_json::from_value(candidate)?;
        let init = RTCIceCandidateInit {
            candidate: payload.candidate,
            sdp_mid: payload.sdp_mid,
            sdp_mline_index: payload.sdp_mline_index.map(|index| index as u16),
            username_fragment: None,
        };
        self.peer()?.add_ice_candidate(init).await.map_err(engine)
    }

    async fn close(&mut self) {
        if let Some(peer) = self.peer.take() {
            let _ = peer.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test_watchdog::tokio_timeout_test]
    async fn start_then_close_twice_is_clean() {
        let mut negotiator = RtcNegotiator::new(RtcConfig::default());
        let _events = negotiator.start(LocalMedia::none()).await.unwrap();
        negotiator.close().await;
        negotiator.close().await;
        assert!(matches!(
            negotiator.create_offer().await,
            Err(NegotiationError::Closed)
        ));
    }

    #[test_watchdog::tokio_timeout_test]
    async fn malformed_payloads_fail_before_touching_the_engine() {
        let mut negotiator = RtcNegotiator::new(RtcConfig::default());
        assert!(matches!(
            negotiator.apply_remote_offer(json!("not a description")).await,
            Err(NegotiationError::Codec(_))
        ));
        assert!(matches!(
            negotiator.add_remote_candidate(json!(42)).await,
            Err(NegotiationError::Codec(_))
        ));
    }
}
