use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use webrtc::track::track_local::TrackLocal;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("no capture device available: {0}")]
    Unavailable(String),
    #[error("capture permission denied: {0}")]
    Denied(String),
}

/// Local tracks ready to attach to a peer connection. An empty track list
/// is valid; signaling-only calls negotiate without media.
pub struct LocalMedia {
    pub tracks: Vec<Arc<dyn TrackLocal + Send + Sync>>,
}

impl LocalMedia {
    pub fn none() -> Self {
        Self { tracks: Vec::new() }
    }
}

/// Where local tracks come from. Acquisition can take arbitrarily long
/// (device prompts, hardware spin-up), so the call loop runs it off to the
/// side and keeps servicing signaling meanwhile.
#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn acquire(&self) -> Result<LocalMedia, MediaError>;
}

/// Media source that produces no tracks. Useful for data-only sessions and
/// for exercising call flow without capture hardware.
pub struct NullMediaSource;

#[async_trait]
impl MediaSource for NullMediaSource {
    async fn acquire(&self) -> Result<LocalMedia, MediaError> {
        Ok(LocalMedia::none())
    }
}
