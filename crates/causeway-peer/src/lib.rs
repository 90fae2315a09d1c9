//! Endpoint-side calling library: the signaling link, the call state
//! machine, and the peer connection adapter behind it.

pub mod call;
pub mod link;
pub mod media;
pub mod negotiator;
pub mod rtc;

pub use call::{CallAttempt, CallRole, CallState, EndReason, IncomingCall};
pub use link::{LinkError, RetryPolicy, SignalingChannels, SignalingLink};
pub use media::{LocalMedia, MediaError, MediaSource, NullMediaSource};
pub use negotiator::{NegotiationError, Negotiator, NegotiatorEvent, PeerLinkState};
pub use rtc::{RtcConfig, RtcNegotiator};
