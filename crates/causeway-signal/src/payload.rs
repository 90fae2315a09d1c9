use serde::{Deserialize, Serialize};

/// Session description as endpoints put it on the wire.
///
/// The broker never parses this; endpoints build and consume it when
/// talking to their negotiation library.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DescriptionPayload {
    /// "offer" or "answer".
    #[serde(rename = "type")]
    pub kind: String,
    pub sdp: String,
}

impl DescriptionPayload {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: "offer".to_string(),
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: "answer".to_string(),
            sdp: sdp.into(),
        }
    }
}

/// Connectivity candidate as endpoints put it on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CandidatePayload {
    pub candidate: String,
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u32>,
}
