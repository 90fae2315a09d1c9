use serde::{Deserialize, Serialize};

/// Signaling messages exchanged between endpoints and the broker.
///
/// The `type` strings and field names are the wire contract; renames below
/// keep the Rust names idiomatic without changing what goes on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Envelope {
    /// Responder registers under a stable id.
    #[serde(rename = "connection:admin")]
    RegisterResponder { id: String },

    /// Broker's answer to a registration attempt.
    #[serde(rename = "connection:ack")]
    RegisterAck { id: String, status: RegisterStatus },

    /// Requester asks to be connected to a registered responder.
    #[serde(rename = "connection:client")]
    CallRequest {
        #[serde(rename = "targetId")]
        target_id: String,
        /// Pre-provisioned session id from a join link, if any.
        #[serde(rename = "sessionId", default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        #[serde(rename = "callerName", default, skip_serializing_if = "Option::is_none")]
        caller_name: Option<String>,
    },

    /// Broker tells the responder a call is waiting for it.
    #[serde(rename = "call:incoming")]
    CallIncoming {
        #[serde(rename = "sessionId")]
        session_id: String,
        #[serde(rename = "callerName", default, skip_serializing_if = "Option::is_none")]
        caller_name: Option<String>,
    },

    /// Broker acks the requester while the responder decides.
    #[serde(rename = "call:waiting")]
    CallWaiting,

    /// Responder agreed to take the call.
    #[serde(rename = "call:accepted")]
    CallAccepted {
        #[serde(rename = "sessionId")]
        session_id: String,
    },

    /// Session description offer, opaque to the broker.
    #[serde(rename = "offer")]
    Offer {
        #[serde(rename = "sessionId")]
        session_id: String,
        description: serde_json::Value,
    },

    /// Session description answer, opaque to the broker.
    #[serde(rename = "answer")]
    Answer {
        #[serde(rename = "sessionId")]
        session_id: String,
        description: serde_json::Value,
    },

    /// Connectivity candidate, opaque to the broker.
    #[serde(rename = "candidate")]
    Candidate {
        #[serde(rename = "sessionId")]
        session_id: String,
        candidate: serde_json::Value,
    },

    /// Either side ends the session.
    #[serde(rename = "call:terminated")]
    CallTerminated {
        #[serde(rename = "sessionId")]
        session_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    /// Failure notice from the broker.
    #[serde(rename = "error")]
    Error { message: String },
}

impl Envelope {
    /// Session id this message routes on, if it carries one.
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Envelope::CallIncoming { session_id, .. }
            | Envelope::CallAccepted { session_id }
            | Envelope::Offer { session_id, .. }
            | Envelope::Answer { session_id, .. }
            | Envelope::Candidate { session_id, .. }
            | Envelope::CallTerminated { session_id, .. } => Some(session_id),
            _ => None,
        }
    }
}

/// Outcome of a registration attempt, reported to the registering transport.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RegisterStatus {
    Registered,
    Rejected,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test_watchdog::timeout]
    fn register_uses_admin_wire_type() {
        let wire = serde_json::to_value(Envelope::RegisterResponder {
            id: "abc".to_string(),
        })
        .unwrap();
        assert_eq!(wire, json!({"type": "connection:admin", "id": "abc"}));
    }

    #[test_watchdog::timeout]
    fn call_request_round_trips_optional_fields() {
        let raw = json!({
            "type": "connection:client",
            "targetId": "abc",
            "callerName": "Dana"
        });
        let parsed: Envelope = serde_json::from_value(raw).unwrap();
        assert_eq!(
            parsed,
            Envelope::CallRequest {
                target_id: "abc".to_string(),
                session_id: None,
                caller_name: Some("Dana".to_string()),
            }
        );

        let wire = serde_json::to_value(&parsed).unwrap();
        assert!(wire.get("sessionId").is_none());
    }

    #[test_watchdog::timeout]
    fn candidate_payload_survives_relay_untouched() {
        let raw = json!({
            "type": "candidate",
            "sessionId": "s-1",
            "candidate": {
                "candidate": "candidate:0 1 UDP 2122252543 192.0.2.1 54321 typ host",
                "sdpMid": "0",
                "sdpMLineIndex": 0,
                "usernameFragment": "9aBc"
            }
        });
        let parsed: Envelope = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(parsed.session_id(), Some("s-1"));
        assert_eq!(serde_json::to_value(&parsed).unwrap(), raw);
    }

    #[test_watchdog::timeout]
    fn terminated_carries_reason_through() {
        let wire = serde_json::to_value(Envelope::CallTerminated {
            session_id: "s-1".to_string(),
            reason: Some("user_initiated".to_string()),
        })
        .unwrap();
        assert_eq!(wire["type"], "call:terminated");
        assert_eq!(wire["reason"], "user_initiated");
    }

    #[test_watchdog::timeout]
    fn unknown_type_is_rejected() {
        let raw = json!({"type": "call:ready"});
        assert!(serde_json::from_value::<Envelope>(raw).is_err());
    }

    #[test_watchdog::timeout]
    fn ack_status_serializes_lowercase() {
        let wire = serde_json::to_value(Envelope::RegisterAck {
            id: "abc".to_string(),
            status: RegisterStatus::Rejected,
        })
        .unwrap();
        assert_eq!(wire, json!({"type": "connection:ack", "id": "abc", "status": "rejected"}));
    }
}
