//! Shared signaling protocol for the causeway broker and its endpoints.
//!
//! Everything on the wire is a single JSON envelope discriminated by its
//! `type` field. The broker routes on `type` and `sessionId` only; offer,
//! answer and candidate payloads pass through it untouched.

pub mod envelope;
pub mod payload;

pub use envelope::{Envelope, RegisterStatus};
pub use payload::{CandidatePayload, DescriptionPayload};

use uuid::Uuid;

/// Generate a fresh session identifier.
pub fn generate_session_id() -> String {
    Uuid::new_v4().to_string()
}
