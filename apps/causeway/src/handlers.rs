use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::sessions::SessionState;
use crate::websocket::BrokerState;

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub uptime_seconds: i64,
    pub endpoints: usize,
    pub sessions: usize,
}

pub async fn health_check(State(state): State<BrokerState>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok",
        uptime_seconds: (Utc::now() - state.started_at).num_seconds(),
        endpoints: state.registry.len(),
        sessions: state.sessions.len(),
    })
}

#[derive(Debug, Serialize)]
pub struct SessionStatusResponse {
    pub session_id: String,
    pub responder_id: String,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
}

pub async fn get_session_status(
    State(state): State<BrokerState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionStatusResponse>, StatusCode> {
    let session = state
        .sessions
        .get(&session_id)
        .ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(SessionStatusResponse {
        session_id: session.session_id,
        responder_id: session.responder_id,
        state: session.state,
        created_at: session.created_at,
    }))
}
