pub mod cli;
pub mod config;
pub mod connection;
pub mod handlers;
pub mod liveness;
pub mod registry;
pub mod relay;
pub mod sessions;
pub mod websocket;

use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use websocket::BrokerState;

pub fn router(state: BrokerState) -> Router {
    let http_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/sessions/:session_id", get(handlers::get_session_status));

    let ws_routes = Router::new().route("/ws", get(websocket::websocket_handler));

    Router::new()
        .merge(http_routes)
        .merge(ws_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
