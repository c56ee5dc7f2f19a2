//! Axum routers for the bridge and broker roles.
//!
//! Middleware on both: CORS, request tracing.

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::http::handlers;
use crate::state::{BridgeState, BrokerState};

fn cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Chat-facing routes.
pub fn build_bridge_router(state: BridgeState) -> Router {
    Router::new()
        .route("/api/messages", post(handlers::messages::receive_message))
        .route("/health", get(handlers::health::bridge_health))
        .route("/ping", get(handlers::health::ping))
        .layer(cors())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Backend-facing routes.
pub fn build_broker_router(state: BrokerState) -> Router {
    Router::new()
        .route("/", get(handlers::ws::ws_handler))
        .route("/api/inject", post(handlers::inject::inject_message))
        .route("/health", get(handlers::health::broker_health))
        .layer(cors())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
