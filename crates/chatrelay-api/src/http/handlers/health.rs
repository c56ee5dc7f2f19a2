//! Liveness endpoints.

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::state::{BridgeState, BrokerState};

/// GET /health on the bridge. Includes the duplex transport state when one
/// is configured.
pub async fn bridge_health(State(state): State<BridgeState>) -> Json<Value> {
    let transport = state
        .transport
        .as_ref()
        .map(|transport| format!("{:?}", transport.state()).to_lowercase());
    Json(json!({
        "status": "ok",
        "role": "bridge",
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": state.bridge.sessions().len(),
        "transport": transport,
    }))
}

/// GET /health on the broker.
pub async fn broker_health(State(state): State<BrokerState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "role": "broker",
        "version": env!("CARGO_PKG_VERSION"),
        "registered_identities": state.broker.registry().len(),
    }))
}

/// GET /ping, used by keep-alive self-pings.
pub async fn ping() -> &'static str {
    "pong"
}
