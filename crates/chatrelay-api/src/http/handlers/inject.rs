//! Proactive message injection on the broker.

use axum::body::Bytes;
use axum::extract::State;
use axum::Json;
use chatrelay_types::wire::{InjectionAck, InjectionRequest};
use serde_json::Value;
use tracing::{info, warn};

use crate::state::BrokerState;

/// POST /api/inject - push a message to the connection registered for an
/// identity.
///
/// Always answers 200 with the fixed acknowledgement. Malformed bodies and
/// unknown identities are only logged.
pub async fn inject_message(State(state): State<BrokerState>, body: Bytes) -> Json<InjectionAck> {
    let raw: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(err) => {
            warn!(error = %err, "injection body is not JSON");
            return Json(InjectionAck::echo(Value::Null));
        }
    };

    match serde_json::from_value::<InjectionRequest>(raw.clone()) {
        Ok(request) => {
            let email = request.email.clone();
            match state.broker.inject(request) {
                Ok(()) => info!(identity = %email, "injected message delivered to connection"),
                Err(err) => warn!(identity = %email, error = %err, "injected message not delivered"),
            }
        }
        Err(err) => warn!(error = %err, "ignoring malformed injection request"),
    }

    Json(InjectionAck::echo(raw))
}
