//! Chat ingest.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use chatrelay_core::bridge::TurnOutcome;
use chatrelay_types::conversation::IncomingMessage;
use serde::Serialize;

use crate::http::error::AppError;
use crate::state::BridgeState;

#[derive(Debug, Serialize)]
pub struct TurnResponse {
    pub outcome: TurnOutcome,
}

/// POST /api/messages - run one user turn.
///
/// The turn is complete when this returns; any asynchronous reply arrives
/// later through the inbound router.
pub async fn receive_message(
    State(state): State<BridgeState>,
    payload: Result<Json<IncomingMessage>, JsonRejection>,
) -> Result<Json<TurnResponse>, AppError> {
    let Json(message) = payload?;
    let outcome = state.bridge.handle_turn(&message).await;
    Ok(Json(TurnResponse { outcome }))
}
