//! Duplex WebSocket endpoint of the broker.
//!
//! Each connection gets an id and an outbox. A writer task drains the outbox
//! into the socket so that backend replies and injected messages can be
//! pushed from anywhere; the read side hands every text frame to the broker
//! in arrival order.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{Sink, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::state::BrokerState;

/// How long a closing connection may spend flushing its outbox.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Upgrade an HTTP request to a duplex connection.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<BrokerState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: BrokerState) {
    let connection = Uuid::now_v7();
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (outbox, mut outbox_rx) = mpsc::unbounded_channel::<String>();
    info!(%connection, "duplex client connected");

    let mut writer = tokio::spawn(async move {
        let lost = drain_outbox(&mut ws_sender, &mut outbox_rx).await;
        if lost > 0 {
            warn!(%connection, lost, "client gone with frames still queued");
        }
        let _ = ws_sender.close().await;
    });

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Text(text)) => {
                let outcome = state
                    .broker
                    .handle_client_frame(connection, &outbox, text.as_str())
                    .await;
                debug!(%connection, ?outcome, "client frame handled");
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(err) => {
                debug!(%connection, error = %err, "websocket receive error");
                break;
            }
        }
    }

    state.broker.connection_closed(connection);
    drop(outbox);
    if tokio::time::timeout(FLUSH_TIMEOUT, &mut writer).await.is_err() {
        warn!(%connection, "outbox flush timed out, dropping remaining frames");
        writer.abort();
    }
    info!(%connection, "duplex client disconnected");
}

/// Write queued frames to `sink` until every sender is gone. Returns the
/// number of frames that could not be written.
async fn drain_outbox<S>(sink: &mut S, outbox: &mut mpsc::UnboundedReceiver<String>) -> usize
where
    S: Sink<Message> + Unpin,
{
    while let Some(text) = outbox.recv().await {
        if sink.send(Message::Text(text.into())).await.is_err() {
            outbox.close();
            let mut lost = 1;
            while outbox.try_recv().is_ok() {
                lost += 1;
            }
            return lost;
        }
    }
    0
}
