//! Broker relay: client frames upstream, backend replies and injections
//! back down to the registered connection.

use std::sync::Arc;

use chatrelay_types::config::BridgeConfig;
use chatrelay_types::conversation::normalize_identity;
use chatrelay_types::error::BrokerError;
use chatrelay_types::wire::{ClientFrame, InboundEvent, InjectionRequest, OutboundPayload};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::registry::{ConnectionId, ConnectionRegistry};
use crate::backend::{BackendClient, FallbackChannel};

/// What happened to one client frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Registered,
    /// Forwarded upstream; no synchronous reply.
    Forwarded,
    /// Forwarded upstream and the reply was written back to the connection.
    Replied,
    /// No upstream configured; the payload only refreshed the registration.
    Accepted,
    UpstreamFailed,
    Malformed,
}

pub struct Broker<B: BackendClient> {
    registry: Arc<ConnectionRegistry>,
    upstream: Option<FallbackChannel<B>>,
    /// Normalised identity bridges send when they could not resolve one.
    /// Never registered.
    placeholder: String,
}

impl<B: BackendClient> Broker<B> {
    pub fn new(registry: Arc<ConnectionRegistry>, upstream: Option<FallbackChannel<B>>) -> Self {
        Self {
            registry,
            upstream,
            placeholder: normalize_identity(&BridgeConfig::default().identity_placeholder),
        }
    }

    pub fn with_identity_placeholder(mut self, placeholder: &str) -> Self {
        self.placeholder = normalize_identity(placeholder);
        self
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Handle one text frame received on `connection`.
    ///
    /// Frames of a single connection are handled in order; the caller awaits
    /// each one before reading the next.
    pub async fn handle_client_frame(
        &self,
        connection: ConnectionId,
        outbox: &mpsc::UnboundedSender<String>,
        text: &str,
    ) -> FrameOutcome {
        let frame = match serde_json::from_str::<ClientFrame>(text) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(%connection, raw = %text, error = %err, "ignoring malformed client frame");
                return FrameOutcome::Malformed;
            }
        };

        match frame {
            ClientFrame::Register { register } => {
                self.register(&register, connection, outbox);
                FrameOutcome::Registered
            }
            ClientFrame::Payload(payload) => {
                self.register(&payload.identity, connection, outbox);
                self.forward(connection, outbox, &payload).await
            }
        }
    }

    fn register(&self, identity: &str, connection: ConnectionId, outbox: &mpsc::UnboundedSender<String>) {
        let normalized = normalize_identity(identity);
        if normalized.is_empty() || normalized == self.placeholder {
            debug!(%connection, "frame carries no resolvable identity, not registering");
            return;
        }
        self.registry.register(&normalized, connection, outbox.clone());
    }

    async fn forward(
        &self,
        connection: ConnectionId,
        outbox: &mpsc::UnboundedSender<String>,
        payload: &OutboundPayload,
    ) -> FrameOutcome {
        let Some(upstream) = &self.upstream else {
            debug!(%connection, "no upstream configured, payload not forwarded");
            return FrameOutcome::Accepted;
        };

        let reply = match upstream.post(payload).await {
            Ok(reply) => reply,
            Err(err) => {
                error!(%connection, user = %payload.user_identity, error = %err, "upstream unreachable");
                return FrameOutcome::UpstreamFailed;
            }
        };
        if reply.is_empty() {
            return FrameOutcome::Forwarded;
        }

        let event = InboundEvent::reply_to(payload, &reply);
        let frame = match serde_json::to_string(&event) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(%connection, error = %err, "failed to encode upstream reply");
                return FrameOutcome::Forwarded;
            }
        };
        if outbox.send(frame).is_err() {
            warn!(%connection, "connection closed before upstream reply could be sent");
            return FrameOutcome::Forwarded;
        }
        FrameOutcome::Replied
    }

    /// Push an injected backend message to the connection registered for
    /// its email.
    pub fn inject(&self, request: InjectionRequest) -> Result<(), BrokerError> {
        let identity = request.email.clone();
        let event = request.into_event();
        self.registry.deliver(&identity, &event)?;
        info!(identity = %identity, reset = event.reset_token, "injected message relayed");
        Ok(())
    }

    /// Forget every registration of a closed connection.
    pub fn connection_closed(&self, connection: ConnectionId) {
        let removed = self.registry.unregister_connection(connection);
        debug!(%connection, removed, "client connection closed");
    }
}
