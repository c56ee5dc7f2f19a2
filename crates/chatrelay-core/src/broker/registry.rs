//! Identity -> live duplex connection registry.
//!
//! Registration happens when a client announces its identity (explicitly
//! with a `register` frame, or implicitly with any payload that carries an
//! identity). Every registration of a connection is removed when that
//! connection closes; a stale close never removes a newer registration.

use chatrelay_types::conversation::normalize_identity;
use chatrelay_types::error::BrokerError;
use chatrelay_types::wire::InboundEvent;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

pub type ConnectionId = Uuid;

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct Registration {
    connection: ConnectionId,
    outbox: mpsc::UnboundedSender<String>,
}

#[derive(Default)]
pub struct ConnectionRegistry {
    by_identity: DashMap<String, Registration>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `identity` to a connection. A later registration of the same
    /// identity replaces the earlier one.
    pub fn register(&self, identity: &str, connection: ConnectionId, outbox: mpsc::UnboundedSender<String>) {
        let identity = normalize_identity(identity);
        if identity.is_empty() {
            return;
        }
        let previous = self.by_identity.insert(
            identity.clone(),
            Registration { connection, outbox },
        );
        match previous {
            Some(previous) if previous.connection == connection => {}
            Some(_) => info!(identity = %identity, %connection, "identity moved to new connection"),
            None => info!(identity = %identity, %connection, "identity registered"),
        }
    }

    /// Drop every identity bound to `connection`. Returns how many were removed.
    pub fn unregister_connection(&self, connection: ConnectionId) -> usize {
        let before = self.by_identity.len();
        self.by_identity
            .retain(|_, registration| registration.connection != connection);
        let removed = before.saturating_sub(self.by_identity.len());
        if removed > 0 {
            debug!(%connection, removed, "connection registrations removed");
        }
        removed
    }

    /// Send `event` to the connection registered for `identity`.
    pub fn deliver(&self, identity: &str, event: &InboundEvent) -> Result<(), BrokerError> {
        let identity = normalize_identity(identity);
        let frame = serde_json::to_string(event).map_err(|e| BrokerError::Encode(e.to_string()))?;

        let registration = self
            .by_identity
            .get(&identity)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| BrokerError::Unregistered(identity.clone()))?;

        if registration.outbox.send(frame).is_err() {
            self.by_identity
                .remove_if(&identity, |_, current| current.connection == registration.connection);
            return Err(BrokerError::Closed(identity));
        }
        Ok(())
    }

    pub fn connection_for(&self, identity: &str) -> Option<ConnectionId> {
        self.by_identity
            .get(&normalize_identity(identity))
            .map(|entry| entry.value().connection)
    }

    pub fn len(&self) -> usize {
        self.by_identity.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_identity.is_empty()
    }
}
