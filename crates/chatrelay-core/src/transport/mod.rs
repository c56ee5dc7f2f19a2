//! Shared, reconnecting duplex transport to the backend relay endpoint.
//!
//! [`OutboundTransport`] is a handle to a single actor task that owns the
//! link, the FIFO queue of payloads produced while disconnected, and the
//! reconnect timer. The concrete link (a WebSocket in production) is supplied
//! through the [`Connector`] trait; implementations live in chatrelay-infra.

pub mod link;
pub mod outbound;

pub use link::{Connector, DuplexLink};
pub use outbound::{ConnectionState, OutboundTransport};
