//! HTTP surface of both process roles.
//!
//! The bridge serves the chat ingest endpoint; the broker serves the duplex
//! WebSocket endpoint and the injection endpoint. Both expose `/health`.

pub mod error;
pub mod handlers;
pub mod router;
