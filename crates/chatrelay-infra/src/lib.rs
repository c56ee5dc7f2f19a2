//! Infrastructure layer for chatrelay.
//!
//! Concrete implementations of the ports defined in `chatrelay-core`:
//! SQLite conversation references, the WebSocket duplex connector, and the
//! reqwest-based backend, chat webhook, directory and self-ping clients.
//! Also home of the TOML configuration loader.

pub mod config;
pub mod http;
pub mod sqlite;
pub mod ws;
