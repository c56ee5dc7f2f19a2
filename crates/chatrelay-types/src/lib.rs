//! Shared domain types for chatrelay.
//!
//! This crate contains the types passed between the session bridge, the
//! broker and their adapters: sessions and their history, conversation
//! handles, the JSON wire payloads, configuration, and error types.
//!
//! Zero infrastructure dependencies -- only serde, chrono, thiserror.

pub mod config;
pub mod conversation;
pub mod error;
pub mod session;
pub mod wire;
