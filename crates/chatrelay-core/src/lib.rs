//! Relay logic and port trait definitions for chatrelay.
//!
//! This crate defines the "ports" (collaborator and storage traits) that the
//! infrastructure layer implements, plus everything that only needs those
//! ports: the session store, the outbound transport actor, the HTTP fallback
//! retry wrapper, the session bridge, the inbound router, the inactivity
//! reaper, keep-alive, and the broker's connection registry. It depends only
//! on `chatrelay-types` -- never on `chatrelay-infra` or any network crate.

pub mod backend;
pub mod bridge;
pub mod broker;
pub mod channel;
pub mod conversation;
pub mod keepalive;
pub mod reaper;
pub mod router;
pub mod session;
pub mod transport;

#[cfg(test)]
mod test_support;
