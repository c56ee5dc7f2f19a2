//! HTTP request handlers.

pub mod health;
pub mod inject;
pub mod messages;
pub mod ws;
