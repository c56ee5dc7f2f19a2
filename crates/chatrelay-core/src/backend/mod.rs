//! HTTP fallback channel to the backend.
//!
//! [`BackendClient`] performs exactly one request; [`FallbackChannel`] wraps
//! it in the bounded retry every caller goes through.

pub mod client;
pub mod fallback;

pub use client::BackendClient;
pub use fallback::{FallbackChannel, RetryPolicy};
