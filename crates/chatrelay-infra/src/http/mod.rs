//! reqwest-based HTTP adapters.

pub mod backend;
pub mod chat;
pub mod identity;
pub mod ping;

pub use backend::ReqwestBackend;
pub use chat::WebhookChatChannel;
pub use identity::DirectoryResolver;
pub use ping::HttpPing;

use std::time::Duration;

use anyhow::Context;

/// Shared client builder for every adapter in this module.
pub(crate) fn build_client(timeout: Duration) -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("chatrelay/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build HTTP client")
}
