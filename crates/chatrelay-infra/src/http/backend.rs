//! Single-attempt HTTP client for the backend endpoint.
//!
//! Retries and per-attempt timeouts live in `chatrelay_core::backend::FallbackChannel`.

use std::time::Duration;

use chatrelay_core::backend::BackendClient;
use chatrelay_types::error::BackendError;
use chatrelay_types::wire::{BackendReply, OutboundPayload};
use tracing::debug;

use super::build_client;

pub struct ReqwestBackend {
    http: reqwest::Client,
    url: String,
}

impl ReqwestBackend {
    pub fn new(url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            http: build_client(timeout)?,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Empty and non-JSON bodies are a successful round trip without a reply.
fn parse_reply(body: &str) -> BackendReply {
    if body.trim().is_empty() {
        return BackendReply::default();
    }
    match serde_json::from_str::<BackendReply>(body) {
        Ok(reply) => reply,
        Err(err) => {
            debug!(error = %err, "backend body is not a reply object, treating as empty");
            BackendReply::default()
        }
    }
}

impl BackendClient for ReqwestBackend {
    async fn post(&self, payload: &OutboundPayload) -> Result<BackendReply, BackendError> {
        let response = self
            .http
            .post(&self.url)
            .json(payload)
            .send()
            .await
            .map_err(|e| BackendError::Request(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| BackendError::Request(e.to_string()))?;

        if !status.is_success() {
            return Err(BackendError::Status {
                status: status.as_u16(),
                body,
            });
        }

        debug!(url = %self.url, status = status.as_u16(), bytes = body.len(), "backend responded");
        Ok(parse_reply(&body))
    }
}
