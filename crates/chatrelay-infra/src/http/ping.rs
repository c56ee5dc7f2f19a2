//! Self-ping used by the keep-alive task.

use std::time::Duration;

use chatrelay_core::keepalive::SelfPing;
use chatrelay_types::error::BackendError;

use super::build_client;

pub struct HttpPing {
    http: reqwest::Client,
    url: String,
}

impl HttpPing {
    pub fn new(url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            http: build_client(timeout)?,
            url: url.into(),
        })
    }
}

impl SelfPing for HttpPing {
    async fn ping(&self) -> Result<u16, BackendError> {
        let response = self
            .http
            .get(&self.url)
            .send()
            .await
            .map_err(|e| BackendError::Request(e.to_string()))?;
        let status = response.status();
        if status.is_success() {
            Ok(status.as_u16())
        } else {
            Err(BackendError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            })
        }
    }
}
