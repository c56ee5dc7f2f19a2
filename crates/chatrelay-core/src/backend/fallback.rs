//! Bounded retry around a [`BackendClient`].
//!
//! Every attempt carries its own timeout. Intermediate failures are logged and
//! swallowed; only the final one reaches the caller, as
//! [`BackendError::Unreachable`].

use std::time::Duration;

use chatrelay_types::config::HttpRetryConfig;
use chatrelay_types::error::BackendError;
use chatrelay_types::wire::{BackendReply, OutboundPayload};
use tracing::{debug, warn};

use super::client::BackendClient;

/// Attempt count, inter-attempt delay and per-attempt timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &HttpRetryConfig) -> Self {
        Self {
            attempts: config.attempts.max(1),
            delay: Duration::from_millis(config.retry_delay_ms),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&HttpRetryConfig::default())
    }
}

/// Stateless retrying request/response channel to the backend.
///
/// Safe to share across sessions. Ordering between overlapping calls is not
/// preserved; callers serialize per session key.
pub struct FallbackChannel<B: BackendClient> {
    client: B,
    policy: RetryPolicy,
}

impl<B: BackendClient> FallbackChannel<B> {
    pub fn new(client: B, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Post `payload`, retrying up to the policy's attempt count.
    pub async fn post(&self, payload: &OutboundPayload) -> Result<BackendReply, BackendError> {
        let attempts = self.policy.attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            let result = match tokio::time::timeout(self.policy.timeout, self.client.post(payload)).await {
                Ok(result) => result,
                Err(_) => Err(BackendError::Timeout(self.policy.timeout.as_millis() as u64)),
            };

            match result {
                Ok(reply) => {
                    debug!(attempt, user = %payload.user_identity, "backend round trip succeeded");
                    return Ok(reply);
                }
                Err(err) => {
                    warn!(attempt, attempts, error = %err, "backend attempt failed");
                    last_error = err.to_string();
                }
            }

            if attempt < attempts {
                tokio::time::sleep(self.policy.delay).await;
            }
        }

        Err(BackendError::Unreachable {
            attempts,
            last: last_error,
        })
    }
}
