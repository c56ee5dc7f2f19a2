//! Configuration types for chatrelay.
//!
//! `RelayConfig` represents the `chatrelay.toml` file shared by the bridge
//! and broker roles. Every field has a default so an empty file, or no file
//! at all, yields a working bridge that only lacks endpoints.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::session::KeyingPolicy;
use crate::wire::PayloadProfile;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelayConfig {
    /// SQLite URL of the conversation-reference store. Resolved from the
    /// data directory when absent.
    #[serde(default)]
    pub database_url: Option<String>,

    #[serde(default)]
    pub bridge: BridgeConfig,

    #[serde(default)]
    pub http: HttpRetryConfig,

    #[serde(default)]
    pub keep_alive: KeepAliveConfig,

    #[serde(default)]
    pub broker: BrokerConfig,
}

/// What the inactivity reaper tears down when a window elapses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReapPolicy {
    /// Delete the idle session.
    #[default]
    EvictSession,
    /// Close the shared duplex transport.
    CloseTransport,
}

/// Session bridge settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// WebSocket URL of the broker. No duplex transport when absent.
    #[serde(default)]
    pub broker_url: Option<String>,

    /// HTTP endpoint of the backend. No fallback channel when absent.
    #[serde(default)]
    pub fallback_url: Option<String>,

    #[serde(default)]
    pub payload_profile: PayloadProfile,

    #[serde(default)]
    pub keying: KeyingPolicy,

    #[serde(default = "default_apology_message")]
    pub apology_message: String,

    #[serde(default = "default_identity_placeholder")]
    pub identity_placeholder: String,

    #[serde(default = "default_inactivity_secs")]
    pub inactivity_secs: u64,

    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,

    #[serde(default)]
    pub reap_policy: ReapPolicy,

    /// Directory service used to resolve display identities.
    #[serde(default)]
    pub directory_url: Option<String>,
}

fn default_apology_message() -> String {
    "Oops! Something went wrong. Please try again later.".to_string()
}

fn default_identity_placeholder() -> String {
    "unknown@placeholder.invalid".to_string()
}

fn default_inactivity_secs() -> u64 {
    5 * 60
}

fn default_reconnect_delay_secs() -> u64 {
    5
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            broker_url: None,
            fallback_url: None,
            payload_profile: PayloadProfile::default(),
            keying: KeyingPolicy::default(),
            apology_message: default_apology_message(),
            identity_placeholder: default_identity_placeholder(),
            inactivity_secs: default_inactivity_secs(),
            reconnect_delay_secs: default_reconnect_delay_secs(),
            reap_policy: ReapPolicy::default(),
            directory_url: None,
        }
    }
}

impl BridgeConfig {
    pub fn inactivity_window(&self) -> Duration {
        Duration::from_secs(self.inactivity_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }
}

/// Bounded retry of the HTTP fallback channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpRetryConfig {
    #[serde(default = "default_attempts")]
    pub attempts: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1_500
}

fn default_timeout_secs() -> u64 {
    8
}

impl Default for HttpRetryConfig {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Periodic keep-alive work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeepAliveConfig {
    #[serde(default = "default_keep_alive_interval_secs")]
    pub interval_secs: u64,

    /// URL hit with a GET on every tick.
    #[serde(default)]
    pub ping_url: Option<String>,

    /// Text delivered to every selected identity on every tick.
    #[serde(default)]
    pub message: Option<String>,

    /// Identities whose conversation references are persisted and used for
    /// keep-alive sends. Empty selects every identity.
    #[serde(default)]
    pub identities: Vec<String>,
}

fn default_keep_alive_interval_secs() -> u64 {
    5 * 60
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_keep_alive_interval_secs(),
            ping_url: None,
            message: None,
            identities: Vec::new(),
        }
    }
}

impl KeepAliveConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Broker settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Backend that client payloads are forwarded to.
    #[serde(default)]
    pub upstream_url: Option<String>,
}
