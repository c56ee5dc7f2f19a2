//! Configuration loader for chatrelay.
//!
//! Reads a TOML file into [`RelayConfig`], falling back to defaults when the
//! file is missing or malformed, then applies environment overrides for the
//! endpoint URLs and the database location.

use std::path::{Path, PathBuf};

use chatrelay_types::config::RelayConfig;

pub const ENV_BROKER_URL: &str = "CHATRELAY_BROKER_URL";
pub const ENV_FALLBACK_URL: &str = "CHATRELAY_FALLBACK_URL";
pub const ENV_DATABASE_URL: &str = "CHATRELAY_DATABASE_URL";
pub const ENV_DATA_DIR: &str = "CHATRELAY_DATA_DIR";

/// Load configuration from `path`.
///
/// - Missing file: defaults.
/// - Unreadable or unparseable file: warning, then defaults.
pub async fn load_config(path: &Path) -> RelayConfig {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config found at {}, using defaults", path.display());
            return RelayConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", path.display());
            return RelayConfig::default();
        }
    };

    match toml::from_str::<RelayConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!("Failed to parse {}: {err}, using defaults", path.display());
            RelayConfig::default()
        }
    }
}

/// Apply `CHATRELAY_*` overrides from the process environment.
pub fn apply_env_overrides(config: &mut RelayConfig) {
    apply_overrides(config, |name| std::env::var(name).ok());
}

/// Apply overrides from an arbitrary variable lookup. Empty values are ignored.
pub fn apply_overrides(config: &mut RelayConfig, lookup: impl Fn(&str) -> Option<String>) {
    let get = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

    if let Some(url) = get(ENV_BROKER_URL) {
        config.bridge.broker_url = Some(url);
    }
    if let Some(url) = get(ENV_FALLBACK_URL) {
        config.bridge.fallback_url = Some(url);
    }
    if let Some(url) = get(ENV_DATABASE_URL) {
        config.database_url = Some(url);
    }
}

/// Resolve the data directory.
///
/// Priority:
/// 1. `CHATRELAY_DATA_DIR` environment variable
/// 2. `~/.chatrelay`
/// 3. `.chatrelay` in the working directory
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(ENV_DATA_DIR) {
        return PathBuf::from(dir);
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".chatrelay");
    }
    PathBuf::from(".chatrelay")
}

/// Default SQLite URL inside `data_dir`.
pub fn default_database_url(data_dir: &Path) -> String {
    format!("sqlite://{}?mode=rwc", data_dir.join("chatrelay.db").display())
}

/// The configured database URL, or the default one under the data directory.
pub fn database_url(config: &RelayConfig) -> String {
    config
        .database_url
        .clone()
        .unwrap_or_else(|| default_database_url(&resolve_data_dir()))
}
