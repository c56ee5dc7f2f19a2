//! Periodic keep-alive task.
//!
//! On every tick it optionally pings a URL (so hosting platforms that idle
//! out quiet processes keep this one warm) and optionally delivers a fixed
//! message to every selected identity through its stored conversation
//! reference. Runs until its [`CancellationToken`] fires.

use std::sync::Arc;
use std::time::Duration;

use chatrelay_types::config::KeepAliveConfig;
use chatrelay_types::conversation::normalize_identity;
use chatrelay_types::error::BackendError;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::channel::ChatChannel;
use crate::conversation::ConversationStore;

/// Liveness tap hit on every tick.
pub trait SelfPing: Send + Sync {
    /// Returns the HTTP status on success.
    fn ping(&self) -> impl std::future::Future<Output = Result<u16, BackendError>> + Send;
}

/// Result of one tick, mostly for logging and tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub pinged: Option<bool>,
    pub delivered: usize,
    pub failed: usize,
}

pub struct KeepAlive<C: ChatChannel, R: ConversationStore, P: SelfPing> {
    chat: Arc<C>,
    conversations: Arc<R>,
    pinger: Option<P>,
    message: Option<String>,
    identities: Vec<String>,
    interval: Duration,
}

impl<C: ChatChannel, R: ConversationStore, P: SelfPing> KeepAlive<C, R, P> {
    pub fn new(config: &KeepAliveConfig, chat: Arc<C>, conversations: Arc<R>, pinger: Option<P>) -> Self {
        Self {
            chat,
            conversations,
            pinger,
            message: config.message.clone().filter(|m| !m.trim().is_empty()),
            identities: config.identities.iter().map(|i| normalize_identity(i)).collect(),
            interval: config.interval(),
        }
    }

    /// Whether a tick would do anything at all.
    pub fn is_active(&self) -> bool {
        self.pinger.is_some() || self.message.is_some()
    }

    pub async fn run(self, shutdown: CancellationToken) {
        if !self.is_active() {
            debug!("keep-alive has nothing to do, not starting");
            return;
        }

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately.
        ticker.tick().await;
        info!(interval_secs = self.interval.as_secs(), "keep-alive started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let report = self.tick().await;
                    debug!(?report, "keep-alive tick");
                }
            }
        }
        info!("keep-alive stopped");
    }

    pub async fn tick(&self) -> TickReport {
        let mut report = TickReport::default();

        if let Some(pinger) = &self.pinger {
            match pinger.ping().await {
                Ok(status) => {
                    debug!(status, "self-ping ok");
                    report.pinged = Some(true);
                }
                Err(err) => {
                    warn!(error = %err, "self-ping failed");
                    report.pinged = Some(false);
                }
            }
        }

        let Some(message) = &self.message else {
            return report;
        };

        let identities = if self.identities.is_empty() {
            match self.conversations.list_identities().await {
                Ok(identities) => identities,
                Err(err) => {
                    warn!(error = %err, "failed to list conversation references");
                    return report;
                }
            }
        } else {
            self.identities.clone()
        };

        for identity in identities {
            let handle = match self.conversations.get(&identity).await {
                Ok(Some(handle)) => handle,
                Ok(None) => {
                    debug!(identity = %identity, "no conversation reference yet");
                    continue;
                }
                Err(err) => {
                    warn!(identity = %identity, error = %err, "conversation reference lookup failed");
                    report.failed += 1;
                    continue;
                }
            };
            match self.chat.deliver(&handle, message).await {
                Ok(()) => report.delivered += 1,
                Err(err) => {
                    warn!(identity = %identity, error = %err, "keep-alive delivery failed");
                    report.failed += 1;
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{handle, MemoryConversationStore, RecordingChat};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Default)]
    struct CountingPing {
        hits: Arc<AtomicUsize>,
        fail: bool,
    }

    impl SelfPing for CountingPing {
        async fn ping(&self) -> Result<u16, BackendError> {
            self.hits.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(BackendError::Status {
                    status: 503,
                    body: String::new(),
                })
            } else {
                Ok(200)
            }
        }
    }

    async fn store_with(identities: &[(&str, &str)]) -> MemoryConversationStore {
        let store = MemoryConversationStore::new();
        for (identity, conversation) in identities {
            store.upsert(identity, &handle("u", conversation)).await.unwrap();
        }
        store
    }

    fn config(message: Option<&str>, identities: &[&str]) -> KeepAliveConfig {
        KeepAliveConfig {
            interval_secs: 300,
            ping_url: None,
            message: message.map(str::to_string),
            identities: identities.iter().map(|i| i.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn test_tick_delivers_to_selected_identities() {
        let chat = RecordingChat::new();
        let store = store_with(&[("a@example.com", "ca"), ("b@example.com", "cb")]).await;
        let keep_alive = KeepAlive::new(
            &config(Some("ping"), &["A@example.com", "missing@example.com"]),
            Arc::new(chat.clone()),
            Arc::new(store),
            None::<CountingPing>,
        );

        let report = keep_alive.tick().await;

        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, 0);
        let deliveries = chat.deliveries();
        assert_eq!(deliveries[0].0.conversation_id, "ca");
    }

    #[tokio::test]
    async fn test_empty_selection_means_every_stored_identity() {
        let chat = RecordingChat::new();
        let store = store_with(&[("a@example.com", "ca"), ("b@example.com", "cb")]).await;
        let keep_alive = KeepAlive::new(
            &config(Some("ping"), &[]),
            Arc::new(chat.clone()),
            Arc::new(store),
            None::<CountingPing>,
        );

        assert_eq!(keep_alive.tick().await.delivered, 2);
    }

    #[tokio::test]
    async fn test_ping_failure_is_reported_not_fatal() {
        let ping = CountingPing {
            fail: true,
            ..CountingPing::default()
        };
        let keep_alive = KeepAlive::new(
            &config(None, &[]),
            Arc::new(RecordingChat::new()),
            Arc::new(MemoryConversationStore::new()),
            Some(ping.clone()),
        );

        let report = keep_alive.tick().await;
        assert_eq!(report.pinged, Some(false));
        assert_eq!(report.delivered, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_ticks_on_interval_until_cancelled() {
        let ping = CountingPing::default();
        let keep_alive = KeepAlive::new(
            &config(None, &[]),
            Arc::new(RecordingChat::new()),
            Arc::new(MemoryConversationStore::new()),
            Some(ping.clone()),
        );
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(keep_alive.run(shutdown.clone()));

        tokio::time::sleep(Duration::from_secs(3 * 300 + 1)).await;
        shutdown.cancel();
        task.await.unwrap();

        assert_eq!(ping.hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_inactive_keep_alive_returns_immediately() {
        let keep_alive = KeepAlive::new(
            &config(None, &[]),
            Arc::new(RecordingChat::new()),
            Arc::new(MemoryConversationStore::new()),
            None::<CountingPing>,
        );
        assert!(!keep_alive.is_active());
        keep_alive.run(CancellationToken::new()).await;
    }
}
