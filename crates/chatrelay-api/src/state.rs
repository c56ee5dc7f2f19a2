//! Process state for the two roles.
//!
//! Core services are generic over their ports; the aliases below pin them to
//! the infra adapters. Background tasks (inbound router, keep-alive, the
//! transport actor) are owned by [`Background`] and stopped with the server.

use std::sync::Arc;

use anyhow::Context;
use chatrelay_core::backend::{FallbackChannel, RetryPolicy};
use chatrelay_core::bridge::{BridgeSettings, SessionBridge};
use chatrelay_core::broker::{Broker, ConnectionRegistry};
use chatrelay_core::keepalive::KeepAlive;
use chatrelay_core::reaper::InactivityReaper;
use chatrelay_core::router::InboundRouter;
use chatrelay_core::session::SessionStore;
use chatrelay_core::transport::OutboundTransport;
use chatrelay_infra::config::{database_url, resolve_data_dir};
use chatrelay_infra::http::{DirectoryResolver, HttpPing, ReqwestBackend, WebhookChatChannel};
use chatrelay_infra::sqlite::conversation::SqliteConversationStore;
use chatrelay_infra::sqlite::pool::DatabasePool;
use chatrelay_infra::ws::WsConnector;
use chatrelay_types::config::{HttpRetryConfig, RelayConfig};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub type ConcreteBridge =
    SessionBridge<WebhookChatChannel, DirectoryResolver, ReqwestBackend, SqliteConversationStore>;

pub type ConcreteBroker = Broker<ReqwestBackend>;

/// Shared state of the bridge router.
#[derive(Clone)]
pub struct BridgeState {
    pub bridge: Arc<ConcreteBridge>,
    pub transport: Option<OutboundTransport>,
}

/// Shared state of the broker router.
#[derive(Clone)]
pub struct BrokerState {
    pub broker: Arc<ConcreteBroker>,
}

/// Background work tied to the lifetime of one process.
pub struct Background {
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    transport: Option<OutboundTransport>,
    reaper: Option<Arc<InactivityReaper>>,
}

impl Background {
    fn new() -> Self {
        Self {
            shutdown: CancellationToken::new(),
            tasks: Vec::new(),
            transport: None,
            reaper: None,
        }
    }

    /// Cancel every task and wait for them to finish.
    pub async fn stop(self) {
        self.shutdown.cancel();
        if let Some(reaper) = &self.reaper {
            reaper.shutdown();
        }
        if let Some(transport) = &self.transport {
            transport.shutdown();
        }
        for task in self.tasks {
            if let Err(err) = task.await {
                debug!(error = %err, "background task ended abnormally");
            }
        }
    }
}

fn fallback_channel(url: &str, http: &HttpRetryConfig) -> anyhow::Result<FallbackChannel<ReqwestBackend>> {
    let policy = RetryPolicy::from_config(http);
    let client = ReqwestBackend::new(url, policy.timeout)?;
    Ok(FallbackChannel::new(client, policy))
}

async fn open_database(config: &RelayConfig) -> anyhow::Result<DatabasePool> {
    if config.database_url.is_none() {
        let data_dir = resolve_data_dir();
        tokio::fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;
    }
    let url = database_url(config);
    DatabasePool::new(&url)
        .await
        .with_context(|| format!("failed to open database {url}"))
}

impl BridgeState {
    /// Wire the bridge role: database, adapters, transport, reaper and the
    /// background tasks.
    pub async fn init(config: &RelayConfig) -> anyhow::Result<(Self, Background)> {
        let mut background = Background::new();
        let timeout = RetryPolicy::from_config(&config.http).timeout;

        let pool = open_database(config).await?;
        let conversations = Arc::new(SqliteConversationStore::new(pool));
        let chat = Arc::new(WebhookChatChannel::new(timeout)?);
        let identity = DirectoryResolver::new(config.bridge.directory_url.clone(), timeout)?;
        let sessions = Arc::new(SessionStore::new());

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let transport = match &config.bridge.broker_url {
            Some(url) => {
                let (transport, task) = OutboundTransport::spawn(
                    WsConnector::new(url.clone()).with_connect_timeout(timeout),
                    config.bridge.reconnect_delay(),
                    inbound_tx,
                );
                background.tasks.push(task);
                transport.connect();
                info!(broker = %url, "duplex transport enabled");
                Some(transport)
            }
            None => {
                drop(inbound_tx);
                None
            }
        };

        let reaper = Arc::new(InactivityReaper::new(
            config.bridge.reap_policy,
            config.bridge.inactivity_window(),
            Arc::clone(&sessions),
            transport.clone(),
        ));

        let mut bridge = SessionBridge::new(
            Arc::clone(&sessions),
            Arc::clone(&chat),
            identity,
            Arc::clone(&conversations),
            Arc::clone(&reaper),
            BridgeSettings::from_config(&config.bridge, &config.keep_alive),
        );
        if let Some(transport) = &transport {
            bridge = bridge.with_transport(transport.clone());
        }
        if let Some(url) = &config.bridge.fallback_url {
            bridge = bridge.with_fallback(fallback_channel(url, &config.http)?);
            info!(fallback = %url, "HTTP fallback enabled");
        }

        if transport.is_some() {
            let router = Arc::new(InboundRouter::new(
                Arc::clone(&sessions),
                Arc::clone(&chat),
                Arc::clone(&conversations),
                Arc::clone(&reaper),
                config.bridge.keying,
            ));
            let token = background.shutdown.child_token();
            background.tasks.push(tokio::spawn(router.run(inbound_rx, token)));
        }

        let pinger = config
            .keep_alive
            .ping_url
            .as_deref()
            .map(|url| HttpPing::new(url, timeout))
            .transpose()?;
        let keep_alive = KeepAlive::new(&config.keep_alive, Arc::clone(&chat), Arc::clone(&conversations), pinger);
        if keep_alive.is_active() {
            let token = background.shutdown.child_token();
            background.tasks.push(tokio::spawn(keep_alive.run(token)));
        }

        background.transport = transport.clone();
        background.reaper = Some(reaper);

        Ok((
            Self {
                bridge: Arc::new(bridge),
                transport,
            },
            background,
        ))
    }
}

impl BrokerState {
    /// Wire the broker role: connection registry and optional upstream.
    pub fn init(config: &RelayConfig) -> anyhow::Result<(Self, Background)> {
        let upstream = config
            .broker
            .upstream_url
            .as_deref()
            .map(|url| fallback_channel(url, &config.http))
            .transpose()?;
        if let Some(url) = &config.broker.upstream_url {
            info!(upstream = %url, "client payloads will be forwarded upstream");
        }
        let broker = Broker::new(Arc::new(ConnectionRegistry::new()), upstream)
            .with_identity_placeholder(&config.bridge.identity_placeholder);
        Ok((
            Self {
                broker: Arc::new(broker),
            },
            Background::new(),
        ))
    }
}
