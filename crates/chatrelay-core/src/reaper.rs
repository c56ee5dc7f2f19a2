//! Inactivity reaper.
//!
//! One timer per session key (or a single timer for the shared transport),
//! re-armed on every touch. Each arm gets a fresh generation number and a
//! child of the reaper's root [`CancellationToken`]; a timer only acts if its
//! generation is still the current one when it fires.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chatrelay_types::config::ReapPolicy;
use chatrelay_types::session::SessionKey;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::session::SessionStore;
use crate::transport::OutboundTransport;

type Timer = (u64, CancellationToken);

pub struct InactivityReaper {
    policy: ReapPolicy,
    window: Duration,
    sessions: Arc<SessionStore>,
    transport: Option<OutboundTransport>,
    session_timers: Arc<DashMap<SessionKey, Timer>>,
    transport_timer: Arc<Mutex<Option<Timer>>>,
    generation: AtomicU64,
    root: CancellationToken,
}

impl InactivityReaper {
    pub fn new(
        policy: ReapPolicy,
        window: Duration,
        sessions: Arc<SessionStore>,
        transport: Option<OutboundTransport>,
    ) -> Self {
        Self {
            policy,
            window,
            sessions,
            transport,
            session_timers: Arc::new(DashMap::new()),
            transport_timer: Arc::new(Mutex::new(None)),
            generation: AtomicU64::new(0),
            root: CancellationToken::new(),
        }
    }

    pub fn policy(&self) -> ReapPolicy {
        self.policy
    }

    /// Record activity on `key`, restarting its idle window.
    pub fn touch(&self, key: &SessionKey) {
        if self.root.is_cancelled() {
            return;
        }
        match self.policy {
            ReapPolicy::EvictSession => self.arm_session(key),
            ReapPolicy::CloseTransport => self.arm_transport(),
        }
    }

    /// Number of armed timers.
    pub fn armed(&self) -> usize {
        let transport = self
            .transport_timer
            .lock()
            .map(|timer| usize::from(timer.is_some()))
            .unwrap_or(0);
        self.session_timers.len() + transport
    }

    /// Cancel every pending timer. Later touches are ignored.
    pub fn shutdown(&self) {
        self.root.cancel();
        self.session_timers.clear();
        if let Ok(mut timer) = self.transport_timer.lock() {
            *timer = None;
        }
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn arm_session(&self, key: &SessionKey) {
        let generation = self.next_generation();
        let token = self.root.child_token();
        if let Some((_, previous)) = self
            .session_timers
            .insert(key.clone(), (generation, token.clone()))
        {
            previous.cancel();
        }

        let window = self.window;
        let key = key.clone();
        let timers = Arc::clone(&self.session_timers);
        let sessions = Arc::clone(&self.sessions);
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(window) => {}
            }

            let current = timers
                .remove_if(&key, |_, (armed, _)| *armed == generation)
                .is_some();
            if !current {
                return;
            }
            if sessions.evict_if_unused(&key) {
                info!(session = %key, "evicted idle session");
            } else {
                debug!(session = %key, "idle session busy or already gone, eviction skipped");
            }
        });
    }

    fn arm_transport(&self) {
        let Some(transport) = self.transport.clone() else {
            return;
        };
        let generation = self.next_generation();
        let token = self.root.child_token();
        {
            let Ok(mut timer) = self.transport_timer.lock() else {
                return;
            };
            if let Some((_, previous)) = timer.replace((generation, token.clone())) {
                previous.cancel();
            }
        }

        let window = self.window;
        let slot = Arc::clone(&self.transport_timer);
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(window) => {}
            }

            let current = match slot.lock() {
                Ok(mut timer) if matches!(*timer, Some((armed, _)) if armed == generation) => {
                    *timer = None;
                    true
                }
                _ => false,
            };
            if current {
                info!(idle_secs = window.as_secs(), "closing duplex transport after inactivity");
                transport.close_idle();
            }
        });
    }
}

impl Drop for InactivityReaper {
    fn drop(&mut self) {
        self.root.cancel();
    }
}
