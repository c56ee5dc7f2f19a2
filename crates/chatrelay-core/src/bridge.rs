//! Session bridge: runs one chat turn end to end.
//!
//! A turn holds its session's lock from the first read to the final write,
//! including the backend round trip, so turns on the same key never
//! interleave. Turns on different keys run fully in parallel.
//!
//! Reset ordering: a reset signal clears history at once and leaves
//! `reset_pending` set; the next user turn clears again before appending its
//! own entry. A synchronous reply that carries a reset is delivered but not
//! recorded.

use std::sync::Arc;

use chatrelay_types::config::{BridgeConfig, KeepAliveConfig};
use chatrelay_types::conversation::{normalize_identity, ConversationHandle, IncomingMessage};
use chatrelay_types::session::{KeyingPolicy, Session, SessionKey};
use chatrelay_types::wire::{BackendReply, OutboundPayload, PayloadProfile};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::backend::{BackendClient, FallbackChannel};
use crate::channel::{ChatChannel, IdentityResolver};
use crate::conversation::ConversationStore;
use crate::reaper::InactivityReaper;
use crate::session::SessionStore;
use crate::transport::OutboundTransport;

/// How a turn ended. Every variant means the turn is complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnOutcome {
    /// The backend answered synchronously and the answer was delivered.
    Replied,
    /// The backend asked for a reset without any text.
    ResetOnly,
    /// Sent; any answer will arrive asynchronously.
    Dispatched,
    /// The backend was unreachable; the apology was delivered.
    Apologized,
    /// Empty text, nothing sent.
    Ignored,
}

/// Per-deployment knobs of the bridge.
#[derive(Debug, Clone)]
pub struct BridgeSettings {
    pub keying: KeyingPolicy,
    pub payload_profile: PayloadProfile,
    pub apology_message: String,
    pub identity_placeholder: String,
    /// Normalised identities whose conversation reference is persisted.
    /// Empty persists every resolved identity.
    pub persisted_identities: Vec<String>,
}

impl BridgeSettings {
    pub fn from_config(bridge: &BridgeConfig, keep_alive: &KeepAliveConfig) -> Self {
        Self {
            keying: bridge.keying,
            payload_profile: bridge.payload_profile,
            apology_message: bridge.apology_message.clone(),
            identity_placeholder: bridge.identity_placeholder.clone(),
            persisted_identities: keep_alive
                .identities
                .iter()
                .map(|identity| normalize_identity(identity))
                .collect(),
        }
    }

    fn persists(&self, identity: &str) -> bool {
        identity != self.identity_placeholder
            && (self.persisted_identities.is_empty()
                || self
                    .persisted_identities
                    .iter()
                    .any(|selected| *selected == normalize_identity(identity)))
    }
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self::from_config(&BridgeConfig::default(), &KeepAliveConfig::default())
    }
}

/// Orchestrates user turns over the session store and the backend channels.
pub struct SessionBridge<C, I, B, R>
where
    C: ChatChannel,
    I: IdentityResolver,
    B: BackendClient,
    R: ConversationStore,
{
    sessions: Arc<SessionStore>,
    chat: Arc<C>,
    identity: I,
    conversations: Arc<R>,
    reaper: Arc<InactivityReaper>,
    transport: Option<OutboundTransport>,
    fallback: Option<FallbackChannel<B>>,
    settings: BridgeSettings,
}

impl<C, I, B, R> SessionBridge<C, I, B, R>
where
    C: ChatChannel,
    I: IdentityResolver,
    B: BackendClient,
    R: ConversationStore,
{
    pub fn new(
        sessions: Arc<SessionStore>,
        chat: Arc<C>,
        identity: I,
        conversations: Arc<R>,
        reaper: Arc<InactivityReaper>,
        settings: BridgeSettings,
    ) -> Self {
        Self {
            sessions,
            chat,
            identity,
            conversations,
            reaper,
            transport: None,
            fallback: None,
            settings,
        }
    }

    pub fn with_transport(mut self, transport: OutboundTransport) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_fallback(mut self, fallback: FallbackChannel<B>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Run one user turn. Never fails: backend trouble ends in
    /// [`TurnOutcome::Apologized`].
    pub async fn handle_turn(&self, message: &IncomingMessage) -> TurnOutcome {
        let text = message.text.trim();
        if text.is_empty() {
            debug!(user = %message.user_identity, "ignoring empty message");
            return TurnOutcome::Ignored;
        }

        let key = self.settings.keying.key_for_message(message);
        let mut session = self.sessions.lock(&key).await;

        let handle = message.resumable_conversation_handle.clone();
        session.conversation_handle = Some(handle.clone());
        session.touch();
        self.reaper.touch(&key);

        if session.apply_pending_reset() {
            debug!(session = %key, "pending reset applied before turn");
        }

        let identity = self.resolve_identity(message).await;
        if identity != self.settings.identity_placeholder {
            self.sessions.bind_identity(&identity, &key);
        }
        session.identity = Some(identity.clone());
        self.remember_conversation(&identity, &handle).await;

        session.push_user(text);
        let payload = OutboundPayload::build(
            self.settings.payload_profile,
            &key,
            &identity,
            &session,
            text,
        );

        let duplex_ok = self.dispatch_duplex(&key, &payload);
        let outcome = match &self.fallback {
            Some(fallback) => match fallback.post(&payload).await {
                Ok(reply) => {
                    self.apply_reply(&key, &mut session, &handle, reply, duplex_ok)
                        .await
                }
                Err(err) => {
                    error!(session = %key, identity = %identity, error = %err, "backend unreachable");
                    self.apologize(&key, &handle).await
                }
            },
            None if duplex_ok => TurnOutcome::Dispatched,
            None => {
                warn!(session = %key, "no usable backend channel");
                self.apologize(&key, &handle).await
            }
        };

        session.touch();
        self.reaper.touch(&key);
        info!(session = %key, ?outcome, history = session.history.len(), "turn complete");
        outcome
    }

    async fn resolve_identity(&self, message: &IncomingMessage) -> String {
        match self.identity.resolve(message).await {
            Ok(Some(identity)) if !identity.trim().is_empty() => identity,
            Ok(_) => {
                debug!(user = %message.user_identity, "no identity found, using placeholder");
                self.settings.identity_placeholder.clone()
            }
            Err(err) => {
                warn!(user = %message.user_identity, error = %err, "identity resolution failed, using placeholder");
                self.settings.identity_placeholder.clone()
            }
        }
    }

    async fn remember_conversation(&self, identity: &str, handle: &ConversationHandle) {
        if !self.settings.persists(identity) {
            return;
        }
        if let Err(err) = self.conversations.upsert(identity, handle).await {
            warn!(identity = %identity, error = %err, "failed to persist conversation reference");
        }
    }

    /// Hand the payload to the duplex transport. Returns true if it was
    /// accepted (sent or queued).
    fn dispatch_duplex(&self, key: &SessionKey, payload: &OutboundPayload) -> bool {
        let Some(transport) = &self.transport else {
            return false;
        };
        match transport.send(payload) {
            Ok(()) => true,
            Err(err) => {
                warn!(session = %key, error = %err, "duplex dispatch failed");
                false
            }
        }
    }

    async fn apply_reply(
        &self,
        key: &SessionKey,
        session: &mut Session,
        handle: &ConversationHandle,
        reply: BackendReply,
        duplex_ok: bool,
    ) -> TurnOutcome {
        if reply.reset_token {
            session.mark_reset();
            info!(session = %key, "backend requested reset");
            return match reply.message {
                Some(text) => {
                    self.deliver(key, handle, &text).await;
                    TurnOutcome::Replied
                }
                None => TurnOutcome::ResetOnly,
            };
        }

        match reply.message {
            Some(text) => {
                session.push_bot(text.clone());
                self.deliver(key, handle, &text).await;
                TurnOutcome::Replied
            }
            None => {
                debug!(session = %key, duplex_ok, "backend accepted turn without synchronous reply");
                TurnOutcome::Dispatched
            }
        }
    }

    async fn apologize(&self, key: &SessionKey, handle: &ConversationHandle) -> TurnOutcome {
        self.deliver(key, handle, &self.settings.apology_message).await;
        TurnOutcome::Apologized
    }

    async fn deliver(&self, key: &SessionKey, handle: &ConversationHandle, text: &str) {
        if let Err(err) = self.chat.deliver(handle, text).await {
            warn!(session = %key, error = %err, "chat delivery failed");
        }
    }
}
