//! In-crate fakes for the port traits.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chatrelay_types::conversation::{normalize_identity, ConversationHandle, IncomingMessage};
use chatrelay_types::error::{BackendError, ChatError, IdentityError, RepositoryError, TransportError};
use chatrelay_types::wire::{BackendReply, OutboundPayload};
use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::backend::BackendClient;
use crate::channel::{ChatChannel, IdentityResolver};
use crate::conversation::ConversationStore;
use crate::transport::{Connector, DuplexLink};

pub fn sample_payload() -> OutboundPayload {
    OutboundPayload {
        user_identity: "u1".to_string(),
        conversation_identity: Some("c1".to_string()),
        identity: "someone@example.com".to_string(),
        message: "user: Hello".to_string(),
        history: None,
    }
}

pub fn handle(user: &str, conversation: &str) -> ConversationHandle {
    ConversationHandle::new(conversation, user).with_service_url("https://chat.example.net/")
}

pub fn message(user: &str, conversation: &str, text: &str) -> IncomingMessage {
    IncomingMessage {
        user_identity: user.to_string(),
        conversation_identity: conversation.to_string(),
        text: text.to_string(),
        resumable_conversation_handle: handle(user, conversation),
        identity_hint: None,
    }
}

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

pub enum Scripted {
    Reply(BackendReply),
    Fail(String),
    Hang,
}

impl Scripted {
    pub fn reply(text: &str) -> Self {
        Scripted::Reply(BackendReply {
            message: Some(text.to_string()),
            reset_token: false,
        })
    }

    pub fn reset(text: Option<&str>) -> Self {
        Scripted::Reply(BackendReply {
            message: text.map(str::to_string),
            reset_token: true,
        })
    }

    pub fn empty() -> Self {
        Scripted::Reply(BackendReply::default())
    }

    pub fn fail(reason: &str) -> Self {
        Scripted::Fail(reason.to_string())
    }
}

#[derive(Default)]
struct ScriptState {
    script: VecDeque<Scripted>,
    payloads: Vec<OutboundPayload>,
}

/// Backend that answers from a fixed script, one entry per call.
#[derive(Clone, Default)]
pub struct ScriptedBackend {
    state: Arc<Mutex<ScriptState>>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedBackend {
    pub fn new(script: Vec<Scripted>) -> Self {
        Self {
            state: Arc::new(Mutex::new(ScriptState {
                script: script.into(),
                payloads: Vec::new(),
            })),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn payloads(&self) -> Vec<OutboundPayload> {
        self.state.lock().unwrap().payloads.clone()
    }
}

impl BackendClient for ScriptedBackend {
    async fn post(&self, payload: &OutboundPayload) -> Result<BackendReply, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = {
            let mut state = self.state.lock().unwrap();
            state.payloads.push(payload.clone());
            state.script.pop_front()
        };
        match next {
            Some(Scripted::Reply(reply)) => Ok(reply),
            Some(Scripted::Fail(reason)) => Err(BackendError::Request(reason)),
            Some(Scripted::Hang) => std::future::pending().await,
            None => Err(BackendError::Request("no scripted response".to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Duplex transport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub enum ConnectPlan {
    Accept,
    Refuse,
    AcceptAfter(Duration),
}

/// Far end of a [`FakeLink`].
///
/// Dropping `push` closes the link from the peer side; dropping `sent` makes
/// every further send on the link fail.
pub struct FakePeer {
    pub sent: mpsc::UnboundedReceiver<String>,
    pub push: mpsc::UnboundedSender<String>,
}

pub struct FakeLink {
    outgoing: mpsc::UnboundedSender<String>,
    incoming: mpsc::UnboundedReceiver<String>,
}

impl DuplexLink for FakeLink {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.outgoing
            .send(text)
            .map_err(|_| TransportError::Send("peer gone".to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        self.incoming.recv().await.map(Ok)
    }

    async fn close(&mut self) {
        self.incoming.close();
    }
}

pub struct FakeConnector {
    plan: Mutex<VecDeque<ConnectPlan>>,
    attempts: Arc<AtomicUsize>,
    peers: mpsc::UnboundedSender<FakePeer>,
}

pub struct ConnectorTap {
    attempts: Arc<AtomicUsize>,
    peers: mpsc::UnboundedReceiver<FakePeer>,
}

impl ConnectorTap {
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub async fn next_peer(&mut self) -> FakePeer {
        self.peers.recv().await.expect("connector dropped")
    }
}

impl FakeConnector {
    pub fn new(plan: Vec<ConnectPlan>) -> (Self, ConnectorTap) {
        let attempts = Arc::new(AtomicUsize::new(0));
        let (peers_tx, peers_rx) = mpsc::unbounded_channel();
        (
            Self {
                plan: Mutex::new(plan.into()),
                attempts: Arc::clone(&attempts),
                peers: peers_tx,
            },
            ConnectorTap {
                attempts,
                peers: peers_rx,
            },
        )
    }
}

impl Connector for FakeConnector {
    type Link = FakeLink;

    async fn connect(&self) -> Result<FakeLink, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let step = self.plan.lock().unwrap().pop_front().unwrap_or(ConnectPlan::Refuse);
        match step {
            ConnectPlan::Refuse => return Err(TransportError::Connect("refused".to_string())),
            ConnectPlan::AcceptAfter(delay) => tokio::time::sleep(delay).await,
            ConnectPlan::Accept => {}
        }

        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        let _ = self.peers.send(FakePeer {
            sent: outgoing_rx,
            push: incoming_tx,
        });
        Ok(FakeLink {
            outgoing: outgoing_tx,
            incoming: incoming_rx,
        })
    }
}

// ---------------------------------------------------------------------------
// Chat collaborator
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct RecordingChat {
    deliveries: Arc<Mutex<Vec<(ConversationHandle, String)>>>,
    failing: bool,
}

impl RecordingChat {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn texts(&self) -> Vec<String> {
        self.deliveries
            .lock()
            .unwrap()
            .iter()
            .map(|(_, text)| text.clone())
            .collect()
    }

    pub fn deliveries(&self) -> Vec<(ConversationHandle, String)> {
        self.deliveries.lock().unwrap().clone()
    }
}

impl ChatChannel for RecordingChat {
    async fn deliver(&self, handle: &ConversationHandle, text: &str) -> Result<(), ChatError> {
        if self.failing {
            return Err(ChatError::Delivery("chat service down".to_string()));
        }
        self.deliveries
            .lock()
            .unwrap()
            .push((handle.clone(), text.to_string()));
        Ok(())
    }
}

pub enum FakeIdentity {
    Found(String),
    Missing,
    Failing,
}

impl IdentityResolver for FakeIdentity {
    async fn resolve(&self, _message: &IncomingMessage) -> Result<Option<String>, IdentityError> {
        match self {
            FakeIdentity::Found(identity) => Ok(Some(identity.clone())),
            FakeIdentity::Missing => Ok(None),
            FakeIdentity::Failing => Err(IdentityError::Lookup("directory offline".to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Conversation references
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct MemoryConversationStore {
    refs: Arc<DashMap<String, ConversationHandle>>,
}

impl MemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.refs.len()
    }
}

impl ConversationStore for MemoryConversationStore {
    async fn get(&self, identity: &str) -> Result<Option<ConversationHandle>, RepositoryError> {
        Ok(self
            .refs
            .get(&normalize_identity(identity))
            .map(|entry| entry.value().clone()))
    }

    async fn upsert(&self, identity: &str, handle: &ConversationHandle) -> Result<(), RepositoryError> {
        self.refs.insert(normalize_identity(identity), handle.clone());
        Ok(())
    }

    async fn delete(&self, identity: &str) -> Result<(), RepositoryError> {
        self.refs.remove(&normalize_identity(identity));
        Ok(())
    }

    async fn list_identities(&self) -> Result<Vec<String>, RepositoryError> {
        let mut identities: Vec<String> = self.refs.iter().map(|entry| entry.key().clone()).collect();
        identities.sort();
        Ok(identities)
    }
}
