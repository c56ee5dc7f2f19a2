//! Inbound router: delivers backend-originated messages to chat sessions.
//!
//! Events come from the duplex transport (via an mpsc channel) or from the
//! broker's injection path. Resolution order for the target session:
//!
//! 1. composite `(userIdentity, conversationIdentity)` key
//! 2. most recent live session of `userIdentity`
//! 3. most recent live session bound to `identity`
//! 4. the durable conversation-reference store, which resurrects a session
//!
//! Anything that resolves to nothing is logged and dropped.
//!
//! [`InboundRouter::run`] fans events out to one lane per user (or per
//! identity when the event names no user). A lane handles its events in
//! arrival order; lanes run concurrently, so a session that is busy with a
//! long turn only holds up its own lane.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chatrelay_types::conversation::{normalize_identity, ConversationHandle};
use chatrelay_types::session::{KeyingPolicy, Session, SessionKey};
use chatrelay_types::wire::{InboundEvent, RouteKey};
use tokio::sync::{mpsc, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::channel::ChatChannel;
use crate::conversation::ConversationStore;
use crate::reaper::InactivityReaper;
use crate::session::SessionStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    Delivered,
    /// Reset applied, no text to deliver.
    ResetOnly,
    /// No text and no reset.
    Ignored,
    Unroutable,
    DeliveryFailed,
}

/// Ordering domain of inbound events.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum LaneKey {
    User(String),
    Identity(String),
}

impl LaneKey {
    fn for_event(event: &InboundEvent) -> Option<Self> {
        match event.route()? {
            RouteKey::Conversation { user, .. } | RouteKey::User(user) => Some(LaneKey::User(user)),
            RouteKey::Identity(identity) => Some(LaneKey::Identity(identity)),
        }
    }
}

struct Lane {
    queue: mpsc::UnboundedSender<InboundEvent>,
    /// Events sent to the lane and not yet routed. Only the dispatcher
    /// increments it, so zero means the lane is idle and can be dropped.
    pending: Arc<AtomicUsize>,
}

pub struct InboundRouter<C: ChatChannel, R: ConversationStore> {
    sessions: Arc<SessionStore>,
    chat: Arc<C>,
    conversations: Arc<R>,
    reaper: Arc<InactivityReaper>,
    keying: KeyingPolicy,
}

impl<C: ChatChannel, R: ConversationStore> InboundRouter<C, R> {
    pub fn new(
        sessions: Arc<SessionStore>,
        chat: Arc<C>,
        conversations: Arc<R>,
        reaper: Arc<InactivityReaper>,
        keying: KeyingPolicy,
    ) -> Self {
        Self {
            sessions,
            chat,
            conversations,
            reaper,
            keying,
        }
    }

    /// Route one backend event to its session and deliver it.
    pub async fn route(&self, event: InboundEvent) -> RouteOutcome {
        let text = event
            .message
            .as_deref()
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .map(str::to_string);
        if text.is_none() && !event.reset_token {
            debug!("inbound event without message or reset, ignoring");
            return RouteOutcome::Ignored;
        }

        let Some(route) = event.route() else {
            warn!("inbound event carries no user identity or identity, dropping");
            return RouteOutcome::Unroutable;
        };

        let found = match self.live_session(&route) {
            Some(key) => match self.sessions.lock_existing(&key).await {
                Some(session) => Some((key, session)),
                None => self.resurrect(&event).await,
            },
            None => self.resurrect(&event).await,
        };
        let Some((key, mut session)) = found else {
            return self.unroutable(&route);
        };
        session.touch();
        self.reaper.touch(&key);

        let Some(handle) = session.conversation_handle.clone() else {
            warn!(session = %key, "session has no conversation handle, dropping");
            return RouteOutcome::Unroutable;
        };

        if event.reset_token {
            session.mark_reset();
            info!(session = %key, "reset requested by backend");
        }

        let Some(text) = text else {
            return RouteOutcome::ResetOnly;
        };

        match self.chat.deliver(&handle, &text).await {
            Ok(()) => {
                session.push_bot(text);
                session.touch();
                debug!(session = %key, "proactive message delivered");
                RouteOutcome::Delivered
            }
            Err(err) => {
                warn!(session = %key, error = %err, "proactive delivery failed");
                RouteOutcome::DeliveryFailed
            }
        }
    }

    fn live_session(&self, route: &RouteKey) -> Option<SessionKey> {
        match route {
            RouteKey::Conversation { user, conversation } => {
                let key = self.keying.key(user, conversation);
                if self.sessions.contains(&key) {
                    Some(key)
                } else {
                    self.sessions.latest_for_user(user)
                }
            }
            RouteKey::User(user) => self.sessions.latest_for_user(user),
            RouteKey::Identity(identity) => self.sessions.latest_for_identity(identity),
        }
    }

    /// Recreate a session from the durable conversation reference of the
    /// event's identity.
    async fn resurrect(
        &self,
        event: &InboundEvent,
    ) -> Option<(SessionKey, OwnedMutexGuard<Session>)> {
        let identity = event
            .identity
            .as_deref()
            .map(normalize_identity)
            .filter(|identity| !identity.is_empty())?;

        let handle: ConversationHandle = match self.conversations.get(&identity).await {
            Ok(Some(handle)) => handle,
            Ok(None) => return None,
            Err(err) => {
                warn!(identity = %identity, error = %err, "conversation reference lookup failed");
                return None;
            }
        };

        let key = self.keying.key_for_handle(&handle);
        let mut session = self.sessions.lock(&key).await;
        if session.conversation_handle.is_none() {
            session.conversation_handle = Some(handle);
        }
        if session.identity.is_none() {
            session.identity = Some(identity.clone());
        }
        self.sessions.bind_identity(&identity, &key);
        info!(session = %key, identity = %identity, "session resumed from stored conversation reference");
        Some((key, session))
    }

    fn unroutable(&self, route: &RouteKey) -> RouteOutcome {
        warn!(?route, "no session or conversation reference for inbound event, dropping");
        RouteOutcome::Unroutable
    }
}

impl<C, R> InboundRouter<C, R>
where
    C: ChatChannel + 'static,
    R: ConversationStore + 'static,
{
    /// Consume events until the channel closes or `shutdown` fires.
    ///
    /// Events of one lane are routed in arrival order. Lanes are opened on
    /// demand and dropped once idle.
    pub async fn run(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<InboundEvent>, shutdown: CancellationToken) {
        let mut lanes: HashMap<LaneKey, Lane> = HashMap::new();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => self.dispatch(&mut lanes, event, &shutdown),
                    None => break,
                },
            }
        }
        debug!(lanes = lanes.len(), "inbound router stopped");
    }

    fn dispatch(self: &Arc<Self>, lanes: &mut HashMap<LaneKey, Lane>, event: InboundEvent, shutdown: &CancellationToken) {
        lanes.retain(|_, lane| lane.pending.load(Ordering::Acquire) > 0);

        let Some(key) = LaneKey::for_event(&event) else {
            // Unroutable events never touch a session.
            let router = Arc::clone(self);
            tokio::spawn(async move {
                router.route(event).await;
            });
            return;
        };

        let lane = lanes
            .entry(key)
            .or_insert_with(|| self.open_lane(shutdown.child_token()));
        lane.pending.fetch_add(1, Ordering::AcqRel);
        if lane.queue.send(event).is_err() {
            lane.pending.fetch_sub(1, Ordering::AcqRel);
            warn!("inbound lane stopped, dropping event");
        }
    }

    fn open_lane(self: &Arc<Self>, shutdown: CancellationToken) -> Lane {
        let (queue, mut events) = mpsc::unbounded_channel::<InboundEvent>();
        let pending = Arc::new(AtomicUsize::new(0));
        let router = Arc::clone(self);
        let counter = Arc::clone(&pending);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    event = events.recv() => match event {
                        Some(event) => {
                            router.route(event).await;
                            counter.fetch_sub(1, Ordering::AcqRel);
                        }
                        None => break,
                    },
                }
            }
        });
        Lane { queue, pending }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{handle, MemoryConversationStore, RecordingChat};
    use chatrelay_types::config::ReapPolicy;
    use chatrelay_types::session::HistoryEntry;
    use std::time::Duration;

    type TestRouter = InboundRouter<RecordingChat, MemoryConversationStore>;

    fn router_with(chat: RecordingChat, conversations: MemoryConversationStore) -> TestRouter {
        let sessions = Arc::new(SessionStore::new());
        let reaper = Arc::new(InactivityReaper::new(
            ReapPolicy::EvictSession,
            Duration::from_secs(300),
            Arc::clone(&sessions),
            None,
        ));
        InboundRouter::new(
            sessions,
            Arc::new(chat),
            Arc::new(conversations),
            reaper,
            KeyingPolicy::PerConversation,
        )
    }

    async fn seed(router: &TestRouter, user: &str, conversation: &str, entries: usize) -> SessionKey {
        let key = SessionKey::composite(user, conversation);
        let mut session = router.sessions.lock(&key).await;
        session.conversation_handle = Some(handle(user, conversation));
        for i in 0..entries {
            session.push_user(format!("turn {i}"));
        }
        key
    }

    fn event(json: &str) -> InboundEvent {
        serde_json::from_str(json).unwrap()
    }

    #[tokio::test]
    async fn test_composite_route_delivers_and_records() {
        let chat = RecordingChat::new();
        let router = router_with(chat.clone(), MemoryConversationStore::new());
        let key = seed(&router, "u1", "c1", 1).await;

        let outcome = router
            .route(event(r#"{"userIdentity":"u1","conversationIdentity":"c1","message":"answer"}"#))
            .await;

        assert_eq!(outcome, RouteOutcome::Delivered);
        let (handle, text) = chat.deliveries().pop().unwrap();
        assert_eq!(handle.conversation_id, "c1");
        assert_eq!(text, "answer");
        let history = router.sessions.get(&key).await.unwrap().history;
        assert_eq!(history.last(), Some(&HistoryEntry::bot("answer")));
    }

    #[tokio::test]
    async fn test_reset_event_clears_before_delivery() {
        let chat = RecordingChat::new();
        let router = router_with(chat.clone(), MemoryConversationStore::new());
        let key = seed(&router, "u1", "c1", 6).await;

        let outcome = router
            .route(event(r#"{"userIdentity":"u1","message":"Let's restart","resetToken":true}"#))
            .await;

        assert_eq!(outcome, RouteOutcome::Delivered);
        assert_eq!(chat.texts(), vec!["Let's restart"]);
        let session = router.sessions.get(&key).await.unwrap();
        assert_eq!(session.history, vec![HistoryEntry::bot("Let's restart")]);
        assert!(session.reset_pending);
    }

    #[tokio::test]
    async fn test_reset_without_message_delivers_nothing() {
        let chat = RecordingChat::new();
        let router = router_with(chat.clone(), MemoryConversationStore::new());
        let key = seed(&router, "u1", "c1", 3).await;

        let outcome = router
            .route(event(r#"{"userIdentity":"u1","conversationIdentity":"c1","resetToken":true}"#))
            .await;

        assert_eq!(outcome, RouteOutcome::ResetOnly);
        assert!(chat.texts().is_empty());
        assert!(router.sessions.get(&key).await.unwrap().history.is_empty());
    }

    #[tokio::test]
    async fn test_event_without_identifiers_is_never_delivered() {
        let chat = RecordingChat::new();
        let router = router_with(chat.clone(), MemoryConversationStore::new());
        seed(&router, "u1", "c1", 1).await;

        let outcome = router
            .route(event(r#"{"conversationIdentity":"c1","message":"lost"}"#))
            .await;

        assert_eq!(outcome, RouteOutcome::Unroutable);
        assert!(chat.texts().is_empty());
    }

    #[tokio::test]
    async fn test_identity_route_uses_bound_session() {
        let chat = RecordingChat::new();
        let router = router_with(chat.clone(), MemoryConversationStore::new());
        let key = seed(&router, "u1", "c1", 0).await;
        router.sessions.bind_identity("someone@example.com", &key);

        let outcome = router
            .route(event(r#"{"email":"Someone@Example.com","message":"hello"}"#))
            .await;

        assert_eq!(outcome, RouteOutcome::Delivered);
        assert_eq!(chat.texts(), vec!["hello"]);
    }

    #[tokio::test]
    async fn test_stored_reference_resurrects_session() {
        let chat = RecordingChat::new();
        let conversations = MemoryConversationStore::new();
        conversations
            .upsert("ops@example.com", &handle("u9", "c9"))
            .await
            .unwrap();
        let router = router_with(chat.clone(), conversations);

        let outcome = router
            .route(event(r#"{"identity":"ops@example.com","message":"still there?"}"#))
            .await;

        assert_eq!(outcome, RouteOutcome::Delivered);
        let key = SessionKey::composite("u9", "c9");
        let session = router.sessions.get(&key).await.unwrap();
        assert_eq!(session.history, vec![HistoryEntry::bot("still there?")]);
        assert_eq!(
            router.sessions.latest_for_identity("ops@example.com"),
            Some(key)
        );
    }

    #[tokio::test]
    async fn test_unknown_identity_is_dropped() {
        let chat = RecordingChat::new();
        let router = router_with(chat.clone(), MemoryConversationStore::new());

        let outcome = router
            .route(event(r#"{"identity":"nobody@example.com","message":"hi"}"#))
            .await;

        assert_eq!(outcome, RouteOutcome::Unroutable);
        assert!(router.sessions.is_empty());
        assert!(chat.texts().is_empty());
    }

    #[tokio::test]
    async fn test_failed_delivery_is_not_recorded() {
        let router = router_with(RecordingChat::failing(), MemoryConversationStore::new());
        let key = seed(&router, "u1", "c1", 1).await;

        let outcome = router
            .route(event(r#"{"userIdentity":"u1","conversationIdentity":"c1","message":"x"}"#))
            .await;

        assert_eq!(outcome, RouteOutcome::DeliveryFailed);
        assert_eq!(router.sessions.get(&key).await.unwrap().history.len(), 1);
    }

    #[tokio::test]
    async fn test_run_consumes_channel_until_cancelled() {
        let chat = RecordingChat::new();
        let router = Arc::new(router_with(chat.clone(), MemoryConversationStore::new()));
        seed(&router, "u1", "c1", 0).await;

        let (tx, rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let task = {
            let router = Arc::clone(&router);
            let shutdown = shutdown.clone();
            tokio::spawn(async move { router.run(rx, shutdown).await })
        };

        tx.send(event(r#"{"userIdentity":"u1","message":"first"}"#)).unwrap();
        tx.send(event(r#"{"userIdentity":"u1","message":"second"}"#)).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();
        task.await.unwrap();

        assert_eq!(chat.texts(), vec!["first", "second"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_session_does_not_hold_up_other_sessions() {
        let chat = RecordingChat::new();
        let router = Arc::new(router_with(chat.clone(), MemoryConversationStore::new()));
        let busy = seed(&router, "ua", "ca", 0).await;
        seed(&router, "ub", "cb", 0).await;
        // A turn in flight on `busy`.
        let held = router.sessions.lock(&busy).await;

        let (tx, rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(Arc::clone(&router).run(rx, shutdown.clone()));

        tx.send(event(r#"{"userIdentity":"ua","conversationIdentity":"ca","message":"for a"}"#)).unwrap();
        tx.send(event(r#"{"userIdentity":"ua","conversationIdentity":"ca","message":"again a"}"#)).unwrap();
        tx.send(event(r#"{"userIdentity":"ub","conversationIdentity":"cb","message":"for b"}"#)).unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(chat.texts(), vec!["for b"]);

        drop(held);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(chat.texts(), vec!["for b", "for a", "again a"]);

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_resurrected_session_is_reaped_after_failed_delivery() {
        let conversations = MemoryConversationStore::new();
        conversations
            .upsert("ops@example.com", &handle("u9", "c9"))
            .await
            .unwrap();
        let router = router_with(RecordingChat::failing(), conversations);

        let outcome = router
            .route(event(r#"{"identity":"ops@example.com","message":"still there?"}"#))
            .await;

        assert_eq!(outcome, RouteOutcome::DeliveryFailed);
        assert_eq!(router.sessions.len(), 1);
        assert_eq!(router.reaper.armed(), 1);

        tokio::time::sleep(Duration::from_secs(301)).await;
        assert!(router.sessions.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_only_event_arms_reaper() {
        let router = router_with(RecordingChat::new(), MemoryConversationStore::new());
        seed(&router, "u1", "c1", 2).await;
        assert_eq!(router.reaper.armed(), 0);

        let outcome = router
            .route(event(r#"{"userIdentity":"u1","conversationIdentity":"c1","resetToken":true}"#))
            .await;

        assert_eq!(outcome, RouteOutcome::ResetOnly);
        assert_eq!(router.reaper.armed(), 1);
        tokio::time::sleep(Duration::from_secs(301)).await;
        assert!(router.sessions.is_empty());
    }
}
