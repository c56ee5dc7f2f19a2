//! In-memory session store with per-key serialization.
//!
//! Each session lives behind its own `tokio::sync::Mutex`, held for the whole
//! read-modify-write of a turn or an inbound delivery. Turns on different keys
//! never contend; turns on the same key queue on the mutex in arrival order.
//!
//! Two secondary indexes remember the most recently used key per user id and
//! per display identity so inbound events that only carry one of those can
//! still find a live session.

use std::sync::Arc;

use chatrelay_types::conversation::normalize_identity;
use chatrelay_types::session::{Session, SessionKey};
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

type SessionCell = Arc<Mutex<Session>>;

/// Keyed mapping from [`SessionKey`] to [`Session`].
#[derive(Default)]
pub struct SessionStore {
    entries: DashMap<SessionKey, SessionCell>,
    latest_by_user: DashMap<String, SessionKey>,
    latest_by_identity: DashMap<String, SessionKey>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the session for `key`, creating an empty one if absent.
    ///
    /// The returned guard is the only way to mutate a session; dropping it
    /// releases the key for the next turn.
    pub async fn lock(&self, key: &SessionKey) -> OwnedMutexGuard<Session> {
        let cell = self
            .entries
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(Session::new())))
            .clone();
        self.latest_by_user.insert(key.user.clone(), key.clone());
        cell.lock_owned().await
    }

    /// Lock the session for `key` only if it exists.
    pub async fn lock_existing(&self, key: &SessionKey) -> Option<OwnedMutexGuard<Session>> {
        let cell = self.entries.get(key).map(|entry| entry.value().clone())?;
        Some(cell.lock_owned().await)
    }

    /// Snapshot of the session for `key`.
    pub async fn get(&self, key: &SessionKey) -> Option<Session> {
        let guard = self.lock_existing(key).await?;
        Some(guard.clone())
    }

    /// Replace the session stored under `key`.
    pub async fn put(&self, key: &SessionKey, session: Session) {
        let mut guard = self.lock(key).await;
        *guard = session;
    }

    /// Remove the session for `key`. Returns false if it was not present.
    pub fn delete(&self, key: &SessionKey) -> bool {
        let removed = self.entries.remove(key).is_some();
        if removed {
            self.forget_indexes(key);
        }
        removed
    }

    /// Remove the session for `key` unless a turn currently holds or is
    /// waiting for it. Returns true if the session was removed.
    pub fn evict_if_unused(&self, key: &SessionKey) -> bool {
        let removed = self
            .entries
            .remove_if(key, |_, cell| Arc::strong_count(cell) == 1 && cell.try_lock().is_ok())
            .is_some();
        if removed {
            self.forget_indexes(key);
        }
        removed
    }

    /// Remember `key` as the most recent session of a display identity.
    pub fn bind_identity(&self, identity: &str, key: &SessionKey) {
        self.latest_by_identity
            .insert(normalize_identity(identity), key.clone());
    }

    /// Most recently used session key for a user id.
    pub fn latest_for_user(&self, user: &str) -> Option<SessionKey> {
        self.latest_by_user.get(user).map(|entry| entry.value().clone())
    }

    /// Most recently used session key for a display identity.
    pub fn latest_for_identity(&self, identity: &str) -> Option<SessionKey> {
        self.latest_by_identity
            .get(&normalize_identity(identity))
            .map(|entry| entry.value().clone())
    }

    pub fn contains(&self, key: &SessionKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn forget_indexes(&self, key: &SessionKey) {
        self.latest_by_user.remove_if(&key.user, |_, latest| latest == key);
        self.latest_by_identity.retain(|_, latest| *latest != *key);
    }
}
