//! Per-conversation session state.
//!
//! A [`Session`] holds the transcript that is replayed to the backend on every
//! turn, the pending-reset flag, and the handle needed to reach the user again
//! later. Sessions are addressed by a [`SessionKey`] built according to the
//! configured [`KeyingPolicy`].

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::conversation::{ConversationHandle, IncomingMessage};

/// Separator used between transcript lines.
pub const TRANSCRIPT_SEPARATOR: &str = "\n";

/// Who produced a history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Bot,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Bot => write!(f, "bot"),
        }
    }
}

/// A single transcript line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
}

impl HistoryEntry {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn bot(content: impl Into<String>) -> Self {
        Self {
            role: Role::Bot,
            content: content.into(),
        }
    }
}

/// How session keys are derived from incoming messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyingPolicy {
    /// One session per (user, conversation) pair.
    #[default]
    PerConversation,
    /// One session per user, shared across conversations.
    PerUser,
}

impl KeyingPolicy {
    /// Build the key for a user and conversation under this policy.
    pub fn key(&self, user: &str, conversation: &str) -> SessionKey {
        match self {
            KeyingPolicy::PerConversation => SessionKey::composite(user, conversation),
            KeyingPolicy::PerUser => SessionKey::user(user),
        }
    }

    pub fn key_for_message(&self, message: &IncomingMessage) -> SessionKey {
        self.key(&message.user_identity, &message.conversation_identity)
    }

    pub fn key_for_handle(&self, handle: &ConversationHandle) -> SessionKey {
        self.key(&handle.user_id, &handle.conversation_id)
    }
}

/// Identifies one ongoing exchange.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub user: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation: Option<String>,
}

impl SessionKey {
    pub fn composite(user: impl Into<String>, conversation: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            conversation: Some(conversation.into()),
        }
    }

    pub fn user(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            conversation: None,
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.conversation {
            Some(conversation) => write!(f, "{}/{}", self.user, conversation),
            None => write!(f, "{}", self.user),
        }
    }
}

/// Mutable state of one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub history: Vec<HistoryEntry>,
    /// The next user turn must start from an empty history.
    pub reset_pending: bool,
    pub conversation_handle: Option<ConversationHandle>,
    pub identity: Option<String>,
    pub last_activity: DateTime<Utc>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            history: Vec::new(),
            reset_pending: false,
            conversation_handle: None,
            identity: None,
            last_activity: Utc::now(),
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    /// Apply a pending reset before a new user turn is recorded.
    ///
    /// Returns true if history was cleared.
    pub fn apply_pending_reset(&mut self) -> bool {
        if !self.reset_pending {
            return false;
        }
        self.history.clear();
        self.reset_pending = false;
        true
    }

    /// Record a reset signal: history is dropped now and the next user turn
    /// starts empty as well.
    pub fn mark_reset(&mut self) {
        self.history.clear();
        self.reset_pending = true;
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.history.push(HistoryEntry::user(content));
    }

    pub fn push_bot(&mut self, content: impl Into<String>) {
        self.history.push(HistoryEntry::bot(content));
    }

    /// Role-prefixed transcript, one line per entry.
    pub fn transcript(&self) -> String {
        self.history
            .iter()
            .map(|entry| format!("{}: {}", entry.role, entry.content))
            .collect::<Vec<_>>()
            .join(TRANSCRIPT_SEPARATOR)
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
