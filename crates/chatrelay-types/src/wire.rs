//! JSON payloads exchanged with the backend and the broker.
//!
//! Field names are camelCase on the wire. Backend-originated frames are
//! parsed leniently: every field is optional and routing decides later
//! whether a frame can be delivered at all.

use serde::{Deserialize, Serialize};

use crate::conversation::normalize_identity;
use crate::session::{HistoryEntry, Session, SessionKey};

/// Fixed acknowledgement text of the injection endpoint.
pub const INJECTION_ACK_MESSAGE: &str = "Data received successfully!";

/// Shape of the payload sent to the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadProfile {
    /// `message` carries the whole role-prefixed transcript.
    #[default]
    Transcript,
    /// `message` carries only the new text; `history` carries the entries.
    Structured,
}

/// Client -> backend payload, shared by the duplex link and the HTTP fallback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundPayload {
    pub user_identity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_identity: Option<String>,
    pub identity: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history: Option<Vec<HistoryEntry>>,
}

impl OutboundPayload {
    /// Build the payload for the current state of a session.
    ///
    /// `text` is the user message that was just appended to the history.
    pub fn build(
        profile: PayloadProfile,
        key: &SessionKey,
        identity: &str,
        session: &Session,
        text: &str,
    ) -> Self {
        let (message, history) = match profile {
            PayloadProfile::Transcript => (session.transcript(), None),
            PayloadProfile::Structured => (text.to_string(), Some(session.history.clone())),
        };
        Self {
            user_identity: key.user.clone(),
            conversation_identity: key.conversation.clone(),
            identity: identity.to_string(),
            message,
            history,
        }
    }
}

/// Frames a bridge may send to the broker over its duplex connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClientFrame {
    /// Identity announcement; binds the identity to the sending connection.
    Register { register: String },
    Payload(OutboundPayload),
}

/// Backend -> client frame (duplex message or translated injection).
///
/// Backends may address the display identity as `identity` or `email`.
/// When both are present, `identity` wins.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "RawInboundEvent")]
pub struct InboundEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_identity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_identity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub reset_token: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawInboundEvent {
    #[serde(default)]
    user_identity: Option<String>,
    #[serde(default)]
    conversation_identity: Option<String>,
    #[serde(default)]
    identity: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    reset_token: bool,
}

impl From<RawInboundEvent> for InboundEvent {
    fn from(raw: RawInboundEvent) -> Self {
        let identity = match raw.identity {
            Some(identity) if !identity.trim().is_empty() => Some(identity),
            _ => raw.email,
        };
        Self {
            user_identity: raw.user_identity,
            conversation_identity: raw.conversation_identity,
            identity,
            message: raw.message,
            reset_token: raw.reset_token,
        }
    }
}

/// Where an inbound event should go, most specific first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteKey {
    Conversation { user: String, conversation: String },
    User(String),
    /// Normalised display identity.
    Identity(String),
}

impl InboundEvent {
    /// Event addressed to a display identity only.
    pub fn for_identity(identity: impl Into<String>, message: impl Into<String>, reset_token: bool) -> Self {
        Self {
            identity: Some(identity.into()),
            message: Some(message.into()),
            reset_token,
            ..Self::default()
        }
    }

    /// Event answering a client payload, carrying the payload's routing fields.
    pub fn reply_to(payload: &OutboundPayload, reply: &BackendReply) -> Self {
        Self {
            user_identity: Some(payload.user_identity.clone()),
            conversation_identity: payload.conversation_identity.clone(),
            identity: Some(payload.identity.clone()),
            message: reply.message.clone(),
            reset_token: reply.reset_token,
        }
    }

    /// Extract the routing key. `None` means the event cannot be routed.
    pub fn route(&self) -> Option<RouteKey> {
        let user = non_empty(self.user_identity.as_deref());
        let conversation = non_empty(self.conversation_identity.as_deref());
        let identity = non_empty(self.identity.as_deref());

        match (user, conversation, identity) {
            (Some(user), Some(conversation), _) => Some(RouteKey::Conversation {
                user: user.to_string(),
                conversation: conversation.to_string(),
            }),
            (Some(user), None, _) => Some(RouteKey::User(user.to_string())),
            (None, _, Some(identity)) => Some(RouteKey::Identity(normalize_identity(identity))),
            _ => None,
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Synchronous reply of the HTTP fallback endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendReply {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub reset_token: bool,
}

impl BackendReply {
    pub fn is_empty(&self) -> bool {
        self.message.is_none() && !self.reset_token
    }
}

/// Body of the broker's HTTP injection endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InjectionRequest {
    pub email: String,
    pub message: String,
    #[serde(default)]
    pub reset_token: bool,
}

impl InjectionRequest {
    pub fn into_event(self) -> InboundEvent {
        InboundEvent::for_identity(self.email, self.message, self.reset_token)
    }
}

/// Response of the injection endpoint, always returned with 200.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InjectionAck {
    pub message: String,
    pub received_data: serde_json::Value,
}

impl InjectionAck {
    pub fn echo(received_data: serde_json::Value) -> Self {
        Self {
            message: INJECTION_ACK_MESSAGE.to_string(),
            received_data,
        }
    }
}
