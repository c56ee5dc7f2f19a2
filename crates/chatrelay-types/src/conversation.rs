//! Chat-platform facing types.
//!
//! A [`ConversationHandle`] is the resumable reference the chat platform hands
//! us with every message. The relay never interprets it beyond the two ids it
//! needs for keying; everything else rides along in `extra` and is passed back
//! verbatim when a proactive message is delivered.

use serde::{Deserialize, Serialize};

/// Opaque, resumable reference to a chat conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationHandle {
    /// Platform id of the conversation.
    pub conversation_id: String,
    /// Platform id of the user on the other end.
    pub user_id: String,
    /// Endpoint that accepts proactive deliveries for this conversation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_url: Option<String>,
    /// Everything else the platform put in the reference.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ConversationHandle {
    pub fn new(conversation_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            user_id: user_id.into(),
            service_url: None,
            extra: serde_json::Map::new(),
        }
    }

    pub fn with_service_url(mut self, url: impl Into<String>) -> Self {
        self.service_url = Some(url.into());
        self
    }
}

/// One user message as handed over by the chat collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingMessage {
    pub user_identity: String,
    pub conversation_identity: String,
    pub text: String,
    pub resumable_conversation_handle: ConversationHandle,
    /// Display identity already known to the platform adapter, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_hint: Option<String>,
}

/// Normalise an identity for use as a storage or registry key.
pub fn normalize_identity(identity: &str) -> String {
    identity.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_keeps_unknown_fields() {
        let json = r#"{
            "conversationId": "conv-1",
            "userId": "29:abc",
            "serviceUrl": "https://smba.example.net/",
            "channelId": "msteams",
            "bot": {"id": "28:bot"}
        }"#;
        let handle: ConversationHandle = serde_json::from_str(json).unwrap();
        assert_eq!(handle.conversation_id, "conv-1");
        assert_eq!(handle.service_url.as_deref(), Some("https://smba.example.net/"));
        assert_eq!(handle.extra["channelId"], "msteams");

        let back = serde_json::to_value(&handle).unwrap();
        assert_eq!(back["bot"]["id"], "28:bot");
    }

    #[test]
    fn test_incoming_message_wire_names() {
        let json = r#"{
            "userIdentity": "29:abc",
            "conversationIdentity": "conv-1",
            "text": " hello ",
            "resumableConversationHandle": {"conversationId": "conv-1", "userId": "29:abc"}
        }"#;
        let msg: IncomingMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.user_identity, "29:abc");
        assert_eq!(msg.text, " hello ");
        assert!(msg.identity_hint.is_none());
    }

    #[test]
    fn test_normalize_identity() {
        assert_eq!(normalize_identity("  Chris.Chapman@Example.COM "), "chris.chapman@example.com");
    }
}
