//! Chat delivery over the platform's conversation REST endpoint.
//!
//! Resuming a conversation means posting a message activity to
//! `{serviceUrl}/v3/conversations/{conversationId}/activities`, the shape the
//! handle was captured from.

use std::time::Duration;

use chatrelay_core::channel::ChatChannel;
use chatrelay_types::conversation::ConversationHandle;
use chatrelay_types::error::ChatError;
use serde::Serialize;
use tracing::debug;

use super::build_client;

#[derive(Serialize)]
struct Activity<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    text: &'a str,
    conversation: Account<'a>,
    recipient: Account<'a>,
}

#[derive(Serialize)]
struct Account<'a> {
    id: &'a str,
}

pub struct WebhookChatChannel {
    http: reqwest::Client,
}

impl WebhookChatChannel {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            http: build_client(timeout)?,
        })
    }
}

fn activities_url(handle: &ConversationHandle) -> Result<String, ChatError> {
    let base = handle
        .service_url
        .as_deref()
        .map(|url| url.trim_end_matches('/'))
        .filter(|url| !url.is_empty())
        .ok_or(ChatError::NoEndpoint)?;
    Ok(format!(
        "{base}/v3/conversations/{}/activities",
        handle.conversation_id
    ))
}

impl ChatChannel for WebhookChatChannel {
    async fn deliver(&self, handle: &ConversationHandle, text: &str) -> Result<(), ChatError> {
        let url = activities_url(handle)?;
        let activity = Activity {
            kind: "message",
            text,
            conversation: Account {
                id: &handle.conversation_id,
            },
            recipient: Account { id: &handle.user_id },
        };

        let response = self
            .http
            .post(&url)
            .json(&activity)
            .send()
            .await
            .map_err(|e| ChatError::Delivery(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ChatError::Delivery(format!("chat service returned {status}")));
        }
        debug!(conversation = %handle.conversation_id, "message delivered to chat");
        Ok(())
    }
}
