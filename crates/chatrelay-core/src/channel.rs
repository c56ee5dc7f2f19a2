//! Chat-platform collaborator ports.
//!
//! The relay never talks to the chat platform directly. It is handed an
//! implementation of [`ChatChannel`] to push text into an existing
//! conversation and an [`IdentityResolver`] to look up who is typing.

use chatrelay_types::conversation::{ConversationHandle, IncomingMessage};
use chatrelay_types::error::{ChatError, IdentityError};

/// Resume a conversation by handle and deliver text into it.
pub trait ChatChannel: Send + Sync {
    fn deliver(
        &self,
        handle: &ConversationHandle,
        text: &str,
    ) -> impl std::future::Future<Output = Result<(), ChatError>> + Send;
}

/// Best-effort lookup of the display identity (e.g. email) behind a message.
pub trait IdentityResolver: Send + Sync {
    fn resolve(
        &self,
        message: &IncomingMessage,
    ) -> impl std::future::Future<Output = Result<Option<String>, IdentityError>> + Send;
}
