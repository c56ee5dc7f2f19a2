//! Conversation-reference store trait.

use chatrelay_types::conversation::ConversationHandle;
use chatrelay_types::error::RepositoryError;

/// Trait for durable identity -> [`ConversationHandle`] storage.
///
/// Identities are normalised (trimmed, lower-cased) by implementations, so
/// callers may pass them as received. Uses RPITIT (native async fn in traits,
/// Rust 2024 edition).
pub trait ConversationStore: Send + Sync {
    /// Get the stored handle for an identity. Returns None if absent.
    fn get(
        &self,
        identity: &str,
    ) -> impl std::future::Future<Output = Result<Option<ConversationHandle>, RepositoryError>> + Send;

    /// Store the handle for an identity (upsert).
    fn upsert(
        &self,
        identity: &str,
        handle: &ConversationHandle,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Delete the handle for an identity. No-op if absent.
    fn delete(
        &self,
        identity: &str,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// All stored identities, normalised.
    fn list_identities(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<String>, RepositoryError>> + Send;
}
