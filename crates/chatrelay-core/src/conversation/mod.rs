//! Durable conversation-reference abstractions.
//!
//! Defines the trait for identity -> conversation handle storage used to
//! reach users again after a restart. Implementations live in chatrelay-infra.

pub mod store;

pub use store::ConversationStore;
