//! Session state storage.

pub mod store;

pub use store::SessionStore;
