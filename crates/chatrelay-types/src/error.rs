use thiserror::Error;

/// Errors from repository operations (used by trait definitions in chatrelay-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,
}

/// Errors of the duplex transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("send failed: {0}")]
    Send(String),

    #[error("receive failed: {0}")]
    Receive(String),

    /// The transport task is gone (process shutting down).
    #[error("transport stopped")]
    Stopped,
}

/// Errors of the HTTP backend call.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend request failed: {0}")]
    Request(String),

    #[error("backend returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("backend request timed out after {0} ms")]
    Timeout(u64),

    #[error("backend unreachable after {attempts} attempts: {last}")]
    Unreachable { attempts: u32, last: String },
}

/// Errors of the chat collaborator when delivering text.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("conversation handle has no delivery endpoint")]
    NoEndpoint,

    #[error("delivery failed: {0}")]
    Delivery(String),
}

/// Errors of identity resolution. Never fatal to a turn.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("directory lookup failed: {0}")]
    Lookup(String),
}

/// Errors of the broker's connection registry.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("no live connection registered for '{0}'")]
    Unregistered(String),

    #[error("connection for '{0}' is closed")]
    Closed(String),

    #[error("failed to encode frame: {0}")]
    Encode(String),
}
