//! BackendClient trait definition.

use chatrelay_types::error::BackendError;
use chatrelay_types::wire::{BackendReply, OutboundPayload};

/// A single request/response round trip to the backend endpoint.
///
/// Implementations must not retry; retrying is the job of
/// [`FallbackChannel`](super::FallbackChannel). A successful round trip with
/// no usable reply body returns `BackendReply::default()`.
pub trait BackendClient: Send + Sync {
    fn post(
        &self,
        payload: &OutboundPayload,
    ) -> impl std::future::Future<Output = Result<BackendReply, BackendError>> + Send;
}
