//! Connector and link traits for the duplex transport.

use chatrelay_types::error::TransportError;

/// An open, bidirectional text-frame link.
///
/// `recv` must be cancel-safe: the transport actor polls it inside
/// `tokio::select!` alongside its command channel.
pub trait DuplexLink: Send + 'static {
    fn send(
        &mut self,
        text: String,
    ) -> impl std::future::Future<Output = Result<(), TransportError>> + Send;

    /// Next text frame. `None` once the peer has closed the link.
    fn recv(
        &mut self,
    ) -> impl std::future::Future<Output = Option<Result<String, TransportError>>> + Send;

    fn close(&mut self) -> impl std::future::Future<Output = ()> + Send;
}

/// Opens new links to the backend relay endpoint.
pub trait Connector: Send + Sync + 'static {
    type Link: DuplexLink;

    fn connect(
        &self,
    ) -> impl std::future::Future<Output = Result<Self::Link, TransportError>> + Send;
}
