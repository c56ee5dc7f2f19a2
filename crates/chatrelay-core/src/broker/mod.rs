//! Broker side of the relay: live client connections and the injection path.

pub mod registry;
pub mod relay;

pub use registry::{ConnectionId, ConnectionRegistry};
pub use relay::{Broker, FrameOutcome};
