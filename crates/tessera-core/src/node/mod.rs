//! Nodes and the machinery that talks to them.

#[allow(clippy::module_inception)]
mod node;
pub mod peer;
pub mod rate_limit;
pub mod receiver;
pub mod registry;
pub mod socket;

pub use node::{Node, NodeType, Permissions};
pub use peer::{AddressChange, AddressSlot, PeerIdentity};
pub use rate_limit::{KeyedRateLimiter, RateLimitMetrics};
pub use receiver::{Listener, PacketReceiver, ReceiverStats, SourceResolver};
pub use registry::{NewNode, NodeRegistry};
pub use socket::PacketSocket;
