//! The domain session: wire messages, connection state, and the client
//! that drives them.

pub mod account;
pub mod client;
pub mod coordinator;
pub mod handler;
pub mod messages;

pub use account::{AccountServices, AnonymousAccount};
pub use client::{DomainClient, bind_udp};
pub use coordinator::{DEFAULT_INTEREST_LIST, SessionCoordinator};
pub use handler::DomainHandler;
pub use messages::{ConnectReason, ConnectionRefusedReason, NodeRecord, PingType};
