//! # Tessera Transport
//!
//! Network transport layer for the Tessera protocol.
//!
//! This crate provides:
//! - [`SocketAddress`], the (kind, IPv4 address, port) triple peers are known by
//! - The [`Transport`] contract the protocol core sends through
//! - Per-address channel state (unconnected / connecting / connected)
//! - An in-memory transport for tests and embedding
//! - A Tokio UDP transport

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod address;
pub mod memory;
pub mod transport;
pub mod udp;

pub use address::{SocketAddress, SocketKind};
pub use memory::{MemoryNetwork, MemoryTransport};
pub use transport::{
    ChannelState, PeerFilter, Transport, TransportError, TransportResult, TransportStats,
};
pub use udp::UdpTransport;

/// Transport configuration
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Receive buffer size
    pub recv_buffer_size: usize,
    /// Send buffer size
    pub send_buffer_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            recv_buffer_size: 256 * 1024,
            send_buffer_size: 256 * 1024,
        }
    }
}
