//! Transport trait abstraction for multiple transport backends.
//!
//! The protocol core never touches sockets directly. It writes whole frames
//! to a [`Transport`], asks it for the state of the channel to a given peer
//! address, and tells it when a peer's resources can be released. All calls
//! are synchronous: a send either hands the bytes to the backend within the
//! current turn or fails.

use std::io;

use crate::address::SocketAddress;

/// Transport layer errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// I/O error from underlying transport
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Transport is closed
    #[error("Transport is closed")]
    Closed,

    /// Address binding failed
    #[error("Failed to bind to address: {0}")]
    BindFailed(String),

    /// No channel is open to the destination
    #[error("No open channel to {0}")]
    ChannelUnavailable(SocketAddress),

    /// The destination cannot be reached by this backend
    #[error("Unsupported address: {0}")]
    UnsupportedAddress(SocketAddress),

    /// The backend could not accept the datagram right now
    #[error("Send would block")]
    WouldBlock,
}

impl TransportError {
    /// Whether retrying the same send later may succeed
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::WouldBlock | Self::ChannelUnavailable(_))
    }
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// State of the channel to one peer address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Nothing opened yet
    Unconnected,
    /// Opening has started but the channel cannot carry data yet
    Connecting,
    /// Ready to carry data
    Connected,
}

/// Answers whether an address belongs to a peer we already know.
///
/// Transports consult this before admitting traffic from an address they
/// have no channel for.
pub trait PeerFilter {
    /// Whether `addr` is a known peer
    fn is_known_peer(&self, addr: &SocketAddress) -> bool;
}

impl<F> PeerFilter for F
where
    F: Fn(&SocketAddress) -> bool,
{
    fn is_known_peer(&self, addr: &SocketAddress) -> bool {
        self(addr)
    }
}

/// Datagram transport used by the protocol core.
///
/// Implementations keep one channel per peer address. Sending to an address
/// whose channel is not connected is allowed for connectionless backends
/// (UDP) and fails with [`TransportError::ChannelUnavailable`] otherwise.
pub trait Transport: Send {
    /// Send one datagram to `addr`, returning the number of bytes written.
    ///
    /// # Errors
    /// Returns `TransportError` if the backend rejects the datagram
    fn send_to(&mut self, buf: &[u8], addr: SocketAddress) -> TransportResult<usize>;

    /// State of the channel to `addr`
    fn channel_state(&self, addr: &SocketAddress) -> ChannelState;

    /// Start opening a channel to `addr`.
    ///
    /// # Errors
    /// Returns `TransportError` if the backend cannot reach the address
    fn open_channel(&mut self, addr: SocketAddress) -> TransportResult<()>;

    /// Release everything held for `addr`
    fn cleanup_channel(&mut self, addr: &SocketAddress);

    /// Decide whether traffic arriving from `from` may be processed.
    ///
    /// Addresses with a connected channel are always admitted; otherwise the
    /// channel is created only when `filter` recognises the sender.
    fn admit_inbound(&mut self, from: &SocketAddress, filter: &dyn PeerFilter) -> bool {
        if self.channel_state(from) == ChannelState::Connected {
            return true;
        }
        if !filter.is_known_peer(from) {
            tracing::trace!("Refusing channel from unknown sender {}", from);
            return false;
        }
        self.open_channel(*from).is_ok()
    }

    /// Local address this transport is bound to.
    ///
    /// # Errors
    /// Returns `TransportError` if the address cannot be determined
    fn local_addr(&self) -> TransportResult<SocketAddress>;

    /// Close the transport and drop all channels
    fn close(&mut self);

    /// Check if the transport is closed
    fn is_closed(&self) -> bool;

    /// Get transport statistics
    fn stats(&self) -> TransportStats {
        TransportStats::default()
    }
}

/// Transport statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// Total bytes sent
    pub bytes_sent: u64,
    /// Total bytes received
    pub bytes_received: u64,
    /// Total packets sent
    pub packets_sent: u64,
    /// Total packets received
    pub packets_received: u64,
    /// Send errors
    pub send_errors: u64,
    /// Receive errors
    pub recv_errors: u64,
}
