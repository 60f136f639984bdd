//! Tokio UDP transport.
//!
//! Sends go through `try_send_to` so the protocol core never awaits on the
//! send path; receiving is async and owned by the client driver loop. UDP
//! has no handshake, so opening a channel marks it connected at once.

use std::collections::HashSet;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::net::UdpSocket;

use crate::TransportConfig;
use crate::address::{SocketAddress, SocketKind};
use crate::transport::{ChannelState, Transport, TransportError, TransportResult, TransportStats};

#[derive(Default)]
struct Counters {
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    packets_sent: AtomicU64,
    packets_received: AtomicU64,
    send_errors: AtomicU64,
    recv_errors: AtomicU64,
}

/// UDP transport on a Tokio socket.
///
/// Clones share the socket and statistics, so one clone can sit in the
/// receive branch of a `select!` while another is owned by the node registry.
/// Channel bookkeeping is per clone.
///
/// ```no_run
/// use tessera_transport::{SocketAddress, Transport, UdpTransport};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let mut transport = UdpTransport::bind("127.0.0.1:0".parse()?).await?;
/// let peer = SocketAddress::udp("127.0.0.1:40102".parse()?);
/// transport.send_to(b"hello", peer)?;
///
/// let mut buf = vec![0u8; 1500];
/// let (size, from) = transport.recv_from(&mut buf).await?;
/// println!("Received {} bytes from {}", size, from);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    closed: Arc<AtomicBool>,
    counters: Arc<Counters>,
    channels: HashSet<SocketAddress>,
}

impl UdpTransport {
    /// Bind with the default buffer sizes.
    ///
    /// # Errors
    /// Returns `TransportError::BindFailed` if the socket cannot be created or bound
    pub async fn bind(addr: SocketAddr) -> TransportResult<Self> {
        Self::bind_with_config(addr, &TransportConfig::default()).await
    }

    /// Bind using socket2 so buffer sizes can be set before the first packet.
    ///
    /// # Errors
    /// Returns `TransportError::BindFailed` if the socket cannot be created or bound
    pub async fn bind_with_config(addr: SocketAddr, config: &TransportConfig) -> TransportResult<Self> {
        let bind_failed = |e: io::Error| TransportError::BindFailed(format!("{addr}: {e}"));

        let domain = if addr.is_ipv4() {
            socket2::Domain::IPV4
        } else {
            socket2::Domain::IPV6
        };
        let socket = socket2::Socket::new(domain, socket2::Type::DGRAM, Some(socket2::Protocol::UDP))
            .map_err(bind_failed)?;

        if let Err(e) = socket.set_recv_buffer_size(config.recv_buffer_size) {
            tracing::warn!("Could not set UDP receive buffer to {}: {}", config.recv_buffer_size, e);
        }
        if let Err(e) = socket.set_send_buffer_size(config.send_buffer_size) {
            tracing::warn!("Could not set UDP send buffer to {}: {}", config.send_buffer_size, e);
        }

        socket.bind(&addr.into()).map_err(bind_failed)?;
        socket.set_nonblocking(true).map_err(bind_failed)?;

        let std_socket: std::net::UdpSocket = socket.into();
        let socket = UdpSocket::from_std(std_socket).map_err(bind_failed)?;
        tracing::debug!("UDP transport bound on {:?}", socket.local_addr());

        Ok(Self::from_socket(socket))
    }

    /// Wrap an already-bound Tokio socket
    #[must_use]
    pub fn from_socket(socket: UdpSocket) -> Self {
        Self {
            socket: Arc::new(socket),
            closed: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(Counters::default()),
            channels: HashSet::new(),
        }
    }

    /// Receive one datagram.
    ///
    /// IPv6 senders are not representable as a [`SocketAddress`] and are
    /// reported as [`TransportError::UnsupportedAddress`] with the null address.
    ///
    /// # Errors
    /// Returns `TransportError` if the transport is closed or the socket fails
    pub async fn recv_from(&self, buf: &mut [u8]) -> TransportResult<(usize, SocketAddress)> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(TransportError::Closed);
        }

        match self.socket.recv_from(buf).await {
            Ok((size, from)) => {
                let from = SocketAddress::try_from(from)
                    .map_err(|_| TransportError::UnsupportedAddress(SocketAddress::NULL))?;
                self.counters.bytes_received.fetch_add(size as u64, Ordering::Relaxed);
                self.counters.packets_received.fetch_add(1, Ordering::Relaxed);
                Ok((size, from))
            }
            Err(e) => {
                self.counters.recv_errors.fetch_add(1, Ordering::Relaxed);
                Err(TransportError::Io(e))
            }
        }
    }
}

impl Transport for UdpTransport {
    fn send_to(&mut self, buf: &[u8], addr: SocketAddress) -> TransportResult<usize> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(TransportError::Closed);
        }
        if addr.kind() == SocketKind::WebRtc || addr.is_null() {
            self.counters.send_errors.fetch_add(1, Ordering::Relaxed);
            return Err(TransportError::UnsupportedAddress(addr));
        }

        match self.socket.try_send_to(buf, addr.to_socket_addr()) {
            Ok(sent) => {
                self.counters.bytes_sent.fetch_add(sent as u64, Ordering::Relaxed);
                self.counters.packets_sent.fetch_add(1, Ordering::Relaxed);
                Ok(sent)
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                self.counters.send_errors.fetch_add(1, Ordering::Relaxed);
                Err(TransportError::WouldBlock)
            }
            Err(e) => {
                self.counters.send_errors.fetch_add(1, Ordering::Relaxed);
                Err(TransportError::Io(e))
            }
        }
    }

    fn channel_state(&self, addr: &SocketAddress) -> ChannelState {
        if self.channels.contains(addr) {
            ChannelState::Connected
        } else {
            ChannelState::Unconnected
        }
    }

    fn open_channel(&mut self, addr: SocketAddress) -> TransportResult<()> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(TransportError::Closed);
        }
        if addr.kind() == SocketKind::WebRtc {
            return Err(TransportError::UnsupportedAddress(addr));
        }
        self.channels.insert(addr);
        Ok(())
    }

    fn cleanup_channel(&mut self, addr: &SocketAddress) {
        self.channels.remove(addr);
    }

    fn local_addr(&self) -> TransportResult<SocketAddress> {
        let local = self.socket.local_addr()?;
        SocketAddress::try_from(local).map_err(|_| TransportError::UnsupportedAddress(SocketAddress::NULL))
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::Relaxed);
        self.channels.clear();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    fn stats(&self) -> TransportStats {
        TransportStats {
            bytes_sent: self.counters.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.counters.bytes_received.load(Ordering::Relaxed),
            packets_sent: self.counters.packets_sent.load(Ordering::Relaxed),
            packets_received: self.counters.packets_received.load(Ordering::Relaxed),
            send_errors: self.counters.send_errors.load(Ordering::Relaxed),
            recv_errors: self.counters.recv_errors.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_and_exchange() {
        let mut a = UdpTransport::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let b = UdpTransport::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let b_addr = b.local_addr().unwrap();

        // try_send_to on a fresh socket may report WouldBlock until writable
        a.socket.writable().await.unwrap();
        assert_eq!(a.send_to(b"hello", b_addr).unwrap(), 5);

        let mut buf = [0u8; 64];
        let (size, from) = b.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..size], b"hello");
        assert_eq!(from, a.local_addr().unwrap());

        assert_eq!(a.stats().packets_sent, 1);
        assert_eq!(b.stats().bytes_received, 5);
    }

    #[tokio::test]
    async fn test_channels_are_immediate() {
        let mut t = UdpTransport::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let peer = SocketAddress::udp("127.0.0.1:40102".parse().unwrap());
        assert_eq!(t.channel_state(&peer), ChannelState::Unconnected);
        t.open_channel(peer).unwrap();
        assert_eq!(t.channel_state(&peer), ChannelState::Connected);
        t.cleanup_channel(&peer);
        assert_eq!(t.channel_state(&peer), ChannelState::Unconnected);
    }

    #[tokio::test]
    async fn test_close() {
        let mut t = UdpTransport::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        t.close();
        assert!(t.is_closed());
        let peer = SocketAddress::udp("127.0.0.1:40102".parse().unwrap());
        assert!(matches!(t.send_to(b"x", peer), Err(TransportError::Closed)));
        let mut buf = [0u8; 8];
        assert!(matches!(t.recv_from(&mut buf).await, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn test_webrtc_address_unsupported() {
        let mut t = UdpTransport::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let peer = SocketAddress::new(SocketKind::WebRtc, 0x7F00_0001, 9);
        assert!(matches!(t.send_to(b"x", peer), Err(TransportError::UnsupportedAddress(_))));
    }
}
