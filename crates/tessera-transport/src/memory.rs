//! In-memory transport.
//!
//! A [`MemoryNetwork`] is a set of mailboxes keyed by [`SocketAddress`].
//! Each [`MemoryTransport`] bound on it delivers datagrams straight into the
//! destination's mailbox. Datagrams to unbound addresses vanish, as they
//! would on a real network.
//!
//! ```
//! use tessera_transport::{MemoryNetwork, SocketAddress, Transport};
//!
//! let network = MemoryNetwork::new();
//! let a = SocketAddress::udp("10.0.0.1:1000".parse().unwrap());
//! let b = SocketAddress::udp("10.0.0.2:2000".parse().unwrap());
//! let mut left = network.bind(a);
//! let mut right = network.bind(b);
//!
//! left.send_to(b"hello", b).unwrap();
//! assert_eq!(right.try_recv(), Some((b"hello".to_vec(), a)));
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::address::SocketAddress;
use crate::transport::{ChannelState, Transport, TransportError, TransportResult, TransportStats};

type Mailbox = VecDeque<(Vec<u8>, SocketAddress)>;

/// Shared set of mailboxes
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    mailboxes: Arc<Mutex<HashMap<SocketAddress, Mailbox>>>,
}

impl MemoryNetwork {
    /// Create an empty network
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a transport at `addr`, replacing any previous mailbox there
    #[must_use]
    pub fn bind(&self, addr: SocketAddress) -> MemoryTransport {
        self.lock().insert(addr, VecDeque::new());
        MemoryTransport {
            network: self.clone(),
            addr,
            channels: HashMap::new(),
            requires_handshake: false,
            closed: false,
            stats: TransportStats::default(),
        }
    }

    /// Number of datagrams waiting at `addr`
    #[must_use]
    pub fn pending(&self, addr: &SocketAddress) -> usize {
        self.lock().get(addr).map_or(0, VecDeque::len)
    }

    /// Remove and return every datagram waiting at `addr`
    #[must_use]
    pub fn drain(&self, addr: &SocketAddress) -> Vec<(Vec<u8>, SocketAddress)> {
        self.lock()
            .get_mut(addr)
            .map(|mailbox| mailbox.drain(..).collect())
            .unwrap_or_default()
    }

    /// Inject a datagram at `to` as if `from` had sent it
    pub fn inject(&self, to: SocketAddress, from: SocketAddress, data: Vec<u8>) {
        if let Some(mailbox) = self.lock().get_mut(&to) {
            mailbox.push_back((data, from));
        }
    }

    fn deliver(&self, to: SocketAddress, from: SocketAddress, data: &[u8]) -> bool {
        match self.lock().get_mut(&to) {
            Some(mailbox) => {
                mailbox.push_back((data.to_vec(), from));
                true
            }
            None => false,
        }
    }

    fn pop(&self, addr: &SocketAddress) -> Option<(Vec<u8>, SocketAddress)> {
        self.lock().get_mut(addr).and_then(VecDeque::pop_front)
    }

    fn unbind(&self, addr: &SocketAddress) {
        self.lock().remove(addr);
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SocketAddress, Mailbox>> {
        self.mailboxes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Transport endpoint on a [`MemoryNetwork`]
pub struct MemoryTransport {
    network: MemoryNetwork,
    addr: SocketAddress,
    channels: HashMap<SocketAddress, ChannelState>,
    requires_handshake: bool,
    closed: bool,
    stats: TransportStats,
}

impl MemoryTransport {
    /// Make channel opening two-step: [`open_channel`](Transport::open_channel)
    /// leaves the channel `Connecting` until
    /// [`complete_handshakes`](Self::complete_handshakes) runs.
    #[must_use]
    pub fn with_handshake(mut self) -> Self {
        self.requires_handshake = true;
        self
    }

    /// Promote every connecting channel to connected
    pub fn complete_handshakes(&mut self) {
        for state in self.channels.values_mut() {
            if *state == ChannelState::Connecting {
                *state = ChannelState::Connected;
            }
        }
    }

    /// Address this endpoint is bound at
    #[must_use]
    pub fn addr(&self) -> SocketAddress {
        self.addr
    }

    /// Take the next datagram waiting for this endpoint
    pub fn try_recv(&mut self) -> Option<(Vec<u8>, SocketAddress)> {
        if self.closed {
            return None;
        }
        let received = self.network.pop(&self.addr)?;
        self.stats.packets_received += 1;
        self.stats.bytes_received += received.0.len() as u64;
        Some(received)
    }
}

impl Transport for MemoryTransport {
    fn send_to(&mut self, buf: &[u8], addr: SocketAddress) -> TransportResult<usize> {
        if self.closed {
            self.stats.send_errors += 1;
            return Err(TransportError::Closed);
        }
        if self.requires_handshake && self.channel_state(&addr) != ChannelState::Connected {
            self.stats.send_errors += 1;
            return Err(TransportError::ChannelUnavailable(addr));
        }

        if !self.network.deliver(addr, self.addr, buf) {
            tracing::trace!("Datagram to unbound address {} dropped", addr);
        }
        self.stats.packets_sent += 1;
        self.stats.bytes_sent += buf.len() as u64;
        Ok(buf.len())
    }

    fn channel_state(&self, addr: &SocketAddress) -> ChannelState {
        self.channels
            .get(addr)
            .copied()
            .unwrap_or(ChannelState::Unconnected)
    }

    fn open_channel(&mut self, addr: SocketAddress) -> TransportResult<()> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        let state = if self.requires_handshake {
            ChannelState::Connecting
        } else {
            ChannelState::Connected
        };
        self.channels.entry(addr).or_insert(state);
        Ok(())
    }

    fn cleanup_channel(&mut self, addr: &SocketAddress) {
        self.channels.remove(addr);
    }

    fn local_addr(&self) -> TransportResult<SocketAddress> {
        Ok(self.addr)
    }

    fn close(&mut self) {
        self.closed = true;
        self.channels.clear();
        self.network.unbind(&self.addr);
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn stats(&self) -> TransportStats {
        self.stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> SocketAddress {
        SocketAddress::udp(s.parse().unwrap())
    }

    #[test]
    fn test_delivery_and_stats() {
        let network = MemoryNetwork::new();
        let mut a = network.bind(addr("10.0.0.1:1"));
        let mut b = network.bind(addr("10.0.0.2:2"));

        assert_eq!(a.send_to(b"ping", b.addr()).unwrap(), 4);
        assert_eq!(network.pending(&b.addr()), 1);
        let (data, from) = b.try_recv().unwrap();
        assert_eq!(data, b"ping");
        assert_eq!(from, a.addr());
        assert!(b.try_recv().is_none());

        assert_eq!(a.stats().packets_sent, 1);
        assert_eq!(b.stats().bytes_received, 4);
    }

    #[test]
    fn test_unbound_destination_is_silent() {
        let network = MemoryNetwork::new();
        let mut a = network.bind(addr("10.0.0.1:1"));
        assert!(a.send_to(b"lost", addr("10.0.0.9:9")).is_ok());
    }

    #[test]
    fn test_handshake_channels() {
        let network = MemoryNetwork::new();
        let peer = addr("10.0.0.2:2");
        let _b = network.bind(peer);
        let mut a = network.bind(addr("10.0.0.1:1")).with_handshake();

        assert_eq!(a.channel_state(&peer), ChannelState::Unconnected);
        assert!(matches!(
            a.send_to(b"x", peer),
            Err(TransportError::ChannelUnavailable(_))
        ));

        a.open_channel(peer).unwrap();
        assert_eq!(a.channel_state(&peer), ChannelState::Connecting);
        a.complete_handshakes();
        assert_eq!(a.channel_state(&peer), ChannelState::Connected);
        assert!(a.send_to(b"x", peer).is_ok());

        a.cleanup_channel(&peer);
        assert_eq!(a.channel_state(&peer), ChannelState::Unconnected);
    }

    #[test]
    fn test_admission_filter() {
        let network = MemoryNetwork::new();
        let mut a = network.bind(addr("10.0.0.1:1"));
        let known = addr("10.0.0.2:2");
        let stranger = addr("10.0.0.3:3");
        let filter = move |candidate: &SocketAddress| *candidate == known;

        assert!(a.admit_inbound(&known, &filter));
        assert_eq!(a.channel_state(&known), ChannelState::Connected);
        assert!(!a.admit_inbound(&stranger, &filter));
        assert_eq!(a.channel_state(&stranger), ChannelState::Unconnected);
    }

    #[test]
    fn test_closed_transport() {
        let network = MemoryNetwork::new();
        let mut a = network.bind(addr("10.0.0.1:1"));
        a.close();
        assert!(a.is_closed());
        assert!(matches!(a.send_to(b"x", addr("10.0.0.2:2")), Err(TransportError::Closed)));
        assert!(a.try_recv().is_none());
    }
}
