//! Per-destination sequencing on top of a [`Transport`].

use std::collections::HashMap;

use tessera_transport::{
    ChannelState, PeerFilter, SocketAddress, Transport, TransportResult, TransportStats,
};

use crate::frame::{Frame, MESSAGE_NUMBER_MASK, SEQUENCE_NUMBER_MASK};

/// Owns the transport and the sequence and message counters of every
/// destination. Every frame written gets the next sequence number for its
/// destination, so two copies of a frame sent to two peers are sequenced
/// independently.
pub struct PacketSocket {
    transport: Box<dyn Transport>,
    sequence_numbers: HashMap<SocketAddress, u32>,
    message_numbers: HashMap<SocketAddress, u32>,
}

impl PacketSocket {
    /// Wrap a transport
    #[must_use]
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            transport,
            sequence_numbers: HashMap::new(),
            message_numbers: HashMap::new(),
        }
    }

    /// Sequence and send one frame.
    ///
    /// # Errors
    /// Returns the transport's error if the datagram was not sent
    pub fn write_frame(&mut self, frame: &mut Frame, addr: SocketAddress) -> TransportResult<usize> {
        let sequence = self.sequence_numbers.entry(addr).or_insert(0);
        frame.set_sequence_number(*sequence);
        *sequence = (*sequence + 1) & SEQUENCE_NUMBER_MASK;

        let wire = frame.to_wire();
        tracing::trace!(
            "Sending {} ({} bytes, seq {}) to {}",
            frame.packet_type(),
            wire.len(),
            frame.sequence_number(),
            addr
        );
        self.transport.send_to(&wire, addr)
    }

    /// Send frames in order, stopping at the first failure.
    ///
    /// # Errors
    /// Returns the transport's error for the first frame that was not sent
    pub fn write_frame_sequence(&mut self, frames: &mut [Frame], addr: SocketAddress) -> TransportResult<usize> {
        let mut total = 0;
        for frame in frames.iter_mut() {
            total += self.write_frame(frame, addr)?;
        }
        Ok(total)
    }

    /// Message number for the next multi-frame message to `addr`
    pub fn next_message_number(&mut self, addr: SocketAddress) -> u32 {
        let number = self.message_numbers.entry(addr).or_insert(0);
        let current = *number;
        *number = (*number + 1) & MESSAGE_NUMBER_MASK;
        current
    }

    /// Channel state for `addr`
    #[must_use]
    pub fn channel_state(&self, addr: &SocketAddress) -> ChannelState {
        self.transport.channel_state(addr)
    }

    /// Whether the channel to `addr` can carry data
    #[must_use]
    pub fn is_open(&self, addr: &SocketAddress) -> bool {
        self.channel_state(addr) == ChannelState::Connected
    }

    /// Start opening the channel to `addr`.
    ///
    /// # Errors
    /// Returns the transport's error if it cannot reach the address
    pub fn open_channel(&mut self, addr: SocketAddress) -> TransportResult<()> {
        self.transport.open_channel(addr)
    }

    /// Release transport resources and counters for `addr`
    pub fn cleanup_channel(&mut self, addr: &SocketAddress) {
        self.transport.cleanup_channel(addr);
        self.sequence_numbers.remove(addr);
        self.message_numbers.remove(addr);
    }

    /// Ask the transport whether traffic from `from` may be processed
    pub fn admit_inbound(&mut self, from: &SocketAddress, filter: &dyn PeerFilter) -> bool {
        self.transport.admit_inbound(from, filter)
    }

    /// Transport statistics
    #[must_use]
    pub fn stats(&self) -> TransportStats {
        self.transport.stats()
    }

    /// Local address of the transport
    ///
    /// # Errors
    /// Returns the transport's error if the address cannot be determined
    pub fn local_addr(&self) -> TransportResult<SocketAddress> {
        self.transport.local_addr()
    }

    /// Close the transport
    pub fn close(&mut self) {
        self.transport.close();
    }
}

impl std::fmt::Debug for PacketSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketSocket")
            .field("destinations", &self.sequence_numbers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PacketType;
    use tessera_transport::MemoryNetwork;

    fn addr(s: &str) -> SocketAddress {
        SocketAddress::udp(s.parse().unwrap())
    }

    #[test]
    fn test_sequence_per_destination() {
        let network = MemoryNetwork::new();
        let a = addr("10.0.0.2:1");
        let b = addr("10.0.0.3:1");
        let _peer_a = network.bind(a);
        let _peer_b = network.bind(b);
        let mut socket = PacketSocket::new(Box::new(network.bind(addr("10.0.0.1:1"))));

        let mut frame = Frame::create(PacketType::Ping);
        socket.write_frame(&mut frame, a).unwrap();
        socket.write_frame(&mut frame, a).unwrap();
        assert_eq!(frame.sequence_number(), 1);
        socket.write_frame(&mut frame, b).unwrap();
        assert_eq!(frame.sequence_number(), 0);

        let received: Vec<u32> = network
            .drain(&a)
            .into_iter()
            .map(|(bytes, _)| Frame::from_received(bytes).unwrap().sequence_number())
            .collect();
        assert_eq!(received, vec![0, 1]);
    }

    #[test]
    fn test_message_numbers_and_cleanup() {
        let network = MemoryNetwork::new();
        let a = addr("10.0.0.2:1");
        let mut socket = PacketSocket::new(Box::new(network.bind(addr("10.0.0.1:1"))));

        assert_eq!(socket.next_message_number(a), 0);
        assert_eq!(socket.next_message_number(a), 1);
        socket.open_channel(a).unwrap();
        assert!(socket.is_open(&a));

        socket.cleanup_channel(&a);
        assert!(!socket.is_open(&a));
        assert_eq!(socket.next_message_number(a), 0);
    }
}
