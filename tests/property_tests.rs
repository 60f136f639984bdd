//! Property-based tests for Tessera
//!
//! Uses proptest to check framing, reassembly and registry invariants over
//! large input spaces.

use proptest::prelude::*;

// ============================================================================
// Frame decoding
// ============================================================================

mod frame_properties {
    use super::*;
    use tessera_core::frame::{MAX_PACKET_SIZE, total_header_size};
    use tessera_core::{Frame, PacketType};

    proptest! {
        /// Arbitrary datagrams are rejected or decoded, never a panic
        #[test]
        fn decode_arbitrary_bytes(bytes in prop::collection::vec(any::<u8>(), 0..MAX_PACKET_SIZE)) {
            let _ = Frame::from_received(bytes);
        }

        /// Header size depends only on the type, and capacity is what is left
        #[test]
        fn header_size_is_a_function_of_type(index in 0usize..PacketType::ALL.len(), fill in 0usize..2000) {
            let packet_type = PacketType::ALL[index];
            let mut frame = Frame::create(packet_type);
            prop_assert_eq!(frame.header_size(), total_header_size(packet_type, false));

            let capacity = frame.bytes_available_for_write();
            prop_assert_eq!(capacity, MAX_PACKET_SIZE - frame.header_size());

            let written = fill.min(capacity);
            frame.write(&vec![0x11; written]).unwrap();
            let wire = frame.to_wire();
            prop_assert!(wire.len() <= MAX_PACKET_SIZE);

            let decoded = Frame::from_received(wire).unwrap();
            prop_assert_eq!(decoded.packet_type(), packet_type);
            prop_assert_eq!(decoded.header_size(), frame.header_size());
            prop_assert_eq!(decoded.payload().len(), written);
        }
    }
}

// ============================================================================
// Message reassembly
// ============================================================================

mod reassembly_properties {
    use super::*;
    use std::time::Instant;
    use tessera_core::{DeliveryMode, Frame, MessageAssembler, PacketType, ReceivedMessage};
    use tessera_integration_tests::addr;

    proptest! {
        /// Ordered messages split over any number of frames reassemble to
        /// the bytes written
        #[test]
        fn ordered_message_reassembles(
            data in prop::collection::vec(any::<u8>(), 1..12_000),
            number in 0u32..(1 << 30),
        ) {
            let mut assembler = MessageAssembler::new(PacketType::EntityData, DeliveryMode::Ordered);
            assembler.write(&data).unwrap();
            assembler.close_current_packet(false);
            let frames = assembler.prepare_packets(number);
            prop_assert!(!frames.is_empty());

            let mut decoded = frames
                .iter()
                .map(|f| Frame::from_received(f.to_wire()).unwrap());
            let first = decoded.next().unwrap();
            prop_assert_eq!(first.message().map(|m| m.number), Some(number));

            let mut message = ReceivedMessage::from_frame(first, addr("10.0.0.2:1"), Instant::now());
            for frame in decoded {
                prop_assert!(!message.is_complete());
                message.append(frame).unwrap();
            }
            prop_assert!(message.is_complete());
            prop_assert_eq!(message.num_frames(), frames.len());
            prop_assert_eq!(message.payload().as_slice(), &data[..]);
        }
    }
}

// ============================================================================
// Wire primitives
// ============================================================================

mod primitive_properties {
    use super::*;
    use tessera_core::Payload;
    use tessera_core::payload::{encode_utf16_string, read_utf16_string};

    proptest! {
        /// Strings survive the UTF-16 encoding, including empty ones
        #[test]
        fn utf16_string_roundtrip(s in "\\PC{0,64}") {
            let mut payload = Payload::from_bytes(encode_utf16_string(Some(&s)));
            prop_assert_eq!(read_utf16_string(&mut payload).unwrap(), Some(s));
            prop_assert!(payload.at_end());
        }

        /// Truncated strings are errors
        #[test]
        fn utf16_string_truncation(s in "[a-z]{1,32}", cut in 1usize..8) {
            let mut bytes = encode_utf16_string(Some(&s));
            bytes.truncate(bytes.len().saturating_sub(cut).max(1));
            let mut payload = Payload::from_bytes(bytes);
            prop_assert!(read_utf16_string(&mut payload).is_err());
        }
    }
}

// ============================================================================
// Registry
// ============================================================================

mod registry_properties {
    use super::*;
    use std::time::Instant;
    use tessera_core::node::PacketSocket;
    use tessera_core::{NewNode, NodeRegistry, NodeType, Permissions, event_channel};
    use tessera_transport::{MemoryNetwork, SocketAddress};
    use uuid::Uuid;

    fn registry() -> NodeRegistry {
        let network = MemoryNetwork::new();
        let transport = network.bind(SocketAddress::udp("10.0.0.1:50000".parse().unwrap()));
        let (events, _rx) = event_channel();
        NodeRegistry::new(PacketSocket::new(Box::new(transport)), events)
    }

    fn node_type_strategy() -> impl Strategy<Value = NodeType> {
        prop::sample::select(vec![
            NodeType::AudioMixer,
            NodeType::AvatarMixer,
            NodeType::EntityServer,
            NodeType::AssetServer,
            NodeType::MessagesMixer,
            NodeType::Agent,
        ])
    }

    fn new_node(uuid: Uuid, node_type: NodeType, ip: u32, port: u16, local_id: u16) -> NewNode {
        NewNode {
            uuid,
            node_type,
            public_address: SocketAddress::udp(std::net::SocketAddrV4::new(ip.into(), port)),
            local_address: SocketAddress::NULL,
            local_id,
            is_replicated: false,
            is_upstream: false,
            connection_secret: Uuid::nil(),
            permissions: Permissions::none(),
        }
    }

    proptest! {
        /// Re-announcing a node never duplicates it and keeps its port
        #[test]
        fn upsert_is_idempotent(
            node_type in node_type_strategy(),
            ip in 1u32..u32::MAX,
            first_port in 1u16..,
            second_port in 1u16..,
            repeats in 1usize..5,
        ) {
            let mut registry = registry();
            let uuid = Uuid::new_v4();
            let now = Instant::now();
            registry.add_or_update_node(new_node(uuid, node_type, ip, first_port, 5), now);
            for _ in 0..repeats {
                registry.add_or_update_node(new_node(uuid, node_type, ip, second_port, 6), now);
            }

            prop_assert_eq!(registry.node_count(), 1);
            let node = registry.node_with_uuid(&uuid).unwrap();
            prop_assert_eq!(node.peer().public_address().port(), first_port);
            prop_assert_eq!(node.local_id(), 6);
            prop_assert_eq!(registry.resolve_source(6), Some(uuid));
        }

        /// At most one node of each solo type is ever held
        #[test]
        fn solo_types_stay_unique(types in prop::collection::vec(node_type_strategy(), 1..20)) {
            let mut registry = registry();
            let now = Instant::now();
            for (i, node_type) in types.iter().enumerate() {
                registry.add_or_update_node(new_node(Uuid::new_v4(), *node_type, 0x0101_0101, 4000 + i as u16, i as u16 + 1), now);
            }
            for node_type in NodeType::SOLO {
                prop_assert!(registry.nodes().filter(|n| n.node_type() == node_type).count() <= 1);
            }
        }
    }
}
