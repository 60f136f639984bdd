//! Integration tests for a full client session against a fake domain.
//!
//! Every test runs over an in-memory network and drives the client clock
//! by hand, so timing is exact.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tessera_core::domain::messages::{ConnectRequest, PathQuery, Ping, PingReply};
use tessera_core::{
    ClientConfig, ConnectReason, ConnectionRefusedReason, Frame, Listener, NodeType, PacketType,
    PingType, SessionCoordinator, SessionEvent, drain_events,
};
use tessera_integration_tests::{FakeDomain, addr, client, client_with_config, node_record};
use tessera_transport::MemoryNetwork;

fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

// ============================================================================
// Session lifecycle
// ============================================================================

#[test]
fn test_connect_and_receive_node_list() {
    let network = MemoryNetwork::new();
    let domain = FakeDomain::bind(&network);
    let (mut client, mut events) = client(&network);
    let start = Instant::now();

    client.tick(start);
    let sent = domain.received();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].packet_type(), PacketType::DomainConnectRequest);
    let request = ConnectRequest::decode(&mut sent[0].clone().into_payload()).unwrap();
    assert_eq!(request.connect_reason, ConnectReason::Connect);
    assert_eq!(request.check_in.owner_type, NodeType::Agent);

    let avatars = node_record(NodeType::AvatarMixer, 30, "1.1.1.1:4000");
    let audio = node_record(NodeType::AudioMixer, 31, "1.1.1.2:4000");
    domain.send(&mut client, domain.domain_list(vec![avatars.clone(), audio.clone()]), start);

    let coordinator = client.coordinator();
    assert!(coordinator.is_connected());
    assert_eq!(coordinator.registry().session_uuid(), domain.session_uuid);
    assert_eq!(coordinator.registry().session_local_id(), domain.session_local_id);
    assert_eq!(coordinator.registry().node_count(), 2);
    assert_eq!(
        coordinator
            .registry()
            .node_with_uuid(&avatars.uuid)
            .and_then(|n| n.active_address()),
        Some(addr("1.1.1.1:4000"))
    );

    let events = drain_events(&mut events);
    assert!(events.contains(&SessionEvent::ConnectedToDomain {
        domain: domain.address()
    }));
    assert!(events.contains(&SessionEvent::LocalIdChanged(domain.session_local_id)));
    let added = events
        .iter()
        .filter(|e| matches!(e, SessionEvent::NodeAdded { .. }))
        .count();
    let activated = events
        .iter()
        .filter(|e| matches!(e, SessionEvent::NodeActivated { .. }))
        .count();
    assert_eq!((added, activated), (2, 2));

    client.tick(start + secs(1));
    assert_eq!(domain.received_types(), vec![PacketType::DomainListRequest]);
}

#[test]
fn test_removed_node_and_disconnect() {
    let network = MemoryNetwork::new();
    let domain = FakeDomain::bind(&network);
    let (mut client, mut events) = client(&network);
    let start = Instant::now();

    let entity = node_record(NodeType::EntityServer, 40, "1.1.1.3:4000");
    domain.send(&mut client, domain.domain_list(vec![entity.clone()]), start);
    drain_events(&mut events);

    let removed = tessera_core::domain::messages::encode_uuid(PacketType::DomainServerRemovedNode, &entity.uuid)
        .unwrap()
        .to_wire();
    domain.send(&mut client, removed, start);
    assert_eq!(client.coordinator().registry().node_count(), 0);
    assert_eq!(
        drain_events(&mut events),
        vec![SessionEvent::NodeKilled {
            uuid: entity.uuid,
            node_type: NodeType::EntityServer
        }]
    );

    client.disconnect("leaving");
    assert!(!client.coordinator().is_connected());
    assert_eq!(domain.received_types(), vec![PacketType::DomainDisconnectRequest]);
    assert!(drain_events(&mut events).contains(&SessionEvent::DisconnectedFromDomain));
}

#[test]
fn test_path_query_held_until_connected() {
    let network = MemoryNetwork::new();
    let domain = FakeDomain::bind(&network);
    let (mut client, mut events) = client(&network);
    let start = Instant::now();

    client.send_path_query("/hub/plaza");
    assert!(domain.received().is_empty());

    domain.send(&mut client, domain.domain_list(Vec::new()), start);
    let sent = domain.received();
    assert_eq!(sent.len(), 1);
    let query = PathQuery::decode(&mut sent[0].clone().into_payload()).unwrap();
    assert_eq!(query.path, "/hub/plaza");

    domain.send(&mut client, domain.path_response("/hub/plaza", "/10,0,10/0,0,0,1"), start);
    assert!(drain_events(&mut events).contains(&SessionEvent::DomainPathResponse {
        path: "/hub/plaza".to_string(),
        viewpoint: "/10,0,10/0,0,0,1".to_string(),
    }));
    assert_eq!(client.coordinator().handler().pending_path(), None);
}

// ============================================================================
// Silent domain
// ============================================================================

#[test]
fn test_silent_domain_escalates_and_reconnects() {
    let network = MemoryNetwork::new();
    let domain = FakeDomain::bind(&network);
    let (mut client, mut events) = client(&network);
    let start = Instant::now();

    client.tick(start);
    domain.send(
        &mut client,
        domain.domain_list(vec![node_record(NodeType::AvatarMixer, 30, "1.1.1.1:4000")]),
        start,
    );
    domain.received();
    drain_events(&mut events);

    // Unanswered check-ins 1..4 go out with 1, 1, 2 and 4 copies
    let mut copies = Vec::new();
    for n in 1..=4 {
        client.tick(start + secs(n));
        copies.push(domain.received().len());
    }
    assert_eq!(copies, vec![1, 1, 2, 4]);
    assert!(client.coordinator().registry().drop_outgoing_node_traffic());
    assert!(client.coordinator().is_connected());

    // the limit resets the session instead of checking in
    client.tick(start + secs(5));
    assert_eq!(domain.received_types(), vec![PacketType::DomainDisconnectRequest]);
    assert!(!client.coordinator().is_connected());
    assert_eq!(client.coordinator().registry().node_count(), 0);
    let events_at_limit = drain_events(&mut events);
    assert!(events_at_limit.contains(&SessionEvent::LimitOfSilentDomainCheckInsReached));
    assert!(events_at_limit.contains(&SessionEvent::DisconnectedFromDomain));

    client.tick(start + secs(6));
    let sent = domain.received();
    assert_eq!(sent.len(), 1);
    let request = ConnectRequest::decode(&mut sent[0].clone().into_payload()).unwrap();
    assert_eq!(request.connect_reason, ConnectReason::SilentDomainDisconnect);

    domain.send(&mut client, domain.domain_list(Vec::new()), start + secs(6));
    assert!(client.coordinator().is_connected());
    assert!(!client.coordinator().registry().drop_outgoing_node_traffic());
}

#[test]
fn test_answer_before_limit_keeps_session() {
    let network = MemoryNetwork::new();
    let domain = FakeDomain::bind(&network);
    let (mut client, mut events) = client(&network);
    let start = Instant::now();

    domain.send(&mut client, domain.domain_list(Vec::new()), start);
    for n in 1..=4 {
        client.tick(start + secs(n));
    }
    domain.send(&mut client, domain.domain_list(Vec::new()), start + secs(4));
    for n in 5..=8 {
        client.tick(start + secs(n));
    }

    assert!(client.coordinator().is_connected());
    assert!(!drain_events(&mut events).contains(&SessionEvent::LimitOfSilentDomainCheckInsReached));
}

// ============================================================================
// Inbound filtering
// ============================================================================

#[test]
fn test_inbound_filtering() {
    let network = MemoryNetwork::new();
    let domain = FakeDomain::bind(&network);
    let (mut client, mut events) = client(&network);
    let start = Instant::now();

    // Stranger with a perfectly good domain list
    client.process_datagram(domain.domain_list(Vec::new()), addr("6.6.6.6:6666"), start);
    assert!(!client.coordinator().is_connected());

    let mixer = node_record(NodeType::AvatarMixer, 30, "1.1.1.1:4000");
    domain.send(&mut client, domain.domain_list(vec![mixer.clone()]), start);
    drain_events(&mut events);
    let nodes_before = client.coordinator().registry().node_count();

    let heard = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&heard);
    client
        .register_listener(
            PacketType::BulkAvatarData,
            Listener::sourced(move |_: &mut SessionCoordinator, message, source| {
                sink.lock().unwrap().push((message.size(), source));
            }),
            false,
        )
        .unwrap();

    // Known address, unknown source id
    let mut frame = Frame::create(PacketType::BulkAvatarData);
    frame.set_source_id(77);
    frame.write(&[1, 2, 3]).unwrap();
    client.process_datagram(frame.to_wire(), addr("1.1.1.1:4000"), start);
    assert!(heard.lock().unwrap().is_empty());

    // Replicated traffic from a node that is not upstream
    let frame = Frame::create(PacketType::ReplicatedBulkAvatarData);
    client.process_datagram(frame.to_wire(), addr("1.1.1.1:4000"), start);

    assert_eq!(client.coordinator().registry().node_count(), nodes_before);
    assert!(drain_events(&mut events).is_empty());

    // The same frame from the mixer's own source id is delivered
    let mut frame = Frame::create(PacketType::BulkAvatarData);
    frame.set_source_id(30);
    frame.write(&[1, 2, 3]).unwrap();
    client.process_datagram(frame.to_wire(), addr("1.1.1.1:4000"), start);
    assert_eq!(*heard.lock().unwrap(), vec![(3, Some(mixer.uuid))]);

    // Wrong version
    let frame = Frame::create(PacketType::DomainList).with_version(1);
    domain.send(&mut client, frame.to_wire(), start);
    assert_eq!(
        drain_events(&mut events),
        vec![SessionEvent::PacketVersionMismatch {
            packet_type: PacketType::DomainList,
            sender: domain.address(),
            source: None,
        }]
    );
}

#[test]
fn test_connection_denied_reported_once() {
    let network = MemoryNetwork::new();
    let domain = FakeDomain::bind(&network);
    let (mut client, mut events) = client(&network);
    let start = Instant::now();

    let denial = domain.denial(ConnectionRefusedReason::TooManyUsers, "domain is full");
    domain.send(&mut client, denial.clone(), start);
    domain.send(&mut client, denial, start);

    let refusals: Vec<_> = drain_events(&mut events)
        .into_iter()
        .filter(|e| matches!(e, SessionEvent::DomainConnectionRefused { .. }))
        .collect();
    assert_eq!(
        refusals,
        vec![SessionEvent::DomainConnectionRefused {
            message: "domain is full".to_string(),
            reason: ConnectionRefusedReason::TooManyUsers,
            extra_info: String::new(),
        }]
    );
    assert!(!client.coordinator().is_connected());
}

// ============================================================================
// Pings
// ============================================================================

#[test]
fn test_ping_answered_and_address_activated() {
    let network = MemoryNetwork::new();
    let domain = FakeDomain::bind(&network);
    let mut config = ClientConfig::default();
    config.session.activate_public_immediately = false;
    let (mut client, mut events) = client_with_config(&network, config);
    let node_public = addr("1.1.1.1:4000");
    let _node = network.bind(node_public);
    let start = Instant::now();

    let mixer = node_record(NodeType::AvatarMixer, 30, "1.1.1.1:4000");
    domain.send(&mut client, domain.domain_list(vec![mixer.clone()]), start);
    assert_eq!(
        client
            .coordinator()
            .registry()
            .node_with_uuid(&mixer.uuid)
            .and_then(|n| n.active_address()),
        None
    );
    // punched on arrival, public and local
    assert_eq!(network.pending(&node_public), 1);
    network.drain(&node_public);
    drain_events(&mut events);

    let mut ping = Ping {
        ping_type: PingType::Public,
        timestamp: 1_000,
        connection_id: 0,
    }
    .encode()
    .unwrap();
    ping.set_source_id(30);
    client.process_datagram(ping.to_wire(), node_public, start);

    let replies = network.drain(&node_public);
    assert_eq!(replies.len(), 1);
    let reply_frame = Frame::from_received(replies[0].0.clone()).unwrap();
    assert_eq!(reply_frame.packet_type(), PacketType::PingReply);
    assert_eq!(reply_frame.source_id(), Some(domain.session_local_id));
    let reply = PingReply::decode(&mut reply_frame.into_payload()).unwrap();
    assert_eq!(reply.ping_type, PingType::Public);
    assert_eq!(reply.ping_timestamp, 1_000);

    assert_eq!(
        drain_events(&mut events),
        vec![SessionEvent::NodeActivated {
            uuid: mixer.uuid,
            node_type: NodeType::AvatarMixer,
            address: node_public,
        }]
    );
}

#[test]
fn test_ping_punch_on_tick_until_active() {
    let network = MemoryNetwork::new();
    let domain = FakeDomain::bind(&network);
    let mut config = ClientConfig::default();
    config.session.activate_public_immediately = false;
    let (mut client, _events) = client_with_config(&network, config);
    let node_public = addr("1.1.1.1:4000");
    let _node = network.bind(node_public);
    let start = Instant::now();

    let mixer = node_record(NodeType::AvatarMixer, 30, "1.1.1.1:4000");
    domain.send(&mut client, domain.domain_list(vec![mixer]), start);
    network.drain(&node_public);

    client.tick(start);
    client.tick(start + Duration::from_millis(100));
    assert_eq!(network.pending(&node_public), 2);
    network.drain(&node_public);

    let mut reply = PingReply {
        ping_type: PingType::Public,
        ping_timestamp: 1,
        reply_timestamp: 2,
    }
    .encode()
    .unwrap();
    reply.set_source_id(30);
    client.process_datagram(reply.to_wire(), node_public, start);

    client.tick(start + Duration::from_millis(200));
    assert_eq!(network.pending(&node_public), 0);
}
