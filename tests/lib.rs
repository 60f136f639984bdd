//! Shared fixtures for the Tessera integration tests.
//!
//! [`FakeDomain`] stands in for a domain server on a [`MemoryNetwork`]: it
//! collects whatever the client sends it and builds the datagrams a real
//! domain would answer with. Replies are handed to
//! [`DomainClient::process_datagram`] directly, so every test controls the
//! clock.

use std::sync::Once;
use std::time::Instant;

use tessera_core::domain::messages::{ConnectionDenied, DomainList, NodeRecord, PathResponse};
use tessera_core::{
    AnonymousAccount, ClientConfig, ConnectionRefusedReason, DomainClient, EventReceiver, Frame,
    LocalId, NodeType, PacketType, Permissions,
};
use tessera_transport::{MemoryNetwork, MemoryTransport, SocketAddress};
use uuid::Uuid;

/// Address the client under test is bound at
pub const CLIENT_ADDR: &str = "10.0.0.1:50000";

/// Address of the fake domain server
pub const DOMAIN_ADDR: &str = "10.0.0.100:40102";

static TRACING: Once = Once::new();

/// Install a test subscriber once per process; `RUST_LOG` controls output
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Parse an IPv4 `ip:port` literal
pub fn addr(s: &str) -> SocketAddress {
    SocketAddress::udp(s.parse().expect("IPv4 socket address"))
}

/// A client bound at [`CLIENT_ADDR`] and pointed at [`DOMAIN_ADDR`]
pub fn client_with_config(network: &MemoryNetwork, config: ClientConfig) -> (DomainClient, EventReceiver) {
    init_tracing();
    let transport = network.bind(addr(CLIENT_ADDR));
    let (mut client, events) = DomainClient::new(Box::new(transport), config, Box::new(AnonymousAccount))
        .expect("domain listeners install");
    client.set_domain_address(addr(DOMAIN_ADDR));
    (client, events)
}

/// [`client_with_config`] with the default configuration
pub fn client(network: &MemoryNetwork) -> (DomainClient, EventReceiver) {
    client_with_config(network, ClientConfig::default())
}

/// A node record for `node_type` reachable at `public`
pub fn node_record(node_type: NodeType, local_id: LocalId, public: &str) -> NodeRecord {
    NodeRecord {
        node_type,
        uuid: Uuid::new_v4(),
        public_address: addr(public),
        local_address: addr("192.168.1.10:40000"),
        permissions: Permissions::none(),
        is_replicated: false,
        local_id,
        connection_secret: Uuid::nil(),
    }
}

/// Fake domain server
pub struct FakeDomain {
    network: MemoryNetwork,
    _transport: MemoryTransport,
    /// Domain UUID it reports
    pub uuid: Uuid,
    /// Session UUID it assigns
    pub session_uuid: Uuid,
    /// Session local id it assigns
    pub session_local_id: LocalId,
}

impl FakeDomain {
    /// Bind the fake domain at [`DOMAIN_ADDR`]
    pub fn bind(network: &MemoryNetwork) -> Self {
        Self {
            network: network.clone(),
            _transport: network.bind(addr(DOMAIN_ADDR)),
            uuid: Uuid::new_v4(),
            session_uuid: Uuid::new_v4(),
            session_local_id: 9,
        }
    }

    /// Address the domain is bound at
    pub fn address(&self) -> SocketAddress {
        addr(DOMAIN_ADDR)
    }

    /// Take every frame the client sent so far
    pub fn received(&self) -> Vec<Frame> {
        self.network
            .drain(&self.address())
            .into_iter()
            .map(|(bytes, _)| Frame::from_received(bytes).expect("client sent a decodable frame"))
            .collect()
    }

    /// Take every frame sent so far and return their types
    pub fn received_types(&self) -> Vec<PacketType> {
        self.received().iter().map(Frame::packet_type).collect()
    }

    /// A `DomainList` datagram carrying `nodes`
    pub fn domain_list(&self, nodes: Vec<NodeRecord>) -> Vec<u8> {
        DomainList {
            domain_uuid: self.uuid,
            domain_local_id: 1,
            session_uuid: self.session_uuid,
            session_local_id: self.session_local_id,
            permissions: Permissions::none().with(Permissions::CONNECT_TO_DOMAIN),
            is_authenticated: false,
            connect_request_timestamp: 0,
            domain_send_time: 0,
            check_in_processing_time: 0,
            new_connection: true,
            nodes,
        }
        .encode()
        .expect("domain list fits one frame")
        .to_wire()
    }

    /// A `DomainConnectionDenied` datagram
    pub fn denial(&self, reason: ConnectionRefusedReason, message: &str) -> Vec<u8> {
        ConnectionDenied {
            reason,
            message: message.to_string(),
            extra_info: String::new(),
        }
        .encode()
        .expect("denial fits one frame")
        .to_wire()
    }

    /// A `DomainServerPathResponse` datagram
    pub fn path_response(&self, path: &str, viewpoint: &str) -> Vec<u8> {
        PathResponse {
            path: path.to_string(),
            viewpoint: viewpoint.to_string(),
        }
        .encode()
        .expect("path response fits one frame")
        .to_wire()
    }

    /// Deliver `datagram` from the domain to `client`
    pub fn send(&self, client: &mut DomainClient, datagram: Vec<u8>, now: Instant) {
        tracing::debug!("Fake domain sending {} bytes", datagram.len());
        client.process_datagram(datagram, self.address(), now);
    }
}
