//! The session coordinator.
//!
//! [`SessionCoordinator`] owns the [`NodeRegistry`] and the
//! [`DomainHandler`] and implements everything that needs both: the
//! check-in cadence, domain list processing, ping punching and the
//! reactions to domain messages. It is the context every listener of the
//! client's packet receiver runs against.

use std::time::Instant;

use tessera_transport::SocketAddress;
use uuid::Uuid;

use super::account::AccountServices;
use super::handler::DomainHandler;
use super::messages::{
    AddedNode, CheckInFields, ConnectReason, ConnectRequest, ConnectionDenied, DomainList,
    ListRequest, LoginFields, NodeRecord, PathQuery, PathResponse, Ping, PingReply, PingType,
    decode_uuid, usec_timestamp_now,
};
use crate::config::ClientConfig;
use crate::error::FrameError;
use crate::events::{EventSender, SessionEvent};
use crate::frame::{Frame, LocalId};
use crate::message::ReceivedMessage;
use crate::node::{AddressSlot, NodeRegistry, NodeType, PacketSocket, SourceResolver};
use crate::protocol::protocol_version_signature;

/// Node types a client asks the domain about by default
pub const DEFAULT_INTEREST_LIST: [NodeType; 6] = [
    NodeType::AudioMixer,
    NodeType::AvatarMixer,
    NodeType::EntityServer,
    NodeType::AssetServer,
    NodeType::MessagesMixer,
    NodeType::EntityScriptServer,
];

/// Node registry plus domain connection state
#[derive(Debug)]
pub struct SessionCoordinator {
    registry: NodeRegistry,
    handler: DomainHandler,
    config: ClientConfig,
    owner_type: NodeType,
    interest_list: Vec<NodeType>,
    place_name: String,
    public_address: SocketAddress,
    machine_fingerprint: Uuid,
    events: EventSender,
}

impl SessionCoordinator {
    /// Coordinator sending through `socket`
    #[must_use]
    pub fn new(
        socket: PacketSocket,
        config: ClientConfig,
        account: Box<dyn AccountServices>,
        events: EventSender,
    ) -> Self {
        let registry = NodeRegistry::new(socket, events.clone());
        let handler = DomainHandler::new(&config.session, account, events.clone());
        let place_name = config.identity.place_name.clone();
        Self {
            registry,
            handler,
            config,
            owner_type: NodeType::Agent,
            interest_list: DEFAULT_INTEREST_LIST.to_vec(),
            place_name,
            public_address: SocketAddress::NULL,
            machine_fingerprint: Uuid::new_v4(),
            events,
        }
    }

    /// The node registry
    #[must_use]
    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    /// The node registry, mutably
    pub fn registry_mut(&mut self) -> &mut NodeRegistry {
        &mut self.registry
    }

    /// The domain handler
    #[must_use]
    pub fn handler(&self) -> &DomainHandler {
        &self.handler
    }

    /// Configuration in use
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Point the session at a domain server
    pub fn set_domain_address(&mut self, addr: SocketAddress) {
        self.handler.set_domain_address(&mut self.registry, addr);
    }

    /// Whether the domain accepted this client
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.handler.is_connected()
    }

    /// Node types requested in check-ins
    #[must_use]
    pub fn interest_list(&self) -> &[NodeType] {
        &self.interest_list
    }

    /// Replace the node types requested in check-ins
    pub fn set_interest_list(&mut self, types: impl IntoIterator<Item = NodeType>) {
        self.interest_list = types.into_iter().collect();
    }

    /// Place name sent with check-ins
    pub fn set_place_name(&mut self, place_name: impl Into<String>) {
        self.place_name = place_name.into();
    }

    /// Public address reported in check-ins, null when unknown
    pub fn set_public_address(&mut self, addr: SocketAddress) {
        self.public_address = addr;
    }

    // ---- check-in ----

    /// Send one check-in to the domain.
    ///
    /// Does nothing without a domain address. Once the silence limit is
    /// reached the session is reset instead, so the next check-ins are
    /// connect requests again.
    pub fn send_domain_server_check_in(&mut self) {
        let domain = self.handler.domain_address();
        if domain.is_null() {
            return;
        }

        let was_escalated = self.handler.silent_limit_reached();
        if self.handler.check_in_packet_timeout(&mut self.registry) {
            if !was_escalated {
                self.on_silent_limit_reached();
            }
            return;
        }

        if !self.registry.socket().is_open(&domain) {
            if let Err(e) = self.registry.socket_mut().open_channel(domain) {
                tracing::debug!("Could not open channel to domain {}: {}", domain, e);
                return;
            }
            if !self.registry.socket().is_open(&domain) {
                return;
            }
        }

        let frame = match self.build_check_in() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!("Could not build domain check-in: {}", e);
                return;
            }
        };

        let copies = self
            .handler
            .check_in_copies(self.config.session.max_check_in_copies);
        tracing::trace!(
            "Sending {} ({} copies) to {}",
            frame.packet_type(),
            copies,
            domain
        );
        for _ in 0..copies {
            self.registry.send_to_address(frame.clone(), domain);
        }
    }

    fn build_check_in(&self) -> Result<Frame, FrameError> {
        let local_address = self
            .registry
            .socket()
            .local_addr()
            .unwrap_or(SocketAddress::NULL);
        let check_in = CheckInFields {
            timestamp: usec_timestamp_now(),
            owner_type: self.owner_type,
            public_address: self.public_address,
            local_address,
            interest_list: self.interest_list.clone(),
            place_name: self.place_name.clone(),
        };

        if self.handler.is_connected() {
            return ListRequest { check_in }.encode();
        }

        ConnectRequest {
            connect_uuid: self.registry.session_uuid(),
            protocol_signature: protocol_version_signature().to_vec(),
            hardware_address: String::new(),
            machine_fingerprint: self.machine_fingerprint,
            system_info: Vec::new(),
            connect_reason: self.handler.connect_reason(),
            previous_session_uptime: self.handler.previous_uptime().as_secs(),
            check_in,
            login: LoginFields {
                username: self.config.identity.username.clone(),
                ..LoginFields::default()
            },
        }
        .encode()
    }

    fn on_silent_limit_reached(&mut self) {
        if self.handler.connect_reason() != ConnectReason::Awake {
            self.handler
                .set_connect_reason(ConnectReason::SilentDomainDisconnect);
        }
        self.reset("Domain checkin limit");
    }

    /// Forget every node and soft-reset the domain connection
    pub fn reset(&mut self, reason: &str) {
        tracing::info!("Resetting session: {}", reason);
        self.registry.erase_all_nodes(reason);
        self.handler.soft_reset(&mut self.registry, reason);
    }

    /// Leave the domain, telling it when connected
    pub fn disconnect(&mut self, reason: &str) {
        self.registry.erase_all_nodes(reason);
        self.handler.disconnect(&mut self.registry, reason);
    }

    /// Reset and forget the domain entirely
    pub fn hard_reset(&mut self, reason: &str) {
        self.registry.erase_all_nodes(reason);
        self.handler.hard_reset(&mut self.registry, reason);
    }

    // ---- domain messages ----

    /// Handle `DomainList`
    pub fn process_domain_list(&mut self, mut message: ReceivedMessage) {
        let list = match DomainList::decode(message.payload_mut()) {
            Ok(list) => list,
            Err(e) => {
                tracing::warn!("Malformed domain list from {}: {}", message.sender(), e);
                return;
            }
        };

        self.handler.clear_pending_check_ins(&mut self.registry);

        if !self.handler.is_connected() {
            self.handler
                .set_domain_info(list.domain_uuid, list.domain_local_id);
        } else if self.handler.domain_uuid() != list.domain_uuid {
            tracing::warn!(
                "Ignoring domain list from {} while connected to {}",
                list.domain_uuid,
                self.handler.domain_uuid()
            );
            return;
        }

        self.registry.set_session_local_id(list.session_local_id);
        self.registry.set_session_uuid(list.session_uuid);
        self.registry.set_permissions(list.permissions);
        self.registry.set_authenticate_packets(list.is_authenticated);
        if list.new_connection {
            self.handler.set_connect_reason(ConnectReason::Connect);
        }

        if !self.handler.is_connected() {
            self.handler.set_is_connected(true, false);
            self.send_pending_path_query();
        }

        let now = message.first_receive_time();
        for record in &list.nodes {
            self.add_node_from_domain(record, now);
        }
    }

    /// Handle `DomainServerAddedNode`
    pub fn process_added_node(&mut self, mut message: ReceivedMessage) {
        match AddedNode::decode(message.payload_mut()) {
            Ok(AddedNode(record)) => self.add_node_from_domain(&record, message.first_receive_time()),
            Err(e) => tracing::warn!("Malformed added-node message: {}", e),
        }
    }

    /// Handle `DomainServerRemovedNode`
    pub fn process_removed_node(&mut self, mut message: ReceivedMessage) {
        match decode_uuid(message.payload_mut()) {
            Ok(uuid) => {
                tracing::debug!("Domain removed node {}", uuid);
                self.registry.kill_node_with_uuid(uuid);
            }
            Err(e) => tracing::warn!("Malformed removed-node message: {}", e),
        }
    }

    /// Handle `DomainConnectionDenied`
    pub fn process_connection_denied(&mut self, mut message: ReceivedMessage) {
        match ConnectionDenied::decode(message.payload_mut()) {
            Ok(denied) => self.handler.process_connection_denied(denied),
            Err(e) => tracing::warn!("Malformed connection denial: {}", e),
        }
    }

    /// Handle `DomainServerConnectionToken`
    pub fn process_connection_token(&mut self, mut message: ReceivedMessage) {
        match decode_uuid(message.payload_mut()) {
            Ok(token) => self.handler.set_connection_token(token),
            Err(e) => tracing::warn!("Malformed connection token: {}", e),
        }
    }

    /// Handle `DomainServerPathResponse`
    pub fn process_path_response(&mut self, mut message: ReceivedMessage) {
        let response = match PathResponse::decode(message.payload_mut()) {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("Malformed path response: {}", e);
                return;
            }
        };
        if self.handler.clear_pending_path_if(&response.path) {
            tracing::debug!("Pending path {} answered", response.path);
        }
        self.events.emit(SessionEvent::DomainPathResponse {
            path: response.path,
            viewpoint: response.viewpoint,
        });
    }

    /// Ask the domain where `path` leads; queued until connected
    pub fn send_path_query(&mut self, path: &str) {
        if !self.handler.is_connected() {
            tracing::debug!("Not connected, holding path query {}", path);
            self.handler.set_pending_path(path);
            return;
        }
        self.send_path_query_frame(path);
    }

    fn send_pending_path_query(&mut self) {
        if let Some(path) = self.handler.pending_path().map(str::to_owned) {
            self.send_path_query_frame(&path);
        }
    }

    fn send_path_query_frame(&mut self, path: &str) {
        match (PathQuery {
            path: path.to_owned(),
        })
        .encode()
        {
            Ok(frame) => {
                let domain = self.handler.domain_address();
                self.registry.send_to_address(frame, domain);
            }
            Err(e) => tracing::warn!("Path query {} does not fit: {}", path, e),
        }
    }

    fn add_node_from_domain(&mut self, record: &NodeRecord, now: Instant) {
        let mut info = record.to_new_node();
        if info.public_address.address() == 0 {
            // reachable at the domain server's IP
            let domain = self.handler.domain_address();
            info.public_address =
                SocketAddress::new(domain.kind(), domain.address(), info.public_address.port());
        }

        let uuid = self.registry.add_or_update_node(info, now);
        if self.config.session.activate_public_immediately {
            self.registry.activate_node_address(uuid, AddressSlot::Public);
        } else if self
            .registry
            .node_with_uuid(&uuid)
            .is_some_and(|n| n.active_address().is_none())
        {
            self.ping_punch_node(uuid);
        }
    }

    // ---- pings ----

    /// Ping both candidate addresses of every node without an active one
    pub fn ping_punch_inactive_nodes(&mut self) {
        let inactive: Vec<Uuid> = self
            .registry
            .nodes()
            .filter(|n| n.active_address().is_none())
            .map(|n| n.uuid())
            .collect();
        for uuid in inactive {
            self.ping_punch_node(uuid);
        }
    }

    fn ping_punch_node(&mut self, uuid: Uuid) {
        let Some(node) = self.registry.node_with_uuid(&uuid) else {
            return;
        };
        let connection_id = node.connection_id();
        let targets = [
            (PingType::Local, node.peer().local_address()),
            (PingType::Public, node.peer().public_address()),
        ];

        for (ping_type, addr) in targets {
            if addr.is_null() {
                continue;
            }
            let ping = Ping {
                ping_type,
                timestamp: usec_timestamp_now(),
                connection_id,
            };
            match ping.encode() {
                Ok(frame) => {
                    self.registry.send_to_node_at(frame, uuid, addr);
                }
                Err(e) => tracing::warn!("Could not build ping: {}", e),
            }
        }
    }

    /// Handle `Ping`: answer it and use the address it came from
    pub fn process_ping(&mut self, mut message: ReceivedMessage, source: Option<Uuid>) {
        let Some(uuid) = source else {
            return;
        };
        let ping = match Ping::decode(message.payload_mut()) {
            Ok(ping) => ping,
            Err(e) => {
                tracing::debug!("Malformed ping from {}: {}", uuid, e);
                return;
            }
        };

        let sender = message.sender();
        match ping.reply(usec_timestamp_now()).encode() {
            Ok(frame) => {
                self.registry.send_to_node_at(frame, uuid, sender);
            }
            Err(e) => tracing::warn!("Could not build ping reply: {}", e),
        }
        self.activate_matching_address(uuid, sender);
    }

    /// Handle `PingReply`: activate the address that answered
    pub fn process_ping_reply(&mut self, mut message: ReceivedMessage, source: Option<Uuid>) {
        let Some(uuid) = source else {
            return;
        };
        match PingReply::decode(message.payload_mut()) {
            Ok(reply) => {
                tracing::trace!(
                    "{:?} ping reply from {} after {}us",
                    reply.ping_type,
                    uuid,
                    reply.reply_timestamp.saturating_sub(reply.ping_timestamp)
                );
                self.activate_matching_address(uuid, message.sender());
            }
            Err(e) => tracing::debug!("Malformed ping reply from {}: {}", uuid, e),
        }
    }

    fn activate_matching_address(&mut self, uuid: Uuid, sender: SocketAddress) {
        let Some(node) = self.registry.node_with_uuid(&uuid) else {
            return;
        };
        if node.active_address().is_some() {
            return;
        }
        let slot = if node.peer().public_address() == sender {
            AddressSlot::Public
        } else if node.peer().local_address() == sender {
            AddressSlot::Local
        } else {
            tracing::debug!("Ping from {} at unexpected address {}", uuid, sender);
            return;
        };
        self.registry.activate_node_address(uuid, slot);
    }

    /// Kill nodes that have gone quiet
    pub fn remove_silent_nodes(&mut self, now: Instant) -> Vec<Uuid> {
        let threshold = self.config.session.silent_node_threshold();
        self.registry.remove_silent_nodes(now, threshold)
    }
}

impl SourceResolver for SessionCoordinator {
    fn resolve_source(&self, local_id: LocalId) -> Option<Uuid> {
        self.registry.resolve_source(local_id)
    }
}
