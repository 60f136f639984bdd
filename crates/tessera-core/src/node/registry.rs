//! The node registry.
//!
//! [`NodeRegistry`] is the authoritative table of known nodes, keyed by UUID.
//! It also owns the [`PacketSocket`], so every outbound path (send to an
//! address, to a node, broadcast) and the inbound accept filter live here.
//!
//! # Outbound headers
//!
//! Frames of sourced types are stamped with this client's session local id.
//! Frames of verified types get an HMAC keyed by the destination node's
//! connection secret, when the domain asked for authenticated packets and the
//! node has a secret.
//!
//! # Accept filter
//!
//! [`NodeRegistry::is_packet_verified`] runs on every inbound frame before
//! dispatch. It checks the version byte, then who sent the frame: unsourced
//! types pass (replicated ones only from a known upstream node), sourced
//! types pass when their source id resolves to a node, or when the domain
//! server itself sends a type it is allowed to source.

use std::collections::{BTreeMap, HashSet};
use std::time::{Duration, Instant};

use tessera_transport::{PeerFilter, SocketAddress};
use uuid::Uuid;

use super::node::{Node, NodeType, Permissions};
use super::peer::AddressSlot;
use super::rate_limit::KeyedRateLimiter;
use super::socket::PacketSocket;
use crate::assembler::MessageAssembler;
use crate::events::{EventSender, SessionEvent};
use crate::frame::{Frame, LocalId, NULL_LOCAL_ID};
use crate::protocol::PacketType;

/// How long repeated unknown-source diagnostics stay quiet
const UNKNOWN_SOURCE_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// Everything the domain tells us about a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewNode {
    /// Node UUID
    pub uuid: Uuid,
    /// Role
    pub node_type: NodeType,
    /// Public candidate address
    pub public_address: SocketAddress,
    /// Local candidate address
    pub local_address: SocketAddress,
    /// Session local id
    pub local_id: LocalId,
    /// Relays replicated traffic
    pub is_replicated: bool,
    /// Is an upstream server
    pub is_upstream: bool,
    /// Shared secret for packet authentication
    pub connection_secret: Uuid,
    /// Permissions
    pub permissions: Permissions,
}

/// Identity of a sender for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum SenderKey {
    Node(Uuid),
    Address(SocketAddress),
}

/// Admission filter over the registry's addresses
struct KnownPeers<'a> {
    nodes: &'a BTreeMap<Uuid, Node>,
    domain: SocketAddress,
}

impl PeerFilter for KnownPeers<'_> {
    fn is_known_peer(&self, addr: &SocketAddress) -> bool {
        (!self.domain.is_null() && *addr == self.domain)
            || self.nodes.values().any(|n| n.peer().has_address(addr))
    }
}

/// Table of known nodes plus the socket used to reach them
#[derive(Debug)]
pub struct NodeRegistry {
    nodes: BTreeMap<Uuid, Node>,
    socket: PacketSocket,
    session_uuid: Uuid,
    session_local_id: LocalId,
    permissions: Permissions,
    domain_address: SocketAddress,
    authenticate_packets: bool,
    drop_outgoing_node_traffic: bool,
    awaiting_activation: HashSet<Uuid>,
    version_mismatch_log: KeyedRateLimiter<(SenderKey, PacketType)>,
    unknown_source_log: KeyedRateLimiter<(SocketAddress, LocalId)>,
    events: EventSender,
}

impl NodeRegistry {
    /// Empty registry sending through `socket`
    #[must_use]
    pub fn new(socket: PacketSocket, events: EventSender) -> Self {
        Self {
            nodes: BTreeMap::new(),
            socket,
            session_uuid: Uuid::nil(),
            session_local_id: NULL_LOCAL_ID,
            permissions: Permissions::none(),
            domain_address: SocketAddress::NULL,
            authenticate_packets: true,
            drop_outgoing_node_traffic: false,
            awaiting_activation: HashSet::new(),
            version_mismatch_log: KeyedRateLimiter::once_per_key(),
            unknown_source_log: KeyedRateLimiter::per_interval(UNKNOWN_SOURCE_LOG_INTERVAL),
            events,
        }
    }

    // ---- session identity ----

    /// This client's session UUID
    #[must_use]
    pub fn session_uuid(&self) -> Uuid {
        self.session_uuid
    }

    /// Set the session UUID, announcing a change
    pub fn set_session_uuid(&mut self, uuid: Uuid) {
        if self.session_uuid == uuid {
            return;
        }
        let previous = std::mem::replace(&mut self.session_uuid, uuid);
        tracing::info!("Session UUID changed from {} to {}", previous, uuid);
        self.events.emit(SessionEvent::UuidChanged {
            previous,
            current: uuid,
        });
    }

    /// This client's session local id
    #[must_use]
    pub fn session_local_id(&self) -> LocalId {
        self.session_local_id
    }

    /// Set the session local id, announcing a change
    pub fn set_session_local_id(&mut self, local_id: LocalId) {
        if self.session_local_id == local_id {
            return;
        }
        self.session_local_id = local_id;
        tracing::debug!("Session local id is now {}", local_id);
        self.events.emit(SessionEvent::LocalIdChanged(local_id));
    }

    /// Permissions granted to this client
    #[must_use]
    pub fn permissions(&self) -> Permissions {
        self.permissions
    }

    /// Set this client's permissions
    pub fn set_permissions(&mut self, permissions: Permissions) {
        self.permissions = permissions;
    }

    /// Address of the domain server, null when unknown
    #[must_use]
    pub fn domain_address(&self) -> SocketAddress {
        self.domain_address
    }

    /// Set the address of the domain server
    pub fn set_domain_address(&mut self, addr: SocketAddress) {
        self.domain_address = addr;
    }

    /// Whether verified frames get an HMAC
    #[must_use]
    pub fn authenticate_packets(&self) -> bool {
        self.authenticate_packets
    }

    /// Turn outbound HMACs on or off
    pub fn set_authenticate_packets(&mut self, authenticate: bool) {
        self.authenticate_packets = authenticate;
    }

    /// Whether unreliable traffic to nodes other than the domain is dropped
    #[must_use]
    pub fn drop_outgoing_node_traffic(&self) -> bool {
        self.drop_outgoing_node_traffic
    }

    /// Drop or resume unreliable traffic to nodes other than the domain
    pub fn set_drop_outgoing_node_traffic(&mut self, drop: bool) {
        if self.drop_outgoing_node_traffic != drop {
            tracing::debug!("Outgoing node traffic {}", if drop { "suppressed" } else { "resumed" });
        }
        self.drop_outgoing_node_traffic = drop;
    }

    /// The socket
    #[must_use]
    pub fn socket(&self) -> &PacketSocket {
        &self.socket
    }

    /// The socket, mutably
    pub fn socket_mut(&mut self) -> &mut PacketSocket {
        &mut self.socket
    }

    /// Event sender shared with the registry
    #[must_use]
    pub fn events(&self) -> &EventSender {
        &self.events
    }

    // ---- table ----

    /// Insert a node or merge new data into the existing one.
    ///
    /// A known UUID keeps its node: addresses keep their negotiated ports and
    /// every other field is replaced. A new node of a solo type first evicts
    /// the existing node of that type.
    pub fn add_or_update_node(&mut self, info: NewNode, now: Instant) -> Uuid {
        if let Some(node) = self.nodes.get_mut(&info.uuid) {
            let mut changes = Vec::new();
            for (slot, incoming) in [
                (AddressSlot::Public, info.public_address),
                (AddressSlot::Local, info.local_address),
            ] {
                let existing = node.peer().address(slot);
                let merged = if existing.is_null() {
                    incoming
                } else {
                    incoming.with_port(existing.port())
                };
                if let Some(change) = node.peer_mut().set_address(slot, merged) {
                    changes.push(change);
                }
            }
            node.set_node_type(info.node_type);
            node.peer_mut().set_local_id(info.local_id);
            node.set_is_replicated(info.is_replicated);
            node.set_is_upstream(info.is_upstream);
            node.set_permissions(info.permissions);
            node.set_connection_secret(info.connection_secret);

            for change in changes {
                tracing::debug!(
                    "{:?} address of {} changed from {} to {}",
                    change.slot,
                    info.uuid,
                    change.previous,
                    change.current
                );
                self.events.emit(SessionEvent::NodeSocketChanged {
                    uuid: info.uuid,
                    previous: change.previous,
                    current: change.current,
                });
            }
            return info.uuid;
        }

        if info.node_type.is_solo() {
            if let Some(old) = self.solo_node_of_type(info.node_type).map(Node::uuid) {
                tracing::info!("Replacing {} {} with {}", info.node_type, old, info.uuid);
                self.kill_node_with_uuid(old);
            }
        }

        let mut node = Node::new(
            info.uuid,
            info.node_type,
            info.public_address,
            info.local_address,
            now,
        );
        node.peer_mut().set_local_id(info.local_id);
        node.set_is_replicated(info.is_replicated);
        node.set_is_upstream(info.is_upstream);
        node.set_permissions(info.permissions);
        node.set_connection_secret(info.connection_secret);

        tracing::info!("Added {}", node);
        let active = node.active_address();
        self.nodes.insert(info.uuid, node);
        self.events.emit(SessionEvent::NodeAdded {
            uuid: info.uuid,
            node_type: info.node_type,
        });
        match active {
            Some(address) => self.events.emit(SessionEvent::NodeActivated {
                uuid: info.uuid,
                node_type: info.node_type,
                address,
            }),
            None => {
                self.awaiting_activation.insert(info.uuid);
            }
        }
        info.uuid
    }

    /// Make one of a node's addresses active.
    ///
    /// Returns `true` on an actual transition. The first activation of a
    /// node is announced with [`SessionEvent::NodeActivated`].
    pub fn activate_node_address(&mut self, uuid: Uuid, slot: AddressSlot) -> bool {
        let Some(node) = self.nodes.get_mut(&uuid) else {
            return false;
        };
        if !node.peer_mut().activate(slot) {
            return false;
        }
        if self.awaiting_activation.remove(&uuid) {
            self.events.emit(SessionEvent::NodeActivated {
                uuid,
                node_type: node.node_type(),
                address: node.peer().address(slot),
            });
        }
        true
    }

    /// Remove a node and release its transport resources
    pub fn kill_node_with_uuid(&mut self, uuid: Uuid) -> bool {
        let Some(node) = self.nodes.remove(&uuid) else {
            return false;
        };
        self.awaiting_activation.remove(&uuid);
        for addr in [node.peer().public_address(), node.peer().local_address()] {
            if !addr.is_null() && addr != self.domain_address {
                self.socket.cleanup_channel(&addr);
            }
        }
        tracing::info!("Killed {}", node);
        self.events.emit(SessionEvent::NodeKilled {
            uuid,
            node_type: node.node_type(),
        });
        true
    }

    /// Remove every node
    pub fn erase_all_nodes(&mut self, reason: &str) {
        if self.nodes.is_empty() {
            return;
        }
        tracing::debug!("Erasing all nodes: {}", reason);
        let uuids: Vec<Uuid> = self.nodes.keys().copied().collect();
        for uuid in uuids {
            self.kill_node_with_uuid(uuid);
        }
    }

    /// Remove nodes not heard from within `threshold`, returning their UUIDs
    pub fn remove_silent_nodes(&mut self, now: Instant, threshold: Duration) -> Vec<Uuid> {
        let silent: Vec<Uuid> = self
            .nodes
            .values()
            .filter(|n| now.saturating_duration_since(n.last_heard()) > threshold)
            .map(Node::uuid)
            .collect();
        for uuid in &silent {
            tracing::debug!("Removing silent node {}", uuid);
            self.kill_node_with_uuid(*uuid);
        }
        silent
    }

    /// Number of nodes
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Every node, in UUID order
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Node by UUID
    #[must_use]
    pub fn node_with_uuid(&self, uuid: &Uuid) -> Option<&Node> {
        self.nodes.get(uuid)
    }

    /// Node by UUID, mutably
    pub fn node_with_uuid_mut(&mut self, uuid: &Uuid) -> Option<&mut Node> {
        self.nodes.get_mut(uuid)
    }

    /// Node by session local id
    #[must_use]
    pub fn node_with_local_id(&self, local_id: LocalId) -> Option<&Node> {
        self.nodes.values().find(|n| n.local_id() == local_id)
    }

    /// Node with either candidate address equal to `addr`
    #[must_use]
    pub fn find_node_with_address(&self, addr: &SocketAddress) -> Option<&Node> {
        self.nodes.values().find(|n| n.peer().has_address(addr))
    }

    /// The live node of a solo type; `None` for types that allow several
    #[must_use]
    pub fn solo_node_of_type(&self, node_type: NodeType) -> Option<&Node> {
        if !node_type.is_solo() {
            return None;
        }
        self.nodes.values().find(|n| n.node_type() == node_type)
    }

    /// Run `action` on every node matching `predicate`
    pub fn each_matching_node<P, A>(&self, mut predicate: P, mut action: A)
    where
        P: FnMut(&Node) -> bool,
        A: FnMut(&Node),
    {
        for node in self.nodes.values() {
            if predicate(node) {
                action(node);
            }
        }
    }

    /// Local id to node UUID
    #[must_use]
    pub fn resolve_source(&self, local_id: LocalId) -> Option<Uuid> {
        self.node_with_local_id(local_id).map(Node::uuid)
    }

    // ---- outbound ----

    fn is_suppressed(&self, frame: &Frame, addr: &SocketAddress) -> bool {
        !frame.is_reliable() && self.drop_outgoing_node_traffic && *addr != self.domain_address
    }

    fn write_to(&mut self, frame: &mut Frame, addr: SocketAddress, destination: Option<Uuid>) -> usize {
        let node = destination.and_then(|uuid| self.nodes.get(&uuid));
        fill_packet_header(frame, self.session_local_id, self.authenticate_packets, node);
        match self.socket.write_frame(frame, addr) {
            Ok(sent) => sent,
            Err(e) => {
                tracing::debug!("Failed to send {} to {}: {}", frame.packet_type(), addr, e);
                0
            }
        }
    }

    /// Send to a bare address, such as the domain server's
    pub fn send_to_address(&mut self, mut frame: Frame, addr: SocketAddress) -> usize {
        if addr.is_null() {
            tracing::debug!("Not sending {}: no destination address", frame.packet_type());
            return 0;
        }
        if self.is_suppressed(&frame, &addr) {
            return 0;
        }
        self.write_to(&mut frame, addr, None)
    }

    /// Send to a node's active address.
    ///
    /// Reliable frames are always sent; unreliable ones go through
    /// [`send_unreliable_packet`](Self::send_unreliable_packet).
    pub fn send_to_node(&mut self, mut frame: Frame, uuid: Uuid) -> usize {
        if !frame.is_reliable() {
            return self.send_unreliable_packet(&mut frame, uuid);
        }
        match self.active_address_of(uuid) {
            Some(addr) => self.write_to(&mut frame, addr, Some(uuid)),
            None => 0,
        }
    }

    /// Send to a node at an explicit address, keyed by the node's secret
    pub fn send_to_node_at(&mut self, mut frame: Frame, uuid: Uuid, addr: SocketAddress) -> usize {
        if self.is_suppressed(&frame, &addr) {
            return 0;
        }
        self.write_to(&mut frame, addr, Some(uuid))
    }

    /// Send an unreliable frame to a node's active address.
    ///
    /// Sends nothing when the node has no active address, or when outgoing
    /// node traffic is being dropped and the node is not the domain server.
    pub fn send_unreliable_packet(&mut self, frame: &mut Frame, uuid: Uuid) -> usize {
        let Some(addr) = self.active_address_of(uuid) else {
            return 0;
        };
        if self.is_suppressed(frame, &addr) {
            tracing::trace!("Dropping {} to {} while domain is silent", frame.packet_type(), uuid);
            return 0;
        }
        self.write_to(frame, addr, Some(uuid))
    }

    /// Send every frame of a message to a node
    pub fn send_message(&mut self, assembler: MessageAssembler, uuid: Uuid) -> usize {
        match self.active_address_of(uuid) {
            Some(addr) => self.send_message_to(assembler, addr, Some(uuid)),
            None => 0,
        }
    }

    /// Send every frame of a message to a bare address
    pub fn send_message_to_address(&mut self, assembler: MessageAssembler, addr: SocketAddress) -> usize {
        self.send_message_to(assembler, addr, None)
    }

    fn send_message_to(&mut self, mut assembler: MessageAssembler, addr: SocketAddress, destination: Option<Uuid>) -> usize {
        assembler.close_current_packet(false);
        let message_number = if assembler.mode().is_ordered() {
            self.socket.next_message_number(addr)
        } else {
            0
        };
        let mut frames = assembler.prepare_packets(message_number);
        if frames.first().is_some_and(|f| self.is_suppressed(f, &addr)) {
            return 0;
        }

        let node = destination.and_then(|uuid| self.nodes.get(&uuid));
        for frame in &mut frames {
            fill_packet_header(frame, self.session_local_id, self.authenticate_packets, node);
        }
        match self.socket.write_frame_sequence(&mut frames, addr) {
            Ok(sent) => sent,
            Err(e) => {
                tracing::debug!("Failed to send message to {}: {}", addr, e);
                0
            }
        }
    }

    /// Send `frame` to every activated node of the given types.
    ///
    /// Reliable frames are copied per destination; unreliable ones reuse
    /// one frame with a fresh header per send. Returns the number of nodes
    /// the frame was sent to.
    pub fn broadcast_to_nodes(&mut self, frame: &Frame, types: &[NodeType]) -> usize {
        let targets: Vec<Uuid> = self
            .nodes
            .values()
            .filter(|n| types.contains(&n.node_type()) && n.active_address().is_some())
            .map(Node::uuid)
            .collect();

        let mut shared = frame.clone();
        let mut count = 0;
        for uuid in targets {
            let sent = if frame.is_reliable() {
                self.send_to_node(frame.clone(), uuid)
            } else {
                self.send_unreliable_packet(&mut shared, uuid)
            };
            if sent > 0 {
                count += 1;
            }
        }
        count
    }

    fn active_address_of(&self, uuid: Uuid) -> Option<SocketAddress> {
        let addr = self.nodes.get(&uuid).and_then(Node::active_address);
        if addr.is_none() {
            tracing::debug!("No active address for node {}, not sending", uuid);
        }
        addr
    }

    // ---- inbound ----

    /// Ask the transport to admit traffic from `from` if it belongs to the
    /// domain or a known node
    pub fn admit_inbound(&mut self, from: &SocketAddress) -> bool {
        let known = KnownPeers {
            nodes: &self.nodes,
            domain: self.domain_address,
        };
        self.socket.admit_inbound(from, &known)
    }

    /// Decide whether an inbound frame may be dispatched
    pub fn is_packet_verified(&mut self, frame: &Frame, sender: SocketAddress, now: Instant) -> bool {
        self.packet_version_match(frame, sender, now) && self.packet_source_and_hash_match(frame, sender, now)
    }

    fn packet_version_match(&mut self, frame: &Frame, sender: SocketAddress, now: Instant) -> bool {
        let packet_type = frame.packet_type();
        if frame.version() == packet_type.version() {
            return true;
        }

        let source = frame.source_id().and_then(|id| self.resolve_source(id));
        let key = source.map_or(SenderKey::Address(sender), SenderKey::Node);
        if self.version_mismatch_log.check((key, packet_type), now).is_some() {
            tracing::warn!(
                "Packet version mismatch for {} from {} ({:?}): received {}, expected {}",
                packet_type,
                sender,
                source,
                frame.version(),
                packet_type.version()
            );
        }
        self.events.emit(SessionEvent::PacketVersionMismatch {
            packet_type,
            sender,
            source,
        });
        false
    }

    fn packet_source_and_hash_match(&mut self, frame: &Frame, sender: SocketAddress, now: Instant) -> bool {
        let packet_type = frame.packet_type();

        if !packet_type.is_sourced() {
            if !packet_type.is_replicated() {
                return true;
            }
            let from_upstream = self
                .find_node_with_address(&sender)
                .is_some_and(Node::is_upstream);
            if !from_upstream {
                tracing::debug!("Dropping replicated {} from non-upstream sender {}", packet_type, sender);
            }
            return from_upstream;
        }

        let source_id = frame.source_id().unwrap_or(NULL_LOCAL_ID);
        if let Some(node) = self.nodes.values_mut().find(|n| n.local_id() == source_id) {
            node.touch(now);
            return true;
        }

        let from_domain = !self.domain_address.is_null() && sender == self.domain_address;
        if from_domain && packet_type.is_domain_sourced() {
            return true;
        }

        if let Some(suppressed) = self.unknown_source_log.check((sender, source_id), now) {
            tracing::debug!(
                "{} from {} with unknown source id {} dropped ({} similar suppressed)",
                packet_type,
                sender,
                source_id,
                suppressed
            );
        }
        false
    }
}

/// Stamp the source id and, when keyed, the content hash.
fn fill_packet_header(frame: &mut Frame, local_id: LocalId, authenticate: bool, node: Option<&Node>) {
    frame.set_source_id(local_id);
    if !authenticate || !frame.packet_type().is_verified() {
        return;
    }
    if let Some(auth) = node.and_then(Node::authenticator) {
        frame.sign(auth);
    }
}
