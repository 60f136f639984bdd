//! Nodes: peers with a role in the domain.

use std::fmt;
use std::time::Instant;

use tessera_crypto::ContentAuthenticator;
use tessera_transport::SocketAddress;
use uuid::Uuid;

use super::peer::PeerIdentity;
use crate::error::ProtocolError;
use crate::frame::LocalId;

/// Role of a node, carried on the wire as one ASCII byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum NodeType {
    /// Domain server
    DomainServer = b'D',
    /// Entity server
    EntityServer = b'o',
    /// Interactive client
    Agent = b'I',
    /// Audio mixer
    AudioMixer = b'M',
    /// Avatar mixer
    AvatarMixer = b'W',
    /// Asset server
    AssetServer = b'A',
    /// Messages mixer
    MessagesMixer = b'm',
    /// Entity script server
    EntityScriptServer = b'S',
    /// Audio mixer feeding this one
    UpstreamAudioMixer = b'B',
    /// Avatar mixer feeding this one
    UpstreamAvatarMixer = b'C',
    /// Audio mixer fed by this one
    DownstreamAudioMixer = b'a',
    /// Avatar mixer fed by this one
    DownstreamAvatarMixer = b'w',
    /// Assignment client without a role yet
    Unassigned = 1,
}

impl NodeType {
    /// Types of which at most one live node may exist
    pub const SOLO: [NodeType; 6] = [
        Self::AudioMixer,
        Self::AvatarMixer,
        Self::AssetServer,
        Self::EntityServer,
        Self::MessagesMixer,
        Self::EntityScriptServer,
    ];

    /// Wire byte
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Whether at most one node of this type may exist
    #[must_use]
    pub fn is_solo(self) -> bool {
        Self::SOLO.contains(&self)
    }

    /// Whether this is an upstream mixer type
    #[must_use]
    pub fn is_upstream(self) -> bool {
        matches!(self, Self::UpstreamAudioMixer | Self::UpstreamAvatarMixer)
    }

    /// Human-readable name
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::DomainServer => "Domain Server",
            Self::EntityServer => "Entity Server",
            Self::Agent => "Agent",
            Self::AudioMixer => "Audio Mixer",
            Self::AvatarMixer => "Avatar Mixer",
            Self::AssetServer => "Asset Server",
            Self::MessagesMixer => "Messages Mixer",
            Self::EntityScriptServer => "Entity Script Server",
            Self::UpstreamAudioMixer => "Upstream Audio Mixer",
            Self::UpstreamAvatarMixer => "Upstream Avatar Mixer",
            Self::DownstreamAudioMixer => "Downstream Audio Mixer",
            Self::DownstreamAvatarMixer => "Downstream Avatar Mixer",
            Self::Unassigned => "Unassigned",
        }
    }
}

impl TryFrom<u8> for NodeType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            b'D' => Self::DomainServer,
            b'o' => Self::EntityServer,
            b'I' => Self::Agent,
            b'M' => Self::AudioMixer,
            b'W' => Self::AvatarMixer,
            b'A' => Self::AssetServer,
            b'm' => Self::MessagesMixer,
            b'S' => Self::EntityScriptServer,
            b'B' => Self::UpstreamAudioMixer,
            b'C' => Self::UpstreamAvatarMixer,
            b'a' => Self::DownstreamAudioMixer,
            b'w' => Self::DownstreamAvatarMixer,
            1 => Self::Unassigned,
            other => return Err(ProtocolError::UnknownNodeType(other)),
        })
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Permission bits granted by the domain
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Permissions(u32);

impl Permissions {
    /// May connect to the domain
    pub const CONNECT_TO_DOMAIN: u32 = 1 << 0;
    /// May adjust entity locks
    pub const ADJUST_LOCKS: u32 = 1 << 1;
    /// May create permanent entities
    pub const REZ_PERMANENT_ENTITIES: u32 = 1 << 2;
    /// May create temporary entities
    pub const REZ_TEMPORARY_ENTITIES: u32 = 1 << 3;
    /// May write to the asset server
    pub const WRITE_TO_ASSET_SERVER: u32 = 1 << 4;
    /// May connect when the domain is full
    pub const CONNECT_PAST_MAX_CAPACITY: u32 = 1 << 5;
    /// May kick other users
    pub const KICK: u32 = 1 << 6;
    /// May replace domain content
    pub const REPLACE_DOMAIN_CONTENT: u32 = 1 << 7;

    /// No permissions
    #[must_use]
    pub const fn none() -> Self {
        Self(0)
    }

    /// From raw wire bits
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Raw wire bits
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Whether every bit in `flag` is set
    #[must_use]
    pub const fn contains(self, flag: u32) -> bool {
        self.0 & flag == flag
    }

    /// Add `flag`
    #[must_use]
    pub const fn with(self, flag: u32) -> Self {
        Self(self.0 | flag)
    }
}

/// A peer with a role, permissions and a connection secret
#[derive(Debug, Clone)]
pub struct Node {
    peer: PeerIdentity,
    node_type: NodeType,
    permissions: Permissions,
    connection_secret: Uuid,
    authenticator: Option<ContentAuthenticator>,
    is_replicated: bool,
    is_upstream: bool,
    last_heard: Instant,
    connection_id: i64,
}

impl Node {
    /// New node heard from at `now`
    #[must_use]
    pub fn new(
        uuid: Uuid,
        node_type: NodeType,
        public_address: SocketAddress,
        local_address: SocketAddress,
        now: Instant,
    ) -> Self {
        Self {
            peer: PeerIdentity::new(uuid, public_address, local_address),
            node_type,
            permissions: Permissions::none(),
            connection_secret: Uuid::nil(),
            authenticator: None,
            is_replicated: false,
            is_upstream: node_type.is_upstream(),
            last_heard: now,
            connection_id: 0,
        }
    }

    /// Identity and addresses
    #[must_use]
    pub fn peer(&self) -> &PeerIdentity {
        &self.peer
    }

    /// Identity and addresses, mutably
    pub fn peer_mut(&mut self) -> &mut PeerIdentity {
        &mut self.peer
    }

    /// Node UUID
    #[must_use]
    pub fn uuid(&self) -> Uuid {
        self.peer.uuid()
    }

    /// Session local id
    #[must_use]
    pub fn local_id(&self) -> LocalId {
        self.peer.local_id()
    }

    /// Address traffic is sent to
    #[must_use]
    pub fn active_address(&self) -> Option<SocketAddress> {
        self.peer.active_address()
    }

    /// Role
    #[must_use]
    pub fn node_type(&self) -> NodeType {
        self.node_type
    }

    /// Change the role
    pub fn set_node_type(&mut self, node_type: NodeType) {
        self.node_type = node_type;
    }

    /// Permissions
    #[must_use]
    pub fn permissions(&self) -> Permissions {
        self.permissions
    }

    /// Set permissions
    pub fn set_permissions(&mut self, permissions: Permissions) {
        self.permissions = permissions;
    }

    /// Whether the node relays replicated traffic
    #[must_use]
    pub fn is_replicated(&self) -> bool {
        self.is_replicated
    }

    /// Set the replicated flag
    pub fn set_is_replicated(&mut self, is_replicated: bool) {
        self.is_replicated = is_replicated;
    }

    /// Whether the node is an upstream server
    #[must_use]
    pub fn is_upstream(&self) -> bool {
        self.is_upstream
    }

    /// Set the upstream flag
    pub fn set_is_upstream(&mut self, is_upstream: bool) {
        self.is_upstream = is_upstream;
    }

    /// Connection secret
    #[must_use]
    pub fn connection_secret(&self) -> Uuid {
        self.connection_secret
    }

    /// Authenticator keyed by the connection secret
    #[must_use]
    pub fn authenticator(&self) -> Option<&ContentAuthenticator> {
        self.authenticator.as_ref()
    }

    /// Replace the connection secret.
    ///
    /// No-op when unchanged. The authenticator is created on the first
    /// non-nil secret and rekeyed on every change; a nil secret drops it.
    pub fn set_connection_secret(&mut self, secret: Uuid) {
        if self.connection_secret == secret {
            return;
        }
        self.connection_secret = secret;

        if secret.is_nil() {
            self.authenticator = None;
            return;
        }
        let auth = self.authenticator.get_or_insert_with(ContentAuthenticator::default);
        auth.set_key(secret.as_bytes());
    }

    /// Last time traffic from this node was accepted
    #[must_use]
    pub fn last_heard(&self) -> Instant {
        self.last_heard
    }

    /// Record that traffic from this node was accepted at `now`
    pub fn touch(&mut self, now: Instant) {
        self.last_heard = now;
    }

    /// Connection id the node last pinged with
    #[must_use]
    pub fn connection_id(&self) -> i64 {
        self.connection_id
    }

    /// Record the node's connection id
    pub fn set_connection_id(&mut self, connection_id: i64) {
        self.connection_id = connection_id;
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} ({}) pub {} loc {}",
            self.node_type,
            self.uuid(),
            self.local_id(),
            self.peer.public_address(),
            self.peer.local_address()
        )
    }
}
