//! Domain and ping message codecs.
//!
//! Messages exchanged with the domain server (connect, list, added node)
//! use the big-endian data-stream layout: length-prefixed UTF-16 strings,
//! length-prefixed byte arrays, RFC 4122 UUIDs and tagged addresses.
//! Connection denials, path queries and pings are little-endian with
//! u16-prefixed UTF-8 strings.
//!
//! Every message has an `encode` that builds the outgoing [`Frame`] and a
//! `decode` that reads a received payload from its cursor.

use std::time::{SystemTime, UNIX_EPOCH};

use tessera_transport::{SocketAddress, SocketKind};
use uuid::Uuid;

use crate::error::{FrameError, ProtocolError};
use crate::frame::{Frame, LocalId};
use crate::node::{NewNode, NodeType, Permissions};
use crate::payload::{Endian, Payload, encode_utf16_string, read_utf16_string};
use crate::protocol::PacketType;

const ADDRESS_PROTOCOL_IPV4: u8 = 0;
const ADDRESS_PROTOCOL_IPV6: u8 = 1;
const ADDRESS_PROTOCOL_NULL: u8 = 0xFF;

/// Microseconds since the Unix epoch
#[must_use]
pub fn usec_timestamp_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_micros() as u64)
}

/// Why the domain refused a connect request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum ConnectionRefusedReason {
    /// No reason given
    #[default]
    Unknown = 0,
    /// Client and domain disagree on the protocol signature
    ProtocolMismatch = 1,
    /// Metaverse login failed
    LoginErrorMetaverse = 2,
    /// Metaverse account not allowed in
    NotAuthorizedMetaverse = 3,
    /// Domain is full
    TooManyUsers = 4,
    /// Domain gave up waiting
    TimedOut = 5,
    /// Domain login failed
    LoginErrorDomain = 6,
    /// Domain account not allowed in
    NotAuthorizedDomain = 7,
}

impl ConnectionRefusedReason {
    /// Reason from its wire byte; unknown values map to `Unknown`
    #[must_use]
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::ProtocolMismatch,
            2 => Self::LoginErrorMetaverse,
            3 => Self::NotAuthorizedMetaverse,
            4 => Self::TooManyUsers,
            5 => Self::TimedOut,
            6 => Self::LoginErrorDomain,
            7 => Self::NotAuthorizedDomain,
            _ => Self::Unknown,
        }
    }

    /// Wire byte
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// The fix is a metaverse login
    #[must_use]
    pub fn requires_metaverse_login(self) -> bool {
        matches!(self, Self::LoginErrorMetaverse | Self::NotAuthorizedMetaverse)
    }

    /// The fix is a domain login
    #[must_use]
    pub fn requires_domain_login(self) -> bool {
        matches!(self, Self::LoginErrorDomain | Self::NotAuthorizedDomain)
    }
}

/// Why this client is sending a connect request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum ConnectReason {
    /// Normal connect
    #[default]
    Connect = 0,
    /// Reconnecting after the domain went silent
    SilentDomainDisconnect = 1,
    /// Reconnecting after the host woke from sleep
    Awake = 2,
}

impl ConnectReason {
    /// Wire value
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self as u32
    }

    /// Reason from its wire value; unknown values map to `Connect`
    #[must_use]
    pub fn from_u32(value: u32) -> Self {
        match value {
            1 => Self::SilentDomainDisconnect,
            2 => Self::Awake,
            _ => Self::Connect,
        }
    }
}

/// Which address a ping probes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PingType {
    /// No particular address
    Agnostic = 0,
    /// Local address
    Local = 1,
    /// Public address
    Public = 2,
    /// Symmetric-NAT address
    Symmetric = 3,
}

impl TryFrom<u8> for PingType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Agnostic),
            1 => Ok(Self::Local),
            2 => Ok(Self::Public),
            3 => Ok(Self::Symmetric),
            other => Err(ProtocolError::UnknownPingType(other)),
        }
    }
}

// ---- primitives ----

fn write_bool(frame: &mut Frame, value: bool) -> Result<(), FrameError> {
    frame.write_value(u8::from(value), Endian::Big)
}

fn read_bool(payload: &mut Payload) -> Result<bool, FrameError> {
    payload.read_value::<u8>(Endian::Big).map(|b| b != 0)
}

fn write_uuid(frame: &mut Frame, uuid: &Uuid) -> Result<(), FrameError> {
    frame.write(uuid.as_bytes()).map(|_| ())
}

fn read_uuid(payload: &mut Payload) -> Result<Uuid, FrameError> {
    let bytes = payload.read(16)?;
    let mut raw = [0u8; 16];
    raw.copy_from_slice(bytes);
    Ok(Uuid::from_bytes(raw))
}

fn write_qstring(frame: &mut Frame, value: &str) -> Result<(), FrameError> {
    frame.write(&encode_utf16_string(Some(value))).map(|_| ())
}

fn read_qstring(payload: &mut Payload) -> Result<String, ProtocolError> {
    read_utf16_string(payload).map(Option::unwrap_or_default)
}

fn write_byte_array(frame: &mut Frame, bytes: &[u8]) -> Result<(), FrameError> {
    frame.write_value(bytes.len() as u32, Endian::Big)?;
    frame.write(bytes).map(|_| ())
}

fn read_byte_array(payload: &mut Payload) -> Result<Vec<u8>, FrameError> {
    let len: u32 = payload.read_value(Endian::Big)?;
    if len == u32::MAX {
        return Ok(Vec::new());
    }
    payload.read(len as usize).map(<[u8]>::to_vec)
}

fn write_sock_addr(frame: &mut Frame, addr: &SocketAddress) -> Result<(), FrameError> {
    frame.write_value(addr.kind() as u8, Endian::Big)?;
    if addr.address() == 0 {
        frame.write_value(ADDRESS_PROTOCOL_NULL, Endian::Big)?;
    } else {
        frame.write_value(ADDRESS_PROTOCOL_IPV4, Endian::Big)?;
        frame.write_value(addr.address(), Endian::Big)?;
    }
    frame.write_value(addr.port(), Endian::Big)
}

fn read_sock_addr(payload: &mut Payload) -> Result<SocketAddress, ProtocolError> {
    let kind = SocketKind::from_u8(payload.read_value(Endian::Big)?);
    let protocol: u8 = payload.read_value(Endian::Big)?;
    let address = match protocol {
        ADDRESS_PROTOCOL_IPV4 => payload.read_value::<u32>(Endian::Big)?,
        ADDRESS_PROTOCOL_NULL => 0,
        ADDRESS_PROTOCOL_IPV6 => return Err(ProtocolError::UnsupportedAddressProtocol(protocol)),
        other => return Err(ProtocolError::UnsupportedAddressProtocol(other)),
    };
    let port: u16 = payload.read_value(Endian::Big)?;
    Ok(SocketAddress::new(kind, address, port))
}

fn write_utf8(frame: &mut Frame, value: &str) -> Result<(), FrameError> {
    frame.write_value(value.len() as u16, Endian::Little)?;
    frame.write(value.as_bytes()).map(|_| ())
}

fn read_utf8(payload: &mut Payload) -> Result<String, ProtocolError> {
    let len: u16 = payload.read_value(Endian::Little)?;
    let bytes = payload.read(len as usize)?;
    String::from_utf8(bytes.to_vec()).map_err(|_| ProtocolError::InvalidUtf8)
}

// ---- node records ----

/// One node entry in a domain list or added-node message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRecord {
    /// Role
    pub node_type: NodeType,
    /// Node UUID
    pub uuid: Uuid,
    /// Public candidate address
    pub public_address: SocketAddress,
    /// Local candidate address
    pub local_address: SocketAddress,
    /// Permissions
    pub permissions: Permissions,
    /// Relays replicated traffic
    pub is_replicated: bool,
    /// Session local id
    pub local_id: LocalId,
    /// Shared secret for packet authentication
    pub connection_secret: Uuid,
}

impl NodeRecord {
    /// Read one record
    ///
    /// # Errors
    /// Returns [`ProtocolError`] on truncation or unknown values
    pub fn decode(payload: &mut Payload) -> Result<Self, ProtocolError> {
        let node_type = NodeType::try_from(payload.read_value::<u8>(Endian::Big)?)?;
        let uuid = read_uuid(payload)?;
        let public_address = read_sock_addr(payload)?;
        let local_address = read_sock_addr(payload)?;
        let permissions = Permissions::from_bits(payload.read_value(Endian::Big)?);
        let is_replicated = read_bool(payload)?;
        let local_id = payload.read_value(Endian::Big)?;
        let connection_secret = read_uuid(payload)?;
        Ok(Self {
            node_type,
            uuid,
            public_address,
            local_address,
            permissions,
            is_replicated,
            local_id,
            connection_secret,
        })
    }

    /// Append this record to `frame`
    ///
    /// # Errors
    /// Returns [`FrameError::PayloadOverflow`] if it does not fit
    pub fn encode_into(&self, frame: &mut Frame) -> Result<(), FrameError> {
        frame.write_value(self.node_type.as_u8(), Endian::Big)?;
        write_uuid(frame, &self.uuid)?;
        write_sock_addr(frame, &self.public_address)?;
        write_sock_addr(frame, &self.local_address)?;
        frame.write_value(self.permissions.bits(), Endian::Big)?;
        write_bool(frame, self.is_replicated)?;
        frame.write_value(self.local_id, Endian::Big)?;
        write_uuid(frame, &self.connection_secret)
    }

    /// Registry input for this record
    #[must_use]
    pub fn to_new_node(&self) -> NewNode {
        NewNode {
            uuid: self.uuid,
            node_type: self.node_type,
            public_address: self.public_address,
            local_address: self.local_address,
            local_id: self.local_id,
            is_replicated: self.is_replicated,
            is_upstream: self.node_type.is_upstream(),
            connection_secret: self.connection_secret,
            permissions: self.permissions,
        }
    }
}

/// `DomainList`: the domain's view of this client plus every node it may talk to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainList {
    /// Domain UUID
    pub domain_uuid: Uuid,
    /// Domain's local id
    pub domain_local_id: LocalId,
    /// UUID assigned to this client
    pub session_uuid: Uuid,
    /// Local id assigned to this client
    pub session_local_id: LocalId,
    /// Permissions granted to this client
    pub permissions: Permissions,
    /// Whether packets must carry an HMAC
    pub is_authenticated: bool,
    /// Timestamp echoed from the request
    pub connect_request_timestamp: u64,
    /// When the domain sent this reply
    pub domain_send_time: u64,
    /// Time the domain spent on the check-in, in microseconds
    pub check_in_processing_time: u64,
    /// First reply for a new connection
    pub new_connection: bool,
    /// Nodes
    pub nodes: Vec<NodeRecord>,
}

impl DomainList {
    /// Read a full list
    ///
    /// # Errors
    /// Returns [`ProtocolError`] on truncation or unknown values
    pub fn decode(payload: &mut Payload) -> Result<Self, ProtocolError> {
        let domain_uuid = read_uuid(payload)?;
        let domain_local_id = payload.read_value(Endian::Big)?;
        let session_uuid = read_uuid(payload)?;
        let session_local_id = payload.read_value(Endian::Big)?;
        let permissions = Permissions::from_bits(payload.read_value(Endian::Big)?);
        let is_authenticated = read_bool(payload)?;
        let connect_request_timestamp = payload.read_value(Endian::Big)?;
        let domain_send_time = payload.read_value(Endian::Big)?;
        let check_in_processing_time = payload.read_value(Endian::Big)?;
        let new_connection = read_bool(payload)?;

        let mut nodes = Vec::new();
        while !payload.at_end() {
            nodes.push(NodeRecord::decode(payload)?);
        }

        Ok(Self {
            domain_uuid,
            domain_local_id,
            session_uuid,
            session_local_id,
            permissions,
            is_authenticated,
            connect_request_timestamp,
            domain_send_time,
            check_in_processing_time,
            new_connection,
            nodes,
        })
    }

    /// Build the frame a domain server would send
    ///
    /// # Errors
    /// Returns [`FrameError::PayloadOverflow`] if the nodes do not fit
    pub fn encode(&self) -> Result<Frame, FrameError> {
        let mut frame = Frame::create(PacketType::DomainList);
        write_uuid(&mut frame, &self.domain_uuid)?;
        frame.write_value(self.domain_local_id, Endian::Big)?;
        write_uuid(&mut frame, &self.session_uuid)?;
        frame.write_value(self.session_local_id, Endian::Big)?;
        frame.write_value(self.permissions.bits(), Endian::Big)?;
        write_bool(&mut frame, self.is_authenticated)?;
        frame.write_value(self.connect_request_timestamp, Endian::Big)?;
        frame.write_value(self.domain_send_time, Endian::Big)?;
        frame.write_value(self.check_in_processing_time, Endian::Big)?;
        write_bool(&mut frame, self.new_connection)?;
        for node in &self.nodes {
            node.encode_into(&mut frame)?;
        }
        Ok(frame)
    }
}

/// `DomainServerAddedNode`: a single node joined
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddedNode(pub NodeRecord);

impl AddedNode {
    /// Read the record
    ///
    /// # Errors
    /// Returns [`ProtocolError`] on truncation or unknown values
    pub fn decode(payload: &mut Payload) -> Result<Self, ProtocolError> {
        NodeRecord::decode(payload).map(Self)
    }

    /// Build the frame a domain server would send
    ///
    /// # Errors
    /// Returns [`FrameError::PayloadOverflow`] if the record does not fit
    pub fn encode(&self) -> Result<Frame, FrameError> {
        let mut frame = Frame::create(PacketType::DomainServerAddedNode);
        self.0.encode_into(&mut frame)?;
        Ok(frame)
    }
}

/// Read the UUID carried by `DomainServerRemovedNode` or
/// `DomainServerConnectionToken`
///
/// # Errors
/// Returns [`FrameError::ReadPastEnd`] if fewer than 16 bytes remain
pub fn decode_uuid(payload: &mut Payload) -> Result<Uuid, FrameError> {
    read_uuid(payload)
}

/// Frame carrying nothing but `uuid`
///
/// # Errors
/// Returns [`FrameError::PayloadOverflow`] if the type has no room for it
pub fn encode_uuid(packet_type: PacketType, uuid: &Uuid) -> Result<Frame, FrameError> {
    let mut frame = Frame::create(packet_type);
    write_uuid(&mut frame, uuid)?;
    Ok(frame)
}

// ---- check-in requests ----

/// Fields shared by connect and list requests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckInFields {
    /// When the request was built
    pub timestamp: u64,
    /// This client's role
    pub owner_type: NodeType,
    /// This client's public address, null when unknown
    pub public_address: SocketAddress,
    /// This client's local address
    pub local_address: SocketAddress,
    /// Node types this client wants to hear about
    pub interest_list: Vec<NodeType>,
    /// Place this client is visiting
    pub place_name: String,
}

impl CheckInFields {
    fn encode_into(&self, frame: &mut Frame) -> Result<(), FrameError> {
        frame.write_value(self.timestamp, Endian::Big)?;
        frame.write_value(self.owner_type.as_u8(), Endian::Big)?;
        write_sock_addr(frame, &self.public_address)?;
        write_sock_addr(frame, &self.local_address)?;
        frame.write_value(self.interest_list.len() as u32, Endian::Big)?;
        for node_type in &self.interest_list {
            frame.write_value(node_type.as_u8(), Endian::Big)?;
        }
        write_qstring(frame, &self.place_name)
    }

    fn decode(payload: &mut Payload) -> Result<Self, ProtocolError> {
        let timestamp = payload.read_value(Endian::Big)?;
        let owner_type = NodeType::try_from(payload.read_value::<u8>(Endian::Big)?)?;
        let public_address = read_sock_addr(payload)?;
        let local_address = read_sock_addr(payload)?;
        let count: u32 = payload.read_value(Endian::Big)?;
        let mut interest_list = Vec::new();
        for _ in 0..count {
            interest_list.push(NodeType::try_from(payload.read_value::<u8>(Endian::Big)?)?);
        }
        let place_name = read_qstring(payload)?;
        Ok(Self {
            timestamp,
            owner_type,
            public_address,
            local_address,
            interest_list,
            place_name,
        })
    }
}

/// Login material sent with a connect request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoginFields {
    /// Metaverse username
    pub username: String,
    /// Signature over the connection token
    pub username_signature: Vec<u8>,
    /// Domain-local username
    pub domain_username: String,
    /// Domain access tokens
    pub domain_tokens: String,
}

/// `DomainConnectRequest`: check-in while not yet connected
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    /// Connect attempt UUID, the session UUID when one is held
    pub connect_uuid: Uuid,
    /// Protocol version signature
    pub protocol_signature: Vec<u8>,
    /// Hardware address, sent empty
    pub hardware_address: String,
    /// Machine fingerprint
    pub machine_fingerprint: Uuid,
    /// System information blob, sent empty
    pub system_info: Vec<u8>,
    /// Why this connect is happening
    pub connect_reason: ConnectReason,
    /// Seconds the previous session lasted
    pub previous_session_uptime: u64,
    /// Shared check-in fields
    pub check_in: CheckInFields,
    /// Login material
    pub login: LoginFields,
}

impl ConnectRequest {
    /// Build the outgoing frame
    ///
    /// # Errors
    /// Returns [`FrameError::PayloadOverflow`] if the request does not fit
    pub fn encode(&self) -> Result<Frame, FrameError> {
        let mut frame = Frame::create(PacketType::DomainConnectRequest);
        write_uuid(&mut frame, &self.connect_uuid)?;
        write_byte_array(&mut frame, &self.protocol_signature)?;
        write_qstring(&mut frame, &self.hardware_address)?;
        write_uuid(&mut frame, &self.machine_fingerprint)?;
        write_byte_array(&mut frame, &self.system_info)?;
        frame.write_value(self.connect_reason.as_u32(), Endian::Big)?;
        frame.write_value(self.previous_session_uptime, Endian::Big)?;
        self.check_in.encode_into(&mut frame)?;
        write_qstring(&mut frame, &self.login.username)?;
        write_byte_array(&mut frame, &self.login.username_signature)?;
        write_qstring(&mut frame, &self.login.domain_username)?;
        write_qstring(&mut frame, &self.login.domain_tokens)?;
        Ok(frame)
    }

    /// Read a request as the domain server would
    ///
    /// # Errors
    /// Returns [`ProtocolError`] on truncation or unknown values
    pub fn decode(payload: &mut Payload) -> Result<Self, ProtocolError> {
        let connect_uuid = read_uuid(payload)?;
        let protocol_signature = read_byte_array(payload)?;
        let hardware_address = read_qstring(payload)?;
        let machine_fingerprint = read_uuid(payload)?;
        let system_info = read_byte_array(payload)?;
        let connect_reason = ConnectReason::from_u32(payload.read_value(Endian::Big)?);
        let previous_session_uptime = payload.read_value(Endian::Big)?;
        let check_in = CheckInFields::decode(payload)?;
        let login = LoginFields {
            username: read_qstring(payload)?,
            username_signature: read_byte_array(payload)?,
            domain_username: read_qstring(payload)?,
            domain_tokens: read_qstring(payload)?,
        };
        Ok(Self {
            connect_uuid,
            protocol_signature,
            hardware_address,
            machine_fingerprint,
            system_info,
            connect_reason,
            previous_session_uptime,
            check_in,
            login,
        })
    }
}

/// `DomainListRequest`: check-in while connected
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListRequest {
    /// Shared check-in fields
    pub check_in: CheckInFields,
}

impl ListRequest {
    /// Build the outgoing frame
    ///
    /// # Errors
    /// Returns [`FrameError::PayloadOverflow`] if the request does not fit
    pub fn encode(&self) -> Result<Frame, FrameError> {
        let mut frame = Frame::create(PacketType::DomainListRequest);
        self.check_in.encode_into(&mut frame)?;
        Ok(frame)
    }

    /// Read a request as the domain server would
    ///
    /// # Errors
    /// Returns [`ProtocolError`] on truncation or unknown values
    pub fn decode(payload: &mut Payload) -> Result<Self, ProtocolError> {
        CheckInFields::decode(payload).map(|check_in| Self { check_in })
    }
}

// ---- little-endian messages ----

/// `DomainConnectionDenied`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionDenied {
    /// Reason code
    pub reason: ConnectionRefusedReason,
    /// Human readable text
    pub message: String,
    /// Extra detail, such as a login URL
    pub extra_info: String,
}

impl ConnectionDenied {
    /// Read a denial
    ///
    /// # Errors
    /// Returns [`ProtocolError`] on truncation or invalid UTF-8
    pub fn decode(payload: &mut Payload) -> Result<Self, ProtocolError> {
        let reason = ConnectionRefusedReason::from_u8(payload.read_value(Endian::Little)?);
        let message = read_utf8(payload)?;
        let extra_info = read_utf8(payload)?;
        Ok(Self {
            reason,
            message,
            extra_info,
        })
    }

    /// Build the frame a domain server would send
    ///
    /// # Errors
    /// Returns [`FrameError::PayloadOverflow`] if the text does not fit
    pub fn encode(&self) -> Result<Frame, FrameError> {
        let mut frame = Frame::create(PacketType::DomainConnectionDenied);
        frame.write_value(self.reason.as_u8(), Endian::Little)?;
        write_utf8(&mut frame, &self.message)?;
        write_utf8(&mut frame, &self.extra_info)?;
        Ok(frame)
    }
}

/// `DomainServerPathQuery`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathQuery {
    /// Path to resolve
    pub path: String,
}

impl PathQuery {
    /// Build the outgoing frame
    ///
    /// # Errors
    /// Returns [`FrameError::PayloadOverflow`] if the path does not fit
    pub fn encode(&self) -> Result<Frame, FrameError> {
        let mut frame = Frame::create(PacketType::DomainServerPathQuery);
        write_utf8(&mut frame, &self.path)?;
        Ok(frame)
    }

    /// Read a query as the domain server would
    ///
    /// # Errors
    /// Returns [`ProtocolError`] on truncation or invalid UTF-8
    pub fn decode(payload: &mut Payload) -> Result<Self, ProtocolError> {
        read_utf8(payload).map(|path| Self { path })
    }
}

/// `DomainServerPathResponse`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathResponse {
    /// Path that was queried
    pub path: String,
    /// Viewpoint it resolves to
    pub viewpoint: String,
}

impl PathResponse {
    /// Read a response
    ///
    /// # Errors
    /// Returns [`ProtocolError`] on truncation or invalid UTF-8
    pub fn decode(payload: &mut Payload) -> Result<Self, ProtocolError> {
        let path = read_utf8(payload)?;
        let viewpoint = read_utf8(payload)?;
        Ok(Self { path, viewpoint })
    }

    /// Build the frame a domain server would send
    ///
    /// # Errors
    /// Returns [`FrameError::PayloadOverflow`] if the text does not fit
    pub fn encode(&self) -> Result<Frame, FrameError> {
        let mut frame = Frame::create(PacketType::DomainServerPathResponse);
        write_utf8(&mut frame, &self.path)?;
        write_utf8(&mut frame, &self.viewpoint)?;
        Ok(frame)
    }
}

/// `Ping`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ping {
    /// Address probed
    pub ping_type: PingType,
    /// Send time in microseconds
    pub timestamp: u64,
    /// Sender's connection id
    pub connection_id: i64,
}

impl Ping {
    /// Build the outgoing frame
    ///
    /// # Errors
    /// Returns [`FrameError::PayloadOverflow`] if the frame has no room
    pub fn encode(&self) -> Result<Frame, FrameError> {
        let mut frame = Frame::create(PacketType::Ping);
        frame.write_value(self.ping_type as u8, Endian::Little)?;
        frame.write_value(self.timestamp, Endian::Little)?;
        frame.write_value(self.connection_id, Endian::Little)?;
        Ok(frame)
    }

    /// Read a ping
    ///
    /// # Errors
    /// Returns [`ProtocolError`] on truncation or an unknown ping type
    pub fn decode(payload: &mut Payload) -> Result<Self, ProtocolError> {
        let ping_type = PingType::try_from(payload.read_value::<u8>(Endian::Little)?)?;
        let timestamp = payload.read_value(Endian::Little)?;
        let connection_id = payload.read_value(Endian::Little)?;
        Ok(Self {
            ping_type,
            timestamp,
            connection_id,
        })
    }

    /// The reply to this ping, stamped `reply_timestamp`
    #[must_use]
    pub fn reply(&self, reply_timestamp: u64) -> PingReply {
        PingReply {
            ping_type: self.ping_type,
            ping_timestamp: self.timestamp,
            reply_timestamp,
        }
    }
}

/// `PingReply`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingReply {
    /// Address that was probed
    pub ping_type: PingType,
    /// Timestamp copied from the ping
    pub ping_timestamp: u64,
    /// When the reply was sent
    pub reply_timestamp: u64,
}

impl PingReply {
    /// Build the outgoing frame
    ///
    /// # Errors
    /// Returns [`FrameError::PayloadOverflow`] if the frame has no room
    pub fn encode(&self) -> Result<Frame, FrameError> {
        let mut frame = Frame::create(PacketType::PingReply);
        frame.write_value(self.ping_type as u8, Endian::Little)?;
        frame.write_value(self.ping_timestamp, Endian::Little)?;
        frame.write_value(self.reply_timestamp, Endian::Little)?;
        Ok(frame)
    }

    /// Read a reply
    ///
    /// # Errors
    /// Returns [`ProtocolError`] on truncation or an unknown ping type
    pub fn decode(payload: &mut Payload) -> Result<Self, ProtocolError> {
        let ping_type = PingType::try_from(payload.read_value::<u8>(Endian::Little)?)?;
        let ping_timestamp = payload.read_value(Endian::Little)?;
        let reply_timestamp = payload.read_value(Endian::Little)?;
        Ok(Self {
            ping_type,
            ping_timestamp,
            reply_timestamp,
        })
    }
}
