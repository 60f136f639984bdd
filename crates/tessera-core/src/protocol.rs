//! Packet types and per-type protocol constants.
//!
//! The wire identifies every packet by one type byte. Which header fields a
//! packet carries depends only on its type:
//!
//! | Property | Header effect |
//! |----------|---------------|
//! | sourced | 2-byte source local id after type/version |
//! | verified (sourced and not exempt) | 16-byte HMAC after the source id |
//!
//! The tables here are fixed by the deployed server fleet and must not be
//! reordered.

use std::sync::OnceLock;

use crate::error::FrameError;

macro_rules! packet_types {
    ($($name:ident = $value:literal,)+) => {
        /// Wire packet type. Discriminants are the type byte on the wire.
        #[allow(missing_docs)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(u8)]
        pub enum PacketType {
            $($name = $value,)+
        }

        impl PacketType {
            /// Every packet type, in wire order
            pub const ALL: &'static [PacketType] = &[$(PacketType::$name,)+];
        }

        impl TryFrom<u8> for PacketType {
            type Error = FrameError;

            fn try_from(value: u8) -> Result<Self, Self::Error> {
                match value {
                    $($value => Ok(Self::$name),)+
                    other => Err(FrameError::InvalidPacketType(other)),
                }
            }
        }
    };
}

packet_types! {
    Unknown = 0,
    DomainConnectRequestPending = 1,
    DomainList = 2,
    Ping = 3,
    PingReply = 4,
    KillAvatar = 5,
    AvatarData = 6,
    InjectAudio = 7,
    MixedAudio = 8,
    MicrophoneAudioNoEcho = 9,
    MicrophoneAudioWithEcho = 10,
    BulkAvatarData = 11,
    SilentAudioFrame = 12,
    DomainListRequest = 13,
    RequestAssignment = 14,
    CreateAssignment = 15,
    DomainConnectionDenied = 16,
    MuteEnvironment = 17,
    AudioStreamStats = 18,
    DomainServerPathQuery = 19,
    DomainServerPathResponse = 20,
    DomainServerAddedNode = 21,
    ICEServerPeerInformation = 22,
    ICEServerQuery = 23,
    OctreeStats = 24,
    SetAvatarTraits = 25,
    InjectorGainSet = 26,
    AssignmentClientStatus = 27,
    NoisyMute = 28,
    AvatarIdentity = 29,
    NodeIgnoreRequest = 30,
    DomainConnectRequest = 31,
    DomainServerRequireDTLS = 32,
    NodeJsonStats = 33,
    OctreeDataNack = 34,
    StopNode = 35,
    AudioEnvironment = 36,
    EntityEditNack = 37,
    ICEServerHeartbeat = 38,
    ICEPing = 39,
    ICEPingReply = 40,
    EntityData = 41,
    EntityQuery = 42,
    EntityAdd = 43,
    EntityErase = 44,
    EntityEdit = 45,
    DomainServerConnectionToken = 46,
    DomainSettingsRequest = 47,
    DomainSettings = 48,
    AssetGet = 49,
    AssetGetReply = 50,
    AssetUpload = 51,
    AssetUploadReply = 52,
    AssetGetInfo = 53,
    AssetGetInfoReply = 54,
    DomainDisconnectRequest = 55,
    DomainServerRemovedNode = 56,
    MessagesData = 57,
    MessagesSubscribe = 58,
    MessagesUnsubscribe = 59,
    ICEServerHeartbeatDenied = 60,
    AssetMappingOperation = 61,
    AssetMappingOperationReply = 62,
    ICEServerHeartbeatACK = 63,
    NegotiateAudioFormat = 64,
    SelectedAudioFormat = 65,
    MoreEntityShapes = 66,
    NodeKickRequest = 67,
    NodeMuteRequest = 68,
    RadiusIgnoreRequest = 69,
    UsernameFromIDRequest = 70,
    UsernameFromIDReply = 71,
    AvatarQuery = 72,
    RequestsDomainListData = 73,
    PerAvatarGainSet = 74,
    EntityScriptGetStatus = 75,
    EntityScriptGetStatusReply = 76,
    ReloadEntityServerScript = 77,
    EntityPhysics = 78,
    EntityServerScriptLog = 79,
    AdjustAvatarSorting = 80,
    OctreeFileReplacement = 81,
    CollisionEventChanges = 82,
    ReplicatedMicrophoneAudioNoEcho = 83,
    ReplicatedMicrophoneAudioWithEcho = 84,
    ReplicatedInjectAudio = 85,
    ReplicatedSilentAudioFrame = 86,
    ReplicatedAvatarIdentity = 87,
    ReplicatedKillAvatar = 88,
    ReplicatedBulkAvatarData = 89,
    DomainContentReplacementFromUrl = 90,
    ChallengeOwnership = 91,
    EntityScriptCallMethod = 92,
    ChallengeOwnershipRequest = 93,
    ChallengeOwnershipReply = 94,
    OctreeDataFileRequest = 95,
    OctreeDataFileReply = 96,
    OctreeDataPersist = 97,
    EntityClone = 98,
    EntityQueryInitialResultsComplete = 99,
    BulkAvatarTraits = 100,
    AudioSoloRequest = 101,
    BulkAvatarTraitsAck = 102,
    StopInjector = 103,
    AvatarZonePresence = 104,
    WebRTCSignaling = 105,
}

/// Number of packet types in the table
pub const NUM_PACKET_TYPES: usize = PacketType::ALL.len();

/// Version stamped on every type without a dedicated entry
pub const DEFAULT_VERSION: u8 = 22;

impl PacketType {
    /// Wire byte
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Protocol version this client speaks for the type
    #[must_use]
    pub const fn version(self) -> u8 {
        match self {
            Self::DomainList => 25,
            Self::DomainListRequest => 23,
            Self::DomainConnectRequest => 27,
            Self::DomainConnectionDenied => 19,
            Self::DomainServerAddedNode => 19,
            Self::Ping | Self::PingReply => 18,
            _ => DEFAULT_VERSION,
        }
    }

    /// Whether frames of this type carry a source local id
    #[must_use]
    pub const fn is_sourced(self) -> bool {
        !matches!(
            self,
            Self::DomainConnectRequestPending
                | Self::CreateAssignment
                | Self::RequestAssignment
                | Self::DomainServerRequireDTLS
                | Self::DomainConnectRequest
                | Self::DomainList
                | Self::DomainConnectionDenied
                | Self::DomainServerPathQuery
                | Self::DomainServerPathResponse
                | Self::DomainServerAddedNode
                | Self::DomainServerConnectionToken
                | Self::DomainSettingsRequest
                | Self::OctreeDataFileRequest
                | Self::OctreeDataFileReply
                | Self::OctreeDataPersist
                | Self::DomainContentReplacementFromUrl
                | Self::DomainSettings
                | Self::ICEServerPeerInformation
                | Self::ICEServerQuery
                | Self::ICEServerHeartbeat
                | Self::ICEServerHeartbeatACK
                | Self::ICEPing
                | Self::ICEPingReply
                | Self::ICEServerHeartbeatDenied
                | Self::AssignmentClientStatus
                | Self::StopNode
                | Self::DomainServerRemovedNode
                | Self::UsernameFromIDReply
                | Self::OctreeFileReplacement
                | Self::ReplicatedMicrophoneAudioNoEcho
                | Self::ReplicatedMicrophoneAudioWithEcho
                | Self::ReplicatedInjectAudio
                | Self::ReplicatedSilentAudioFrame
                | Self::ReplicatedAvatarIdentity
                | Self::ReplicatedKillAvatar
                | Self::ReplicatedBulkAvatarData
                | Self::AvatarZonePresence
                | Self::WebRTCSignaling
        )
    }

    /// Whether frames of this type carry a content hash
    #[must_use]
    pub const fn is_verified(self) -> bool {
        self.is_sourced()
            && !matches!(
                self,
                Self::NodeJsonStats
                    | Self::EntityQuery
                    | Self::OctreeDataNack
                    | Self::EntityEditNack
                    | Self::DomainListRequest
                    | Self::StopNode
                    | Self::DomainDisconnectRequest
                    | Self::UsernameFromIDRequest
                    | Self::NodeKickRequest
                    | Self::NodeMuteRequest
            )
    }

    /// Type a replicated packet stands in for
    #[must_use]
    pub const fn replicated_base(self) -> Option<Self> {
        match self {
            Self::ReplicatedMicrophoneAudioNoEcho => Some(Self::MicrophoneAudioNoEcho),
            Self::ReplicatedMicrophoneAudioWithEcho => Some(Self::MicrophoneAudioWithEcho),
            Self::ReplicatedInjectAudio => Some(Self::InjectAudio),
            Self::ReplicatedSilentAudioFrame => Some(Self::SilentAudioFrame),
            Self::ReplicatedAvatarIdentity => Some(Self::AvatarIdentity),
            Self::ReplicatedKillAvatar => Some(Self::KillAvatar),
            Self::ReplicatedBulkAvatarData => Some(Self::BulkAvatarData),
            _ => None,
        }
    }

    /// Whether this is one of the replicated types
    #[must_use]
    pub const fn is_replicated(self) -> bool {
        self.replicated_base().is_some()
    }

    /// Sourced types the domain server itself may send
    #[must_use]
    pub const fn is_domain_sourced(self) -> bool {
        matches!(
            self,
            Self::AssetMappingOperation | Self::AssetGet | Self::AssetUpload
        )
    }
}

impl std::fmt::Display for PacketType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}({})", self, self.as_u8())
    }
}

/// MD5 over the type count followed by every type's version byte.
///
/// Sent in the connect request so the domain can refuse clients built
/// against a different table.
#[must_use]
pub fn protocol_version_signature() -> [u8; 16] {
    static SIGNATURE: OnceLock<[u8; 16]> = OnceLock::new();
    *SIGNATURE.get_or_init(|| {
        let mut table = Vec::with_capacity(NUM_PACKET_TYPES + 1);
        table.push(NUM_PACKET_TYPES as u8);
        table.extend(PacketType::ALL.iter().map(|t| t.version()));
        tessera_crypto::digest::md5(&table)
    })
}

/// Hex form of [`protocol_version_signature`], for logs
#[must_use]
pub fn protocol_version_signature_hex() -> String {
    hex::encode(protocol_version_signature())
}
