//! Frame encoding and decoding for the Tessera wire protocol.
//!
//! A frame is one datagram. Its header, in wire order:
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+---+-------------------------------------------------------+
//! |C|R|M|O O|                 sequence number (27)                  |
//! +-+-+-+---+-------------------------------------------------------+
//! |P P|               message number (30)       [only if M]         |
//! +---+-------------------------------------------------------------+
//! |                  message part index (32)    [only if M]         |
//! +---------------+---------------+---------------------------------+
//! |     type      |    version    |  source local id [if sourced]   |
//! +---------------+---------------+---------------------------------+
//! |           HMAC-MD5 over the payload (16 bytes) [if verified]    |
//! +-----------------------------------------------------------------+
//! ```
//!
//! Control words are little-endian 32-bit values. `C` is the control bit
//! (always 0 for data frames), `R` reliable, `M` part of a message, `O` the
//! obfuscation level and `P` the position of the frame inside its message.
//!
//! The header size is a pure function of the packet type and the `M` flag,
//! so the write path and the read path always agree on where the payload
//! starts.

use tessera_crypto::ContentAuthenticator;

use crate::error::FrameError;
use crate::payload::{Endian, Payload, WireValue};
use crate::protocol::PacketType;

/// Largest datagram the protocol produces
pub const MAX_PACKET_SIZE: usize = 1464;

/// Control word only
pub const BASE_HEADER_SIZE: usize = 4;

/// Message number word plus part index, present for message parts
pub const MESSAGE_HEADER_SIZE: usize = 8;

/// Type byte plus version byte
pub const TYPE_AND_VERSION_SIZE: usize = 2;

/// Source local id
pub const LOCAL_ID_SIZE: usize = 2;

/// Content hash
pub const HASH_SIZE: usize = 16;

/// Sequence numbers wrap at 27 bits
pub const SEQUENCE_NUMBER_MASK: u32 = 0x07FF_FFFF;

/// Message numbers wrap at 30 bits
pub const MESSAGE_NUMBER_MASK: u32 = 0x3FFF_FFFF;

const CONTROL_BIT: u32 = 1 << 31;
const RELIABLE_BIT: u32 = 1 << 30;
const MESSAGE_BIT: u32 = 1 << 29;
const OBFUSCATION_SHIFT: u32 = 27;
const POSITION_SHIFT: u32 = 30;

const OBFUSCATION_KEYS: [u64; 4] = [
    0x0,
    0x6362_7269_7373_6574,
    0x7362_6972_6172_6461,
    0x7268_7566_666d_616e,
];

/// Session-scoped 16-bit node id carried in sourced frames
pub type LocalId = u16;

/// Local id of a session that has not been assigned one yet
pub const NULL_LOCAL_ID: LocalId = 0;

/// Position of a frame within a multi-frame message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum PacketPosition {
    /// The message is a single frame
    #[default]
    Only = 0,
    /// Final frame
    Last = 1,
    /// Opening frame
    First = 2,
    /// Any frame between first and last
    Middle = 3,
}

impl PacketPosition {
    fn from_bits(bits: u32) -> Self {
        match bits & 0b11 {
            0 => Self::Only,
            1 => Self::Last,
            2 => Self::First,
            _ => Self::Middle,
        }
    }

    /// Whether a message ends with this frame
    #[must_use]
    pub fn ends_message(self) -> bool {
        matches!(self, Self::Only | Self::Last)
    }
}

/// Message fields of a frame that is part of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MessageHeader {
    /// Per-destination message number
    pub number: u32,
    /// Position within the message
    pub position: PacketPosition,
    /// Zero-based index of the frame within the message
    pub part_index: u32,
}

/// Size of the type-dependent part of the header
#[must_use]
pub const fn local_header_size(packet_type: PacketType) -> usize {
    let mut size = TYPE_AND_VERSION_SIZE;
    if packet_type.is_sourced() {
        size += LOCAL_ID_SIZE;
    }
    if packet_type.is_verified() {
        size += HASH_SIZE;
    }
    size
}

/// Full header size for a frame of `packet_type`
#[must_use]
pub const fn total_header_size(packet_type: PacketType, part_of_message: bool) -> usize {
    let base = if part_of_message {
        BASE_HEADER_SIZE + MESSAGE_HEADER_SIZE
    } else {
        BASE_HEADER_SIZE
    };
    base + local_header_size(packet_type)
}

/// Payload capacity of a frame of `packet_type`
#[must_use]
pub const fn payload_capacity(packet_type: PacketType, part_of_message: bool) -> usize {
    MAX_PACKET_SIZE - total_header_size(packet_type, part_of_message)
}

/// One datagram: header fields plus payload.
///
/// Cloning produces a full, independent copy, which is what sending the same
/// reliable frame to a second destination needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    packet_type: PacketType,
    version: u8,
    reliable: bool,
    sequence_number: u32,
    obfuscation_level: u8,
    message: Option<MessageHeader>,
    source_id: Option<LocalId>,
    hash: Option<[u8; HASH_SIZE]>,
    payload: Payload,
}

impl Frame {
    /// Unreliable single frame of `packet_type` at the current version
    #[must_use]
    pub fn create(packet_type: PacketType) -> Self {
        Self::new(packet_type, false, false)
    }

    /// Empty frame with the header space for `packet_type` reserved
    #[must_use]
    pub fn new(packet_type: PacketType, reliable: bool, part_of_message: bool) -> Self {
        Self {
            packet_type,
            version: packet_type.version(),
            reliable,
            sequence_number: 0,
            obfuscation_level: 0,
            message: part_of_message.then(MessageHeader::default),
            source_id: packet_type.is_sourced().then_some(NULL_LOCAL_ID),
            hash: packet_type.is_verified().then_some([0u8; HASH_SIZE]),
            payload: Payload::with_capacity(payload_capacity(packet_type, part_of_message)),
        }
    }

    /// Override the version stamped in the header
    #[must_use]
    pub fn with_version(mut self, version: u8) -> Self {
        self.version = version;
        self
    }

    /// Parse a received datagram.
    ///
    /// # Errors
    /// Returns [`FrameError`] for control packets, unknown types and
    /// datagrams shorter than their header
    pub fn from_received(mut bytes: Vec<u8>) -> Result<Self, FrameError> {
        if bytes.len() < BASE_HEADER_SIZE {
            return Err(FrameError::TooShort {
                expected: BASE_HEADER_SIZE,
                actual: bytes.len(),
            });
        }

        let control = u32::get(&bytes[..4], Endian::Little);
        if control & CONTROL_BIT != 0 {
            return Err(FrameError::ControlPacket);
        }
        let reliable = control & RELIABLE_BIT != 0;
        let part_of_message = control & MESSAGE_BIT != 0;
        let obfuscation_level = ((control >> OBFUSCATION_SHIFT) & 0b11) as u8;
        let sequence_number = control & SEQUENCE_NUMBER_MASK;

        let base = if part_of_message {
            BASE_HEADER_SIZE + MESSAGE_HEADER_SIZE
        } else {
            BASE_HEADER_SIZE
        };
        if bytes.len() < base + TYPE_AND_VERSION_SIZE {
            return Err(FrameError::TooShort {
                expected: base + TYPE_AND_VERSION_SIZE,
                actual: bytes.len(),
            });
        }
        if obfuscation_level != 0 {
            xor_obfuscation(&mut bytes[base..], OBFUSCATION_KEYS[obfuscation_level as usize]);
        }

        let message = part_of_message.then(|| {
            let word = u32::get(&bytes[4..8], Endian::Little);
            MessageHeader {
                number: word & MESSAGE_NUMBER_MASK,
                position: PacketPosition::from_bits(word >> POSITION_SHIFT),
                part_index: u32::get(&bytes[8..12], Endian::Little),
            }
        });

        let packet_type = PacketType::try_from(bytes[base])?;
        let version = bytes[base + 1];
        let header_size = total_header_size(packet_type, part_of_message);
        if bytes.len() < header_size {
            return Err(FrameError::TooShort {
                expected: header_size,
                actual: bytes.len(),
            });
        }

        let mut offset = base + TYPE_AND_VERSION_SIZE;
        let source_id = packet_type.is_sourced().then(|| {
            let id = LocalId::get(&bytes[offset..offset + LOCAL_ID_SIZE], Endian::Little);
            offset += LOCAL_ID_SIZE;
            id
        });
        let hash = packet_type.is_verified().then(|| {
            let mut hash = [0u8; HASH_SIZE];
            hash.copy_from_slice(&bytes[offset..offset + HASH_SIZE]);
            hash
        });

        let payload = Payload::from_bytes(bytes.split_off(header_size));
        Ok(Self {
            packet_type,
            version,
            reliable,
            sequence_number,
            obfuscation_level,
            message,
            source_id,
            hash,
            payload,
        })
    }

    /// Packet type
    #[must_use]
    pub fn packet_type(&self) -> PacketType {
        self.packet_type
    }

    /// Version byte as written or received
    #[must_use]
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Whether the reliable flag is set
    #[must_use]
    pub fn is_reliable(&self) -> bool {
        self.reliable
    }

    /// Sequence number
    #[must_use]
    pub fn sequence_number(&self) -> u32 {
        self.sequence_number
    }

    /// Obfuscation level the frame arrived with
    #[must_use]
    pub fn obfuscation_level(&self) -> u8 {
        self.obfuscation_level
    }

    /// Assign the sequence number, wrapping at 27 bits
    pub fn set_sequence_number(&mut self, sequence_number: u32) {
        self.sequence_number = sequence_number & SEQUENCE_NUMBER_MASK;
    }

    /// Whether the frame carries message fields
    #[must_use]
    pub fn is_part_of_message(&self) -> bool {
        self.message.is_some()
    }

    /// Message fields, if part of a message
    #[must_use]
    pub fn message(&self) -> Option<MessageHeader> {
        self.message
    }

    /// Set message fields. Ignored for frames created outside a message,
    /// whose header has no room for them.
    pub fn set_message(&mut self, number: u32, position: PacketPosition, part_index: u32) {
        if let Some(message) = self.message.as_mut() {
            *message = MessageHeader {
                number: number & MESSAGE_NUMBER_MASK,
                position,
                part_index,
            };
        }
    }

    /// Source local id, for sourced types
    #[must_use]
    pub fn source_id(&self) -> Option<LocalId> {
        self.source_id
    }

    /// Stamp the sender's local id. Ignored for unsourced types.
    pub fn set_source_id(&mut self, id: LocalId) {
        if let Some(source) = self.source_id.as_mut() {
            *source = id;
        }
    }

    /// Content hash, for verified types
    #[must_use]
    pub fn hash(&self) -> Option<&[u8; HASH_SIZE]> {
        self.hash.as_ref()
    }

    /// Compute the content hash over the payload.
    ///
    /// Returns `false` for unverified types or when `auth` has no key.
    pub fn sign(&mut self, auth: &ContentAuthenticator) -> bool {
        let Some(hash) = self.hash.as_mut() else {
            return false;
        };
        let data = self.payload.as_slice();
        auth.calculate_hash(hash, data, 0, data.len())
    }

    /// Check the content hash against `auth`
    #[must_use]
    pub fn verify(&self, auth: &ContentAuthenticator) -> bool {
        match &self.hash {
            Some(hash) => {
                let data = self.payload.as_slice();
                auth.verify_hash(hash, data, 0, data.len())
            }
            None => false,
        }
    }

    /// Header size of this frame
    #[must_use]
    pub fn header_size(&self) -> usize {
        total_header_size(self.packet_type, self.is_part_of_message())
    }

    /// Payload
    #[must_use]
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Payload, mutably
    pub fn payload_mut(&mut self) -> &mut Payload {
        &mut self.payload
    }

    /// Consume into the payload
    #[must_use]
    pub fn into_payload(self) -> Payload {
        self.payload
    }

    /// Append raw bytes to the payload.
    ///
    /// # Errors
    /// Returns [`FrameError::PayloadOverflow`] if they do not fit
    pub fn write(&mut self, bytes: &[u8]) -> Result<usize, FrameError> {
        self.payload.write(bytes)
    }

    /// Append a primitive to the payload.
    ///
    /// # Errors
    /// Returns [`FrameError::PayloadOverflow`] if it does not fit
    pub fn write_value<T: WireValue>(&mut self, value: T, endian: Endian) -> Result<(), FrameError> {
        self.payload.write_value(value, endian)
    }

    /// Bytes that can still be appended
    #[must_use]
    pub fn bytes_available_for_write(&self) -> usize {
        self.payload.remaining_capacity()
    }

    /// Total size on the wire
    #[must_use]
    pub fn wire_size(&self) -> usize {
        self.header_size() + self.payload.len()
    }

    /// Encode the frame for sending. Outbound frames are never obfuscated.
    #[must_use]
    pub fn to_wire(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.wire_size());

        let mut control = self.sequence_number & SEQUENCE_NUMBER_MASK;
        if self.reliable {
            control |= RELIABLE_BIT;
        }
        if self.message.is_some() {
            control |= MESSAGE_BIT;
        }
        out.extend_from_slice(&control.to_le_bytes());

        if let Some(message) = &self.message {
            let word = (message.number & MESSAGE_NUMBER_MASK)
                | ((message.position as u32) << POSITION_SHIFT);
            out.extend_from_slice(&word.to_le_bytes());
            out.extend_from_slice(&message.part_index.to_le_bytes());
        }

        out.push(self.packet_type.as_u8());
        out.push(self.version);
        if let Some(source_id) = self.source_id {
            out.extend_from_slice(&source_id.to_le_bytes());
        }
        if let Some(hash) = &self.hash {
            out.extend_from_slice(hash);
        }
        out.extend_from_slice(self.payload.as_slice());
        out
    }
}

/// XOR `data` with `key`, cycling through its little-endian bytes.
fn xor_obfuscation(data: &mut [u8], key: u64) {
    let key = key.to_le_bytes();
    for (byte, k) in data.iter_mut().zip(key.iter().cycle()) {
        *byte ^= k;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_sizes() {
        // unsourced: control word + type + version
        assert_eq!(total_header_size(PacketType::DomainList, false), 6);
        // sourced, not verified
        assert_eq!(total_header_size(PacketType::DomainListRequest, false), 8);
        // sourced and verified
        assert_eq!(total_header_size(PacketType::Ping, false), 24);
        assert_eq!(total_header_size(PacketType::Ping, true), 32);
        assert_eq!(payload_capacity(PacketType::Ping, true), MAX_PACKET_SIZE - 32);
    }

    #[test]
    fn test_write_and_read_paths_agree() {
        let mut frame = Frame::new(PacketType::EntityEdit, true, true);
        frame.set_sequence_number(42);
        frame.set_message(7, PacketPosition::Middle, 3);
        frame.set_source_id(0x1234);
        frame.write(b"payload bytes").unwrap();

        let wire = frame.to_wire();
        assert_eq!(wire.len(), frame.wire_size());
        assert_eq!(wire.len(), total_header_size(PacketType::EntityEdit, true) + 13);

        let parsed = Frame::from_received(wire).unwrap();
        assert_eq!(parsed.packet_type(), PacketType::EntityEdit);
        assert_eq!(parsed.version(), PacketType::EntityEdit.version());
        assert!(parsed.is_reliable());
        assert_eq!(parsed.sequence_number(), 42);
        assert_eq!(
            parsed.message(),
            Some(MessageHeader {
                number: 7,
                position: PacketPosition::Middle,
                part_index: 3
            })
        );
        assert_eq!(parsed.source_id(), Some(0x1234));
        assert_eq!(parsed.payload().as_slice(), b"payload bytes");
        assert_eq!(parsed.payload().pos(), 0);
    }

    #[test]
    fn test_control_word_layout() {
        let mut frame = Frame::new(PacketType::DomainList, true, false);
        frame.set_sequence_number(0x0FFF_FFFF);
        let wire = frame.to_wire();
        let control = u32::from_le_bytes([wire[0], wire[1], wire[2], wire[3]]);
        assert_eq!(control & CONTROL_BIT, 0);
        assert_ne!(control & RELIABLE_BIT, 0);
        assert_eq!(control & MESSAGE_BIT, 0);
        // sequence wrapped to 27 bits
        assert_eq!(control & SEQUENCE_NUMBER_MASK, 0x07FF_FFFF);
        assert_eq!(wire[4], PacketType::DomainList.as_u8());
        assert_eq!(wire[5], 25);
    }

    #[test]
    fn test_unsourced_ignores_source_id() {
        let mut frame = Frame::create(PacketType::DomainList);
        frame.set_source_id(9);
        assert_eq!(frame.source_id(), None);
        assert!(!frame.sign(&ContentAuthenticator::default()));
    }

    #[test]
    fn test_set_message_outside_message_is_ignored() {
        let mut frame = Frame::create(PacketType::Ping);
        frame.set_message(1, PacketPosition::First, 0);
        assert_eq!(frame.message(), None);
        assert_eq!(frame.header_size(), total_header_size(PacketType::Ping, false));
    }

    #[test]
    fn test_sign_and_verify() {
        let mut auth = ContentAuthenticator::default();
        auth.set_key(&[5u8; 16]);

        let mut frame = Frame::create(PacketType::Ping);
        frame.write(b"ping body").unwrap();
        assert!(frame.sign(&auth));
        assert_ne!(frame.hash(), Some(&[0u8; HASH_SIZE]));

        let parsed = Frame::from_received(frame.to_wire()).unwrap();
        assert!(parsed.verify(&auth));

        let mut other = ContentAuthenticator::default();
        other.set_key(&[6u8; 16]);
        assert!(!parsed.verify(&other));
    }

    #[test]
    fn test_control_packet_rejected() {
        let wire = CONTROL_BIT.to_le_bytes().to_vec();
        assert_eq!(Frame::from_received(wire), Err(FrameError::ControlPacket));
    }

    #[test]
    fn test_truncated_header() {
        assert!(matches!(
            Frame::from_received(vec![0, 0]),
            Err(FrameError::TooShort { expected: 4, actual: 2 })
        ));

        // Ping needs 24 header bytes
        let mut wire = Frame::create(PacketType::Ping).to_wire();
        wire.truncate(10);
        assert!(matches!(
            Frame::from_received(wire),
            Err(FrameError::TooShort { expected: 24, actual: 10 })
        ));
    }

    #[test]
    fn test_unknown_type() {
        let mut wire = vec![0, 0, 0, 0];
        wire.extend_from_slice(&[200, 1]);
        assert_eq!(
            Frame::from_received(wire),
            Err(FrameError::InvalidPacketType(200))
        );
    }

    #[test]
    fn test_obfuscated_frame_is_restored() {
        let mut frame = Frame::create(PacketType::DomainList);
        frame.write(b"domain list body").unwrap();
        let mut wire = frame.to_wire();

        let level = 2u32;
        let control = u32::from_le_bytes([wire[0], wire[1], wire[2], wire[3]])
            | (level << OBFUSCATION_SHIFT);
        wire[..4].copy_from_slice(&control.to_le_bytes());
        xor_obfuscation(&mut wire[BASE_HEADER_SIZE..], OBFUSCATION_KEYS[2]);

        let parsed = Frame::from_received(wire).unwrap();
        assert_eq!(parsed.obfuscation_level(), 2);
        assert_eq!(parsed.packet_type(), PacketType::DomainList);
        assert_eq!(parsed.payload().as_slice(), b"domain list body");
    }

    #[test]
    fn test_clone_is_independent() {
        let mut a = Frame::new(PacketType::EntityEdit, true, false);
        a.write(b"edit").unwrap();
        let mut b = a.clone();
        b.set_sequence_number(5);
        b.write(b"!").unwrap();
        assert_eq!(a.sequence_number(), 0);
        assert_eq!(a.payload().as_slice(), b"edit");
    }
}
