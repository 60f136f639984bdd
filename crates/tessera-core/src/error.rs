//! Error types for the Tessera core protocol.
//!
//! Receive-side problems never reach the embedding application as errors:
//! the client logs them and, where there is something to react to, emits a
//! [`SessionEvent`](crate::SessionEvent). The types here are what the
//! individual layers return to each other, plus the one write-side failure
//! callers must handle ([`FrameError::OversizedSegment`]).

use thiserror::Error;

use crate::protocol::PacketType;

/// Core protocol errors
#[derive(Debug, Error)]
pub enum Error {
    /// Frame parsing or building error
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Domain message could not be decoded
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Listener registration error
    #[error("receiver error: {0}")]
    Receiver(#[from] ReceiverError),

    /// Cryptographic error
    #[error("crypto error: {0}")]
    Crypto(#[from] tessera_crypto::CryptoError),

    /// Transport error
    #[error("transport error: {0}")]
    Transport(#[from] tessera_transport::TransportError),

    /// Configuration could not be loaded
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

impl Error {
    /// Returns true if retrying the failed operation later may succeed
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_transient(),
            _ => false,
        }
    }
}

/// Frame-level errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Frame too short to parse
    #[error("frame too short: expected at least {expected}, got {actual}")]
    TooShort {
        /// Expected minimum size
        expected: usize,
        /// Actual size received
        actual: usize,
    },

    /// Packet type byte outside the known table
    #[error("invalid packet type: {0}")]
    InvalidPacketType(u8),

    /// The control bit is set; only data packets are handled here
    #[error("control packets are not handled by the framing layer")]
    ControlPacket,

    /// Write does not fit in the remaining payload capacity
    #[error("payload overflow: {requested} bytes requested, {available} available")]
    PayloadOverflow {
        /// Bytes the caller tried to write
        requested: usize,
        /// Bytes left in the payload
        available: usize,
    },

    /// Read past the end of the payload
    #[error("read past end: {requested} bytes requested, {available} available")]
    ReadPastEnd {
        /// Bytes the caller tried to read
        requested: usize,
        /// Bytes left to read
        available: usize,
    },

    /// An unordered segment cannot fit in any single frame
    #[error("segment of {len} bytes exceeds frame capacity of {capacity}")]
    OversizedSegment {
        /// Length of the segment that was being written
        len: usize,
        /// Payload capacity of an empty frame
        capacity: usize,
    },

    /// Frame appended to a message that already saw its last part
    #[error("message is already complete")]
    MessageComplete,

    /// Extended header leaves no room for payload
    #[error("extended header of {0} bytes leaves no payload capacity")]
    ExtendedHeaderTooLarge(usize),
}

/// Domain message decoding errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Payload ended early or was otherwise unreadable
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// A UTF-16 string had an odd byte length or invalid code units
    #[error("invalid UTF-16 string")]
    InvalidUtf16,

    /// A length-prefixed UTF-8 string was not valid UTF-8
    #[error("invalid UTF-8 string")]
    InvalidUtf8,

    /// Address protocol tag other than IPv4 or null
    #[error("unsupported address protocol: 0x{0:02X}")]
    UnsupportedAddressProtocol(u8),

    /// Node type byte outside the known set
    #[error("unknown node type: 0x{0:02X}")]
    UnknownNodeType(u8),

    /// Ping type byte outside the known set
    #[error("unknown ping type: {0}")]
    UnknownPingType(u8),

    /// Codec applied to the wrong packet type
    #[error("expected {expected:?} packet, got {actual:?}")]
    UnexpectedType {
        /// Type the codec decodes
        expected: PacketType,
        /// Type of the message handed in
        actual: PacketType,
    },
}

/// Packet receiver errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReceiverError {
    /// A listener is already registered for this type
    #[error("a listener is already registered for {0:?}")]
    DuplicateListener(PacketType),
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file could not be read
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration text is not valid TOML for [`ClientConfig`](crate::ClientConfig)
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Result type for core operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let transient = Error::Transport(tessera_transport::TransportError::WouldBlock);
        assert!(transient.is_transient());

        let permanent = Error::Frame(FrameError::MessageComplete);
        assert!(!permanent.is_transient());
    }

    #[test]
    fn test_error_display() {
        let err = FrameError::OversizedSegment {
            len: 1500,
            capacity: 1440,
        };
        assert_eq!(
            err.to_string(),
            "segment of 1500 bytes exceeds frame capacity of 1440"
        );

        let err: Error = ReceiverError::DuplicateListener(PacketType::Ping).into();
        assert_eq!(
            err.to_string(),
            "receiver error: a listener is already registered for Ping"
        );
    }
}
