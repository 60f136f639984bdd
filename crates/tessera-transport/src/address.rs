//! Peer socket addresses.
//!
//! A [`SocketAddress`] is the triple every peer is reachable at: the kind of
//! transport carrying the bytes, a 32-bit IPv4 address and a 16-bit port.
//! The all-zero value means "unset".

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

/// Transport kind carrying a peer's traffic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[repr(u8)]
pub enum SocketKind {
    /// Not yet known
    #[default]
    Unknown = 0,
    /// Plain UDP datagrams
    Udp = 1,
    /// WebRTC data channel
    WebRtc = 2,
}

impl SocketKind {
    /// Decode the wire byte, mapping anything unrecognised to `Unknown`
    #[must_use]
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Udp,
            2 => Self::WebRtc,
            _ => Self::Unknown,
        }
    }

    /// Short name used in address strings
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::Udp => "UDP",
            Self::WebRtc => "WebRTC",
        }
    }
}

/// Address of a peer: transport kind, IPv4 address and port.
///
/// Equality is structural. [`SocketAddress::default`] is the null address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct SocketAddress {
    kind: SocketKind,
    address: u32,
    port: u16,
}

impl SocketAddress {
    /// The unset address
    pub const NULL: Self = Self {
        kind: SocketKind::Unknown,
        address: 0,
        port: 0,
    };

    /// Create an address from its parts
    #[must_use]
    pub const fn new(kind: SocketKind, address: u32, port: u16) -> Self {
        Self {
            kind,
            address,
            port,
        }
    }

    /// Create a UDP address from an IPv4 socket address
    #[must_use]
    pub fn udp(addr: SocketAddrV4) -> Self {
        Self::new(SocketKind::Udp, u32::from(*addr.ip()), addr.port())
    }

    /// Transport kind
    #[must_use]
    pub fn kind(&self) -> SocketKind {
        self.kind
    }

    /// IPv4 address as a host-order integer
    #[must_use]
    pub fn address(&self) -> u32 {
        self.address
    }

    /// IPv4 address
    #[must_use]
    pub fn ip(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.address)
    }

    /// Port
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Copy of this address with a different port
    #[must_use]
    pub fn with_port(self, port: u16) -> Self {
        Self { port, ..self }
    }

    /// Copy of this address with a different kind
    #[must_use]
    pub fn with_kind(self, kind: SocketKind) -> Self {
        Self { kind, ..self }
    }

    /// Whether the address is unset
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.address == 0 && self.port == 0
    }

    /// Standard library form, for transports that speak IP
    #[must_use]
    pub fn to_socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.ip(), self.port))
    }
}

impl From<SocketAddrV4> for SocketAddress {
    fn from(addr: SocketAddrV4) -> Self {
        Self::udp(addr)
    }
}

impl TryFrom<SocketAddr> for SocketAddress {
    type Error = SocketAddr;

    /// Only IPv4 addresses are representable
    fn try_from(addr: SocketAddr) -> Result<Self, Self::Error> {
        match addr {
            SocketAddr::V4(v4) => Ok(Self::udp(v4)),
            SocketAddr::V6(_) => Err(addr),
        }
    }
}

impl fmt::Display for SocketAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}:{}", self.kind.as_str(), self.ip(), self.port)
    }
}

impl fmt::Debug for SocketAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_null() {
        assert!(SocketAddress::default().is_null());
        assert_eq!(SocketAddress::default(), SocketAddress::NULL);
    }

    #[test]
    fn test_structural_equality() {
        let a = SocketAddress::new(SocketKind::Udp, 0x7F00_0001, 40102);
        let b = SocketAddress::udp("127.0.0.1:40102".parse().unwrap());
        assert_eq!(a, b);
        assert_ne!(a, a.with_port(40103));
        assert_ne!(a, a.with_kind(SocketKind::WebRtc));
    }

    #[test]
    fn test_debug_string() {
        let addr = SocketAddress::udp("10.0.0.5:40104".parse().unwrap());
        assert_eq!(format!("{addr:?}"), "UDP 10.0.0.5:40104");
        assert_eq!(addr.to_string(), "UDP 10.0.0.5:40104");
    }

    #[test]
    fn test_port_only_is_not_null() {
        let addr = SocketAddress::new(SocketKind::Udp, 0, 9);
        assert!(!addr.is_null());
    }

    #[test]
    fn test_ipv6_rejected() {
        let v6: SocketAddr = "[::1]:80".parse().unwrap();
        assert!(SocketAddress::try_from(v6).is_err());
    }

    #[test]
    fn test_std_round_trip() {
        let std_addr: SocketAddr = "192.168.1.20:7000".parse().unwrap();
        let addr = SocketAddress::try_from(std_addr).unwrap();
        assert_eq!(addr.to_socket_addr(), std_addr);
    }
}
