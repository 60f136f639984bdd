//! # Tessera Core
//!
//! Client-side protocol core for Tessera domains: packet framing, reliable
//! message assembly, the registry of nodes a session talks to, and the
//! domain check-in state machine.
//!
//! This crate provides:
//! - Frame encoding and decoding ([`Frame`], [`PacketType`])
//! - Message segmentation and reassembly ([`MessageAssembler`], [`ReceivedMessage`])
//! - The node registry with per-node content authentication ([`NodeRegistry`])
//! - Type-keyed packet dispatch ([`PacketReceiver`])
//! - Domain session handling ([`DomainHandler`], [`SessionCoordinator`])
//! - A Tokio driver for the whole session ([`DomainClient`])
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       DomainClient                              │
//! │   (timers, socket receive loop, datagram admission)             │
//! ├─────────────────────────────────────────────────────────────────┤
//! │            SessionCoordinator  +  PacketReceiver                │
//! │   (domain check-ins, node list, pings / listener dispatch)      │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                       NodeRegistry                              │
//! │   (known nodes, packet verification, outbound sends)            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                 Frames / MessageAssembler                       │
//! │   (control word, message header, source id, HMAC tag)           │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! State changes the application may care about are published as
//! [`SessionEvent`]s on the channel returned by [`DomainClient::new`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod assembler;
pub mod config;
pub mod domain;
pub mod error;
pub mod events;
pub mod frame;
pub mod message;
pub mod node;
pub mod payload;
pub mod protocol;

pub use assembler::{DeliveryMode, MessageAssembler};
pub use config::{ClientConfig, IdentityConfig, NetworkConfig, SessionConfig};
pub use domain::{
    AccountServices, AnonymousAccount, ConnectReason, ConnectionRefusedReason, DomainClient,
    DomainHandler, PingType, SessionCoordinator, bind_udp,
};
pub use error::{ConfigError, Error, FrameError, ProtocolError, ReceiverError, Result};
pub use events::{EventReceiver, EventSender, SessionEvent, drain_events, event_channel};
pub use frame::{Frame, LocalId, MAX_PACKET_SIZE, NULL_LOCAL_ID, PacketPosition};
pub use message::ReceivedMessage;
pub use node::{
    Listener, NewNode, Node, NodeRegistry, NodeType, PacketReceiver, PacketSocket, Permissions,
};
pub use payload::{Endian, Payload, WireValue};
pub use protocol::{PacketType, protocol_version_signature};
