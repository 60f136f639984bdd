//! Session events.
//!
//! Everything the embedding application may want to react to is published
//! as a [`SessionEvent`] on an unbounded Tokio channel. Each event is sent
//! once per actual state transition; repeating a call that changes nothing
//! sends nothing.

use tessera_transport::SocketAddress;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::domain::messages::ConnectionRefusedReason;
use crate::frame::LocalId;
use crate::node::NodeType;
use crate::protocol::PacketType;

/// Something that happened to the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The domain accepted the session
    ConnectedToDomain {
        /// Domain server address
        domain: SocketAddress,
    },
    /// The session with the domain ended
    DisconnectedFromDomain,
    /// The domain refused a connect request. Sent once per distinct message.
    DomainConnectionRefused {
        /// Text sent by the domain
        message: String,
        /// Reason code
        reason: ConnectionRefusedReason,
        /// Extra detail sent by the domain
        extra_info: String,
    },
    /// Too many check-ins went unanswered
    LimitOfSilentDomainCheckInsReached,
    /// A node joined the registry
    NodeAdded {
        /// Node UUID
        uuid: Uuid,
        /// Node role
        node_type: NodeType,
    },
    /// A node got its first active address
    NodeActivated {
        /// Node UUID
        uuid: Uuid,
        /// Node role
        node_type: NodeType,
        /// Address now in use
        address: SocketAddress,
    },
    /// A node left the registry
    NodeKilled {
        /// Node UUID
        uuid: Uuid,
        /// Node role
        node_type: NodeType,
    },
    /// One of a node's candidate addresses changed
    NodeSocketChanged {
        /// Node UUID
        uuid: Uuid,
        /// Address before
        previous: SocketAddress,
        /// Address after
        current: SocketAddress,
    },
    /// A packet arrived with a version other than the one this client speaks
    PacketVersionMismatch {
        /// Packet type
        packet_type: PacketType,
        /// Sending address
        sender: SocketAddress,
        /// Sending node, when it could be resolved
        source: Option<Uuid>,
    },
    /// The domain answered a path query
    DomainPathResponse {
        /// Path that was queried
        path: String,
        /// Viewpoint the path resolves to
        viewpoint: String,
    },
    /// This client's session local id changed
    LocalIdChanged(LocalId),
    /// This client's session UUID changed
    UuidChanged {
        /// UUID before
        previous: Uuid,
        /// UUID after
        current: Uuid,
    },
    /// The domain issued a new connection token
    ConnectionTokenChanged(Uuid),
}

/// Receiving half handed to the embedding application
pub type EventReceiver = mpsc::UnboundedReceiver<SessionEvent>;

/// Sending half shared by the registry and the domain handler
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl EventSender {
    /// Publish `event`. A dropped receiver is not an error.
    pub fn emit(&self, event: SessionEvent) {
        tracing::trace!("Session event: {:?}", event);
        let _ = self.tx.send(event);
    }
}

/// Create a connected sender/receiver pair
#[must_use]
pub fn event_channel() -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender { tx }, rx)
}

/// Drain every event currently queued, without waiting
pub fn drain_events(rx: &mut EventReceiver) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
