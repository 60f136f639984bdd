//! Inbound dispatch.
//!
//! [`PacketReceiver`] maps each packet type to at most one listener,
//! reassembles multi-frame messages and hands complete messages to the
//! listener together with a mutable context. Listeners that ask for pending
//! delivery get every frame of a multi-frame message as soon as it arrives.

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use tessera_transport::SocketAddress;
use uuid::Uuid;

use crate::error::ReceiverError;
use crate::frame::{Frame, LocalId};
use crate::message::ReceivedMessage;
use crate::protocol::PacketType;

/// Resolves a sender's local id to the UUID of a known node
pub trait SourceResolver {
    /// UUID of the node using `local_id`, if any
    fn resolve_source(&self, local_id: LocalId) -> Option<Uuid>;
}

/// Sourced listener callback
pub type SourcedCallback<C> = Box<dyn FnMut(&mut C, ReceivedMessage, Option<Uuid>) + Send>;

/// Unsourced listener callback
pub type UnsourcedCallback<C> = Box<dyn FnMut(&mut C, ReceivedMessage) + Send>;

/// A registered callback
pub enum Listener<C> {
    /// Called with the resolved sending node
    Sourced(SourcedCallback<C>),
    /// Called with the message only
    Unsourced(UnsourcedCallback<C>),
}

impl<C> Listener<C> {
    /// Wrap a callback that wants the sending node
    pub fn sourced<F>(f: F) -> Self
    where
        F: FnMut(&mut C, ReceivedMessage, Option<Uuid>) + Send + 'static,
    {
        Self::Sourced(Box::new(f))
    }

    /// Wrap a callback that only wants the message
    pub fn unsourced<F>(f: F) -> Self
    where
        F: FnMut(&mut C, ReceivedMessage) + Send + 'static,
    {
        Self::Unsourced(Box::new(f))
    }
}

impl<C> fmt::Debug for Listener<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sourced(_) => f.write_str("Listener::Sourced"),
            Self::Unsourced(_) => f.write_str("Listener::Unsourced"),
        }
    }
}

struct Registration<C> {
    listener: Listener<C>,
    deliver_pending: bool,
}

/// Receiver statistics
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReceiverStats {
    /// Messages handed to a listener
    pub dispatched: u64,
    /// Frames dropped for lack of a listener
    pub unhandled: u64,
    /// Partial messages dropped as stale or malformed
    pub discarded: u64,
}

/// Packet-type to listener dispatcher
pub struct PacketReceiver<C> {
    listeners: HashMap<PacketType, Registration<C>>,
    pending: HashMap<(SocketAddress, u32), ReceivedMessage>,
    stats: ReceiverStats,
}

impl<C: SourceResolver> PacketReceiver<C> {
    /// Receiver with no listeners
    #[must_use]
    pub fn new() -> Self {
        Self {
            listeners: HashMap::new(),
            pending: HashMap::new(),
            stats: ReceiverStats::default(),
        }
    }

    /// Register the listener for `packet_type`.
    ///
    /// # Errors
    /// Returns [`ReceiverError::DuplicateListener`] if the type already has one
    pub fn register_listener(
        &mut self,
        packet_type: PacketType,
        listener: Listener<C>,
        deliver_pending: bool,
    ) -> Result<(), ReceiverError> {
        if self.listeners.contains_key(&packet_type) {
            tracing::warn!("Listener for {} is already registered", packet_type);
            return Err(ReceiverError::DuplicateListener(packet_type));
        }
        self.listeners.insert(
            packet_type,
            Registration {
                listener,
                deliver_pending,
            },
        );
        Ok(())
    }

    /// Remove the listener for `packet_type`
    pub fn unregister_listener(&mut self, packet_type: PacketType) -> bool {
        self.listeners.remove(&packet_type).is_some()
    }

    /// Whether `packet_type` has a listener
    #[must_use]
    pub fn is_registered(&self, packet_type: PacketType) -> bool {
        self.listeners.contains_key(&packet_type)
    }

    /// Number of partially received messages
    #[must_use]
    pub fn pending_messages(&self) -> usize {
        self.pending.len()
    }

    /// Dispatch statistics
    #[must_use]
    pub fn stats(&self) -> &ReceiverStats {
        &self.stats
    }

    /// Route one accepted frame
    pub fn handle_frame(&mut self, ctx: &mut C, frame: Frame, sender: SocketAddress, now: Instant) {
        let packet_type = frame.packet_type();
        let Some(deliver_pending) = self.listeners.get(&packet_type).map(|r| r.deliver_pending) else {
            tracing::debug!("No listener for {} from {}, dropping", packet_type, sender);
            self.stats.unhandled += 1;
            return;
        };

        let Some(header) = frame.message() else {
            self.dispatch(ctx, ReceivedMessage::from_frame(frame, sender, now));
            return;
        };

        if deliver_pending {
            let complete = header.position.ends_message();
            self.dispatch(ctx, ReceivedMessage::from_frame(frame, sender, now));
            if complete {
                self.pending.remove(&(sender, header.number));
            }
            return;
        }

        let key = (sender, header.number);
        let complete = match self.pending.remove(&key) {
            Some(mut message) => {
                if let Err(e) = message.append(frame) {
                    tracing::warn!("Dropping message {} from {}: {}", header.number, sender, e);
                    self.stats.discarded += 1;
                    return;
                }
                message
            }
            None => ReceivedMessage::from_frame(frame, sender, now),
        };

        if complete.is_complete() {
            self.dispatch(ctx, complete);
        } else {
            self.pending.insert(key, complete);
        }
    }

    /// Drop partial messages whose first frame arrived more than `max_age` ago
    pub fn purge_stale_messages(&mut self, now: Instant, max_age: Duration) -> usize {
        let before = self.pending.len();
        self.pending
            .retain(|_, m| now.saturating_duration_since(m.first_receive_time()) <= max_age);
        let purged = before - self.pending.len();
        if purged > 0 {
            tracing::debug!("Purged {} stale partial messages", purged);
            self.stats.discarded += purged as u64;
        }
        purged
    }

    fn dispatch(&mut self, ctx: &mut C, message: ReceivedMessage) {
        let Some(registration) = self.listeners.get_mut(&message.packet_type()) else {
            return;
        };
        self.stats.dispatched += 1;
        match &mut registration.listener {
            Listener::Sourced(callback) => {
                let source = message.source_id().and_then(|id| ctx.resolve_source(id));
                callback(ctx, message, source);
            }
            Listener::Unsourced(callback) => callback(ctx, message),
        }
    }
}

impl<C: SourceResolver> Default for PacketReceiver<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> fmt::Debug for PacketReceiver<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketReceiver")
            .field("listeners", &self.listeners.len())
            .field("pending", &self.pending.len())
            .field("stats", &self.stats)
            .finish()
    }
}
