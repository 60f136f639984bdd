//! Peer identity and address selection.
//!
//! Every peer is reachable at up to two candidate addresses: the public one
//! the domain server saw and the local one the peer reported from its own
//! network. Exactly one of them, once a ping exchange or the configuration
//! says so, becomes the *active* address that traffic is sent to.

use tessera_transport::SocketAddress;
use uuid::Uuid;

use crate::frame::{LocalId, NULL_LOCAL_ID};

/// Which candidate address is active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressSlot {
    /// Address seen by the domain server
    Public,
    /// Address on the peer's own network
    Local,
}

/// A candidate address was replaced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressChange {
    /// Slot that changed
    pub slot: AddressSlot,
    /// Address before the change
    pub previous: SocketAddress,
    /// Address after the change
    pub current: SocketAddress,
}

/// Identity of a remote peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerIdentity {
    uuid: Uuid,
    local_id: LocalId,
    public_address: SocketAddress,
    local_address: SocketAddress,
    active: Option<AddressSlot>,
}

impl PeerIdentity {
    /// New peer with no active address
    #[must_use]
    pub fn new(uuid: Uuid, public_address: SocketAddress, local_address: SocketAddress) -> Self {
        Self {
            uuid,
            local_id: NULL_LOCAL_ID,
            public_address,
            local_address,
            active: None,
        }
    }

    /// Peer UUID
    #[must_use]
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Session local id
    #[must_use]
    pub fn local_id(&self) -> LocalId {
        self.local_id
    }

    /// Set the session local id
    pub fn set_local_id(&mut self, local_id: LocalId) {
        self.local_id = local_id;
    }

    /// Public candidate address
    #[must_use]
    pub fn public_address(&self) -> SocketAddress {
        self.public_address
    }

    /// Local candidate address
    #[must_use]
    pub fn local_address(&self) -> SocketAddress {
        self.local_address
    }

    /// Address in `slot`
    #[must_use]
    pub fn address(&self, slot: AddressSlot) -> SocketAddress {
        match slot {
            AddressSlot::Public => self.public_address,
            AddressSlot::Local => self.local_address,
        }
    }

    /// Slot of the active address
    #[must_use]
    pub fn active_slot(&self) -> Option<AddressSlot> {
        self.active
    }

    /// Address traffic is sent to, if one is active
    #[must_use]
    pub fn active_address(&self) -> Option<SocketAddress> {
        self.active.map(|slot| self.address(slot))
    }

    /// Whether either candidate equals `addr`
    #[must_use]
    pub fn has_address(&self, addr: &SocketAddress) -> bool {
        self.public_address == *addr || self.local_address == *addr
    }

    /// Replace the public address. See [`set_address`](Self::set_address).
    pub fn set_public_address(&mut self, addr: SocketAddress) -> Option<AddressChange> {
        self.set_address(AddressSlot::Public, addr)
    }

    /// Replace the local address. See [`set_address`](Self::set_address).
    pub fn set_local_address(&mut self, addr: SocketAddress) -> Option<AddressChange> {
        self.set_address(AddressSlot::Local, addr)
    }

    /// Replace the address in `slot`.
    ///
    /// If the slot was active it stops being active. Returns the change,
    /// except when nothing changed or the old value was unset (the first
    /// assignment is silent).
    pub fn set_address(&mut self, slot: AddressSlot, addr: SocketAddress) -> Option<AddressChange> {
        let previous = self.address(slot);
        if previous == addr {
            return None;
        }
        if self.active == Some(slot) {
            self.active = None;
        }
        match slot {
            AddressSlot::Public => self.public_address = addr,
            AddressSlot::Local => self.local_address = addr,
        }
        (!previous.is_null()).then_some(AddressChange {
            slot,
            previous,
            current: addr,
        })
    }

    /// Make the public address active. Returns `true` on an actual transition.
    pub fn activate_public_address(&mut self) -> bool {
        self.activate(AddressSlot::Public)
    }

    /// Make the local address active. Returns `true` on an actual transition.
    pub fn activate_local_address(&mut self) -> bool {
        self.activate(AddressSlot::Local)
    }

    /// Make `slot` active. Returns `true` on an actual transition.
    pub fn activate(&mut self, slot: AddressSlot) -> bool {
        if self.active == Some(slot) {
            return false;
        }
        self.active = Some(slot);
        tracing::debug!(
            "Activating {:?} address {} for peer {}",
            slot,
            self.address(slot),
            self.uuid
        );
        true
    }

    /// Forget which address is active
    pub fn reset_active(&mut self) {
        self.active = None;
    }
}
