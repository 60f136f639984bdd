//! Connection state with the domain server.
//!
//! [`DomainHandler`] tracks whether the domain has accepted this client,
//! counts check-ins the domain has not answered, and reacts to refusals.
//! It is either disconnected or connected; there is no separate connecting
//! state, a connect request simply goes unanswered until a domain list
//! arrives. The handler is reset and reused for the whole session.
//!
//! Operations that touch the node table or the socket take the
//! [`NodeRegistry`] explicitly; the handler never owns it.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use tessera_transport::SocketAddress;
use uuid::Uuid;

use super::account::AccountServices;
use super::messages::{ConnectReason, ConnectionDenied};
use crate::config::SessionConfig;
use crate::events::{EventSender, SessionEvent};
use crate::frame::{Frame, LocalId, NULL_LOCAL_ID};
use crate::node::NodeRegistry;
use crate::protocol::PacketType;

/// Connection state machine for the domain server
pub struct DomainHandler {
    domain_address: SocketAddress,
    domain_uuid: Uuid,
    domain_local_id: LocalId,
    is_connected: bool,
    connected_at: Option<Instant>,
    previous_uptime: Duration,
    connect_reason: ConnectReason,
    connection_token: Uuid,
    check_ins_without_reply: u32,
    escalated: bool,
    refusal_messages: HashSet<String>,
    login_denials: u32,
    access_token_requested: bool,
    pending_path: Option<String>,
    drop_threshold: u32,
    max_silent_check_ins: u32,
    keypair_regen_denials: u32,
    account: Box<dyn AccountServices>,
    events: EventSender,
}

impl DomainHandler {
    /// Disconnected handler with no domain address
    #[must_use]
    pub fn new(config: &SessionConfig, account: Box<dyn AccountServices>, events: EventSender) -> Self {
        Self {
            domain_address: SocketAddress::NULL,
            domain_uuid: Uuid::nil(),
            domain_local_id: NULL_LOCAL_ID,
            is_connected: false,
            connected_at: None,
            previous_uptime: Duration::ZERO,
            connect_reason: ConnectReason::Connect,
            connection_token: Uuid::nil(),
            check_ins_without_reply: 0,
            escalated: false,
            refusal_messages: HashSet::new(),
            login_denials: 0,
            access_token_requested: false,
            pending_path: None,
            drop_threshold: config.drop_threshold,
            max_silent_check_ins: config.max_silent_check_ins,
            keypair_regen_denials: config.keypair_regen_denials,
            account,
            events,
        }
    }

    /// Domain server address, null when unset
    #[must_use]
    pub fn domain_address(&self) -> SocketAddress {
        self.domain_address
    }

    /// Point the session at a domain server.
    ///
    /// Moving to a different address while a session exists hard-resets it
    /// first.
    pub fn set_domain_address(&mut self, registry: &mut NodeRegistry, addr: SocketAddress) {
        if addr == self.domain_address {
            return;
        }
        if !self.domain_address.is_null() {
            self.hard_reset(registry, "Changing domain address");
        }
        tracing::info!("Domain server address set to {}", addr);
        self.domain_address = addr;
        registry.set_domain_address(addr);
    }

    /// Domain UUID, nil until the first domain list
    #[must_use]
    pub fn domain_uuid(&self) -> Uuid {
        self.domain_uuid
    }

    /// Domain local id
    #[must_use]
    pub fn domain_local_id(&self) -> LocalId {
        self.domain_local_id
    }

    /// Record the domain's identity from its first domain list
    pub fn set_domain_info(&mut self, uuid: Uuid, local_id: LocalId) {
        self.domain_uuid = uuid;
        self.domain_local_id = local_id;
    }

    /// Whether the domain accepted this client
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.is_connected
    }

    /// Change the connected state.
    ///
    /// Events fire only on a transition, except that `force_disconnect`
    /// announces a disconnect even when already disconnected.
    pub fn set_is_connected(&mut self, connected: bool, force_disconnect: bool) {
        if self.is_connected == connected {
            if !connected && force_disconnect {
                self.events.emit(SessionEvent::DisconnectedFromDomain);
            }
            return;
        }
        self.is_connected = connected;

        if connected {
            self.connected_at = Some(Instant::now());
            tracing::info!("Connected to domain at {}", self.domain_address);
            self.events.emit(SessionEvent::ConnectedToDomain {
                domain: self.domain_address,
            });
        } else {
            if let Some(since) = self.connected_at.take() {
                self.previous_uptime = since.elapsed();
            }
            tracing::info!("Disconnected from domain at {}", self.domain_address);
            self.events.emit(SessionEvent::DisconnectedFromDomain);
        }
    }

    /// How long the previous connection lasted
    #[must_use]
    pub fn previous_uptime(&self) -> Duration {
        self.previous_uptime
    }

    /// Reason sent with the next connect request
    #[must_use]
    pub fn connect_reason(&self) -> ConnectReason {
        self.connect_reason
    }

    /// Set the reason sent with the next connect request
    pub fn set_connect_reason(&mut self, reason: ConnectReason) {
        self.connect_reason = reason;
    }

    /// Token issued by the domain, nil when none
    #[must_use]
    pub fn connection_token(&self) -> Uuid {
        self.connection_token
    }

    /// Store a token issued by the domain
    pub fn set_connection_token(&mut self, token: Uuid) {
        if self.connection_token == token {
            return;
        }
        self.connection_token = token;
        if !token.is_nil() {
            self.events.emit(SessionEvent::ConnectionTokenChanged(token));
        }
    }

    // ---- check-ins ----

    /// Check-ins sent since the domain last answered
    #[must_use]
    pub fn check_ins_without_reply(&self) -> u32 {
        self.check_ins_without_reply
    }

    /// Count one more check-in.
    ///
    /// From the drop threshold on, unreliable traffic to nodes other than the
    /// domain is suppressed. From the silence limit on, this returns `true`
    /// and the limit event fires the first time only.
    pub fn check_in_packet_timeout(&mut self, registry: &mut NodeRegistry) -> bool {
        self.check_ins_without_reply += 1;
        let count = self.check_ins_without_reply;
        if count > 1 {
            tracing::debug!("Silent domain check-ins: {}", count);
        }

        if count >= self.drop_threshold {
            registry.set_drop_outgoing_node_traffic(true);
        }

        if count >= self.max_silent_check_ins {
            if !self.escalated {
                self.escalated = true;
                tracing::warn!("Limit of silent domain check-ins reached");
                self.events.emit(SessionEvent::LimitOfSilentDomainCheckInsReached);
            }
            return true;
        }
        false
    }

    /// Whether the silence limit was reached since the domain last answered
    #[must_use]
    pub fn silent_limit_reached(&self) -> bool {
        self.escalated
    }

    /// Copies of the next check-in to send.
    ///
    /// `2^(n-2)` for `n` unanswered check-ins, capped, and one copy while
    /// at most one went unanswered.
    #[must_use]
    pub fn check_in_copies(&self, max_copies: u32) -> u32 {
        let n = self.check_ins_without_reply;
        if n <= 1 {
            return 1;
        }
        1u32.checked_shl(n - 2).unwrap_or(u32::MAX).min(max_copies)
    }

    /// The domain answered: reset the silence counter and resume node traffic
    pub fn clear_pending_check_ins(&mut self, registry: &mut NodeRegistry) {
        self.check_ins_without_reply = 0;
        self.escalated = false;
        registry.set_drop_outgoing_node_traffic(false);
    }

    // ---- refusals ----

    /// React to a connection denial
    pub fn process_connection_denied(&mut self, denied: ConnectionDenied) {
        if self.refusal_messages.insert(denied.message.clone()) {
            tracing::warn!(
                "Domain refused connection ({:?}): {}",
                denied.reason,
                denied.message
            );
            self.events.emit(SessionEvent::DomainConnectionRefused {
                message: denied.message,
                reason: denied.reason,
                extra_info: denied.extra_info,
            });
        }

        if denied.reason.requires_metaverse_login() {
            if !self.access_token_requested {
                self.access_token_requested = true;
                self.account.check_and_signal_for_access_token();
            }

            self.login_denials += 1;
            if self.login_denials >= self.keypair_regen_denials {
                tracing::info!(
                    "{} login denials, generating a new keypair",
                    self.login_denials
                );
                self.account.generate_new_user_keypair();
                self.login_denials = 0;
            }
        } else if denied.reason.requires_domain_login() {
            tracing::warn!("Domain login is not yet implemented; {:?}", denied.reason);
        }
    }

    /// Login denials since the keypair was last regenerated
    #[must_use]
    pub fn login_denials(&self) -> u32 {
        self.login_denials
    }

    // ---- path queries ----

    /// Path waiting to be sent once connected
    #[must_use]
    pub fn pending_path(&self) -> Option<&str> {
        self.pending_path.as_deref()
    }

    /// Remember a path to query once connected
    pub fn set_pending_path(&mut self, path: impl Into<String>) {
        self.pending_path = Some(path.into());
    }

    /// Drop the pending path if it is `path`
    pub fn clear_pending_path_if(&mut self, path: &str) -> bool {
        if self.pending_path.as_deref() == Some(path) {
            self.pending_path = None;
            return true;
        }
        false
    }

    // ---- teardown ----

    /// Leave the domain.
    ///
    /// Tells the domain when connected and releases the transport channel
    /// to it, forgets the session identity and the refusal history, then
    /// marks the handler disconnected. The disconnect event always fires so
    /// a negotiation that never completed is torn down too.
    pub fn disconnect(&mut self, registry: &mut NodeRegistry, reason: &str) {
        tracing::info!("Disconnecting from domain: {}", reason);
        if self.is_connected {
            let frame = Frame::create(PacketType::DomainDisconnectRequest);
            registry.send_to_address(frame, self.domain_address);
        }
        if !self.domain_address.is_null() {
            registry.socket_mut().cleanup_channel(&self.domain_address);
        }

        self.domain_uuid = Uuid::nil();
        self.domain_local_id = NULL_LOCAL_ID;
        registry.set_session_uuid(Uuid::nil());
        registry.set_session_local_id(NULL_LOCAL_ID);
        self.connection_token = Uuid::nil();
        self.refusal_messages.clear();

        self.set_is_connected(false, true);
    }

    /// Disconnect and zero the counters
    pub fn soft_reset(&mut self, registry: &mut NodeRegistry, reason: &str) {
        self.disconnect(registry, reason);
        self.login_denials = 0;
        self.check_ins_without_reply = 0;
        self.escalated = false;
    }

    /// Soft reset, then forget the domain entirely
    pub fn hard_reset(&mut self, registry: &mut NodeRegistry, reason: &str) {
        self.soft_reset(registry, reason);
        tracing::debug!("Hard reset of domain handler: {}", reason);
        self.domain_address = SocketAddress::NULL;
        registry.set_domain_address(SocketAddress::NULL);
        self.refusal_messages.clear();
        self.pending_path = None;
        self.access_token_requested = false;
    }
}

impl std::fmt::Debug for DomainHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DomainHandler")
            .field("domain_address", &self.domain_address)
            .field("is_connected", &self.is_connected)
            .field("check_ins_without_reply", &self.check_ins_without_reply)
            .finish_non_exhaustive()
    }
}
