//! The client driver.
//!
//! [`DomainClient`] ties the [`SessionCoordinator`] to a [`PacketReceiver`]
//! with the domain listeners installed. [`process_datagram`] and [`tick`]
//! are synchronous and take the current time, so the whole client can be
//! driven by hand in tests. [`run`] is the Tokio loop that feeds them from
//! a UDP socket and a timer, owning all state in one task.
//!
//! [`process_datagram`]: DomainClient::process_datagram
//! [`tick`]: DomainClient::tick
//! [`run`]: DomainClient::run

use std::time::{Duration, Instant};

use tessera_transport::{SocketAddress, Transport, TransportError, UdpTransport};
use tokio::sync::oneshot;

use super::account::AccountServices;
use super::coordinator::SessionCoordinator;
use crate::config::ClientConfig;
use crate::error::{ReceiverError, Result};
use crate::events::{EventReceiver, event_channel};
use crate::frame::{Frame, MAX_PACKET_SIZE};
use crate::node::{Listener, PacketReceiver, PacketSocket};
use crate::protocol::PacketType;

/// A client session with one domain
pub struct DomainClient {
    coordinator: SessionCoordinator,
    receiver: PacketReceiver<SessionCoordinator>,
    next_check_in: Instant,
    next_ping_punch: Instant,
    next_silent_sweep: Instant,
}

impl DomainClient {
    /// Client sending through `transport`, plus the receiving end of its
    /// event channel
    ///
    /// # Errors
    /// Returns [`Error::Receiver`](crate::Error::Receiver) if the domain
    /// listeners cannot be installed
    pub fn new(
        transport: Box<dyn Transport>,
        config: ClientConfig,
        account: Box<dyn AccountServices>,
    ) -> Result<(Self, EventReceiver)> {
        let (events, rx) = event_channel();
        let coordinator = SessionCoordinator::new(PacketSocket::new(transport), config, account, events);
        let mut receiver = PacketReceiver::new();
        register_domain_listeners(&mut receiver)?;

        let now = Instant::now();
        let client = Self {
            coordinator,
            receiver,
            next_check_in: now,
            next_ping_punch: now,
            next_silent_sweep: now,
        };
        Ok((client, rx))
    }

    /// The session coordinator
    #[must_use]
    pub fn coordinator(&self) -> &SessionCoordinator {
        &self.coordinator
    }

    /// The session coordinator, mutably
    pub fn coordinator_mut(&mut self) -> &mut SessionCoordinator {
        &mut self.coordinator
    }

    /// Install an application listener
    ///
    /// # Errors
    /// Returns [`ReceiverError::DuplicateListener`] if the type is taken
    pub fn register_listener(
        &mut self,
        packet_type: PacketType,
        listener: Listener<SessionCoordinator>,
        deliver_pending: bool,
    ) -> std::result::Result<(), ReceiverError> {
        self.receiver
            .register_listener(packet_type, listener, deliver_pending)
    }

    /// Point the session at a domain server
    pub fn set_domain_address(&mut self, addr: SocketAddress) {
        self.coordinator.set_domain_address(addr);
    }

    /// Ask the domain where `path` leads
    pub fn send_path_query(&mut self, path: &str) {
        self.coordinator.send_path_query(path);
    }

    /// Handle one datagram from `from`.
    ///
    /// Unknown senders, undecodable frames and frames the accept filter
    /// rejects are dropped here; everything else reaches its listener.
    pub fn process_datagram(&mut self, bytes: Vec<u8>, from: SocketAddress, now: Instant) {
        let registry = self.coordinator.registry_mut();
        if !registry.admit_inbound(&from) {
            tracing::trace!("Dropping datagram from unknown sender {}", from);
            return;
        }

        let frame = match Frame::from_received(bytes) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!("Undecodable datagram from {}: {}", from, e);
                return;
            }
        };

        if !registry.is_packet_verified(&frame, from, now) {
            return;
        }
        self.receiver
            .handle_frame(&mut self.coordinator, frame, from, now);
    }

    /// Run whatever periodic work is due at `now`
    pub fn tick(&mut self, now: Instant) {
        let session = self.coordinator.config().session.clone();

        if now >= self.next_check_in {
            self.coordinator.send_domain_server_check_in();
            self.next_check_in = now + session.check_in_interval();
        }

        if !session.activate_public_immediately && now >= self.next_ping_punch {
            self.coordinator.ping_punch_inactive_nodes();
            self.next_ping_punch = now + session.ping_punch_interval();
        }

        if now >= self.next_silent_sweep {
            self.coordinator.remove_silent_nodes(now);
            self.receiver
                .purge_stale_messages(now, session.silent_node_threshold());
            self.next_silent_sweep = now + session.check_in_interval();
        }
    }

    /// Leave the domain
    pub fn disconnect(&mut self, reason: &str) {
        self.coordinator.disconnect(reason);
    }

    /// Drive the client from `socket` until `shutdown` fires or the socket
    /// closes, then disconnect.
    ///
    /// `socket` must be the receiving side of the transport the client
    /// sends through.
    ///
    /// # Errors
    /// Currently always returns `Ok`; receive errors are logged and skipped
    pub async fn run(mut self, socket: UdpTransport, mut shutdown: oneshot::Receiver<()>) -> Result<()> {
        let session = &self.coordinator.config().session;
        let period = if session.activate_public_immediately {
            session.check_in_interval()
        } else {
            session.ping_punch_interval().min(session.check_in_interval())
        };
        let mut ticker = tokio::time::interval(period.max(Duration::from_millis(1)));
        let mut buf = vec![0u8; MAX_PACKET_SIZE];

        tracing::info!("Domain client running");
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Domain client shutting down");
                    break;
                }
                received = socket.recv_from(&mut buf) => match received {
                    Ok((len, from)) => {
                        self.process_datagram(buf[..len].to_vec(), from, Instant::now());
                    }
                    Err(TransportError::Closed) => break,
                    Err(e) => tracing::debug!("Receive error: {}", e),
                },
                _ = ticker.tick() => self.tick(Instant::now()),
            }
        }

        self.disconnect("Client shut down");
        Ok(())
    }
}

impl std::fmt::Debug for DomainClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DomainClient")
            .field("coordinator", &self.coordinator)
            .field("receiver", &self.receiver)
            .finish_non_exhaustive()
    }
}

fn register_domain_listeners(
    receiver: &mut PacketReceiver<SessionCoordinator>,
) -> std::result::Result<(), ReceiverError> {
    receiver.register_listener(
        PacketType::DomainList,
        Listener::unsourced(SessionCoordinator::process_domain_list),
        false,
    )?;
    receiver.register_listener(
        PacketType::DomainServerAddedNode,
        Listener::unsourced(SessionCoordinator::process_added_node),
        false,
    )?;
    receiver.register_listener(
        PacketType::DomainServerRemovedNode,
        Listener::unsourced(SessionCoordinator::process_removed_node),
        false,
    )?;
    receiver.register_listener(
        PacketType::DomainConnectionDenied,
        Listener::unsourced(SessionCoordinator::process_connection_denied),
        false,
    )?;
    receiver.register_listener(
        PacketType::DomainServerConnectionToken,
        Listener::unsourced(SessionCoordinator::process_connection_token),
        false,
    )?;
    receiver.register_listener(
        PacketType::DomainServerPathResponse,
        Listener::unsourced(SessionCoordinator::process_path_response),
        false,
    )?;
    receiver.register_listener(
        PacketType::Ping,
        Listener::sourced(SessionCoordinator::process_ping),
        false,
    )?;
    receiver.register_listener(
        PacketType::PingReply,
        Listener::sourced(SessionCoordinator::process_ping_reply),
        false,
    )
}

/// Bind the UDP transport described by `config`
///
/// # Errors
/// Returns a config error for a bad bind address, or the transport's error
/// if binding fails
pub async fn bind_udp(config: &ClientConfig) -> Result<UdpTransport> {
    let addr = config.parse_bind_addr()?;
    let transport = UdpTransport::bind_with_config(addr, &config.transport_config()).await?;
    Ok(transport)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::account::AnonymousAccount;
    use crate::domain::messages::{DomainList, NodeRecord};
    use crate::events::{SessionEvent, drain_events};
    use crate::message::ReceivedMessage;
    use crate::node::{NodeType, Permissions};
    use std::sync::{Arc, Mutex};
    use tessera_transport::MemoryNetwork;
    use uuid::Uuid;

    const CLIENT: &str = "10.0.0.1:50000";
    const DOMAIN: &str = "10.0.0.100:40102";

    fn addr(s: &str) -> SocketAddress {
        SocketAddress::udp(s.parse().unwrap())
    }

    fn client(network: &MemoryNetwork) -> (DomainClient, EventReceiver) {
        let transport = network.bind(addr(CLIENT));
        let (mut client, rx) =
            DomainClient::new(Box::new(transport), ClientConfig::default(), Box::new(AnonymousAccount)).unwrap();
        client.set_domain_address(addr(DOMAIN));
        (client, rx)
    }

    fn list_bytes(nodes: Vec<NodeRecord>) -> Vec<u8> {
        DomainList {
            domain_uuid: Uuid::new_v4(),
            domain_local_id: 1,
            session_uuid: Uuid::new_v4(),
            session_local_id: 8,
            permissions: Permissions::none(),
            is_authenticated: false,
            connect_request_timestamp: 0,
            domain_send_time: 0,
            check_in_processing_time: 0,
            new_connection: true,
            nodes,
        }
        .encode()
        .unwrap()
        .to_wire()
    }

    #[test]
    fn test_tick_schedules_check_ins() {
        let network = MemoryNetwork::new();
        let _domain = network.bind(addr(DOMAIN));
        let (mut client, _rx) = client(&network);

        let start = Instant::now();
        client.tick(start);
        assert_eq!(network.pending(&addr(DOMAIN)), 1);
        client.tick(start + Duration::from_millis(500));
        assert_eq!(network.pending(&addr(DOMAIN)), 1);
        client.tick(start + Duration::from_millis(1000));
        assert_eq!(network.pending(&addr(DOMAIN)), 2);
    }

    #[test]
    fn test_datagram_from_domain_connects() {
        let network = MemoryNetwork::new();
        let (mut client, mut rx) = client(&network);

        client.process_datagram(list_bytes(Vec::new()), addr(DOMAIN), Instant::now());
        assert!(client.coordinator().is_connected());
        assert!(drain_events(&mut rx).contains(&SessionEvent::ConnectedToDomain { domain: addr(DOMAIN) }));
    }

    #[test]
    fn test_datagram_from_stranger_dropped() {
        let network = MemoryNetwork::new();
        let (mut client, _rx) = client(&network);

        client.process_datagram(list_bytes(Vec::new()), addr("6.6.6.6:6"), Instant::now());
        assert!(!client.coordinator().is_connected());

        client.process_datagram(vec![0, 1], addr(DOMAIN), Instant::now());
        assert!(!client.coordinator().is_connected());
    }

    #[test]
    fn test_application_listener_and_silent_sweep() {
        let network = MemoryNetwork::new();
        let (mut client, mut rx) = client(&network);
        let mixer = NodeRecord {
            node_type: NodeType::EntityServer,
            uuid: Uuid::new_v4(),
            public_address: addr("1.1.1.1:1"),
            local_address: addr("192.168.0.4:4"),
            permissions: Permissions::none(),
            is_replicated: false,
            local_id: 21,
            connection_secret: Uuid::nil(),
        };
        let start = Instant::now();
        client.process_datagram(list_bytes(vec![mixer.clone()]), addr(DOMAIN), start);

        let heard = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&heard);
        client
            .register_listener(
                PacketType::EntityData,
                Listener::sourced(move |_: &mut SessionCoordinator, message: ReceivedMessage, source| {
                    sink.lock().unwrap().push((message.size(), source));
                }),
                false,
            )
            .unwrap();
        assert!(client
            .register_listener(PacketType::Ping, Listener::unsourced(|_: &mut SessionCoordinator, _| {}), false)
            .is_err());

        let mut frame = Frame::create(PacketType::EntityData);
        frame.set_source_id(21);
        frame.write(&[1, 2]).unwrap();
        client.process_datagram(frame.to_wire(), addr("1.1.1.1:1"), start + Duration::from_secs(5));
        assert_eq!(*heard.lock().unwrap(), vec![(2, Some(mixer.uuid))]);

        drain_events(&mut rx);
        client.tick(start + Duration::from_secs(12));
        assert_eq!(client.coordinator().registry().node_count(), 1);
        client.tick(start + Duration::from_secs(16));
        assert_eq!(client.coordinator().registry().node_count(), 0);
        assert!(drain_events(&mut rx)
            .iter()
            .any(|e| matches!(e, SessionEvent::NodeKilled { uuid, .. } if *uuid == mixer.uuid)));
    }

    #[tokio::test]
    async fn test_run_over_udp_until_shutdown() {
        let domain = UdpTransport::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let domain_addr = domain.local_addr().unwrap();

        let mut config = ClientConfig::default();
        config.network.bind_addr = "127.0.0.1:0".to_string();
        let udp = bind_udp(&config).await.unwrap();
        let (mut client, _rx) = DomainClient::new(Box::new(udp.clone()), config, Box::new(AnonymousAccount)).unwrap();
        client.set_domain_address(domain_addr);

        let (stop, shutdown) = oneshot::channel();
        let task = tokio::spawn(client.run(udp, shutdown));

        let mut buf = vec![0u8; MAX_PACKET_SIZE];
        let (len, _) = tokio::time::timeout(Duration::from_secs(5), domain.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        let frame = Frame::from_received(buf[..len].to_vec()).unwrap();
        assert_eq!(frame.packet_type(), PacketType::DomainConnectRequest);

        stop.send(()).unwrap();
        task.await.unwrap().unwrap();
    }
}
