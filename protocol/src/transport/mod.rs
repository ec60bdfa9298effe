//! # Transport Fabric
//!
//! UDP datagram send/receive, service discovery, and peer-set
//! maintenance. Every Cinder node, peer or coordinator, rides on one
//! [`Transport`].
//!
//! The transport owns the socket and the peer set; the role controller
//! owns everything else. Received messages flow to the controller
//! through a bounded channel; the controller drives `receive` at its
//! loop cadence with a 1 ms read deadline, so a quiet network costs at
//! most 1 ms per tick.
//!
//! Delivery guarantees are UDP's: none. The round protocol tolerates
//! loss by re-opening rounds on the next enqueued transaction.

pub mod discovery;

use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use crate::config;
use crate::wire::{self, Command, Message, Payload, PeerAddress};
use discovery::{Discovery, DiscoveryMode};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Transport-level failures. Bind and discovery failures are fatal at
/// startup; send/receive failures are transient and logged by callers.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to bind UDP socket: {0}")]
    Bind(#[source] io::Error),

    #[error("datagram receive failed: {0}")]
    Recv(#[source] io::Error),

    #[error("datagram send failed: {0}")]
    Send(#[source] io::Error),

    #[error(transparent)]
    Codec(#[from] wire::CodecError),

    #[error("service discovery failed: {0}")]
    Discovery(String),
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// How a transport binds, discovers, and ages out peers.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Interface address to bind and advertise. Loopback by default,
    /// which is where development networks live.
    pub bind_ip: IpAddr,
    /// Fixed port (the coordinator's well-known port) or `None` for an
    /// ephemeral one.
    pub port: Option<u16>,
    /// The port that identifies the coordinator among discovered peers.
    pub coordinator_port: u16,
    /// Peers silent this long are evicted by [`Transport::prune`].
    pub liveness_timeout: Duration,
    /// How long initialization browses for existing peers.
    pub discovery_window: Duration,
    /// mDNS registration/browse, or disabled for manually seeded nets.
    pub discovery: DiscoveryMode,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            bind_ip: IpAddr::from([127, 0, 0, 1]),
            port: None,
            coordinator_port: config::COORDINATOR_UDP_PORT,
            liveness_timeout: config::LIVENESS_TIMEOUT,
            discovery_window: config::DISCOVERY_WINDOW,
            discovery: DiscoveryMode::Mdns,
        }
    }
}

// ---------------------------------------------------------------------------
// Peer Set
// ---------------------------------------------------------------------------

/// The set of known live peers, keyed by `(ip, port)`. Never contains
/// the local address.
#[derive(Debug)]
pub struct PeerSet {
    entries: HashMap<PeerAddress, DateTime<Utc>>,
    local: PeerAddress,
    liveness_timeout: Duration,
}

impl PeerSet {
    pub fn new(local: PeerAddress, liveness_timeout: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            local,
            liveness_timeout,
        }
    }

    /// Records activity from `peer` at `now`, inserting it if unknown.
    /// The local address is never inserted.
    pub fn touch(&mut self, peer: PeerAddress, now: DateTime<Utc>) {
        if peer == self.local {
            return;
        }
        if self.entries.insert(peer, now).is_none() {
            info!(%peer, "new peer joined the set");
        }
    }

    /// Evicts every peer silent for at least the liveness timeout.
    /// Returns the evicted addresses.
    pub fn prune(&mut self, now: DateTime<Utc>) -> Vec<PeerAddress> {
        let timeout = match chrono::Duration::from_std(self.liveness_timeout) {
            Ok(timeout) => timeout,
            Err(_) => return Vec::new(),
        };
        let dead: Vec<PeerAddress> = self
            .entries
            .iter()
            .filter(|(_, last_seen)| now - **last_seen >= timeout)
            .map(|(peer, _)| *peer)
            .collect();
        for peer in &dead {
            self.entries.remove(peer);
            info!(%peer, "pruned silent peer");
        }
        dead
    }

    pub fn contains(&self, peer: &PeerAddress) -> bool {
        self.entries.contains_key(peer)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn addresses(&self) -> Vec<PeerAddress> {
        self.entries.keys().copied().collect()
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// The UDP socket plus everything needed to speak the wire protocol:
/// the peer set, the coordinator's discovered address, and the bounded
/// inbox feeding the role controller.
pub struct Transport {
    socket: UdpSocket,
    local: PeerAddress,
    peers: PeerSet,
    middleware: Option<PeerAddress>,
    inbox: mpsc::Sender<Message>,
    discovery: Discovery,
    coordinator_port: u16,
    read_buf: Vec<u8>,
}

impl Transport {
    /// Binds the socket, registers on the service domain, and browses
    /// for existing peers for the configured discovery window.
    ///
    /// Returns the transport and the receiving end of its inbox. The
    /// discovery browse takes the full window but runs on the blocking
    /// thread pool, so runtime workers stay free during startup.
    pub async fn initialize(
        config: TransportConfig,
    ) -> Result<(Self, mpsc::Receiver<Message>), TransportError> {
        let bind_addr = SocketAddr::new(config.bind_ip, config.port.unwrap_or(0));
        let socket = UdpSocket::bind(bind_addr).await.map_err(TransportError::Bind)?;
        let port = socket.local_addr().map_err(TransportError::Bind)?.port();
        let local = PeerAddress::new(config.bind_ip, port);

        info!(%local, "transport bound");

        let discovery = Discovery::start(config.discovery, local)?;

        // The mDNS browse is a synchronous receive loop; park it on the
        // blocking pool rather than a runtime worker thread.
        let window = config.discovery_window;
        let (discovery, discovered) = tokio::task::spawn_blocking(move || {
            let found = discovery.browse(window, local);
            (discovery, found)
        })
        .await
        .map_err(|e| TransportError::Discovery(e.to_string()))?;
        let discovered = discovered?;

        let mut peers = PeerSet::new(local, config.liveness_timeout);
        let mut middleware = None;
        let now = Utc::now();
        for peer in discovered {
            peers.touch(peer, now);
            if peer.is_coordinator(config.coordinator_port) {
                info!(%peer, "discovered coordinator");
                middleware = Some(peer);
            }
        }

        let (inbox_tx, inbox_rx) = mpsc::channel(crate::config::INBOX_CAPACITY);

        Ok((
            Self {
                socket,
                local,
                peers,
                middleware,
                inbox: inbox_tx,
                discovery,
                coordinator_port: config.coordinator_port,
                read_buf: vec![0u8; crate::config::MAX_DATAGRAM_BYTES],
            },
            inbox_rx,
        ))
    }

    /// Reads a single datagram and pushes the decoded message onto the
    /// inbox. With `with_timeout`, a 1 ms read deadline applies and
    /// deadline expiry is not an error. Decode failures are logged and
    /// dropped; only socket errors surface.
    pub async fn receive(&mut self, with_timeout: bool) -> Result<(), TransportError> {
        let received = if with_timeout {
            match timeout(config::READ_DEADLINE, self.socket.recv_from(&mut self.read_buf)).await {
                Err(_elapsed) => return Ok(()),
                Ok(received) => received,
            }
        } else {
            self.socket.recv_from(&mut self.read_buf).await
        };
        let (len, _) = received.map_err(TransportError::Recv)?;

        let message = match wire::decode(&self.read_buf[..len]) {
            Ok(message) => message,
            Err(error) => {
                warn!(%error, "dropping undecodable datagram");
                return Ok(());
            }
        };

        let sender = message.from.address;
        self.peers.touch(sender, Utc::now());
        if self.middleware.is_none() && sender.is_coordinator(self.coordinator_port) {
            info!(peer = %sender, "learned coordinator address from traffic");
            self.middleware = Some(sender);
        }

        trace!(command = %message.command, from = %sender, "received message");
        match self.inbox.try_send(message) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(message)) => {
                warn!(command = %message.command, "inbox full, dropping message");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("inbox closed, controller is shutting down");
            }
        }
        Ok(())
    }

    /// Builds an envelope from this node, stamped now.
    pub fn generate_message(&self, command: Command, data: Option<Payload>) -> Message {
        Message::new(self.local, command, data)
    }

    /// Sends to every known peer. Per-peer failures are logged and the
    /// loop continues; one dead peer must not wedge a broadcast. Only a
    /// message generation (encode) failure is reported to the caller.
    pub async fn broadcast(&mut self, message: &Message) -> Result<(), TransportError> {
        let bytes = wire::encode(message)?;
        for peer in self.peers.addresses() {
            if let Err(error) = self.socket.send_to(&bytes, peer.socket_addr()).await {
                warn!(%peer, %error, "broadcast send failed");
            }
        }
        Ok(())
    }

    /// Sends to a single peer.
    pub async fn send_to(
        &self,
        message: &Message,
        peer: PeerAddress,
    ) -> Result<(), TransportError> {
        let bytes = wire::encode(message)?;
        self.socket
            .send_to(&bytes, peer.socket_addr())
            .await
            .map_err(TransportError::Send)?;
        trace!(command = %message.command, to = %peer, "sent message");
        Ok(())
    }

    /// Broadcasts a PING so peers refresh this node's liveness entry.
    pub async fn ping_network(&mut self) {
        let ping = self.generate_message(Command::Ping, None);
        if let Err(error) = self.broadcast(&ping).await {
            warn!(%error, "failed to ping network");
        }
    }

    /// Evicts peers past the liveness timeout. Clears the coordinator
    /// pointer if the coordinator itself went silent.
    pub fn prune(&mut self) {
        let dead = self.peers.prune(Utc::now());
        if let Some(middleware) = self.middleware {
            if dead.contains(&middleware) {
                warn!(peer = %middleware, "coordinator went silent");
                self.middleware = None;
            }
        }
    }

    /// Deregisters from the service domain. The socket closes on drop.
    pub fn terminate(&mut self) {
        info!(local = %self.local, "transport terminating");
        self.discovery.shutdown();
    }

    /// Manually seeds a peer, for discovery-disabled deployments.
    pub fn add_peer(&mut self, peer: PeerAddress) {
        self.peers.touch(peer, Utc::now());
        if self.middleware.is_none() && peer.is_coordinator(self.coordinator_port) {
            self.middleware = Some(peer);
        }
    }

    pub fn local_address(&self) -> PeerAddress {
        self.local
    }

    pub fn middleware_peer(&self) -> Option<PeerAddress> {
        self.middleware
    }

    /// The well-known port this transport treats as the coordinator.
    pub fn coordinator_port(&self) -> u16 {
        self.coordinator_port
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn peer_addresses(&self) -> Vec<PeerAddress> {
        self.peers.addresses()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::Transaction;

    fn test_config(coordinator_port: u16) -> TransportConfig {
        TransportConfig {
            coordinator_port,
            discovery: DiscoveryMode::Disabled,
            ..TransportConfig::default()
        }
    }

    fn addr(port: u16) -> PeerAddress {
        PeerAddress::new("127.0.0.1".parse().unwrap(), port)
    }

    #[test]
    fn peer_set_never_contains_self() {
        let mut set = PeerSet::new(addr(9000), config::LIVENESS_TIMEOUT);
        set.touch(addr(9000), Utc::now());
        assert!(set.is_empty());
        set.touch(addr(9001), Utc::now());
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn peer_set_prunes_silent_peers() {
        let mut set = PeerSet::new(addr(9000), Duration::from_secs(75));
        let now = Utc::now();
        set.touch(addr(9001), now - chrono::Duration::seconds(76));
        set.touch(addr(9002), now - chrono::Duration::seconds(10));

        let dead = set.prune(now);
        assert_eq!(dead, vec![addr(9001)]);
        assert_eq!(set.len(), 1);
        assert!(set.contains(&addr(9002)));
    }

    #[test]
    fn peer_set_prunes_at_exact_timeout_boundary() {
        let mut set = PeerSet::new(addr(9000), Duration::from_secs(75));
        let now = Utc::now();
        set.touch(addr(9001), now - chrono::Duration::seconds(75));
        assert_eq!(set.prune(now).len(), 1);
    }

    #[tokio::test]
    async fn datagram_roundtrip_between_two_transports() {
        let (mut a, _rx_a) = Transport::initialize(test_config(1)).await.unwrap();
        let (mut b, mut rx_b) = Transport::initialize(test_config(1)).await.unwrap();

        let tx = Transaction::new("x:1", "y:2", 2);
        let msg = a.generate_message(Command::Mine, Some(Payload::Transaction(tx)));
        a.send_to(&msg, b.local_address()).await.unwrap();

        // Drive b's receive until the datagram lands.
        for _ in 0..200 {
            b.receive(true).await.unwrap();
            if let Ok(received) = rx_b.try_recv() {
                assert_eq!(received.command, Command::Mine);
                assert_eq!(received.from.address, a.local_address());
                // Receiving also registered the sender as a peer.
                assert!(b.peer_count() == 1);
                return;
            }
        }
        panic!("datagram never arrived");
    }

    #[tokio::test]
    async fn receive_timeout_expiry_is_not_an_error() {
        let (mut t, _rx) = Transport::initialize(test_config(1)).await.unwrap();
        t.receive(true).await.unwrap();
    }

    #[tokio::test]
    async fn undecodable_datagram_is_dropped_not_fatal() {
        let (mut a, _rx_a) = Transport::initialize(test_config(1)).await.unwrap();
        let (mut b, mut rx_b) = Transport::initialize(test_config(1)).await.unwrap();

        let raw = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        raw.send_to(b"{not json", b.local_address().socket_addr())
            .await
            .unwrap();

        for _ in 0..200 {
            b.receive(true).await.unwrap();
        }
        assert!(rx_b.try_recv().is_err());
        assert_eq!(b.peer_count(), 0);

        // A valid message still gets through afterwards.
        let msg = a.generate_message(Command::Ping, None);
        a.send_to(&msg, b.local_address()).await.unwrap();
        for _ in 0..200 {
            b.receive(true).await.unwrap();
            if rx_b.try_recv().is_ok() {
                return;
            }
        }
        panic!("valid datagram never arrived after garbage");
    }

    #[tokio::test]
    async fn coordinator_learned_from_traffic() {
        // Coordinator binds a fixed ephemeral-range port so the test
        // does not depend on 8080 being free.
        let coordinator_config = TransportConfig {
            port: None,
            ..test_config(0)
        };
        let (coordinator, _rx_c) = Transport::initialize(coordinator_config).await.unwrap();
        let coordinator_port = coordinator.local_address().port;

        let (mut peer, mut rx_p) = Transport::initialize(test_config(coordinator_port))
            .await
            .unwrap();
        assert!(peer.middleware_peer().is_none());

        let ping = coordinator.generate_message(Command::Ping, None);
        coordinator
            .send_to(&ping, peer.local_address())
            .await
            .unwrap();

        for _ in 0..200 {
            peer.receive(true).await.unwrap();
            if rx_p.try_recv().is_ok() {
                break;
            }
        }
        assert_eq!(peer.middleware_peer(), Some(coordinator.local_address()));
    }
}
