//! mDNS-style service discovery.
//!
//! Each node registers itself on the shared service domain under a
//! unique instance name, then browses that domain for a fixed window at
//! startup to seed its peer set. Any LAN-scoped mechanism with these
//! semantics would do; this implementation uses an mDNS daemon.
//!
//! Discovery can be disabled entirely, in which case the peer set is
//! seeded manually; integration tests and fixed-topology deployments
//! use that mode.

use std::time::{Duration, Instant};

use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use rand::RngCore;
use tracing::{debug, info, warn};

use super::TransportError;
use crate::config;
use crate::wire::PeerAddress;

/// Whether the transport participates in service discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryMode {
    /// Register and browse on the mDNS service domain.
    Mdns,
    /// No registration, no browsing. Peers are seeded manually.
    Disabled,
}

/// Handle on this node's service registration.
pub struct Discovery {
    daemon: Option<ServiceDaemon>,
    fullname: Option<String>,
}

impl Discovery {
    /// Registers this endpoint on the service domain under a unique
    /// instance name. With discovery disabled, returns an inert handle.
    pub fn start(mode: DiscoveryMode, local: PeerAddress) -> Result<Self, TransportError> {
        if mode == DiscoveryMode::Disabled {
            debug!("service discovery disabled");
            return Ok(Self {
                daemon: None,
                fullname: None,
            });
        }

        let daemon =
            ServiceDaemon::new().map_err(|e| TransportError::Discovery(e.to_string()))?;

        // Unique instance name: port plus random suffix, so several
        // nodes on one host never collide.
        let mut suffix = [0u8; 4];
        rand::thread_rng().fill_bytes(&mut suffix);
        let instance = format!("cinder-{}-{}", local.port, hex::encode(suffix));
        let host = format!("{}.local.", instance);

        let service = ServiceInfo::new(
            config::SERVICE_DOMAIN,
            &instance,
            &host,
            local.ip,
            local.port,
            &[("protocol", config::PROTOCOL_VERSION)][..],
        )
        .map_err(|e| TransportError::Discovery(e.to_string()))?;
        let fullname = service.get_fullname().to_string();

        daemon
            .register(service)
            .map_err(|e| TransportError::Discovery(e.to_string()))?;
        info!(%instance, "registered on service domain");

        Ok(Self {
            daemon: Some(daemon),
            fullname: Some(fullname),
        })
    }

    /// Browses the service domain for `window`, returning every
    /// resolved endpoint except `local`. This is a synchronous receive
    /// loop that runs for the full window; async callers must put it on
    /// the blocking thread pool.
    pub fn browse(
        &self,
        window: Duration,
        local: PeerAddress,
    ) -> Result<Vec<PeerAddress>, TransportError> {
        let Some(daemon) = &self.daemon else {
            return Ok(Vec::new());
        };

        let receiver = daemon
            .browse(config::SERVICE_DOMAIN)
            .map_err(|e| TransportError::Discovery(e.to_string()))?;

        let deadline = Instant::now() + window;
        let mut found: Vec<PeerAddress> = Vec::new();
        loop {
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                break;
            };
            match receiver.recv_timeout(remaining) {
                Ok(ServiceEvent::ServiceResolved(service)) => {
                    for ip in service.get_addresses() {
                        let peer = PeerAddress::new(*ip, service.get_port());
                        if peer != local && !found.contains(&peer) {
                            info!(%peer, "discovered peer");
                            found.push(peer);
                        }
                    }
                }
                Ok(_) => {}
                Err(_) => break,
            }
        }

        if let Err(error) = daemon.stop_browse(config::SERVICE_DOMAIN) {
            debug!(%error, "stop_browse failed");
        }
        Ok(found)
    }

    /// Deregisters the service and shuts the daemon down.
    pub fn shutdown(&mut self) {
        let Some(daemon) = self.daemon.take() else {
            return;
        };
        if let Some(fullname) = self.fullname.take() {
            if let Err(error) = daemon.unregister(&fullname) {
                warn!(%error, "service deregistration failed");
            }
        }
        if let Err(error) = daemon.shutdown() {
            warn!(%error, "mdns daemon shutdown failed");
        }
    }
}
