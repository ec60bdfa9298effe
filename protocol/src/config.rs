//! # Protocol Configuration & Constants
//!
//! Every magic number in Cinder lives here: well-known ports, timing
//! windows, wallet and reward amounts, and the service domain peers use
//! to find each other. Role controllers copy these into their config
//! structs so tests can shrink the timing windows without touching the
//! protocol defaults.

use std::time::Duration;

// ---------------------------------------------------------------------------
// Well-Known Endpoints
// ---------------------------------------------------------------------------

/// UDP port of the round coordinator. The coordinator is not elected;
/// whichever discovered peer answers on this port is the coordinator.
pub const COORDINATOR_UDP_PORT: u16 = 8080;

/// HTTP port of the coordinator's transaction intake endpoint.
pub const COORDINATOR_HTTP_PORT: u16 = 8090;

/// mDNS service domain all Cinder nodes register and browse on.
pub const SERVICE_DOMAIN: &str = "_blockchain-P2P-Network._udp.local.";

// ---------------------------------------------------------------------------
// Economics
// ---------------------------------------------------------------------------

/// Amount credited to the miner whose candidate block wins a round.
pub const REWARD_AMOUNT: u64 = 5;

/// Every peer's wallet starts here.
pub const INITIAL_WALLET: u64 = 10;

/// Default stake a proof-of-stake peer submits per lottery entry.
pub const DEFAULT_STAKE: u64 = 1;

// ---------------------------------------------------------------------------
// Timing
// ---------------------------------------------------------------------------

/// A peer silent for this long is evicted from the peer set.
pub const LIVENESS_TIMEOUT: Duration = Duration::from_secs(75);

/// How often each node broadcasts a PING to keep liveness fresh.
pub const PING_PERIOD: Duration = Duration::from_secs(60);

/// How long the coordinator keeps the stake lottery open after the
/// first STAKE arrives.
pub const LOTTERY_OPEN: Duration = Duration::from_secs(10);

/// How long the coordinator collects BLOCK_VALID acks for a candidate.
pub const VALIDATION_WINDOW: Duration = Duration::from_secs(5);

/// Grace period after CONSENSUS during which peers propagate chains
/// before the coordinator opens the next round.
pub const CLOSING_GRACE: Duration = Duration::from_secs(5);

/// How long transport initialization browses the service domain for
/// existing peers.
pub const DISCOVERY_WINDOW: Duration = Duration::from_secs(3);

/// Cadence of the role event loops. Bounds the loop at ~200 iterations
/// per second.
pub const LOOP_TICK: Duration = Duration::from_millis(5);

/// Read deadline for a single non-blocking datagram receive. Deadline
/// expiry is not an error.
pub const READ_DEADLINE: Duration = Duration::from_millis(1);

// ---------------------------------------------------------------------------
// Mining
// ---------------------------------------------------------------------------

/// Default proof-of-work difficulty: number of leading zero nibbles
/// required of a block hash. Keep low on a LAN; every extra nibble is
/// a 16x increase in expected search time.
pub const DEFAULT_POW_DIFFICULTY: u32 = 2;

// ---------------------------------------------------------------------------
// Transport Limits
// ---------------------------------------------------------------------------

/// Capacity of the bounded inbox channel between the transport and the
/// role controller. Messages beyond this are dropped with a warning.
pub const INBOX_CAPACITY: usize = 256;

/// Largest datagram the transport will read. Chains ride in single
/// datagrams, so this is effectively the maximum wire chain size.
pub const MAX_DATAGRAM_BYTES: usize = 64 * 1024;

// ---------------------------------------------------------------------------
// Chain
// ---------------------------------------------------------------------------

/// Fixed hash of every genesis block.
pub const GENESIS_HASH: &str = "0";

/// Protocol version string, for the `version` subcommand and logs.
pub const PROTOCOL_VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_known_ports_are_distinct() {
        assert_ne!(COORDINATOR_UDP_PORT, COORDINATOR_HTTP_PORT);
    }

    #[test]
    fn timing_constants_sanity() {
        // Liveness must outlast the ping period or healthy peers get pruned.
        assert!(LIVENESS_TIMEOUT > PING_PERIOD);
        // The read deadline must fit inside a loop tick.
        assert!(READ_DEADLINE < LOOP_TICK);
        assert!(DISCOVERY_WINDOW.as_secs() > 0);
    }

    #[test]
    fn service_domain_shape() {
        assert!(SERVICE_DOMAIN.starts_with('_'));
        assert!(SERVICE_DOMAIN.ends_with("._udp.local."));
    }

    #[test]
    fn economics_sanity() {
        assert!(REWARD_AMOUNT > 0);
        assert!(DEFAULT_STAKE <= INITIAL_WALLET);
    }
}
