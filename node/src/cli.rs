//! # CLI Interface
//!
//! Command-line arguments for `cinder-node` via `clap` derive. Two
//! roles (`coordinator`, `peer`) plus `version`. Every configurable
//! value has an environment-variable fallback for container use.

use std::net::IpAddr;

use clap::{Parser, Subcommand, ValueEnum};

use cinder_protocol::config;
use cinder_protocol::consensus::StrategyKind;

/// Cinder network node.
///
/// Runs either a mining peer or the round coordinator of a Cinder
/// network. Peers discover the coordinator over mDNS on the shared
/// service domain; the coordinator is whoever answers on the
/// well-known UDP port.
#[derive(Parser, Debug)]
#[command(
    name = "cinder-node",
    about = "Cinder P2P currency node",
    version,
    propagate_version = true
)]
pub struct CinderNodeCli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the round coordinator (well-known UDP port + HTTP intake).
    Coordinator(CoordinatorArgs),
    /// Run a mining peer on an ephemeral UDP port.
    Peer(PeerArgs),
    /// Print version information and exit.
    Version,
}

/// Agreement strategy selector.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyArg {
    /// Proof-of-work hash puzzle.
    Pow,
    /// Proof-of-stake lottery.
    Pos,
}

impl From<StrategyArg> for StrategyKind {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Pow => StrategyKind::ProofOfWork,
            StrategyArg::Pos => StrategyKind::ProofOfStake,
        }
    }
}

/// Arguments for the `coordinator` subcommand.
#[derive(Parser, Debug, Clone)]
pub struct CoordinatorArgs {
    /// Interface address to bind and advertise.
    #[arg(long, env = "CINDER_BIND_IP", default_value = "127.0.0.1")]
    pub bind_ip: IpAddr,

    /// Well-known coordinator UDP port.
    #[arg(long, env = "CINDER_UDP_PORT", default_value_t = config::COORDINATOR_UDP_PORT)]
    pub udp_port: u16,

    /// HTTP port for the /newTransaction intake endpoint.
    #[arg(long, env = "CINDER_HTTP_PORT", default_value_t = config::COORDINATOR_HTTP_PORT)]
    pub http_port: u16,

    /// Agreement strategy the network runs.
    #[arg(long, value_enum, env = "CINDER_STRATEGY", default_value_t = StrategyArg::Pow)]
    pub strategy: StrategyArg,

    /// Skip mDNS registration and discovery (fixed-topology networks).
    #[arg(long)]
    pub no_discovery: bool,

    /// Log verbosity: trace, debug, info, warn, error.
    #[arg(long, env = "CINDER_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log format: pretty or json.
    #[arg(long, env = "CINDER_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,
}

/// Arguments for the `peer` subcommand.
#[derive(Parser, Debug, Clone)]
pub struct PeerArgs {
    /// Interface address to bind and advertise.
    #[arg(long, env = "CINDER_BIND_IP", default_value = "127.0.0.1")]
    pub bind_ip: IpAddr,

    /// Port the coordinator answers on.
    #[arg(long, env = "CINDER_COORDINATOR_PORT", default_value_t = config::COORDINATOR_UDP_PORT)]
    pub coordinator_port: u16,

    /// Agreement strategy this peer runs. Must match the network.
    #[arg(long, value_enum, env = "CINDER_STRATEGY", default_value_t = StrategyArg::Pow)]
    pub strategy: StrategyArg,

    /// Proof-of-work difficulty (leading zero nibbles).
    #[arg(long, default_value_t = config::DEFAULT_POW_DIFFICULTY)]
    pub difficulty: u32,

    /// Stake wagered per proof-of-stake round.
    #[arg(long, default_value_t = config::DEFAULT_STAKE)]
    pub stake: u64,

    /// Skip mDNS registration and discovery (fixed-topology networks).
    #[arg(long)]
    pub no_discovery: bool,

    /// Log verbosity: trace, debug, info, warn, error.
    #[arg(long, env = "CINDER_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log format: pretty or json.
    #[arg(long, env = "CINDER_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,
}
