// Copyright (c) 2026 Cinder Labs. MIT License.
// See LICENSE for details.

//! # Cinder Node
//!
//! Entry point for the `cinder-node` binary. Parses CLI arguments,
//! initializes logging, and runs one of the two network roles:
//!
//! - `coordinator`: the distinguished node on the well-known UDP port
//!   that sequences mining rounds and serves the HTTP intake.
//! - `peer`:        a mining participant on an ephemeral UDP port.
//!
//! Both roles run until SIGINT or SIGTERM, then shut down through the
//! role loop's termination path (socket closed, mDNS deregistered).

mod api;
mod cli;
mod logging;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio::sync::{mpsc, watch};

use cinder_protocol::config;
use cinder_protocol::consensus::{AgreementStrategy, ProofOfStake, ProofOfWork, StrategyKind};
use cinder_protocol::roles::{Coordinator, CoordinatorConfig, Peer, PeerConfig};
use cinder_protocol::transport::discovery::DiscoveryMode;
use cinder_protocol::transport::{Transport, TransportConfig};

use cli::{CinderNodeCli, Commands};
use logging::LogFormat;

/// Capacity of the HTTP-intake → coordinator channel. Bursts beyond
/// this get a 503 and retry.
const INTAKE_CAPACITY: usize = 64;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = CinderNodeCli::parse();

    match cli.command {
        Commands::Coordinator(args) => run_coordinator(args).await,
        Commands::Peer(args) => run_peer(args).await,
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Starts the coordinator: UDP transport on the well-known port, HTTP
/// intake, and the round state machine.
async fn run_coordinator(args: cli::CoordinatorArgs) -> Result<()> {
    init_role_logging(&args.log_level, &args.log_format);

    tracing::info!(
        udp_port = args.udp_port,
        http_port = args.http_port,
        strategy = %StrategyKind::from(args.strategy),
        "starting coordinator"
    );

    let (transport, inbox) = Transport::initialize(TransportConfig {
        bind_ip: args.bind_ip,
        port: Some(args.udp_port),
        coordinator_port: args.udp_port,
        discovery: discovery_mode(args.no_discovery),
        ..TransportConfig::default()
    })
    .await
    .context("failed to initialize coordinator transport")?;

    // --- HTTP intake ---
    let (intake_tx, intake_rx) = mpsc::channel(INTAKE_CAPACITY);
    let router = api::create_router(api::ApiState { intake: intake_tx });
    let http_addr = std::net::SocketAddr::new(args.bind_ip, args.http_port);
    let listener = tokio::net::TcpListener::bind(http_addr)
        .await
        .with_context(|| format!("failed to bind transaction intake on {http_addr}"))?;
    tracing::info!(%http_addr, "transaction intake listening");
    let http_server = tokio::spawn(async move {
        if let Err(error) = axum::serve(listener, router).await {
            tracing::error!(%error, "transaction intake server failed");
        }
    });

    // --- Round controller ---
    let coordinator_config = CoordinatorConfig {
        mode: args.strategy.into(),
        ..CoordinatorConfig::default()
    };
    let mut coordinator = Coordinator::new(transport, inbox, intake_rx, coordinator_config);

    let shutdown_rx = spawn_signal_watcher();
    let result = coordinator.run(shutdown_rx).await;

    http_server.abort();
    result.context("coordinator aborted")?;
    tracing::info!("coordinator stopped");
    Ok(())
}

/// Starts a mining peer with the selected agreement strategy.
async fn run_peer(args: cli::PeerArgs) -> Result<()> {
    init_role_logging(&args.log_level, &args.log_format);

    tracing::info!(
        coordinator_port = args.coordinator_port,
        strategy = %StrategyKind::from(args.strategy),
        "starting peer"
    );

    let (transport, inbox) = Transport::initialize(TransportConfig {
        bind_ip: args.bind_ip,
        port: None,
        coordinator_port: args.coordinator_port,
        discovery: discovery_mode(args.no_discovery),
        ..TransportConfig::default()
    })
    .await
    .context("failed to initialize peer transport")?;

    let strategy: Box<dyn AgreementStrategy> = match args.strategy.into() {
        StrategyKind::ProofOfWork => Box::new(ProofOfWork::new(args.difficulty)),
        StrategyKind::ProofOfStake => Box::new(ProofOfStake::new(args.stake)),
    };

    let mut peer = Peer::new(transport, inbox, strategy, PeerConfig::default());

    let shutdown_rx = spawn_signal_watcher();
    peer.run(shutdown_rx).await;
    tracing::info!("peer stopped");
    Ok(())
}

fn init_role_logging(level: &str, format: &str) {
    let directives = format!("cinder_node={level},cinder_protocol={level},tower_http=warn");
    logging::init_logging(&directives, LogFormat::from_str_lossy(format));
}

fn discovery_mode(no_discovery: bool) -> DiscoveryMode {
    if no_discovery {
        DiscoveryMode::Disabled
    } else {
        DiscoveryMode::Mdns
    }
}

/// Prints version information to stdout.
fn print_version() {
    println!("cinder-node {}", env!("CARGO_PKG_VERSION"));
    println!("protocol    {}", config::PROTOCOL_VERSION);
}

/// Flips a watch channel when SIGINT or SIGTERM arrives, letting the
/// role loops exit through their clean termination path.
fn spawn_signal_watcher() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("shutdown signal received");
        let _ = tx.send(true);
    });
    rx
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
/// On non-Unix platforms, only Ctrl+C is supported.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
