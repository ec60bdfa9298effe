//! # Agreement Strategies
//!
//! The pluggable layer that decides how a peer earns the right to
//! append a block: proof-of-work (hash puzzle) or proof-of-stake
//! (coordinator-run lottery).
//!
//! Strategies never touch the socket or the wallet directly. They
//! return [`StrategyAction`]s that the peer event loop executes, which
//! keeps every wallet and transport mutation on the loop thread. The
//! one exception is the proof-of-work search, which runs on its own
//! thread and reports back through the loop's event channel.

pub mod pos;
pub mod pow;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::chain::Block;
use crate::transaction::Transaction;
use crate::wire::{Command, Message, Payload, PeerAddress};

pub use pos::ProofOfStake;
pub use pow::ProofOfWork;

/// Which agreement strategy a node runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    ProofOfWork,
    ProofOfStake,
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StrategyKind::ProofOfWork => f.write_str("proof-of-work"),
            StrategyKind::ProofOfStake => f.write_str("proof-of-stake"),
        }
    }
}

/// Outcome of a proof attempt, posted back to the peer loop by the
/// search task. An empty `hash` means the search was cancelled.
#[derive(Debug)]
pub struct ProofEvent {
    pub block: Block,
}

/// Side effects a strategy asks the peer loop to perform.
#[derive(Debug, Clone)]
pub enum StrategyAction {
    /// Send a command to the coordinator.
    SendCoordinator {
        command: Command,
        data: Option<Payload>,
    },
    /// Deduct from the wallet (a stake was placed).
    Debit(u64),
    /// Credit the wallet (a stake came back).
    Credit(u64),
}

/// Errors from strategy-specific command handling.
#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("command {0} not supported by this strategy")]
    UnsupportedCommand(Command),

    #[error("message carried no usable payload for {0}")]
    MissingPayload(Command),

    #[error("no pending transaction to propose")]
    NothingToPropose,
}

/// The agreement capability set. One instance lives inside each peer.
pub trait AgreementStrategy: Send {
    fn kind(&self) -> StrategyKind;

    /// One-time setup before the peer loop starts.
    fn initialize(&mut self) -> Result<(), StrategyError> {
        Ok(())
    }

    /// Reacts to MINE: start a proof attempt for `tx` on top of `tip`.
    ///
    /// Proof-of-work spawns its search thread here and reports through
    /// `events`; proof-of-stake answers immediately with a stake
    /// submission. The `mining` flag pre-empts an in-flight search.
    fn begin_proof(
        &mut self,
        tx: Transaction,
        tip: Block,
        miner: PeerAddress,
        mining: Arc<AtomicBool>,
        events: mpsc::UnboundedSender<ProofEvent>,
        wallet: u64,
    ) -> Vec<StrategyAction>;

    /// Whether `block` is an acceptable next block after `tip`.
    fn validate_block(&self, block: &Block, tip: &Block) -> bool;

    /// Handles commands outside the peer's core switch (STAKE refunds,
    /// WINNER notifications).
    fn handle_command(
        &mut self,
        message: &Message,
        tip: &Block,
        miner: PeerAddress,
    ) -> Result<Vec<StrategyAction>, StrategyError>;

    /// The last candidate block this strategy produced, if any.
    fn candidate_block(&self) -> Option<Block>;

    /// Takes the held candidate, leaving none. Called on reward.
    fn take_candidate(&mut self) -> Option<Block>;

    /// Cleanup on shutdown.
    fn terminate(&mut self) {}
}
