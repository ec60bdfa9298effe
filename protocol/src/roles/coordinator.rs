//! # Round Coordinator
//!
//! The distinguished node that sequences mining rounds. It owns the
//! transaction queue fed by the HTTP intake, decides which candidate
//! block becomes the next chain tip, issues the reward, and broadcasts
//! the CONSENSUS signal that triggers chain propagation.
//!
//! ## Round lifecycle
//!
//! ```text
//! IDLE ──tx queued ∧ peers──▶ MINING ──first PROOF──▶ VALIDATING
//!   ▲                           ▲  │                      │
//!   │                           │  └──◀─queue empty───────┤ fail
//!   └────────── grace ──── CLOSING ◀───────pass───────────┘
//! ```
//!
//! The state machine itself ([`RoundState`]) is pure: it consumes
//! messages and deadline polls, and returns [`RoundAction`]s for the
//! surrounding event loop to execute against the transport. All round
//! state mutation happens on the loop task.

use std::collections::VecDeque;
use std::time::Instant;

use chrono::Utc;
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::SeedableRng;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::config;
use crate::consensus::StrategyKind;
use crate::transaction::Transaction;
use crate::transport::{Transport, TransportError};
use crate::wire::{CandidateBlock, Command, LotteryEntry, Message, Payload, PeerAddress};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Timing and economics of a coordinator. Defaults mirror the protocol
/// constants; tests shrink the windows to keep rounds fast.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Which agreement strategy the network runs. Controls whether
    /// STAKE entries are accepted and how failed validation recovers.
    pub mode: StrategyKind,
    /// How long BLOCK_VALID acks are collected per candidate.
    pub validation_window: std::time::Duration,
    /// Pause after CONSENSUS for chains to propagate.
    pub closing_grace: std::time::Duration,
    /// Lottery window opened by the first STAKE of a round.
    pub lottery_open: std::time::Duration,
    /// PING cadence.
    pub ping_period: std::time::Duration,
    /// Event loop cadence.
    pub loop_tick: std::time::Duration,
    /// Reward paid to the winning miner.
    pub reward: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            mode: StrategyKind::ProofOfWork,
            validation_window: config::VALIDATION_WINDOW,
            closing_grace: config::CLOSING_GRACE,
            lottery_open: config::LOTTERY_OPEN,
            ping_period: config::PING_PERIOD,
            loop_tick: config::LOOP_TICK,
            reward: config::REWARD_AMOUNT,
        }
    }
}

/// Fatal coordinator failures. Everything transient is logged instead.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// A send at a round-critical point failed: the MINE broadcast, the
    /// CONSENSUS broadcast, or the reward. A round that loses one of
    /// these cannot complete, so the coordinator aborts.
    #[error("round-critical send failed: {0}")]
    CriticalSend(#[from] TransportError),
}

// ---------------------------------------------------------------------------
// Round State Machine
// ---------------------------------------------------------------------------

/// Coordinator round phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Mining,
    Validating,
    Closing,
}

/// What the state machine wants done on the network, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum RoundAction {
    BroadcastMine(Transaction),
    BroadcastValidate(CandidateBlock),
    BroadcastConsensus,
    /// Send the reward transaction to the winning miner.
    Reward { miner: PeerAddress, amount: u64 },
    SendWinner(PeerAddress),
    RefundStake(LotteryEntry),
}

/// An open validation: the candidate under vote, its deadline, and the
/// acks collected so far.
#[derive(Debug)]
struct Validation {
    candidate: CandidateBlock,
    deadline: Instant,
    acks: usize,
}

/// The coordinator's round bookkeeping, free of I/O.
pub struct RoundState {
    mode: StrategyKind,
    validation_window: std::time::Duration,
    closing_grace: std::time::Duration,
    lottery_open: std::time::Duration,
    reward: u64,

    phase: Phase,
    tx_queue: VecDeque<Transaction>,
    candidate_queue: VecDeque<CandidateBlock>,
    lottery: Vec<LotteryEntry>,
    lottery_deadline: Option<Instant>,
    validating: Option<Validation>,
    closing_deadline: Option<Instant>,
    proof_found: bool,
    validated: bool,
}

impl RoundState {
    pub fn new(config: &CoordinatorConfig) -> Self {
        Self {
            mode: config.mode,
            validation_window: config.validation_window,
            closing_grace: config.closing_grace,
            lottery_open: config.lottery_open,
            reward: config.reward,
            phase: Phase::Idle,
            tx_queue: VecDeque::new(),
            candidate_queue: VecDeque::new(),
            lottery: Vec::new(),
            lottery_deadline: None,
            validating: None,
            closing_deadline: None,
            proof_found: false,
            validated: false,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn queued_transactions(&self) -> usize {
        self.tx_queue.len()
    }

    /// Whether the current round's candidate passed network validation.
    pub fn validated(&self) -> bool {
        self.validated
    }

    /// Accepts a transaction into the mining queue.
    pub fn enqueue(&mut self, tx: Transaction) {
        info!(from = %tx.from, to = %tx.to, amount = tx.amount, "transaction queued");
        self.tx_queue.push_back(tx);
    }

    /// Handles PROOF: every candidate is queued, and the first one of a
    /// round opens validation.
    pub fn on_proof(&mut self, candidate: CandidateBlock, now: Instant) -> Vec<RoundAction> {
        match self.phase {
            Phase::Mining => {
                self.candidate_queue.push_back(candidate);
                if self.proof_found {
                    return Vec::new();
                }
                self.proof_found = true;
                info!("first proof received, running validation");
                self.start_validation(now)
            }
            Phase::Validating => {
                // Kept as fallback in case the current candidate fails.
                self.candidate_queue.push_back(candidate);
                Vec::new()
            }
            Phase::Idle | Phase::Closing => {
                debug!(miner = %candidate.miner, "dropping proof outside an open round");
                Vec::new()
            }
        }
    }

    /// Handles STAKE: the first entry of a round opens the lottery
    /// window. Zero stakes and stakes outside a PoS mining phase are
    /// dropped.
    pub fn on_stake(&mut self, entry: LotteryEntry, now: Instant) {
        if self.mode != StrategyKind::ProofOfStake {
            warn!(peer = %entry.peer, "dropping STAKE in proof-of-work mode");
            return;
        }
        if self.phase != Phase::Mining {
            debug!(peer = %entry.peer, "dropping STAKE outside the mining phase");
            return;
        }
        if entry.stake == 0 {
            warn!(peer = %entry.peer, "dropping zero-value stake");
            return;
        }
        if self.lottery.is_empty() {
            info!(
                window_secs = self.lottery_open.as_secs(),
                "first stake received, lottery window open"
            );
            self.lottery_deadline = Some(now + self.lottery_open);
        }
        info!(peer = %entry.peer, stake = entry.stake, "lottery entry received");
        self.lottery.push(entry);
    }

    /// Handles BLOCK_VALID: one more peer vouched for the candidate.
    pub fn on_block_valid(&mut self) {
        if let Some(validation) = &mut self.validating {
            validation.acks += 1;
            info!(acks = validation.acks, "validation ack received");
        } else {
            debug!("dropping BLOCK_VALID with no validation open");
        }
    }

    /// Drives every deadline and the idle→mining transition. Called
    /// once per loop tick with the current peer count.
    pub fn poll(&mut self, now: Instant, peer_count: usize) -> Vec<RoundAction> {
        let mut actions = Vec::new();

        // Lottery window expiry: draw a winner.
        if let Some(deadline) = self.lottery_deadline {
            if now >= deadline {
                self.lottery_deadline = None;
                if let Some(winner) = self.draw_lottery_winner() {
                    actions.push(RoundAction::SendWinner(winner));
                }
            }
        }

        // Validation window expiry: count the vote.
        if let Some(validation) = &self.validating {
            if now >= validation.deadline {
                actions.extend(self.finish_validation(now, peer_count));
            }
        }

        // Closing grace expiry: reset for the next round.
        if let Some(deadline) = self.closing_deadline {
            if now >= deadline {
                self.closing_deadline = None;
                self.lottery_deadline = None;
                self.candidate_queue.clear();
                self.proof_found = false;
                self.validated = false;
                self.phase = Phase::Idle;
                info!("mining session concluded");
            }
        }

        // Idle with work queued and at least one peer: open a round.
        if self.phase == Phase::Idle && !self.tx_queue.is_empty() && peer_count >= 1 {
            if let Some(tx) = self.tx_queue.pop_front() {
                info!("beginning a new mining session");
                self.candidate_queue.clear();
                self.proof_found = false;
                self.validated = false;
                self.phase = Phase::Mining;
                actions.push(RoundAction::BroadcastMine(tx));
            }
        }

        actions
    }

    /// Opens validation for the next queued candidate. An empty queue
    /// reopens mining.
    fn start_validation(&mut self, now: Instant) -> Vec<RoundAction> {
        let Some(candidate) = self.candidate_queue.pop_front() else {
            debug!("candidate queue empty, reopening proof acceptance");
            self.proof_found = false;
            self.phase = Phase::Mining;
            return Vec::new();
        };
        self.phase = Phase::Validating;
        self.validating = Some(Validation {
            candidate: candidate.clone(),
            deadline: now + self.validation_window,
            acks: 0,
        });
        vec![RoundAction::BroadcastValidate(candidate)]
    }

    /// Tallies an expired validation window against the quorum
    /// `ceil(peer_count / 2)` and either closes the round or recovers
    /// per strategy.
    fn finish_validation(&mut self, now: Instant, peer_count: usize) -> Vec<RoundAction> {
        let Some(validation) = self.validating.take() else {
            return Vec::new();
        };
        let quorum = peer_count.div_ceil(2);

        if validation.acks >= quorum {
            info!(
                acks = validation.acks,
                quorum, "validation successful, ending current mining session"
            );
            self.validated = true;
            let mut actions = vec![RoundAction::Reward {
                miner: validation.candidate.miner,
                amount: self.reward,
            }];
            actions.extend(self.enter_closing(now));
            return actions;
        }

        warn!(
            acks = validation.acks,
            quorum,
            miner = %validation.candidate.miner,
            "candidate failed network validation"
        );

        match self.mode {
            // Proof of work: fall through the candidate queue.
            StrategyKind::ProofOfWork => self.start_validation(now),

            // Proof of stake: the losing miner forfeits its stake and
            // the lottery is re-run over the remaining entries.
            StrategyKind::ProofOfStake => {
                let loser = validation.candidate.miner;
                self.lottery.retain(|entry| entry.peer != loser);
                info!(peer = %loser, "stake forfeited");

                self.proof_found = false;
                self.phase = Phase::Mining;
                if let Some(winner) = self.draw_lottery_winner() {
                    vec![RoundAction::SendWinner(winner)]
                } else {
                    warn!("no lottery entries left, reopening mining");
                    Vec::new()
                }
            }
        }
    }

    /// CONSENSUS out, stakes home, grace timer armed. The reward has
    /// already been emitted by the caller, preserving the
    /// reward-before-consensus ordering guarantee.
    fn enter_closing(&mut self, now: Instant) -> Vec<RoundAction> {
        self.phase = Phase::Closing;
        self.closing_deadline = Some(now + self.closing_grace);
        info!("broadcasting consensus, waiting for chains to propagate");

        let mut actions = vec![RoundAction::BroadcastConsensus];
        for entry in self.lottery.drain(..) {
            actions.push(RoundAction::RefundStake(entry));
        }
        actions
    }

    /// Weighted random choice over the lottery pool, stake as weight,
    /// PRNG seeded from the wall clock.
    fn draw_lottery_winner(&self) -> Option<PeerAddress> {
        let weights: Vec<u64> = self.lottery.iter().map(|entry| entry.stake).collect();
        let distribution = WeightedIndex::new(&weights).ok()?;
        let seed = Utc::now().timestamp_nanos_opt().unwrap_or_default() as u64;
        let mut rng = StdRng::seed_from_u64(seed);
        let winner = self.lottery[distribution.sample(&mut rng)].peer;
        info!(peer = %winner, "lottery winner drawn");
        Some(winner)
    }
}

// ---------------------------------------------------------------------------
// Coordinator Event Loop
// ---------------------------------------------------------------------------

/// The coordinator role: the round state machine wired to a transport
/// and the HTTP intake channel.
pub struct Coordinator {
    transport: Transport,
    inbox: mpsc::Receiver<Message>,
    intake: mpsc::Receiver<Transaction>,
    round: RoundState,
    config: CoordinatorConfig,
}

impl Coordinator {
    pub fn new(
        transport: Transport,
        inbox: mpsc::Receiver<Message>,
        intake: mpsc::Receiver<Transaction>,
        config: CoordinatorConfig,
    ) -> Self {
        let round = RoundState::new(&config);
        Self {
            transport,
            inbox,
            intake,
            round,
            config,
        }
    }

    pub fn local_address(&self) -> PeerAddress {
        self.transport.local_address()
    }

    /// Runs the coordinator until shutdown. Returns an error only for
    /// round-critical send failures; everything else is logged and the
    /// loop continues.
    pub async fn run(
        &mut self,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), CoordinatorError> {
        info!(local = %self.transport.local_address(), mode = %self.config.mode, "running coordinator");
        self.transport.ping_network().await;
        let mut last_ping = Instant::now();

        let result = loop {
            if *shutdown.borrow() {
                break Ok(());
            }

            if let Err(err) = self.transport.receive(true).await {
                warn!(error = %err, "receive error");
            }

            let mut fatal = None;
            while let Ok(message) = self.inbox.try_recv() {
                let actions = self.handle_message(message);
                if let Err(err) = self.perform(actions).await {
                    fatal = Some(err);
                    break;
                }
            }
            if let Some(err) = fatal {
                error!(error = %err, "aborting coordinator");
                break Err(err);
            }

            while let Ok(tx) = self.intake.try_recv() {
                self.round.enqueue(tx);
            }

            let actions = self.round.poll(Instant::now(), self.transport.peer_count());
            if let Err(err) = self.perform(actions).await {
                error!(error = %err, "aborting coordinator");
                break Err(err);
            }

            if last_ping.elapsed() >= self.config.ping_period {
                self.transport.ping_network().await;
                last_ping = Instant::now();
            }
            self.transport.prune();

            tokio::select! {
                _ = tokio::time::sleep(self.config.loop_tick) => {}
                _ = shutdown.changed() => {}
            }
        };

        info!("terminating coordinator components");
        self.transport.terminate();
        result
    }

    /// Routes one inbound message into the round state machine.
    fn handle_message(&mut self, message: Message) -> Vec<RoundAction> {
        match message.command {
            Command::Ping => {
                debug!(from = %message.from.address, "received a ping");
                Vec::new()
            }
            Command::Proof => match message.data.as_ref().and_then(Payload::as_candidate_block) {
                Some(candidate) => self.round.on_proof(candidate.clone(), Instant::now()),
                None => {
                    warn!("PROOF without a candidate block payload");
                    Vec::new()
                }
            },
            Command::Stake => match message.data.as_ref().and_then(Payload::as_lottery_entry) {
                Some(entry) => {
                    self.round.on_stake(entry.clone(), Instant::now());
                    Vec::new()
                }
                None => {
                    warn!("STAKE without a lottery entry payload");
                    Vec::new()
                }
            },
            Command::BlockValid => {
                self.round.on_block_valid();
                Vec::new()
            }
            // Peer-to-peer chatter that also reaches the coordinator
            // because it sits on the same fabric.
            Command::GetChain
            | Command::PeerChain
            | Command::PublicKey
            | Command::PublicKeys
            | Command::Transaction => Vec::new(),
            other => {
                warn!(command = %other, "command not supported by the coordinator");
                Vec::new()
            }
        }
    }

    /// Executes round actions against the transport. Failures at the
    /// round-critical points (the MINE and CONSENSUS broadcasts and the
    /// reward send) are fatal; everything else is logged.
    async fn perform(&mut self, actions: Vec<RoundAction>) -> Result<(), CoordinatorError> {
        for action in actions {
            match action {
                RoundAction::BroadcastMine(tx) => {
                    let msg = self
                        .transport
                        .generate_message(Command::Mine, Some(Payload::Transaction(tx)));
                    self.transport.broadcast(&msg).await?;
                }
                RoundAction::BroadcastValidate(candidate) => {
                    let msg = self.transport.generate_message(
                        Command::Validate,
                        Some(Payload::CandidateBlock(candidate)),
                    );
                    if let Err(err) = self.transport.broadcast(&msg).await {
                        warn!(error = %err, "failed to broadcast validate");
                    }
                }
                RoundAction::BroadcastConsensus => {
                    let msg = self.transport.generate_message(Command::Consensus, None);
                    self.transport.broadcast(&msg).await?;
                }
                RoundAction::Reward { miner, amount } => {
                    let reward = Transaction::new(
                        self.transport.local_address().to_string(),
                        miner.to_string(),
                        amount,
                    );
                    let msg = self
                        .transport
                        .generate_message(Command::Transaction, Some(Payload::Transaction(reward)));
                    self.transport.send_to(&msg, miner).await?;
                    info!(%miner, amount, "reward sent");
                }
                RoundAction::SendWinner(peer) => {
                    let msg = self.transport.generate_message(Command::Winner, None);
                    if let Err(err) = self.transport.send_to(&msg, peer).await {
                        warn!(%peer, error = %err, "failed to notify lottery winner");
                    }
                }
                RoundAction::RefundStake(entry) => {
                    let peer = entry.peer;
                    let msg = self
                        .transport
                        .generate_message(Command::Stake, Some(Payload::LotteryEntry(entry)));
                    if let Err(err) = self.transport.send_to(&msg, peer).await {
                        warn!(%peer, error = %err, "failed to refund stake");
                    }
                }
            }
        }
        Ok(())
    }
}
