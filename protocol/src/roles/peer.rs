//! # Peer
//!
//! A mining participant: maintains the local chain, mines on request,
//! validates candidates for the coordinator, and converges to the
//! longest chain the network shows it.
//!
//! All peer state (chain, wallet, key registry) is owned by the
//! single event loop. The proof-of-work search thread communicates
//! only through the shared `mining` flag (loop writes, search reads)
//! and the proof event channel (search writes, loop reads).

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::chain::Chain;
use crate::client::{Client, ClientError};
use crate::config;
use crate::consensus::{AgreementStrategy, ProofEvent, StrategyAction};
use crate::transport::Transport;
use crate::wire::{CandidateBlock, Command, Message, Payload, PeerAddress};

/// Peer loop timing. Defaults mirror the protocol constants.
#[derive(Debug, Clone)]
pub struct PeerConfig {
    pub ping_period: Duration,
    pub loop_tick: Duration,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            ping_period: config::PING_PERIOD,
            loop_tick: config::LOOP_TICK,
        }
    }
}

/// A peer node: transport, strategy, chain, wallet, and key material.
pub struct Peer {
    transport: Transport,
    inbox: mpsc::Receiver<Message>,
    strategy: Box<dyn AgreementStrategy>,
    chain: Chain,
    wallet: u64,
    client: Client,
    mining: Arc<AtomicBool>,
    proof_events_tx: mpsc::UnboundedSender<ProofEvent>,
    proof_events: mpsc::UnboundedReceiver<ProofEvent>,
    config: PeerConfig,
}

impl Peer {
    /// Builds a peer around an initialized transport. The chain starts
    /// at genesis; GET_CHAIN at startup overwrites it if anyone answers
    /// with something longer.
    pub fn new(
        transport: Transport,
        inbox: mpsc::Receiver<Message>,
        strategy: Box<dyn AgreementStrategy>,
        config: PeerConfig,
    ) -> Self {
        let (proof_events_tx, proof_events) = mpsc::unbounded_channel();
        Self {
            transport,
            inbox,
            strategy,
            chain: Chain::with_genesis(),
            wallet: crate::config::INITIAL_WALLET,
            client: Client::new(),
            mining: Arc::new(AtomicBool::new(false)),
            proof_events_tx,
            proof_events,
            config,
        }
    }

    pub fn local_address(&self) -> PeerAddress {
        self.transport.local_address()
    }

    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    pub fn wallet(&self) -> u64 {
        self.wallet
    }

    /// Number of peers currently considered live.
    pub fn known_peers(&self) -> usize {
        self.transport.peer_count()
    }

    /// Seeds a peer directly, for discovery-disabled deployments.
    pub fn add_peer(&mut self, peer: PeerAddress) {
        self.transport.add_peer(peer);
    }

    /// Runs the peer event loop until shutdown flips.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        if let Err(err) = self.strategy.initialize() {
            warn!(error = %err, "strategy initialization failed");
        }
        info!(
            local = %self.transport.local_address(),
            strategy = %self.strategy.kind(),
            "running peer"
        );

        // Announce ourselves: liveness, key material, and a request for
        // existing chains in case we are not the founder.
        self.transport.ping_network().await;
        let announce = self.transport.generate_message(
            Command::PublicKeys,
            Some(Payload::PublicKey(self.client.announcement())),
        );
        if let Err(err) = self.transport.broadcast(&announce).await {
            warn!(error = %err, "failed to announce public key");
        }
        let get_chain = self.transport.generate_message(Command::GetChain, None);
        if let Err(err) = self.transport.broadcast(&get_chain).await {
            warn!(error = %err, "failed to request peer chains");
        }

        let mut last_ping = Instant::now();

        loop {
            if *shutdown.borrow() {
                break;
            }

            if let Err(err) = self.transport.receive(true).await {
                warn!(error = %err, "receive error");
            }

            while let Ok(message) = self.inbox.try_recv() {
                self.handle_message(message).await;
            }

            while let Ok(event) = self.proof_events.try_recv() {
                self.on_proof_event(event).await;
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
        }

        info!("terminating peer components");
        self.mining.store(false, Ordering::Relaxed);
        self.strategy.terminate();
        self.transport.terminate();
    }

    /// The closed message switch.
    async fn handle_message(&mut self, message: Message) {
        let sender = message.from.address;
        match message.command {
            Command::Ping => {
                debug!(from = %sender, "received a ping");
            }

            Command::Mine => match message.data.as_ref().and_then(Payload::as_transaction) {
                Some(tx) => self.start_mining(tx.clone()).await,
                None => warn!("MINE without a transaction payload"),
            },

            Command::Validate => {
                let Some(candidate) = message.data.as_ref().and_then(Payload::as_candidate_block)
                else {
                    warn!("VALIDATE without a candidate block payload");
                    return;
                };
                if self.strategy.validate_block(&candidate.block, self.chain.tip()) {
                    debug!(miner = %candidate.miner, "candidate checks out, acking");
                    self.send_to_coordinator(Command::BlockValid, None).await;
                }
                // An invalid candidate earns silence, not a nack.
            }

            Command::Transaction => {
                let Some(tx) = message.data.as_ref().and_then(Payload::as_transaction) else {
                    warn!("TRANSACTION without a transaction payload");
                    return;
                };
                if Some(sender) == self.transport.middleware_peer() {
                    self.on_reward(tx.clone());
                } else {
                    self.on_peer_payment(tx.clone());
                }
            }

            Command::PeerChain => {
                let Some(copy) = message.data.as_ref().and_then(Payload::as_chain) else {
                    warn!("PEER_CHAIN without a chain payload");
                    return;
                };
                if self.chain.replace_if_longer(copy.blocks.clone()) {
                    info!(
                        len = self.chain.len(),
                        "received a longer chain copy, adopted as local chain"
                    );
                    self.broadcast_chain().await;
                }
            }

            Command::GetChain => {
                self.broadcast_chain().await;
            }

            Command::Consensus => {
                // Round is over: stop any in-flight search and publish
                // our copy so the longest chain can win everywhere.
                self.mining.store(false, Ordering::Relaxed);
                self.broadcast_chain().await;
            }

            Command::PublicKey => {
                self.register_announced_key(&message);
            }

            Command::PublicKeys => {
                self.register_announced_key(&message);
                let reply = self.transport.generate_message(
                    Command::PublicKey,
                    Some(Payload::PublicKey(self.client.announcement())),
                );
                if let Err(err) = self.transport.send_to(&reply, sender).await {
                    warn!(peer = %sender, error = %err, "failed to send public key");
                }
            }

            // Strategy-specific commands.
            Command::Stake | Command::Winner => {
                let tip = self.chain.tip().clone();
                let miner = self.transport.local_address();
                match self.strategy.handle_command(&message, &tip, miner) {
                    Ok(actions) => self.apply_strategy_actions(actions).await,
                    Err(err) => warn!(command = %message.command, error = %err, "strategy rejected command"),
                }
            }

            other => {
                warn!(command = %other, "command not supported by a peer");
            }
        }
    }

    /// MINE received: raise the mining flag and hand the transaction to
    /// the strategy.
    async fn start_mining(&mut self, tx: crate::transaction::Transaction) {
        info!("received a new transaction, beginning mining session");
        self.mining.store(true, Ordering::Relaxed);
        let actions = self.strategy.begin_proof(
            tx,
            self.chain.tip().clone(),
            self.transport.local_address(),
            Arc::clone(&self.mining),
            self.proof_events_tx.clone(),
            self.wallet,
        );
        self.apply_strategy_actions(actions).await;
    }

    /// A proof search finished: submit the candidate unless the round
    /// was cancelled underneath it.
    async fn on_proof_event(&mut self, event: ProofEvent) {
        self.mining.store(false, Ordering::Relaxed);
        if event.block.hash.is_empty() {
            debug!("mining session cancelled before a proof was found");
            return;
        }
        info!(hash = %event.block.hash, "block mined, sending proof to coordinator");
        let candidate = CandidateBlock {
            block: Box::new(event.block),
            miner: self.transport.local_address(),
        };
        self.send_to_coordinator(Command::Proof, Some(Payload::CandidateBlock(candidate)))
            .await;
    }

    /// Reward from the coordinator: append the held candidate and
    /// credit the wallet.
    fn on_reward(&mut self, tx: crate::transaction::Transaction) {
        match self.strategy.take_candidate() {
            Some(candidate) => {
                info!(index = candidate.index, "appending mined block to local chain");
                self.chain.append(candidate);
            }
            None => warn!("reward arrived without a held candidate block"),
        }
        self.wallet += tx.amount;
        info!(balance = self.wallet, "reward received");
    }

    /// Payment from another peer: verify the signature against the
    /// registered key before crediting. Failures drop the message.
    fn on_peer_payment(&mut self, tx: crate::transaction::Transaction) {
        if !self.client.verify(&tx) {
            warn!(from = %tx.from, "dropping transaction with bad or unknown signature");
            return;
        }
        self.wallet += tx.amount;
        info!(from = %tx.from, amount = tx.amount, balance = self.wallet, "payment received");
    }

    /// Originates a payment: sign, debit the wallet, POST to the
    /// coordinator's HTTP intake, then deliver to the recipient over
    /// UDP. The debit precedes both network sends; a submission that
    /// fails after it leaves the sender debited.
    pub async fn send_payment(
        &mut self,
        to: PeerAddress,
        amount: u64,
        intake: SocketAddr,
    ) -> Result<(), ClientError> {
        let tx = self.client.create_payment(
            self.transport.local_address(),
            to,
            amount,
            self.wallet,
            self.transport.coordinator_port(),
        )?;
        self.wallet -= amount;

        let reply = self.client.post_to_coordinator(intake, &tx).await?;
        info!(%reply, "coordinator accepted transaction");

        let msg = self
            .transport
            .generate_message(Command::Transaction, Some(Payload::Transaction(tx)));
        self.transport
            .send_to(&msg, to)
            .await
            .map_err(|err| ClientError::Delivery(err.to_string()))?;

        Ok(())
    }

    fn register_announced_key(&mut self, message: &Message) {
        let Some(data) = message.data.as_ref().and_then(Payload::as_public_key) else {
            warn!("key announcement without coordinates");
            return;
        };
        if let Err(err) = self.client.register_key(data, message.from.address) {
            warn!(peer = %message.from.address, error = %err, "rejecting announced key");
        }
    }

    async fn broadcast_chain(&mut self) {
        let msg = self
            .transport
            .generate_message(Command::PeerChain, Some(Payload::Chain(self.chain.to_copy())));
        if let Err(err) = self.transport.broadcast(&msg).await {
            warn!(error = %err, "failed to broadcast chain copy");
        }
    }

    async fn send_to_coordinator(&mut self, command: Command, data: Option<Payload>) {
        let Some(coordinator) = self.transport.middleware_peer() else {
            warn!(%command, "no coordinator known, dropping send");
            return;
        };
        let msg = self.transport.generate_message(command, data);
        if let Err(err) = self.transport.send_to(&msg, coordinator).await {
            warn!(%command, error = %err, "send to coordinator failed");
        }
    }

    async fn apply_strategy_actions(&mut self, actions: Vec<StrategyAction>) {
        for action in actions {
            match action {
                StrategyAction::SendCoordinator { command, data } => {
                    self.send_to_coordinator(command, data).await;
                }
                StrategyAction::Debit(amount) => {
                    self.wallet = self.wallet.saturating_sub(amount);
                    debug!(balance = self.wallet, "wallet debited");
                }
                StrategyAction::Credit(amount) => {
                    self.wallet += amount;
                    debug!(balance = self.wallet, "wallet credited");
                }
            }
        }
    }
}
