//! # Proof of Stake
//!
//! Instead of burning CPU, a peer wagers part of its wallet. On MINE it
//! sends the coordinator a lottery entry and deducts the stake; the
//! coordinator draws a weighted winner after the lottery window closes
//! and sends it WINNER. Only the winner builds and submits a candidate
//! block. Losing stakes come back as STAKE echoes at round close; a
//! winner whose block fails validation forfeits its stake.
//!
//! There is no hash puzzle: a candidate is valid if it extends the
//! validator's tip and its hash matches its content.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};

use super::{
    AgreementStrategy, ProofEvent, StrategyAction, StrategyError, StrategyKind,
};
use crate::chain::Block;
use crate::transaction::Transaction;
use crate::wire::{CandidateBlock, Command, LotteryEntry, Message, Payload, PeerAddress};

/// Proof-of-stake strategy with a fixed per-round stake.
pub struct ProofOfStake {
    /// Amount wagered per round. Always positive.
    stake: u64,
    /// Transaction from the current MINE, held until WINNER arrives.
    pending: Option<Transaction>,
    /// Last candidate block built after winning the lottery.
    candidate: Option<Block>,
}

impl ProofOfStake {
    /// A zero stake cannot enter the lottery, so it is bumped to 1.
    pub fn new(stake: u64) -> Self {
        Self {
            stake: stake.max(1),
            pending: None,
            candidate: None,
        }
    }

    pub fn stake(&self) -> u64 {
        self.stake
    }
}

impl AgreementStrategy for ProofOfStake {
    fn kind(&self) -> StrategyKind {
        StrategyKind::ProofOfStake
    }

    fn begin_proof(
        &mut self,
        tx: Transaction,
        _tip: Block,
        miner: PeerAddress,
        _mining: Arc<AtomicBool>,
        _events: mpsc::UnboundedSender<ProofEvent>,
        wallet: u64,
    ) -> Vec<StrategyAction> {
        if wallet < self.stake {
            warn!(
                wallet,
                stake = self.stake,
                "balance too low to enter the lottery, sitting this round out"
            );
            return Vec::new();
        }

        self.pending = Some(tx);
        let entry = LotteryEntry {
            stake: self.stake,
            peer: miner,
        };
        info!(stake = self.stake, "entering stake lottery");

        vec![
            StrategyAction::Debit(self.stake),
            StrategyAction::SendCoordinator {
                command: Command::Stake,
                data: Some(Payload::LotteryEntry(entry)),
            },
        ]
    }

    fn validate_block(&self, block: &Block, tip: &Block) -> bool {
        block.prev_hash == tip.hash
            && !block.hash.is_empty()
            && block.hash == block.content_hash(block.nonce)
    }

    fn handle_command(
        &mut self,
        message: &Message,
        tip: &Block,
        miner: PeerAddress,
    ) -> Result<Vec<StrategyAction>, StrategyError> {
        match message.command {
            // We won the lottery: build the candidate and submit proof.
            Command::Winner => {
                let tx = self
                    .pending
                    .take()
                    .ok_or(StrategyError::NothingToPropose)?;
                let mut block = Block::next(tip, Payload::Transaction(tx));
                block.seal(0);
                info!(index = block.index, "won the lottery, submitting candidate");

                self.candidate = Some(block.clone());
                Ok(vec![StrategyAction::SendCoordinator {
                    command: Command::Proof,
                    data: Some(Payload::CandidateBlock(CandidateBlock {
                        block: Box::new(block),
                        miner,
                    })),
                }])
            }

            // Round closed without us winning: our stake comes home.
            Command::Stake => {
                let entry = message
                    .data
                    .as_ref()
                    .and_then(Payload::as_lottery_entry)
                    .ok_or(StrategyError::MissingPayload(Command::Stake))?;
                info!(stake = entry.stake, "stake refunded");
                Ok(vec![StrategyAction::Credit(entry.stake)])
            }

            other => Err(StrategyError::UnsupportedCommand(other)),
        }
    }

    fn candidate_block(&self) -> Option<Block> {
        self.candidate.clone()
    }

    fn take_candidate(&mut self) -> Option<Block> {
        self.candidate.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn miner() -> PeerAddress {
        PeerAddress::new("127.0.0.1".parse().unwrap(), 4000)
    }

    fn tx() -> Transaction {
        Transaction::new("127.0.0.1:4000", "127.0.0.1:5000", 3)
    }

    fn proof_channel() -> mpsc::UnboundedSender<ProofEvent> {
        mpsc::unbounded_channel().0
    }

    #[test]
    fn mine_stakes_and_debits() {
        let mut pos = ProofOfStake::new(4);
        let mining = Arc::new(AtomicBool::new(true));

        let actions = pos.begin_proof(tx(), Block::genesis(), miner(), mining, proof_channel(), 10);

        assert_eq!(actions.len(), 2);
        assert!(matches!(actions[0], StrategyAction::Debit(4)));
        match &actions[1] {
            StrategyAction::SendCoordinator {
                command: Command::Stake,
                data: Some(Payload::LotteryEntry(entry)),
            } => {
                assert_eq!(entry.stake, 4);
                assert_eq!(entry.peer, miner());
            }
            other => panic!("unexpected action: {other:?}"),
        }
    }

    #[test]
    fn broke_peer_sits_out() {
        let mut pos = ProofOfStake::new(20);
        let mining = Arc::new(AtomicBool::new(true));
        let actions = pos.begin_proof(tx(), Block::genesis(), miner(), mining, proof_channel(), 10);
        assert!(actions.is_empty());
        assert!(pos.pending.is_none());
    }

    #[test]
    fn winner_builds_and_submits_candidate() {
        let mut pos = ProofOfStake::new(2);
        let mining = Arc::new(AtomicBool::new(true));
        let genesis = Block::genesis();
        pos.begin_proof(tx(), genesis.clone(), miner(), mining, proof_channel(), 10);

        let winner = Message::new(miner(), Command::Winner, None);
        let actions = pos.handle_command(&winner, &genesis, miner()).unwrap();

        assert_eq!(actions.len(), 1);
        match &actions[0] {
            StrategyAction::SendCoordinator {
                command: Command::Proof,
                data: Some(Payload::CandidateBlock(candidate)),
            } => {
                assert_eq!(candidate.miner, miner());
                assert_eq!(candidate.block.index, 1);
                assert_eq!(candidate.block.prev_hash, genesis.hash);
            }
            other => panic!("unexpected action: {other:?}"),
        }
        assert!(pos.candidate_block().is_some());
    }

    #[test]
    fn winner_without_pending_transaction_errors() {
        let mut pos = ProofOfStake::new(2);
        let winner = Message::new(miner(), Command::Winner, None);
        let err = pos
            .handle_command(&winner, &Block::genesis(), miner())
            .unwrap_err();
        assert!(matches!(err, StrategyError::NothingToPropose));
    }

    #[test]
    fn stake_echo_credits_refund() {
        let mut pos = ProofOfStake::new(2);
        let refund = Message::new(
            miner(),
            Command::Stake,
            Some(Payload::LotteryEntry(LotteryEntry {
                stake: 2,
                peer: miner(),
            })),
        );
        let actions = pos.handle_command(&refund, &Block::genesis(), miner()).unwrap();
        assert!(matches!(actions[0], StrategyAction::Credit(2)));
    }

    #[test]
    fn candidate_validation_checks_linkage_and_content() {
        let pos = ProofOfStake::new(1);
        let genesis = Block::genesis();

        let mut good = Block::next(&genesis, Payload::Transaction(tx()));
        good.seal(0);
        assert!(pos.validate_block(&good, &genesis));

        let mut wrong_parent = good.clone();
        wrong_parent.prev_hash = "elsewhere".into();
        assert!(!pos.validate_block(&wrong_parent, &genesis));

        let mut tampered = good.clone();
        tampered.hash = "00beef".into();
        assert!(!pos.validate_block(&tampered, &genesis));
    }

    #[test]
    fn zero_stake_is_bumped_to_one() {
        assert_eq!(ProofOfStake::new(0).stake(), 1);
    }
}
