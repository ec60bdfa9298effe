//! # Proof of Work
//!
//! The classic hash puzzle: find a nonce such that the block hash
//! starts with `difficulty` zero nibbles. The search increments from
//! nonce 0 and checks the shared `mining` flag every iteration, so
//! clearing the flag cancels the search within one hash attempt.
//!
//! The search runs on a dedicated OS thread, since pure CPU burn has
//! no business on the async runtime. Its only outputs are the shared
//! candidate slot and a [`ProofEvent`] posted to the peer loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::{
    AgreementStrategy, ProofEvent, StrategyAction, StrategyError, StrategyKind,
};
use crate::chain::Block;
use crate::transaction::Transaction;
use crate::wire::{Message, Payload, PeerAddress};

/// Proof-of-work strategy with a fixed difficulty.
pub struct ProofOfWork {
    /// Number of leading zero nibbles a winning hash must carry.
    difficulty: u32,
    /// Last successfully mined candidate, written by the search thread.
    candidate: Arc<Mutex<Option<Block>>>,
}

impl ProofOfWork {
    pub fn new(difficulty: u32) -> Self {
        Self {
            difficulty,
            candidate: Arc::new(Mutex::new(None)),
        }
    }

    pub fn difficulty(&self) -> u32 {
        self.difficulty
    }
}

/// Runs the nonce search until a hash meets `difficulty` or `mining`
/// goes false. On success the block comes back sealed; on cancellation
/// its hash is empty.
fn search(mut block: Block, difficulty: u32, mining: &AtomicBool) -> Block {
    let target = "0".repeat(difficulty as usize);
    let mut nonce: u64 = 0;
    while mining.load(Ordering::Relaxed) {
        let hash = block.content_hash(nonce);
        if hash.starts_with(&target) {
            block.nonce = nonce;
            block.hash = hash;
            return block;
        }
        nonce = nonce.wrapping_add(1);
    }
    debug!("proof search cancelled");
    block.hash = String::new();
    block
}

impl AgreementStrategy for ProofOfWork {
    fn kind(&self) -> StrategyKind {
        StrategyKind::ProofOfWork
    }

    fn begin_proof(
        &mut self,
        tx: Transaction,
        tip: Block,
        _miner: PeerAddress,
        mining: Arc<AtomicBool>,
        events: mpsc::UnboundedSender<ProofEvent>,
        _wallet: u64,
    ) -> Vec<StrategyAction> {
        let block = Block::next(&tip, Payload::Transaction(tx));
        let difficulty = self.difficulty;
        let candidate = Arc::clone(&self.candidate);

        std::thread::spawn(move || {
            let mined = search(block, difficulty, &mining);
            if !mined.hash.is_empty() {
                info!(nonce = mined.nonce, hash = %mined.hash, "block mined");
                *candidate.lock() = Some(mined.clone());
            }
            // The loop may already be gone on shutdown; nothing to do then.
            let _ = events.send(ProofEvent { block: mined });
        });

        Vec::new()
    }

    fn validate_block(&self, block: &Block, tip: &Block) -> bool {
        if block.hash.is_empty() || block.prev_hash != tip.hash {
            return false;
        }
        let target = "0".repeat(self.difficulty as usize);
        block.hash.starts_with(&target) && block.hash == block.content_hash(block.nonce)
    }

    fn handle_command(
        &mut self,
        message: &Message,
        _tip: &Block,
        _miner: PeerAddress,
    ) -> Result<Vec<StrategyAction>, StrategyError> {
        Err(StrategyError::UnsupportedCommand(message.command))
    }

    fn candidate_block(&self) -> Option<Block> {
        self.candidate.lock().clone()
    }

    fn take_candidate(&mut self) -> Option<Block> {
        self.candidate.lock().take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::Command;

    fn tx() -> Transaction {
        Transaction::new("127.0.0.1:4000", "127.0.0.1:5000", 3)
    }

    fn miner() -> PeerAddress {
        PeerAddress::new("127.0.0.1".parse().unwrap(), 4000)
    }

    #[test]
    fn search_finds_qualifying_nonce() {
        let mining = AtomicBool::new(true);
        let block = Block::next(&Block::genesis(), Payload::Transaction(tx()));
        let mined = search(block, 1, &mining);

        assert!(mined.hash.starts_with('0'));
        assert_eq!(mined.hash, mined.content_hash(mined.nonce));
    }

    #[test]
    fn cleared_mining_flag_cancels_search() {
        let mining = AtomicBool::new(false);
        let block = Block::next(&Block::genesis(), Payload::Transaction(tx()));
        let mined = search(block, 6, &mining);
        assert!(mined.hash.is_empty());
    }

    #[tokio::test]
    async fn begin_proof_reports_through_event_channel() {
        let mut pow = ProofOfWork::new(1);
        let mining = Arc::new(AtomicBool::new(true));
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();

        let actions = pow.begin_proof(
            tx(),
            Block::genesis(),
            miner(),
            Arc::clone(&mining),
            events_tx,
            10,
        );
        assert!(actions.is_empty());

        let event = events_rx.recv().await.expect("search result");
        assert!(!event.block.hash.is_empty());
        assert_eq!(pow.candidate_block().unwrap().hash, event.block.hash);
        assert_eq!(pow.take_candidate().unwrap().hash, event.block.hash);
        assert!(pow.candidate_block().is_none());
    }

    #[test]
    fn validate_accepts_properly_mined_block() {
        let pow = ProofOfWork::new(1);
        let genesis = Block::genesis();
        let mining = AtomicBool::new(true);
        let mined = search(
            Block::next(&genesis, Payload::Transaction(tx())),
            1,
            &mining,
        );
        assert!(pow.validate_block(&mined, &genesis));
    }

    #[test]
    fn validate_rejects_wrong_parent() {
        let pow = ProofOfWork::new(1);
        let genesis = Block::genesis();
        let mining = AtomicBool::new(true);
        let mut mined = search(
            Block::next(&genesis, Payload::Transaction(tx())),
            1,
            &mining,
        );
        mined.prev_hash = "someone-elses-tip".into();
        assert!(!pow.validate_block(&mined, &genesis));
    }

    #[test]
    fn validate_rejects_tampered_or_unsealed_block() {
        let pow = ProofOfWork::new(1);
        let genesis = Block::genesis();

        // Unsealed block (empty hash).
        let unsealed = Block::next(&genesis, Payload::Transaction(tx()));
        assert!(!pow.validate_block(&unsealed, &genesis));

        // Forged hash that has the right prefix but wrong content.
        let mut forged = Block::next(&genesis, Payload::Transaction(tx()));
        forged.hash = format!("0{}", "f".repeat(63));
        assert!(!pow.validate_block(&forged, &genesis));
    }

    #[test]
    fn strategy_commands_are_rejected() {
        let mut pow = ProofOfWork::new(1);
        let message = Message::new(miner(), Command::Winner, None);
        let err = pow
            .handle_command(&message, &Block::genesis(), miner())
            .unwrap_err();
        assert!(matches!(err, StrategyError::UnsupportedCommand(_)));
    }
}
