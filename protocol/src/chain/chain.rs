//! # The Chain
//!
//! Each peer owns exactly one ordered chain, mutated only from that
//! peer's event loop: appended on reward, replaced wholesale when a
//! strictly longer well-formed copy arrives. The strict-increase rule
//! is what makes network-wide convergence terminate: a replacement
//! chain can never bounce back and forth between two peers.

use tracing::{debug, warn};

use super::Block;
use crate::wire::payload::ChainCopy;

/// A peer's ordered chain of blocks. Never empty: construction starts
/// at genesis and replacement requires a well-formed incoming chain.
#[derive(Clone, Debug, PartialEq)]
pub struct Chain {
    blocks: Vec<Block>,
}

impl Chain {
    /// A fresh chain holding only the genesis block.
    pub fn with_genesis() -> Self {
        Self {
            blocks: vec![Block::genesis()],
        }
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// The newest block.
    pub fn tip(&self) -> &Block {
        match self.blocks.last() {
            Some(block) => block,
            // Both constructors and replacement enforce non-emptiness.
            None => unreachable!("chain invariant violated: empty chain"),
        }
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Appends a block without linkage checks. Used for the reward
    /// path, where the candidate was already validated by the network.
    pub fn append(&mut self, block: Block) {
        self.blocks.push(block);
    }

    /// Structural well-formedness of a block sequence: genesis at
    /// index 0 with empty `prevHash`, then contiguous indices each
    /// linking to the predecessor's hash.
    pub fn is_well_formed(blocks: &[Block]) -> bool {
        let Some(genesis) = blocks.first() else {
            return false;
        };
        if genesis.index != 0 || !genesis.prev_hash.is_empty() {
            return false;
        }
        blocks.windows(2).all(|pair| {
            let (prev, next) = (&pair[0], &pair[1]);
            next.index == prev.index + 1 && next.prev_hash == prev.hash
        })
    }

    /// The longest-chain rule: adopt `incoming` iff it is strictly
    /// longer than the local chain and well-formed. Returns whether a
    /// replacement happened, in which case the caller rebroadcasts.
    pub fn replace_if_longer(&mut self, incoming: Vec<Block>) -> bool {
        if incoming.len() <= self.blocks.len() {
            debug!(
                local = self.blocks.len(),
                incoming = incoming.len(),
                "ignoring chain copy that is not strictly longer"
            );
            return false;
        }
        if !Self::is_well_formed(&incoming) {
            warn!(
                incoming = incoming.len(),
                "ignoring malformed chain copy"
            );
            return false;
        }
        self.blocks = incoming;
        true
    }

    /// A wire snapshot of this chain.
    pub fn to_copy(&self) -> ChainCopy {
        ChainCopy {
            blocks: self.blocks.clone(),
        }
    }
}

impl Default for Chain {
    fn default() -> Self {
        Self::with_genesis()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::Transaction;
    use crate::wire::payload::Payload;

    /// Builds a well-formed chain of the given total length.
    fn chain_of(len: usize) -> Vec<Block> {
        let mut blocks = vec![Block::genesis()];
        for i in 1..len {
            let mut block = Block::next(
                &blocks[i - 1],
                Payload::Transaction(Transaction::new("a:1", "b:2", i as u64)),
            );
            block.seal(0);
            blocks.push(block);
        }
        blocks
    }

    #[test]
    fn fresh_chain_is_just_genesis() {
        let chain = Chain::with_genesis();
        assert_eq!(chain.len(), 1);
        assert_eq!(chain.tip().index, 0);
    }

    #[test]
    fn well_formedness_accepts_linked_chain() {
        assert!(Chain::is_well_formed(&chain_of(4)));
    }

    #[test]
    fn well_formedness_rejects_broken_linkage() {
        let mut blocks = chain_of(3);
        blocks[2].prev_hash = "bogus".into();
        assert!(!Chain::is_well_formed(&blocks));

        let mut blocks = chain_of(3);
        blocks[1].index = 5;
        assert!(!Chain::is_well_formed(&blocks));

        assert!(!Chain::is_well_formed(&[]));
    }

    #[test]
    fn longer_chain_replaces_and_shorter_does_not() {
        // A holds 3 blocks, B holds 5 with a shared genesis shape.
        let mut a = Chain {
            blocks: chain_of(3),
        };
        let b = Chain {
            blocks: chain_of(5),
        };

        // A adopts B's copy and should rebroadcast.
        assert!(a.replace_if_longer(b.blocks().to_vec()));
        assert_eq!(a.len(), 5);

        // B receives A's (now equal-length) copy and keeps its own.
        let mut b = b;
        assert!(!b.replace_if_longer(a.blocks().to_vec()));
        assert_eq!(b.len(), 5);
    }

    #[test]
    fn equal_length_is_not_replaced() {
        let mut a = Chain {
            blocks: chain_of(3),
        };
        assert!(!a.replace_if_longer(chain_of(3)));
    }

    #[test]
    fn malformed_longer_chain_is_rejected() {
        let mut a = Chain::with_genesis();
        let mut bad = chain_of(4);
        bad[2].prev_hash = "severed".into();
        assert!(!a.replace_if_longer(bad));
        assert_eq!(a.len(), 1);
    }

    #[test]
    fn append_extends_tip() {
        let mut chain = Chain::with_genesis();
        let mut block = Block::next(
            chain.tip(),
            Payload::Transaction(Transaction::new("a:1", "b:2", 2)),
        );
        block.seal(0);
        chain.append(block);
        assert_eq!(chain.len(), 2);
        assert_eq!(chain.tip().index, 1);
        assert!(Chain::is_well_formed(chain.blocks()));
    }
}
