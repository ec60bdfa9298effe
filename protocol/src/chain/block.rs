//! # Block Structure
//!
//! A block is one ordered entry in a peer's chain: a monotonic index,
//! an RFC3339 timestamp, a polymorphic data payload (almost always a
//! transaction), the previous block's hash, this block's hash, and the
//! proof-of-work nonce (zero under proof-of-stake).
//!
//! ## Hash computation
//!
//! `hash = SHA256(canonical(block_without_hash) || itoa(nonce))`,
//! rendered as lowercase hex. The canonical form is the JSON of
//! `{index, timestamp, data, prevHash}` with stable key order and no
//! whitespace; the nonce is appended as its decimal string. The genesis
//! block is exempt: its hash is the fixed string `"0"`.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config;
use crate::transaction::Transaction;
use crate::wire::payload::Payload;

/// One entry in the chain.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// Position in the chain; genesis is 0.
    pub index: u64,
    /// RFC3339 creation time.
    pub timestamp: String,
    /// Payload this block records, discriminated like any wire payload.
    pub data: Payload,
    /// Hash of the predecessor. Empty for genesis.
    #[serde(rename = "prevHash")]
    pub prev_hash: String,
    /// This block's hash. Empty while a proof search is in flight.
    pub hash: String,
    /// Proof-of-work nonce; stays 0 under proof-of-stake.
    #[serde(default)]
    pub nonce: u64,
}

impl Block {
    /// The genesis block: index 0, empty `prevHash`, fixed hash `"0"`.
    pub fn genesis() -> Self {
        Self {
            index: 0,
            timestamp: Utc::now().to_rfc3339(),
            data: Payload::Transaction(Transaction::default()),
            prev_hash: String::new(),
            hash: config::GENESIS_HASH.to_string(),
            nonce: 0,
        }
    }

    /// A new unsealed block extending `tip`. The hash is left empty
    /// until the agreement strategy seals it.
    pub fn next(tip: &Block, data: Payload) -> Self {
        Self {
            index: tip.index + 1,
            timestamp: Utc::now().to_rfc3339(),
            data,
            prev_hash: tip.hash.clone(),
            hash: String::new(),
            nonce: 0,
        }
    }

    /// The canonical hashing preimage for a given nonce: the block
    /// without its `hash` and `nonce` fields, followed by the nonce's
    /// decimal rendering.
    pub fn proof_preimage(&self, nonce: u64) -> String {
        let preimage = HashPreimage {
            index: self.index,
            timestamp: &self.timestamp,
            data: &self.data,
            prev_hash: &self.prev_hash,
        };
        let mut canonical = serde_json::to_string(&preimage).unwrap_or_default();
        canonical.push_str(&nonce.to_string());
        canonical
    }

    /// SHA-256 of the preimage for `nonce`, as lowercase hex.
    pub fn content_hash(&self, nonce: u64) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.proof_preimage(nonce).as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Sets the nonce and the matching hash.
    pub fn seal(&mut self, nonce: u64) {
        self.nonce = nonce;
        self.hash = self.content_hash(nonce);
    }
}

/// Serialization view of a block with `hash` and `nonce` stripped.
#[derive(Serialize)]
struct HashPreimage<'a> {
    index: u64,
    timestamp: &'a str,
    data: &'a Payload,
    #[serde(rename = "prevHash")]
    prev_hash: &'a str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genesis_invariants() {
        let genesis = Block::genesis();
        assert_eq!(genesis.index, 0);
        assert!(genesis.prev_hash.is_empty());
        assert_eq!(genesis.hash, "0");
        assert_eq!(genesis.nonce, 0);
    }

    #[test]
    fn next_links_to_tip() {
        let genesis = Block::genesis();
        let block = Block::next(
            &genesis,
            Payload::Transaction(Transaction::new("a:1", "b:2", 3)),
        );
        assert_eq!(block.index, 1);
        assert_eq!(block.prev_hash, genesis.hash);
        assert!(block.hash.is_empty());
    }

    #[test]
    fn preimage_excludes_hash_and_appends_nonce() {
        let genesis = Block::genesis();
        let mut block = Block::next(&genesis, Payload::Transaction(Transaction::default()));
        block.hash = "should-not-appear".into();

        let preimage = block.proof_preimage(42);
        assert!(!preimage.contains("should-not-appear"));
        assert!(preimage.ends_with("42"));
    }

    #[test]
    fn content_hash_is_lowercase_hex_and_nonce_sensitive() {
        let block = Block::next(&Block::genesis(), Payload::Transaction(Transaction::default()));
        let h0 = block.content_hash(0);
        let h1 = block.content_hash(1);
        assert_eq!(h0.len(), 64);
        assert!(h0.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(h0, h1);
    }

    #[test]
    fn seal_makes_hash_recomputable() {
        let mut block = Block::next(&Block::genesis(), Payload::Transaction(Transaction::default()));
        block.seal(7);
        assert_eq!(block.hash, block.content_hash(block.nonce));
    }

    #[test]
    fn wire_roundtrip_preserves_prev_hash_key() {
        let block = Block::genesis();
        let json = serde_json::to_string(&block).unwrap();
        assert!(json.contains("\"prevHash\""));
        let back: Block = serde_json::from_str(&json).unwrap();
        assert_eq!(back, block);
    }
}
