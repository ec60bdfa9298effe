//! Polymorphic message and block payloads.
//!
//! The wire format carries no explicit type tag. A payload's concrete
//! type is recovered from which keys are present, in this order:
//!
//! | key(s) present      | payload        |
//! |---------------------|----------------|
//! | `from`              | [`Transaction`]|
//! | `chainCopy`         | [`ChainCopy`]  |
//! | `list`              | [`PeerChains`] |
//! | `stake`             | [`LotteryEntry`] |
//! | `block` + `miner`   | [`CandidateBlock`] |
//! | `X` + `Y`           | [`PublicKeyData`] |
//!
//! Anything else is a decode error. This table is normative: block
//! `data` fields discriminate the same way, recursively.

use serde::{Deserialize, Serialize};

use super::message::PeerAddress;
use crate::chain::Block;
use crate::transaction::Transaction;

// ---------------------------------------------------------------------------
// Payload Variants
// ---------------------------------------------------------------------------

/// A full copy of one peer's chain, broadcast under PEER_CHAIN.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChainCopy {
    #[serde(rename = "chainCopy")]
    pub blocks: Vec<Block>,
}

/// Several peers' chain copies at once. Kept for wire compatibility
/// with chain snapshots recorded as block data.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PeerChains {
    pub list: Vec<Vec<Block>>,
}

/// One entry in the proof-of-stake lottery: how much the peer wagered
/// and where to send WINNER or the refund.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LotteryEntry {
    /// Positive stake, already deducted from the peer's wallet.
    pub stake: u64,
    pub peer: PeerAddress,
}

/// A mined block awaiting network validation, paired with its miner so
/// the coordinator knows whom to reward.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CandidateBlock {
    pub block: Box<Block>,
    pub miner: PeerAddress,
}

/// A peer's P-256 public key as hex affine coordinates.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyData {
    #[serde(rename = "X")]
    pub x: String,
    #[serde(rename = "Y")]
    pub y: String,
}

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// The closed union of payload types a message or block may carry.
///
/// Serialization is untagged: each variant writes its natural object,
/// whose keys double as the discriminator on the way back in.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    Transaction(Transaction),
    Chain(ChainCopy),
    PeerChains(PeerChains),
    LotteryEntry(LotteryEntry),
    CandidateBlock(CandidateBlock),
    PublicKey(PublicKeyData),
}

impl Payload {
    pub fn as_transaction(&self) -> Option<&Transaction> {
        match self {
            Payload::Transaction(tx) => Some(tx),
            _ => None,
        }
    }

    pub fn as_chain(&self) -> Option<&ChainCopy> {
        match self {
            Payload::Chain(chain) => Some(chain),
            _ => None,
        }
    }

    pub fn as_lottery_entry(&self) -> Option<&LotteryEntry> {
        match self {
            Payload::LotteryEntry(entry) => Some(entry),
            _ => None,
        }
    }

    pub fn as_candidate_block(&self) -> Option<&CandidateBlock> {
        match self {
            Payload::CandidateBlock(candidate) => Some(candidate),
            _ => None,
        }
    }

    pub fn as_public_key(&self) -> Option<&PublicKeyData> {
        match self {
            Payload::PublicKey(key) => Some(key),
            _ => None,
        }
    }
}

/// Which discriminator matched, decided before the value is consumed.
enum Discriminated {
    Transaction,
    Chain,
    PeerChains,
    LotteryEntry,
    CandidateBlock,
    PublicKey,
}

impl<'de> Deserialize<'de> for Payload {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use serde::de::Error;

        let value = serde_json::Value::deserialize(deserializer)?;
        let discriminated = {
            let object = value
                .as_object()
                .ok_or_else(|| D::Error::custom("payload must be a JSON object"))?;
            if object.contains_key("from") {
                Discriminated::Transaction
            } else if object.contains_key("chainCopy") {
                Discriminated::Chain
            } else if object.contains_key("list") {
                Discriminated::PeerChains
            } else if object.contains_key("stake") {
                Discriminated::LotteryEntry
            } else if object.contains_key("block") && object.contains_key("miner") {
                Discriminated::CandidateBlock
            } else if object.contains_key("X") && object.contains_key("Y") {
                Discriminated::PublicKey
            } else {
                return Err(D::Error::custom("no payload discriminator matched"));
            }
        };

        let payload = match discriminated {
            Discriminated::Transaction => {
                Payload::Transaction(serde_json::from_value(value).map_err(D::Error::custom)?)
            }
            Discriminated::Chain => {
                Payload::Chain(serde_json::from_value(value).map_err(D::Error::custom)?)
            }
            Discriminated::PeerChains => {
                Payload::PeerChains(serde_json::from_value(value).map_err(D::Error::custom)?)
            }
            Discriminated::LotteryEntry => {
                Payload::LotteryEntry(serde_json::from_value(value).map_err(D::Error::custom)?)
            }
            Discriminated::CandidateBlock => {
                Payload::CandidateBlock(serde_json::from_value(value).map_err(D::Error::custom)?)
            }
            Discriminated::PublicKey => {
                Payload::PublicKey(serde_json::from_value(value).map_err(D::Error::custom)?)
            }
        };
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Block;

    fn addr(port: u16) -> PeerAddress {
        PeerAddress::new("127.0.0.1".parse().unwrap(), port)
    }

    fn roundtrip(payload: &Payload) -> Payload {
        let json = serde_json::to_string(payload).unwrap();
        serde_json::from_str(&json).unwrap()
    }

    #[test]
    fn transaction_discriminated_by_from_key() {
        let payload = Payload::Transaction(Transaction::new("a:1", "b:2", 3));
        assert!(matches!(roundtrip(&payload), Payload::Transaction(_)));
    }

    #[test]
    fn chain_discriminated_by_chain_copy_key() {
        let payload = Payload::Chain(ChainCopy {
            blocks: vec![Block::genesis()],
        });
        let back = roundtrip(&payload);
        assert_eq!(back.as_chain().unwrap().blocks.len(), 1);
    }

    #[test]
    fn peer_chains_discriminated_by_list_key() {
        let payload = Payload::PeerChains(PeerChains {
            list: vec![vec![Block::genesis()]],
        });
        assert!(matches!(roundtrip(&payload), Payload::PeerChains(_)));
    }

    #[test]
    fn lottery_entry_discriminated_by_stake_key() {
        let payload = Payload::LotteryEntry(LotteryEntry {
            stake: 4,
            peer: addr(6000),
        });
        let back = roundtrip(&payload);
        assert_eq!(back.as_lottery_entry().unwrap().stake, 4);
    }

    #[test]
    fn candidate_block_needs_both_keys() {
        let payload = Payload::CandidateBlock(CandidateBlock {
            block: Box::new(Block::genesis()),
            miner: addr(6000),
        });
        assert!(matches!(roundtrip(&payload), Payload::CandidateBlock(_)));

        // "block" alone is not a candidate block.
        let partial = r#"{"block":{}}"#;
        assert!(serde_json::from_str::<Payload>(partial).is_err());
    }

    #[test]
    fn public_key_discriminated_by_coordinates() {
        let payload = Payload::PublicKey(PublicKeyData {
            x: "ab".into(),
            y: "cd".into(),
        });
        assert!(matches!(roundtrip(&payload), Payload::PublicKey(_)));
    }

    #[test]
    fn unmatched_object_is_a_parse_error() {
        let err = serde_json::from_str::<Payload>(r#"{"wat":1}"#).unwrap_err();
        assert!(err.to_string().contains("no payload discriminator"));
    }

    #[test]
    fn non_object_payload_is_a_parse_error() {
        assert!(serde_json::from_str::<Payload>("42").is_err());
        assert!(serde_json::from_str::<Payload>("[1,2]").is_err());
    }

    #[test]
    fn block_data_discriminates_recursively() {
        // A chain copy whose blocks carry transaction data survives the trip.
        let mut block = Block::genesis();
        block.data = Payload::Transaction(Transaction::new("a:1", "b:2", 9));
        let payload = Payload::Chain(ChainCopy {
            blocks: vec![block],
        });
        let back = roundtrip(&payload);
        let tx = back.as_chain().unwrap().blocks[0]
            .data
            .as_transaction()
            .unwrap()
            .clone();
        assert_eq!(tx.amount, 9);
    }
}
