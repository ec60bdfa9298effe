//! # Transactions
//!
//! A transaction moves `amount` cinder from one peer address to another.
//! Addresses are `"ip:port"` strings: on a LAN network the transport
//! endpoint *is* the identity, and the signature binds that identity to
//! a P-256 key announced at join time.
//!
//! ## Canonical form
//!
//! Hashing and signing operate on the canonical JSON of the transaction
//! with the `signature` field blanked: stable key order (`from`, `to`,
//! `amount`, `signature`), no whitespace, integers without trailing
//! decimals. Serializing the struct directly gives exactly this, so the
//! canonical form is the serializer output rather than a second
//! hand-rolled encoding.

pub mod signing;

use serde::{Deserialize, Serialize};

pub use signing::{sign_transaction, verify_transaction};

/// A single currency movement between two peer addresses.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Sender address, `"ip:port"`.
    pub from: String,
    /// Recipient address, `"ip:port"`.
    pub to: String,
    /// Non-negative amount of cinder moved.
    pub amount: u64,
    /// Hex-encoded ASN.1 DER signature of the sender over
    /// [`canonical_json`](Self::canonical_json). Empty until signed;
    /// coordinator reward transactions stay unsigned.
    #[serde(default)]
    pub signature: String,
}

impl Transaction {
    /// Build an unsigned transaction.
    pub fn new(from: impl Into<String>, to: impl Into<String>, amount: u64) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            amount,
            signature: String::new(),
        }
    }

    /// The canonical JSON used for signing and verification: this
    /// transaction with `signature` blanked.
    pub fn canonical_json(&self) -> String {
        let unsigned = Self {
            signature: String::new(),
            ..self.clone()
        };
        // Struct-to-JSON of known-serializable fields cannot fail.
        serde_json::to_string(&unsigned).unwrap_or_default()
    }

    /// Canonical bytes for the signer.
    pub fn signable_bytes(&self) -> Vec<u8> {
        self.canonical_json().into_bytes()
    }

    /// Whether a signature is attached (not whether it verifies).
    pub fn is_signed(&self) -> bool {
        !self.signature.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_json_is_stable_and_compact() {
        let tx = Transaction::new("127.0.0.1:4000", "127.0.0.1:5000", 3);
        let canonical = tx.canonical_json();
        assert_eq!(
            canonical,
            r#"{"from":"127.0.0.1:4000","to":"127.0.0.1:5000","amount":3,"signature":""}"#
        );
    }

    #[test]
    fn canonical_json_ignores_attached_signature() {
        let mut tx = Transaction::new("a:1", "b:2", 7);
        let before = tx.canonical_json();
        tx.signature = "deadbeef".into();
        assert_eq!(before, tx.canonical_json());
    }

    #[test]
    fn missing_signature_field_deserializes_empty() {
        // The HTTP intake and reward path produce unsigned transactions.
        let tx: Transaction =
            serde_json::from_str(r#"{"from":"a:1","to":"b:2","amount":5}"#).unwrap();
        assert!(!tx.is_signed());
        assert_eq!(tx.amount, 5);
    }

    #[test]
    fn negative_amount_rejected_by_codec() {
        let err = serde_json::from_str::<Transaction>(r#"{"from":"a:1","to":"b:2","amount":-4}"#);
        assert!(err.is_err());
    }
}
