//! Transaction signing and verification with P-256 keypairs.
//!
//! Signing is a separate step from construction because reward
//! transactions from the coordinator are never signed, and the client
//! facade signs only at origination time.

use tracing::debug;

use super::Transaction;
use crate::crypto::{Keypair, PublicKey};

/// Signs a transaction in place with the sender's keypair.
///
/// The signature covers the canonical JSON of the transaction with the
/// `signature` field blanked, so re-signing is idempotent with respect
/// to the signed content.
pub fn sign_transaction<'a>(tx: &'a mut Transaction, keypair: &Keypair) -> &'a Transaction {
    tx.signature = keypair.sign_hex(&tx.signable_bytes());
    tx
}

/// Verifies a transaction's signature against the sender's registered
/// public key. Unsigned transactions never verify.
pub fn verify_transaction(tx: &Transaction, sender_key: &PublicKey) -> bool {
    if !tx.is_signed() {
        debug!(from = %tx.from, "rejecting unsigned transaction");
        return false;
    }
    sender_key.verify_hex(&tx.signable_bytes(), &tx.signature)
}
