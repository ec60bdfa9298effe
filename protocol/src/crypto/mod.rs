//! Cryptographic primitives: ECDSA P-256 keypairs and signatures.

pub mod keys;

pub use keys::{KeyError, Keypair, PublicKey};
