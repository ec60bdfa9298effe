// Copyright (c) 2026 Cinder Labs. MIT License.
// See LICENSE for details.

//! # Cinder Protocol Core Library
//!
//! Cinder is a small LAN-scoped peer-to-peer cryptocurrency. A set of
//! mining peers and one distinguished **coordinator** drive rounds to
//! completion: an external client posts a transaction to the
//! coordinator, the coordinator broadcasts MINE, peers race (or enter a
//! stake lottery) for the right to append the block, the network votes
//! on the winning candidate, the coordinator pays the reward, and a
//! CONSENSUS broadcast makes every honest chain converge under the
//! longest-chain rule.
//!
//! ## Architecture
//!
//! - **wire**: JSON envelopes over UDP, the closed command set, and the
//!   key-presence payload discriminator.
//! - **transport**: the datagram socket, mDNS-style discovery, and
//!   peer liveness.
//! - **chain**: blocks and the per-peer chain with the longest-chain
//!   merge rule.
//! - **consensus**: the pluggable agreement layer, proof-of-work and
//!   proof-of-stake.
//! - **roles**: the peer and coordinator event loops.
//! - **client**: key material, signing, and payment origination.
//! - **crypto**: ECDSA P-256 primitives.
//! - **config**: every protocol constant in one place.
//!
//! ## Concurrency model
//!
//! One event loop per role owns all of that role's state. The only
//! cross-thread traffic is the proof-of-work search: a flag going out
//! (cancellation) and a proof event coming back.

pub mod chain;
pub mod client;
pub mod config;
pub mod consensus;
pub mod crypto;
pub mod roles;
pub mod transaction;
pub mod transport;
pub mod wire;
