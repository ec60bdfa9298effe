//! # Wire Format
//!
//! JSON envelopes carried in UDP datagrams. An envelope names its
//! sender, a command from the closed protocol set, and an optional
//! payload whose concrete type is recovered by key presence rather
//! than an explicit tag (see [`payload`]).

pub mod message;
pub mod payload;

pub use message::{decode, encode, CodecError, Command, Message, Origin, PeerAddress};
pub use payload::{CandidateBlock, ChainCopy, LotteryEntry, Payload, PeerChains, PublicKeyData};
