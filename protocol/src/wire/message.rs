//! Message envelopes, the closed command set, and peer addressing.
//!
//! Envelope layout on the wire:
//!
//! ```json
//! {
//!   "from": { "address": { "IP": "192.168.1.7", "Port": 51234 },
//!             "lastMessageTime": "2026-08-02T10:15:00.123Z" },
//!   "command": "MINE",
//!   "data": { "from": "…", "to": "…", "amount": 3, "signature": "…" }
//! }
//! ```
//!
//! Unknown commands fail decoding; a payload that matches no
//! discriminator fails decoding; timestamps must parse as RFC3339.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::payload::Payload;
use crate::config;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised by the datagram codec.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Unknown command, unsupported payload shape, bad timestamp, or
    /// plain broken JSON. All of these drop the message.
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The encoded envelope does not fit in one datagram.
    #[error("encoded message is {0} bytes, above the datagram limit")]
    Oversize(usize),
}

// ---------------------------------------------------------------------------
// Peer Addressing
// ---------------------------------------------------------------------------

/// A peer endpoint. Two addresses are equal iff `(ip, port)` match;
/// the port alone distinguishes peers on a single development host.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PeerAddress {
    pub ip: IpAddr,
    pub port: u16,
}

impl PeerAddress {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self { ip, port }
    }

    /// The socket address this peer receives datagrams on.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }

    /// Whether this is the coordinator endpoint, identified by its
    /// well-known port.
    pub fn is_coordinator(&self, coordinator_port: u16) -> bool {
        self.port == coordinator_port
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // SocketAddr notation: brackets IPv6, so "ip:port" stays parseable.
        write!(f, "{}", self.socket_addr())
    }
}

impl FromStr for PeerAddress {
    type Err = std::net::AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let socket: SocketAddr = s.parse()?;
        Ok(Self {
            ip: socket.ip(),
            port: socket.port(),
        })
    }
}

/// Wire shape of an address: `{"IP": "…", "Port": n}`.
#[derive(Serialize, Deserialize)]
struct WireAddr {
    #[serde(rename = "IP")]
    ip: String,
    #[serde(rename = "Port")]
    port: u16,
}

impl Serialize for PeerAddress {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        WireAddr {
            ip: self.ip.to_string(),
            port: self.port,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PeerAddress {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = WireAddr::deserialize(deserializer)?;
        let ip: IpAddr = wire.ip.parse().map_err(serde::de::Error::custom)?;
        Ok(Self {
            ip,
            port: wire.port,
        })
    }
}

/// The sender header of an envelope: who sent it and when.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Origin {
    /// Sender endpoint.
    pub address: PeerAddress,
    /// Sender wall-clock at send time, RFC3339.
    #[serde(rename = "lastMessageTime")]
    pub last_message_time: DateTime<Utc>,
}

impl Origin {
    pub fn now(address: PeerAddress) -> Self {
        Self {
            address,
            last_message_time: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// The closed set of protocol commands. Anything else on the wire is a
/// decode error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    #[serde(rename = "PING")]
    Ping,
    #[serde(rename = "MINE")]
    Mine,
    #[serde(rename = "PROOF")]
    Proof,
    #[serde(rename = "VALIDATE")]
    Validate,
    #[serde(rename = "BLOCK_VALID")]
    BlockValid,
    #[serde(rename = "TRANSACTION")]
    Transaction,
    #[serde(rename = "CONSENSUS")]
    Consensus,
    #[serde(rename = "GET_CHAIN")]
    GetChain,
    #[serde(rename = "PEER_CHAIN")]
    PeerChain,
    #[serde(rename = "STAKE")]
    Stake,
    #[serde(rename = "WINNER")]
    Winner,
    #[serde(rename = "PUBLIC_KEY")]
    PublicKey,
    #[serde(rename = "PUBLIC_KEYS")]
    PublicKeys,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Command::Ping => "PING",
            Command::Mine => "MINE",
            Command::Proof => "PROOF",
            Command::Validate => "VALIDATE",
            Command::BlockValid => "BLOCK_VALID",
            Command::Transaction => "TRANSACTION",
            Command::Consensus => "CONSENSUS",
            Command::GetChain => "GET_CHAIN",
            Command::PeerChain => "PEER_CHAIN",
            Command::Stake => "STAKE",
            Command::Winner => "WINNER",
            Command::PublicKey => "PUBLIC_KEY",
            Command::PublicKeys => "PUBLIC_KEYS",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// One datagram's worth of protocol traffic.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub from: Origin,
    pub command: Command,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Payload>,
}

impl Message {
    pub fn new(from: PeerAddress, command: Command, data: Option<Payload>) -> Self {
        Self {
            from: Origin::now(from),
            command,
            data,
        }
    }
}

/// Encodes a message for the wire, enforcing the datagram size limit.
pub fn encode(message: &Message) -> Result<Vec<u8>, CodecError> {
    let bytes = serde_json::to_vec(message)?;
    if bytes.len() > config::MAX_DATAGRAM_BYTES {
        return Err(CodecError::Oversize(bytes.len()));
    }
    Ok(bytes)
}

/// Decodes a datagram into a message, rejecting unknown commands and
/// undiscriminable payloads.
pub fn decode(bytes: &[u8]) -> Result<Message, CodecError> {
    Ok(serde_json::from_slice(bytes)?)
}
