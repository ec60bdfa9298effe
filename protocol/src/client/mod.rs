//! # Client Facade
//!
//! The thin slice of a peer that deals with identity and money: the
//! P-256 keypair generated at startup, the registry of other peers'
//! announced keys, transaction signing/verification, and the payment
//! origination flow (debit, POST to the coordinator's HTTP intake,
//! deliver the signed transaction to the recipient over UDP).
//!
//! The HTTP submission is raw HTTP/1.1 over a `TcpStream`; one POST
//! with a form body does not justify an HTTP client dependency.

use std::collections::HashMap;
use std::net::SocketAddr;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::crypto::{KeyError, Keypair, PublicKey};
use crate::transaction::{sign_transaction, verify_transaction, Transaction};
use crate::wire::{PeerAddress, PublicKeyData};

/// Errors from payment origination.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("insufficient balance: wanted {wanted}, have {have}")]
    InsufficientFunds { wanted: u64, have: u64 },

    #[error("cannot send currency to the coordinator")]
    RecipientIsCoordinator,

    #[error("coordinator rejected the transaction: {0}")]
    Rejected(String),

    #[error("HTTP submission failed: {0}")]
    Http(#[source] std::io::Error),

    #[error("UDP delivery to the recipient failed: {0}")]
    Delivery(String),
}

/// Per-peer key material and the registry of everyone else's keys.
pub struct Client {
    keypair: Keypair,
    registry: HashMap<PeerAddress, PublicKey>,
}

impl Client {
    pub fn new() -> Self {
        Self {
            keypair: Keypair::generate(),
            registry: HashMap::new(),
        }
    }

    /// The payload announced under PUBLIC_KEYS on join and echoed back
    /// under PUBLIC_KEY.
    pub fn announcement(&self) -> PublicKeyData {
        let (x, y) = self.keypair.public_key().coordinates_hex();
        PublicKeyData { x, y }
    }

    /// Registers a peer's announced key. Re-announcements are ignored;
    /// the first key registered for an address wins.
    pub fn register_key(&mut self, data: &PublicKeyData, peer: PeerAddress) -> Result<(), KeyError> {
        if self.registry.contains_key(&peer) {
            debug!(%peer, "key already registered");
            return Ok(());
        }
        let key = PublicKey::from_coordinates_hex(&data.x, &data.y)?;
        info!(%peer, "registered public key");
        self.registry.insert(peer, key);
        Ok(())
    }

    pub fn knows(&self, peer: &PeerAddress) -> bool {
        self.registry.contains_key(peer)
    }

    /// Signs a transaction with this peer's key.
    pub fn sign(&self, tx: &mut Transaction) {
        sign_transaction(tx, &self.keypair);
    }

    /// Verifies an incoming transaction against the key registered for
    /// its `from` address. Unknown senders and unparseable addresses
    /// fail closed.
    pub fn verify(&self, tx: &Transaction) -> bool {
        let Ok(sender) = tx.from.parse::<PeerAddress>() else {
            warn!(from = %tx.from, "transaction sender is not an address");
            return false;
        };
        let Some(key) = self.registry.get(&sender) else {
            warn!(from = %tx.from, "transaction from unknown sender");
            return false;
        };
        verify_transaction(tx, key)
    }

    /// Builds and signs a payment, enforcing the balance check. The
    /// caller debits the wallet once delivery succeeds.
    pub fn create_payment(
        &self,
        from: PeerAddress,
        to: PeerAddress,
        amount: u64,
        wallet: u64,
        coordinator_port: u16,
    ) -> Result<Transaction, ClientError> {
        if amount > wallet {
            return Err(ClientError::InsufficientFunds {
                wanted: amount,
                have: wallet,
            });
        }
        if to.is_coordinator(coordinator_port) {
            return Err(ClientError::RecipientIsCoordinator);
        }
        let mut tx = Transaction::new(from.to_string(), to.to_string(), amount);
        self.sign(&mut tx);
        Ok(tx)
    }

    /// POSTs a signed transaction to the coordinator's HTTP intake so
    /// it enters the mining queue. Returns the response body on 200;
    /// any other status is a rejection carrying the server's message.
    pub async fn post_to_coordinator(
        &self,
        endpoint: SocketAddr,
        tx: &Transaction,
    ) -> Result<String, ClientError> {
        let body = form_encode(&[
            ("from", &tx.from),
            ("to", &tx.to),
            ("amount", &tx.amount.to_string()),
            ("signature", &tx.signature),
        ]);
        let request = format!(
            "POST /newTransaction HTTP/1.1\r\nHost: {endpoint}\r\nConnection: close\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: {}\r\n\r\n{body}",
            body.len(),
        );

        let mut stream = TcpStream::connect(endpoint).await.map_err(ClientError::Http)?;
        stream
            .write_all(request.as_bytes())
            .await
            .map_err(ClientError::Http)?;
        stream.shutdown().await.map_err(ClientError::Http)?;

        let mut raw = Vec::new();
        stream.read_to_end(&mut raw).await.map_err(ClientError::Http)?;
        let response = String::from_utf8_lossy(&raw);

        let status_ok = response
            .lines()
            .next()
            .map(|line| line.contains(" 200 "))
            .unwrap_or(false);
        let body = response
            .split_once("\r\n\r\n")
            .map(|(_, b)| b.trim().to_string())
            .unwrap_or_default();

        if status_ok {
            Ok(body)
        } else {
            Err(ClientError::Rejected(body))
        }
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

/// Minimal application/x-www-form-urlencoded encoder. Unreserved bytes
/// pass through, spaces become `+`, everything else is %XX.
fn form_encode(fields: &[(&str, &str)]) -> String {
    fn escape(value: &str, out: &mut String) {
        for byte in value.bytes() {
            match byte {
                b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                    out.push(byte as char)
                }
                b' ' => out.push('+'),
                other => {
                    out.push('%');
                    out.push_str(&format!("{other:02X}"));
                }
            }
        }
    }

    let mut encoded = String::new();
    for (i, (key, value)) in fields.iter().enumerate() {
        if i > 0 {
            encoded.push('&');
        }
        escape(key, &mut encoded);
        encoded.push('=');
        escape(value, &mut encoded);
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> PeerAddress {
        PeerAddress::new("127.0.0.1".parse().unwrap(), port)
    }

    #[test]
    fn announcement_registers_and_verifies() {
        let mut alice = Client::new();
        let mut bob = Client::new();

        bob.register_key(&alice.announcement(), addr(4000)).unwrap();

        let mut tx = Transaction::new(addr(4000).to_string(), addr(5000).to_string(), 3);
        alice.sign(&mut tx);
        assert!(bob.verify(&tx));

        // Registration is one-way; alice has no key for bob.
        assert!(bob.knows(&addr(4000)));
        assert!(!alice.knows(&addr(5000)));
        let mut reverse = Transaction::new(addr(5000).to_string(), addr(4000).to_string(), 1);
        bob.sign(&mut reverse);
        assert!(!alice.verify(&reverse));
    }

    #[test]
    fn spoofed_sender_address_is_rejected() {
        // A signs with its own key but claims B's from-address. The
        // recipient looks up B's registered key and the check fails.
        let spoofer = Client::new();
        let victim = Client::new();
        let mut recipient = Client::new();

        recipient
            .register_key(&victim.announcement(), addr(4000))
            .unwrap();

        let mut tx = Transaction::new(addr(4000).to_string(), addr(6000).to_string(), 9);
        spoofer.sign(&mut tx);
        assert!(!recipient.verify(&tx));
    }

    #[test]
    fn unknown_sender_is_rejected() {
        let sender = Client::new();
        let recipient = Client::new();
        let mut tx = Transaction::new(addr(4000).to_string(), addr(6000).to_string(), 1);
        sender.sign(&mut tx);
        assert!(!recipient.verify(&tx));
    }

    #[test]
    fn first_registered_key_wins() {
        let first = Client::new();
        let second = Client::new();
        let mut recipient = Client::new();

        recipient.register_key(&first.announcement(), addr(4000)).unwrap();
        recipient.register_key(&second.announcement(), addr(4000)).unwrap();

        let mut tx = Transaction::new(addr(4000).to_string(), addr(6000).to_string(), 1);
        first.sign(&mut tx);
        assert!(recipient.verify(&tx));
    }

    #[test]
    fn payment_checks_balance_and_recipient() {
        let client = Client::new();
        let err = client
            .create_payment(addr(4000), addr(5000), 50, 10, 8080)
            .unwrap_err();
        assert!(matches!(err, ClientError::InsufficientFunds { .. }));

        let err = client
            .create_payment(addr(4000), addr(8080), 1, 10, 8080)
            .unwrap_err();
        assert!(matches!(err, ClientError::RecipientIsCoordinator));

        let tx = client.create_payment(addr(4000), addr(5000), 3, 10, 8080).unwrap();
        assert!(tx.is_signed());
        assert_eq!(tx.amount, 3);
    }

    #[test]
    fn form_encoding_escapes_reserved_bytes() {
        let encoded = form_encode(&[("from", "127.0.0.1:4000"), ("note", "a b&c")]);
        assert_eq!(encoded, "from=127.0.0.1%3A4000&note=a+b%26c");
    }

    #[tokio::test]
    async fn post_parses_success_and_rejection() {
        use tokio::net::TcpListener;

        async fn one_shot_server(status_line: &'static str, body: &'static str) -> SocketAddr {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut sink = vec![0u8; 4096];
                let _ = socket.read(&mut sink).await;
                let response = format!(
                    "{status_line}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len(),
                );
                let _ = socket.write_all(response.as_bytes()).await;
            });
            addr
        }

        let client = Client::new();
        let tx = Transaction::new("127.0.0.1:4000", "127.0.0.1:5000", 2);

        let ok_addr =
            one_shot_server("HTTP/1.1 200 OK", "Transaction processed successfully!").await;
        let body = client.post_to_coordinator(ok_addr, &tx).await.unwrap();
        assert_eq!(body, "Transaction processed successfully!");

        let bad_addr = one_shot_server("HTTP/1.1 400 Bad Request", "invalid amount").await;
        let err = client.post_to_coordinator(bad_addr, &tx).await.unwrap_err();
        match err {
            ClientError::Rejected(message) => assert_eq!(message, "invalid amount"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
