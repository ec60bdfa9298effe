//! # Key Management
//!
//! ECDSA P-256 keypair generation and signing for Cinder peers.
//!
//! Every peer generates a keypair at startup and announces the public
//! half on join. Transactions are signed over their canonical JSON and
//! verified by recipients against the sender's registered key.
//!
//! Signatures travel as hex-encoded ASN.1 DER; public keys travel as
//! hex-encoded affine X/Y coordinates. Both choices keep the wire format
//! readable in packet captures, which matters more on a LAN teaching
//! network than byte count does.
//!
//! Key bytes are never logged. The `Debug` impl prints only the public
//! half.

use std::fmt;

use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::{EncodedPoint, FieldBytes};
use rand::rngs::OsRng;
use thiserror::Error;

/// Errors from key construction and signature handling.
///
/// Deliberately vague about *why* a key was rejected; error messages
/// are not the place to leak key material details.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("invalid secret key bytes: wrong length or not a valid scalar")]
    InvalidSecretKey,

    #[error("invalid public key coordinates: not a point on P-256")]
    InvalidPublicKey,

    #[error("malformed signature encoding")]
    InvalidSignature,
}

/// A peer's ECDSA P-256 identity keypair.
///
/// The signing key never leaves this struct except through
/// [`secret_key_bytes`](Self::secret_key_bytes), which exists for tests
/// and deterministic fixtures.
pub struct Keypair {
    signing_key: SigningKey,
}

/// The public half of a peer identity, safe to put on the wire.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey {
    verifying_key: VerifyingKey,
}

impl Keypair {
    /// Generate a fresh keypair from the OS cryptographic RNG.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::random(&mut OsRng),
        }
    }

    /// Reconstruct a keypair from raw 32-byte secret scalar material.
    ///
    /// Used by tests that need deterministic identities. A weak seed
    /// makes a weak key; production peers use [`generate`](Self::generate).
    pub fn from_secret_bytes(bytes: &[u8; 32]) -> Result<Self, KeyError> {
        let signing_key = SigningKey::from_bytes(FieldBytes::from_slice(bytes))
            .map_err(|_| KeyError::InvalidSecretKey)?;
        Ok(Self { signing_key })
    }

    /// The public half of this keypair.
    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            verifying_key: self.signing_key.verifying_key().clone(),
        }
    }

    /// Sign a message, returning the hex-encoded ASN.1 DER signature.
    ///
    /// P-256 signing here is RFC 6979 deterministic: the same key and
    /// message always produce the same signature, so no RNG state leaks
    /// into the wire format.
    pub fn sign_hex(&self, message: &[u8]) -> String {
        let signature: Signature = self.signing_key.sign(message);
        hex::encode(signature.to_der().as_bytes())
    }

    /// Export the raw secret scalar. Handle with care; exists for tests.
    pub fn secret_key_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes().into()
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Secret material stays out of debug output.
        let (x, _) = self.public_key().coordinates_hex();
        write!(f, "Keypair(pub_x={})", &x[..16.min(x.len())])
    }
}

// ---------------------------------------------------------------------------
// PublicKey
// ---------------------------------------------------------------------------

impl PublicKey {
    /// Rebuild a public key from hex-encoded affine coordinates.
    ///
    /// Coordinates shorter than 32 bytes are left-padded with zeros:
    /// big-integer encoders strip leading zero bytes, and rejecting
    /// those keys would drop roughly 1 in 256 honest peers.
    pub fn from_coordinates_hex(x_hex: &str, y_hex: &str) -> Result<Self, KeyError> {
        let x = decode_coordinate(x_hex)?;
        let y = decode_coordinate(y_hex)?;
        let point = EncodedPoint::from_affine_coordinates(
            FieldBytes::from_slice(&x),
            FieldBytes::from_slice(&y),
            false,
        );
        let verifying_key =
            VerifyingKey::from_encoded_point(&point).map_err(|_| KeyError::InvalidPublicKey)?;
        Ok(Self { verifying_key })
    }

    /// The affine X/Y coordinates as lowercase hex, the form exchanged
    /// in PUBLIC_KEY / PUBLIC_KEYS messages.
    pub fn coordinates_hex(&self) -> (String, String) {
        let point = self.verifying_key.to_encoded_point(false);
        let x = point.x().map(hex::encode).unwrap_or_default();
        let y = point.y().map(hex::encode).unwrap_or_default();
        (x, y)
    }

    /// Verify a hex-encoded DER signature over `message`.
    ///
    /// Returns a plain boolean: callers drop bad transactions, they do
    /// not branch on the failure mode.
    pub fn verify_hex(&self, message: &[u8], signature_hex: &str) -> bool {
        let Ok(der) = hex::decode(signature_hex) else {
            return false;
        };
        let Ok(signature) = Signature::from_der(&der) else {
            return false;
        };
        self.verifying_key.verify(message, &signature).is_ok()
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (x, _) = self.coordinates_hex();
        write!(f, "PublicKey(x={})", &x[..16.min(x.len())])
    }
}

/// Decode one hex coordinate into exactly 32 bytes, left-padded.
fn decode_coordinate(hex_str: &str) -> Result<[u8; 32], KeyError> {
    let bytes = hex::decode(hex_str).map_err(|_| KeyError::InvalidPublicKey)?;
    if bytes.is_empty() || bytes.len() > 32 {
        return Err(KeyError::InvalidPublicKey);
    }
    let mut out = [0u8; 32];
    out[32 - bytes.len()..].copy_from_slice(&bytes);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_verify_roundtrip() {
        let kp = Keypair::generate();
        let sig = kp.sign_hex(b"send 3 cinder to bob");
        assert!(kp.public_key().verify_hex(b"send 3 cinder to bob", &sig));
    }

    #[test]
    fn wrong_message_fails_verification() {
        let kp = Keypair::generate();
        let sig = kp.sign_hex(b"correct message");
        assert!(!kp.public_key().verify_hex(b"tampered message", &sig));
    }

    #[test]
    fn wrong_key_fails_verification() {
        let kp1 = Keypair::generate();
        let kp2 = Keypair::generate();
        let sig = kp1.sign_hex(b"message");
        assert!(!kp2.public_key().verify_hex(b"message", &sig));
    }

    #[test]
    fn coordinates_roundtrip() {
        let kp = Keypair::generate();
        let (x, y) = kp.public_key().coordinates_hex();
        let rebuilt = PublicKey::from_coordinates_hex(&x, &y).expect("valid coordinates");
        assert_eq!(rebuilt, kp.public_key());
    }

    #[test]
    fn stripped_leading_zero_coordinates_accepted() {
        // Big-integer hex encoders drop leading zero bytes; the decoder
        // must pad rather than reject.
        let kp = Keypair::generate();
        let (x, y) = kp.public_key().coordinates_hex();
        let stripped_x = x.trim_start_matches("00").to_string();
        let rebuilt = PublicKey::from_coordinates_hex(&stripped_x, &y).expect("padded decode");
        assert_eq!(rebuilt, kp.public_key());
    }

    #[test]
    fn garbage_coordinates_rejected() {
        assert!(PublicKey::from_coordinates_hex("zz", "00").is_err());
        assert!(PublicKey::from_coordinates_hex("", "").is_err());
        // 33 bytes of 0xff is not a P-256 coordinate.
        let too_long = "ff".repeat(33);
        assert!(PublicKey::from_coordinates_hex(&too_long, &too_long).is_err());
    }

    #[test]
    fn garbage_signature_rejected() {
        let kp = Keypair::generate();
        assert!(!kp.public_key().verify_hex(b"m", "not-hex"));
        assert!(!kp.public_key().verify_hex(b"m", "deadbeef"));
        assert!(!kp.public_key().verify_hex(b"m", ""));
    }

    #[test]
    fn deterministic_from_secret_bytes() {
        let seed = [7u8; 32];
        let kp1 = Keypair::from_secret_bytes(&seed).unwrap();
        let kp2 = Keypair::from_secret_bytes(&seed).unwrap();
        assert_eq!(kp1.public_key(), kp2.public_key());
    }

    #[test]
    fn zero_secret_rejected() {
        // The zero scalar is not a valid P-256 secret key.
        assert!(Keypair::from_secret_bytes(&[0u8; 32]).is_err());
    }

    #[test]
    fn debug_does_not_leak_secret() {
        let kp = Keypair::generate();
        let debug = format!("{:?}", kp);
        assert!(debug.starts_with("Keypair(pub_x="));
        assert!(!debug.contains(&hex::encode(kp.secret_key_bytes())));
    }
}
