//! # BIP-340 Schnorr over secp256k1
//!
//! Nostr identities are x-only secp256k1 public keys, and every Nostr event
//! carries a BIP-340 Schnorr signature over its 32-byte event id. Viewers,
//! broadcasters and escrow participants all authenticate this way, so this
//! module is the only place the server touches secp256k1.
//!
//! The server never holds a user's Nostr secret key. [`EventSigner`] exists
//! for clients, tooling and tests that need to produce signed events.

use k256::schnorr::signature::hazmat::{PrehashSigner, PrehashVerifier};
use k256::schnorr::{Signature, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use std::fmt;
use thiserror::Error;

/// Errors from secp256k1 key handling.
#[derive(Debug, Error)]
pub enum SchnorrError {
    #[error("invalid secp256k1 secret key")]
    InvalidSecretKey,

    #[error("schnorr signing failed")]
    SigningFailed,
}

/// A secp256k1 keypair that signs Nostr event ids.
pub struct EventSigner {
    signing_key: SigningKey,
}

impl EventSigner {
    /// Fresh random key from `OsRng`.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::random(&mut OsRng),
        }
    }

    /// Load from 32 raw secret bytes. Fails for zero or out-of-range scalars.
    pub fn from_bytes(secret: &[u8; 32]) -> Result<Self, SchnorrError> {
        let signing_key =
            SigningKey::from_bytes(secret).map_err(|_| SchnorrError::InvalidSecretKey)?;
        Ok(Self { signing_key })
    }

    /// Load from a hex-encoded secret key.
    pub fn from_hex(secret_hex: &str) -> Result<Self, SchnorrError> {
        let bytes = hex::decode(secret_hex.trim()).map_err(|_| SchnorrError::InvalidSecretKey)?;
        let arr: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| SchnorrError::InvalidSecretKey)?;
        Self::from_bytes(&arr)
    }

    /// The x-only public key as lowercase hex (the Nostr `pubkey` field).
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.signing_key.verifying_key().to_bytes())
    }

    /// Sign a 32-byte digest (an event id) per BIP-340.
    pub fn sign_digest(&self, digest: &[u8; 32]) -> Result<[u8; 64], SchnorrError> {
        let signature: Signature = self
            .signing_key
            .sign_prehash(digest)
            .map_err(|_| SchnorrError::SigningFailed)?;
        Ok(signature.to_bytes())
    }
}

impl fmt::Debug for EventSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventSigner(pub={})", self.public_key_hex())
    }
}

/// Verifies a hex-encoded BIP-340 signature over `digest` for a hex x-only
/// public key.
///
/// Any decoding problem is just a failed verification. Attackers do not get
/// to learn which byte was wrong.
pub fn verify_digest(pubkey_hex: &str, digest: &[u8; 32], signature_hex: &str) -> bool {
    let Ok(pubkey_bytes) = hex::decode(pubkey_hex) else {
        return false;
    };
    let Ok(sig_bytes) = hex::decode(signature_hex) else {
        return false;
    };
    let Ok(verifying_key) = VerifyingKey::from_bytes(&pubkey_bytes) else {
        return false;
    };
    let Ok(signature) = Signature::try_from(sig_bytes.as_slice()) else {
        return false;
    };
    verifying_key.verify_prehash(digest, &signature).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash::sha256;

    #[test]
    fn sign_and_verify_digest() {
        let signer = EventSigner::generate();
        let digest = sha256(b"event body");
        let sig = signer.sign_digest(&digest).unwrap();
        assert!(verify_digest(
            &signer.public_key_hex(),
            &digest,
            &hex::encode(sig)
        ));
    }

    #[test]
    fn wrong_digest_fails() {
        let signer = EventSigner::generate();
        let sig = signer.sign_digest(&sha256(b"a")).unwrap();
        assert!(!verify_digest(
            &signer.public_key_hex(),
            &sha256(b"b"),
            &hex::encode(sig)
        ));
    }

    #[test]
    fn wrong_key_fails() {
        let alice = EventSigner::generate();
        let bob = EventSigner::generate();
        let digest = sha256(b"x");
        let sig = alice.sign_digest(&digest).unwrap();
        assert!(!verify_digest(&bob.public_key_hex(), &digest, &hex::encode(sig)));
    }

    #[test]
    fn garbage_inputs_fail_closed() {
        let digest = sha256(b"x");
        assert!(!verify_digest("zz", &digest, "00"));
        assert!(!verify_digest(&"00".repeat(32), &digest, &"00".repeat(64)));
    }

    #[test]
    fn zero_secret_rejected() {
        assert!(EventSigner::from_bytes(&[0u8; 32]).is_err());
        assert!(EventSigner::from_hex("abcd").is_err());
    }

    #[test]
    fn hex_roundtrip_keeps_pubkey() {
        let a = EventSigner::from_bytes(&[3u8; 32]).unwrap();
        let b = EventSigner::from_hex(&hex::encode([3u8; 32])).unwrap();
        assert_eq!(a.public_key_hex(), b.public_key_hex());
        assert_eq!(a.public_key_hex().len(), 64);
    }
}
