//! # Server Signing Keys
//!
//! Ed25519 keypair used by the server to sign session tokens.
//!
//! Tip and stake sessions are self-contained: the server keeps no session
//! table, so the only thing standing between a client and a forged token is
//! this key. It is derived deterministically from the configured session
//! secret so every replica behind a load balancer verifies the same tokens.
//!
//! ## Security considerations
//!
//! - Private keys are zeroized on drop (ed25519-dalek does this for us).
//! - `generate()` uses `OsRng`. Dev deployments without a configured secret
//!   get a fresh key per process, which invalidates outstanding tokens on
//!   restart. That is acceptable for dev and unacceptable for production,
//!   which is why production refuses to start without a secret.
//! - Key bytes are never logged. `Debug` prints the public half only.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use std::fmt;
use thiserror::Error;

use super::hash::sha256;

/// Errors that can occur while loading key material.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("session secret must not be empty")]
    EmptySecret,
}

/// The server's token-signing identity.
///
/// Intentionally does NOT implement `Serialize`. Exporting a signing key
/// should be a deliberate act, not a side effect of logging a struct.
///
/// # Examples
///
/// ```
/// use dstream_protocol::crypto::ServerKeypair;
///
/// let kp = ServerKeypair::from_secret("correct horse battery staple").unwrap();
/// let sig = kp.sign(b"payload");
/// assert!(kp.verify(b"payload", &sig));
/// ```
pub struct ServerKeypair {
    signing_key: SigningKey,
}

impl ServerKeypair {
    /// Generate a fresh keypair using the OS cryptographic RNG.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Constructs a keypair deterministically from a 32-byte seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    /// Derives the keypair from an operator-supplied secret string.
    ///
    /// The seed is `SHA-256(secret)` after trimming surrounding whitespace,
    /// so secrets pasted into env files with a trailing newline still work.
    pub fn from_secret(secret: &str) -> Result<Self, KeyError> {
        let trimmed = secret.trim();
        if trimmed.is_empty() {
            return Err(KeyError::EmptySecret);
        }
        Ok(Self::from_seed(&sha256(trimmed.as_bytes())))
    }

    /// Raw 32-byte public key.
    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Public key as lowercase hex. Safe to log.
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key_bytes())
    }

    /// Sign a message. Ed25519 is deterministic: same key, same message,
    /// same 64 bytes.
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing_key.sign(message).to_bytes()
    }

    /// Verify a signature made by this keypair.
    ///
    /// Returns `false` for wrong-length signatures instead of erroring.
    /// Callers only ever want a yes/no answer here.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        verify_ed25519(&self.signing_key.verifying_key(), message, signature)
    }

    /// Get the underlying `VerifyingKey`.
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }
}

/// Verifies an ed25519 signature given as a raw byte slice.
pub fn verify_ed25519(key: &VerifyingKey, message: &[u8], signature: &[u8]) -> bool {
    let Ok(sig_bytes) = <[u8; 64]>::try_from(signature) else {
        return false;
    };
    key.verify(message, &Signature::from_bytes(&sig_bytes)).is_ok()
}

impl Clone for ServerKeypair {
    fn clone(&self) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(&self.signing_key.to_bytes()),
        }
    }
}

impl fmt::Debug for ServerKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ServerKeypair(pub={})", self.public_key_hex())
    }
}
