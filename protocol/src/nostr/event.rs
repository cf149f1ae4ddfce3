//! # Signed Nostr Events
//!
//! The wire envelope for everything users sign. An event id is the SHA-256
//! of the canonical JSON array `[0, pubkey, created_at, kind, tags, content]`
//! and the signature is BIP-340 Schnorr over that id.
//!
//! `serde_json` produces exactly the canonical escaping Nostr expects
//! (quotes, backslashes and control characters escaped, everything else
//! verbatim), so the id can be recomputed from a straight serialization.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::hash::{is_hex64, sha256};
use crate::crypto::schnorr::{verify_digest, EventSigner, SchnorrError};

/// Reasons an event fails structural or cryptographic validation.
#[derive(Debug, Error)]
pub enum EventError {
    #[error("event pubkey must be 64 lowercase hex characters")]
    MalformedPubkey,

    #[error("event id must be 64 lowercase hex characters")]
    MalformedId,

    #[error("event signature must be 128 hex characters")]
    MalformedSignature,

    #[error("event id does not match its contents")]
    IdMismatch,

    #[error("event signature does not verify")]
    BadSignature,

    #[error("event serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Signing(#[from] SchnorrError),
}

/// A Nostr event as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NostrEvent {
    pub id: String,
    pub pubkey: String,
    pub created_at: u64,
    pub kind: u64,
    pub tags: Vec<Vec<String>>,
    pub content: String,
    pub sig: String,
}

impl NostrEvent {
    /// Builds and signs an event with `signer` as the author.
    pub fn sign(
        signer: &EventSigner,
        created_at: u64,
        kind: u64,
        tags: Vec<Vec<String>>,
        content: impl Into<String>,
    ) -> Result<Self, EventError> {
        let pubkey = signer.public_key_hex();
        let content = content.into();
        let digest = event_digest(&pubkey, created_at, kind, &tags, &content)?;
        let sig = signer.sign_digest(&digest)?;
        Ok(Self {
            id: hex::encode(digest),
            pubkey,
            created_at,
            kind,
            tags,
            content,
            sig: hex::encode(sig),
        })
    }

    /// Structural checks: lowercase hex pubkey and id, 64-byte hex signature.
    pub fn validate(&self) -> Result<(), EventError> {
        if !is_lower_hex64(&self.pubkey) {
            return Err(EventError::MalformedPubkey);
        }
        if !is_lower_hex64(&self.id) {
            return Err(EventError::MalformedId);
        }
        if self.sig.len() != 128 || !self.sig.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(EventError::MalformedSignature);
        }
        Ok(())
    }

    /// Full verification: structure, id recomputation, then signature.
    pub fn verify(&self) -> Result<(), EventError> {
        self.validate()?;
        let digest = event_digest(
            &self.pubkey,
            self.created_at,
            self.kind,
            &self.tags,
            &self.content,
        )?;
        if hex::encode(digest) != self.id {
            return Err(EventError::IdMismatch);
        }
        if !verify_digest(&self.pubkey, &digest, &self.sig) {
            return Err(EventError::BadSignature);
        }
        Ok(())
    }

    /// Value of the first tag named `key` that has a value.
    pub fn first_tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.first().map(String::as_str) == Some(key) && t.len() > 1)
            .map(|t| t[1].as_str())
    }
}

/// SHA-256 over the canonical serialization of the signed fields.
pub fn event_digest(
    pubkey: &str,
    created_at: u64,
    kind: u64,
    tags: &[Vec<String>],
    content: &str,
) -> Result<[u8; 32], EventError> {
    let canonical = serde_json::to_vec(&(0u8, pubkey, created_at, kind, tags, content))?;
    Ok(sha256(&canonical))
}

fn is_lower_hex64(s: &str) -> bool {
    is_hex64(s) && !s.bytes().any(|b| b.is_ascii_uppercase())
}

/// Convenience for building `["key", "value"]` tags.
pub fn tag(key: &str, value: impl Into<String>) -> Vec<String> {
    vec![key.to_string(), value.into()]
}
