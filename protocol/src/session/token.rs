//! # Session Token Codec
//!
//! A session token is the only thing a client holds after starting a tip or
//! stake session. It binds one wallet subaddress to a stream (and, for
//! stakes, to a viewer) and carries everything later calls need, so the
//! server keeps no session table.
//!
//! ```text
//! token = base64url(payload_json) "." base64url(ed25519_sig(payload_json))
//! ```
//!
//! Both halves use the URL-safe alphabet without padding, and decoding is
//! strict (no padding, no stray trailing bits) so any single-character edit
//! changes the decoded bytes and fails the signature check.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{SESSION_NONCE_BYTES, SESSION_VERSION};
use crate::crypto::hash::is_hex64;
use crate::crypto::keys::{KeyError, ServerKeypair};
use crate::nostr::{StreamIdentity, StreamIdentityError};

#[derive(Debug, Error)]
pub enum SessionTokenError {
    #[error("token must be two non-empty base64url segments")]
    Malformed,

    #[error("token signature does not verify")]
    BadSignature,

    #[error("token payload is not valid JSON: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("unsupported session version {0}")]
    UnsupportedVersion(u8),

    #[error("token is a {found} session, expected {expected}")]
    WrongType {
        expected: &'static str,
        found: &'static str,
    },

    #[error("invalid stream in token: {0}")]
    InvalidStream(#[from] StreamIdentityError),

    #[error("viewerPubkey must be 64-hex")]
    InvalidViewer,

    #[error("createdAtMs must be positive")]
    InvalidCreatedAt,

    #[error("nonce must be non-empty")]
    EmptyNonce,
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// Tip session: anyone can start one, no auth required.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TipSession {
    pub v: u8,
    pub stream_pubkey: String,
    pub stream_id: String,
    pub account_index: u32,
    pub address_index: u32,
    pub created_at_ms: u64,
    pub nonce: String,
}

/// Stake session: bound to the authenticated viewer who started it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StakeSession {
    pub v: u8,
    pub stream_pubkey: String,
    pub stream_id: String,
    pub viewer_pubkey: String,
    pub account_index: u32,
    pub address_index: u32,
    pub created_at_ms: u64,
    pub nonce: String,
}

/// The signed payload, discriminated by `t` on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum SessionPayload {
    #[serde(rename = "xmr_tip_session")]
    Tip(TipSession),

    #[serde(rename = "xmr_stake_session")]
    Stake(StakeSession),
}

impl TipSession {
    pub fn new(
        stream: &StreamIdentity,
        account_index: u32,
        address_index: u32,
        created_at_ms: u64,
        nonce: String,
    ) -> Self {
        Self {
            v: SESSION_VERSION,
            stream_pubkey: stream.stream_pubkey.clone(),
            stream_id: stream.stream_id.clone(),
            account_index,
            address_index,
            created_at_ms,
            nonce,
        }
    }

    pub fn stream(&self) -> StreamIdentity {
        StreamIdentity {
            stream_pubkey: self.stream_pubkey.clone(),
            stream_id: self.stream_id.clone(),
        }
    }
}

impl StakeSession {
    pub fn new(
        stream: &StreamIdentity,
        viewer_pubkey: &str,
        account_index: u32,
        address_index: u32,
        created_at_ms: u64,
        nonce: String,
    ) -> Self {
        Self {
            v: SESSION_VERSION,
            stream_pubkey: stream.stream_pubkey.clone(),
            stream_id: stream.stream_id.clone(),
            viewer_pubkey: viewer_pubkey.to_lowercase(),
            account_index,
            address_index,
            created_at_ms,
            nonce,
        }
    }

    pub fn stream(&self) -> StreamIdentity {
        StreamIdentity {
            stream_pubkey: self.stream_pubkey.clone(),
            stream_id: self.stream_id.clone(),
        }
    }
}

impl SessionPayload {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Tip(_) => "tip",
            Self::Stake(_) => "stake",
        }
    }

    fn validate(&self) -> Result<(), SessionTokenError> {
        let (v, pk, id, created_at_ms, nonce) = match self {
            Self::Tip(t) => (t.v, &t.stream_pubkey, &t.stream_id, t.created_at_ms, &t.nonce),
            Self::Stake(s) => {
                if !is_hex64(&s.viewer_pubkey) {
                    return Err(SessionTokenError::InvalidViewer);
                }
                (s.v, &s.stream_pubkey, &s.stream_id, s.created_at_ms, &s.nonce)
            }
        };
        if v != SESSION_VERSION {
            return Err(SessionTokenError::UnsupportedVersion(v));
        }
        StreamIdentity::check(pk, id)?;
        if created_at_ms == 0 {
            return Err(SessionTokenError::InvalidCreatedAt);
        }
        if nonce.trim().is_empty() {
            return Err(SessionTokenError::EmptyNonce);
        }
        Ok(())
    }
}

/// Fresh random nonce: 10 bytes, base64url. Also embedded in the
/// subaddress label, which is what makes every session's address unique.
pub fn new_nonce() -> String {
    let mut bytes = [0u8; SESSION_NONCE_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

// ---------------------------------------------------------------------------
// Codec
// ---------------------------------------------------------------------------

/// Issues and verifies session tokens with the server key.
#[derive(Debug, Clone)]
pub struct SessionCodec {
    keypair: ServerKeypair,
}

impl SessionCodec {
    pub fn new(keypair: ServerKeypair) -> Self {
        Self { keypair }
    }

    pub fn from_secret(secret: &str) -> Result<Self, KeyError> {
        Ok(Self::new(ServerKeypair::from_secret(secret)?))
    }

    /// Public half of the signing key, for logging at startup.
    pub fn public_key_hex(&self) -> String {
        self.keypair.public_key_hex()
    }

    /// Signs `payload` into a token.
    pub fn issue(&self, payload: &SessionPayload) -> Result<String, SessionTokenError> {
        payload.validate()?;
        let json = serde_json::to_vec(payload)?;
        let sig = self.keypair.sign(&json);
        Ok(format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(&json),
            URL_SAFE_NO_PAD.encode(sig)
        ))
    }

    /// Checks the signature first, then the payload shape.
    pub fn verify(&self, token: &str) -> Result<SessionPayload, SessionTokenError> {
        let (payload_b64, sig_b64) = token
            .trim()
            .split_once('.')
            .ok_or(SessionTokenError::Malformed)?;
        if payload_b64.is_empty() || sig_b64.is_empty() || sig_b64.contains('.') {
            return Err(SessionTokenError::Malformed);
        }
        let json = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|_| SessionTokenError::Malformed)?;
        let sig = URL_SAFE_NO_PAD
            .decode(sig_b64)
            .map_err(|_| SessionTokenError::Malformed)?;

        if !self.keypair.verify(&json, &sig) {
            return Err(SessionTokenError::BadSignature);
        }

        let payload: SessionPayload = serde_json::from_slice(&json)?;
        payload.validate()?;
        Ok(payload)
    }

    pub fn verify_tip(&self, token: &str) -> Result<TipSession, SessionTokenError> {
        match self.verify(token)? {
            SessionPayload::Tip(t) => Ok(t),
            other => Err(SessionTokenError::WrongType {
                expected: "tip",
                found: other.type_name(),
            }),
        }
    }

    pub fn verify_stake(&self, token: &str) -> Result<StakeSession, SessionTokenError> {
        match self.verify(token)? {
            SessionPayload::Stake(s) => Ok(s),
            other => Err(SessionTokenError::WrongType {
                expected: "stake",
                found: other.type_name(),
            }),
        }
    }
}
