//! Stream identity: the `(owner pubkey, stream id)` pair every session,
//! receipt and escrow is scoped to.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::config::STREAM_ANNOUNCE_KIND;
use crate::crypto::hash::is_hex64;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamIdentityError {
    #[error("pubkey must be 64-hex")]
    InvalidPubkey,

    #[error("streamId must be non-empty")]
    EmptyStreamId,
}

/// A validated stream identity. The pubkey is always lowercase and the id
/// is always trimmed and non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamIdentity {
    pub stream_pubkey: String,
    pub stream_id: String,
}

impl StreamIdentity {
    /// Normalizes raw request input and validates it.
    pub fn parse(stream_pubkey: &str, stream_id: &str) -> Result<Self, StreamIdentityError> {
        let stream_pubkey = stream_pubkey.trim().to_lowercase();
        let stream_id = stream_id.trim().to_string();
        Self::check(&stream_pubkey, &stream_id)?;
        Ok(Self {
            stream_pubkey,
            stream_id,
        })
    }

    /// Validates already-normalized values without rewriting them. Used on
    /// data that came out of a signed token, where silently normalizing
    /// would hide a mismatch.
    pub fn check(stream_pubkey: &str, stream_id: &str) -> Result<(), StreamIdentityError> {
        if !is_hex64(stream_pubkey) {
            return Err(StreamIdentityError::InvalidPubkey);
        }
        if stream_id.trim().is_empty() {
            return Err(StreamIdentityError::EmptyStreamId);
        }
        Ok(())
    }

    /// The `a` tag value addressing this stream's announcement event.
    pub fn address_tag(&self) -> String {
        format!(
            "{}:{}:{}",
            STREAM_ANNOUNCE_KIND, self.stream_pubkey, self.stream_id
        )
    }

    /// Whether `pubkey` (any case) is the stream owner.
    pub fn is_owner(&self, pubkey: &str) -> bool {
        self.stream_pubkey.eq_ignore_ascii_case(pubkey.trim())
    }
}

impl fmt::Display for StreamIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.stream_pubkey, self.stream_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_normalizes() {
        let pk = "AB".repeat(32);
        let s = StreamIdentity::parse(&format!("  {pk} "), "  live-1 ").unwrap();
        assert_eq!(s.stream_pubkey, "ab".repeat(32));
        assert_eq!(s.stream_id, "live-1");
    }

    #[test]
    fn parse_rejects_bad_inputs() {
        assert_eq!(
            StreamIdentity::parse("abc", "x"),
            Err(StreamIdentityError::InvalidPubkey)
        );
        assert_eq!(
            StreamIdentity::parse(&"a".repeat(64), "   "),
            Err(StreamIdentityError::EmptyStreamId)
        );
    }

    #[test]
    fn address_tag_format() {
        let s = StreamIdentity::parse(&"a".repeat(64), "s:1").unwrap();
        assert_eq!(s.address_tag(), format!("30311:{}:s:1", "a".repeat(64)));
    }

    #[test]
    fn owner_check_is_case_insensitive() {
        let s = StreamIdentity::parse(&"c".repeat(64), "x").unwrap();
        assert!(s.is_owner(&"C".repeat(64)));
        assert!(!s.is_owner(&"d".repeat(64)));
    }
}
