//! # Hashing Utilities
//!
//! SHA-256 is the only hash function the settlement core needs, and it
//! needs it for three unrelated reasons:
//!
//! - **Nostr event ids** are the SHA-256 of a canonical JSON array.
//! - **Session signing keys** are derived from the configured secret by
//!   hashing it down to a 32-byte ed25519 seed.
//! - **Receipt dedup keys** fall back to a content hash when a receipt has
//!   no id of its own.
//!
//! Nothing here is clever. That is the point.

use sha2::{Digest, Sha256};

/// Compute the SHA-256 hash of the input data as a fixed-size array.
///
/// # Example
///
/// ```
/// use dstream_protocol::crypto::sha256;
///
/// let hash = sha256(b"dstream");
/// assert_eq!(hash.len(), 32);
/// ```
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut output = [0u8; 32];
    output.copy_from_slice(&result);
    output
}

/// SHA-256 rendered as lowercase hex. This is the format Nostr uses for ids.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// Hash several byte slices as one message, with a length prefix on each
/// part so `["ab", "c"]` and `["a", "bc"]` never collide.
pub fn sha256_parts(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update((part.len() as u64).to_be_bytes());
        hasher.update(part);
    }
    let result = hasher.finalize();
    let mut output = [0u8; 32];
    output.copy_from_slice(&result);
    output
}

/// Returns `true` if `input` is exactly 64 hex characters (either case).
///
/// Every pubkey in this system (stream owners, viewers, escrow participants)
/// is a 32-byte x-only key in hex, so this check shows up everywhere.
pub fn is_hex64(input: &str) -> bool {
    input.len() == 64 && input.bytes().all(|b| b.is_ascii_hexdigit())
}
