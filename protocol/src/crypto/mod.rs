//! # Cryptographic Primitives
//!
//! Two signature schemes live here, and they never mix:
//!
//! - **Ed25519** signs server-issued session tokens. Only the server holds
//!   this key.
//! - **BIP-340 Schnorr over secp256k1** verifies everything users sign:
//!   request attestations and bandwidth receipts. The server only ever
//!   verifies these.
//!
//! Plus SHA-256, which both of them lean on.
//!
//! Everything is a thin wrapper around audited crates (`ed25519-dalek`,
//! `k256`, `sha2`). If you are tempted to optimize any of it, don't.

pub mod hash;
pub mod keys;
pub mod schnorr;

pub use hash::{is_hex64, sha256, sha256_hex};
pub use keys::{KeyError, ServerKeypair};
pub use schnorr::{verify_digest, EventSigner, SchnorrError};
