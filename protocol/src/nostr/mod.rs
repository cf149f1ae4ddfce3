//! # Nostr Primitives
//!
//! Users in dstream are Nostr identities. This module covers the small slice
//! of Nostr the settlement core consumes: signed events, stream identities
//! (and their `a` tag addresses), and P2P bytes receipts.
//!
//! Relay I/O is someone else's problem. Events arrive here already fetched,
//! usually embedded in a request body or an `Authorization` header.

pub mod event;
pub mod receipt;
pub mod stream;

pub use event::{event_digest, tag, EventError, NostrEvent};
pub use receipt::{build_bytes_receipt, parse_bytes_receipt, BytesReceipt, ReceiptDraft, ReceiptError};
pub use stream::{StreamIdentity, StreamIdentityError};
