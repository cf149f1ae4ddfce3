// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # dstream Protocol: Settlement Core
//!
//! dstream is live video over a peer-to-peer swarm, paid for in Monero.
//! This crate is the part that decides who gets paid, who gets refunded,
//! and who gets slashed. It does not move video and it does not hold user
//! keys. It verifies signatures, reads a wallet, and applies policy.
//!
//! ## Architecture
//!
//! - **auth**: NIP-98 request attestations. Every privileged call proves
//!   which Nostr key made it, for this exact URL and method, right now.
//! - **session**: server-signed tip and stake tokens, plus the subaddress
//!   labels that tie wallet state back to them.
//! - **wallet**: the typed JSON-RPC boundary to `monero-wallet-rpc`, an
//!   in-memory double for tests, and capability profiles.
//! - **ledger**: turns raw incoming transfers into per-session totals.
//! - **policy**: refund credit from signed bandwidth receipts, and the
//!   slash window.
//! - **nostr**: events, stream identities, bytes receipts.
//! - **crypto**: SHA-256, Ed25519 (ours) and BIP-340 Schnorr (theirs).
//! - **amount**, **clock**, **config**, **error**: the plumbing.
//!
//! ## Design Philosophy
//!
//! 1. The wallet is the source of truth. We never cache balances.
//! 2. Policy is pure. Pass `now` in, get a decision out.
//! 3. Amounts are `u128` atomic units and travel as decimal strings, because
//!    a JSON number is a float and floats are not money.
//! 4. If it touches money, it has tests. Plural.

pub mod amount;
pub mod auth;
pub mod clock;
pub mod config;
pub mod crypto;
pub mod error;
pub mod ledger;
pub mod nostr;
pub mod policy;
pub mod session;
pub mod wallet;

pub use auth::{AuthError, AuthenticatedCaller, Authenticator};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use error::SettlementError;
pub use session::{SessionCodec, SessionPayload, StakeSession, TipSession};
pub use wallet::{MemoryWallet, WalletRpcClient};
