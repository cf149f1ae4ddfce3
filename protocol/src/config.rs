//! # Settlement Configuration & Constants
//!
//! Every magic number in the settlement core lives here. Runtime-tunable
//! values (confirmations, refund thresholds, TTLs) have their *defaults*
//! here; the node binary overrides them from CLI flags and environment.
//!
//! Some of these values are part of a wire contract with clients (event
//! kinds, label prefixes, token discriminants). Changing those breaks every
//! outstanding session token and every deployed client, so don't.

use std::time::Duration;

// ---------------------------------------------------------------------------
// Nostr Event Kinds
// ---------------------------------------------------------------------------

/// NIP-98 HTTP auth event kind.
pub const AUTH_EVENT_KIND: u64 = 27235;

/// Live stream announcement kind. Used to build the stream address tag.
pub const STREAM_ANNOUNCE_KIND: u64 = 30311;

/// Peer-to-peer "bytes served" receipt kind.
pub const BYTES_RECEIPT_KIND: u64 = 30316;

// ---------------------------------------------------------------------------
// Request Authentication
// ---------------------------------------------------------------------------

/// Maximum allowed |now - created_at| for an auth attestation.
pub const AUTH_MAX_SKEW_SECS: u64 = 60;

/// `Authorization` header scheme, matched case-insensitively.
pub const AUTH_SCHEME: &str = "Nostr";

// ---------------------------------------------------------------------------
// Session Tokens
// ---------------------------------------------------------------------------

/// Current session payload version. Anything else fails verification.
pub const SESSION_VERSION: u8 = 1;

/// Discriminant for tip sessions.
pub const TIP_SESSION_TYPE: &str = "xmr_tip_session";

/// Discriminant for stake sessions.
pub const STAKE_SESSION_TYPE: &str = "xmr_stake_session";

/// Prefix for tip subaddress labels. This is the join key between token
/// issuance and ledger aggregation, so it is frozen.
pub const TIP_LABEL_PREFIX: &str = "dstream_tip";

/// Prefix for stake subaddress labels.
pub const STAKE_LABEL_PREFIX: &str = "dstream_stake";

/// Random bytes per session nonce (encoded as base64url).
pub const SESSION_NONCE_BYTES: usize = 10;

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// Default confirmations before a transfer counts as confirmed.
pub const DEFAULT_CONFIRMATIONS_REQUIRED: u64 = 10;

/// Default wallet account that owns all session subaddresses.
pub const DEFAULT_ACCOUNT_INDEX: u32 = 0;

/// Decimal places of the settlement currency. Informational; all math is
/// done in atomic units.
pub const ATOMIC_DECIMALS: u32 = 12;

// ---------------------------------------------------------------------------
// Refund Policy Defaults
// ---------------------------------------------------------------------------

pub const DEFAULT_REFUND_MIN_SERVED_BYTES: u64 = 0;
pub const DEFAULT_REFUND_MAX_RECEIPTS: usize = 32;
pub const DEFAULT_REFUND_MAX_RECEIPT_AGE_SECS: u64 = 900;
pub const DEFAULT_REFUND_MAX_FUTURE_SKEW_SECS: u64 = 45;

/// 512 MiB. A single receipt claiming more than this is treated as forged.
pub const DEFAULT_REFUND_MAX_SERVED_BYTES_PER_RECEIPT: u64 = 536_870_912;

pub const DEFAULT_REFUND_MIN_SESSION_AGE_SECS: u64 = 30;

/// Credit scale. 10_000 basis points = 100%.
pub const FULL_CREDIT_BPS: u32 = 10_000;

/// Minimum length of a refund destination address. Real addresses are far
/// longer; this only filters obvious garbage before it reaches the wallet.
pub const MIN_REFUND_ADDRESS_LEN: usize = 20;

// ---------------------------------------------------------------------------
// Slash Policy
// ---------------------------------------------------------------------------

/// Default fairness window between the last stake funding and a slash.
pub const DEFAULT_SLASH_MIN_AGE_SECS: u64 = 3600;

// ---------------------------------------------------------------------------
// Escrow-V3
// ---------------------------------------------------------------------------

/// Default idle TTL for escrow coordination sessions.
pub const DEFAULT_ESCROW_SESSION_TTL_SECS: u64 = 3600;

/// Random bytes in an escrow session id (hex encoded, so 32 chars).
pub const ESCROW_SESSION_ID_BYTES: usize = 16;

/// Multisig needs at least two signers or it is just a wallet.
pub const MIN_MULTISIG_THRESHOLD: usize = 2;

// ---------------------------------------------------------------------------
// Wallet RPC
// ---------------------------------------------------------------------------

/// Per-call timeout for wallet RPC requests. Failures are surfaced, not retried.
pub const WALLET_RPC_TIMEOUT: Duration = Duration::from_millis(5_000);

/// JSON-RPC path appended to the wallet origin.
pub const WALLET_RPC_PATH: &str = "/json_rpc";

/// JSON-RPC "method not found" code. The only code that means "unsupported".
pub const RPC_METHOD_NOT_FOUND: i64 = -32601;

/// Substring the wallet returns when a redundant exchange round is attempted.
pub const KEX_COMPLETE_MARKER: &str = "kex is already complete";

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
