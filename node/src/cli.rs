//! # CLI Interface
//!
//! Defines the command-line argument structure for `dstream-node` using
//! `clap` derive. Every runtime knob has an `env` fallback so container
//! deployments keep using the `DSTREAM_*` variables they already set.

use clap::{Args, Parser, Subcommand};

use dstream_protocol::config::{
    DEFAULT_ACCOUNT_INDEX, DEFAULT_CONFIRMATIONS_REQUIRED, DEFAULT_ESCROW_SESSION_TTL_SECS,
    DEFAULT_REFUND_MAX_FUTURE_SKEW_SECS, DEFAULT_REFUND_MAX_RECEIPTS,
    DEFAULT_REFUND_MAX_RECEIPT_AGE_SECS, DEFAULT_REFUND_MAX_SERVED_BYTES_PER_RECEIPT,
    DEFAULT_REFUND_MIN_SERVED_BYTES, DEFAULT_REFUND_MIN_SESSION_AGE_SECS,
    DEFAULT_SLASH_MIN_AGE_SECS,
};
use dstream_protocol::policy::RefundPolicyConfig;

/// dstream settlement service.
///
/// Issues tip and stake sessions against a Monero wallet RPC, settles
/// refunds and slashes, and coordinates escrow-v3 multisig wallets.
#[derive(Parser, Debug)]
#[command(
    name = "dstream-node",
    about = "dstream settlement service",
    version,
    propagate_version = true
)]
pub struct DstreamNodeCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the HTTP API and metrics listeners.
    Run(RunArgs),
    /// Print a fresh random session secret and exit.
    Secret,
    /// Probe the configured wallet RPC once and print profile readiness.
    Probe(ProbeArgs),
    /// Print version information and exit.
    Version,
}

/// Where the wallet lives and how to talk to it.
#[derive(Args, Debug, Clone)]
pub struct WalletArgs {
    /// Wallet RPC origin, e.g. `http://127.0.0.1:18083`.
    ///
    /// `memory:` runs against an in-process dev wallet. When unset, every
    /// XMR endpoint answers 404.
    #[arg(long, env = "DSTREAM_XMR_WALLET_RPC_ORIGIN")]
    pub wallet_rpc_origin: Option<String>,

    #[arg(long, env = "DSTREAM_XMR_WALLET_RPC_USER")]
    pub wallet_rpc_user: Option<String>,

    #[arg(long, env = "DSTREAM_XMR_WALLET_RPC_PASS", hide_env_values = true)]
    pub wallet_rpc_pass: Option<String>,

    /// Per-call timeout in milliseconds.
    #[arg(long, env = "DSTREAM_XMR_WALLET_RPC_TIMEOUT_MS", default_value_t = 5_000)]
    pub wallet_rpc_timeout_ms: u64,

    /// Wallet account holding session subaddresses.
    #[arg(long, env = "DSTREAM_XMR_ACCOUNT_INDEX", default_value_t = DEFAULT_ACCOUNT_INDEX)]
    pub account_index: u32,

    #[arg(
        long,
        env = "DSTREAM_XMR_CONFIRMATIONS_REQUIRED",
        default_value_t = DEFAULT_CONFIRMATIONS_REQUIRED
    )]
    pub confirmations_required: u64,
}

/// Refund policy knobs. See [`RefundPolicyConfig`].
#[derive(Args, Debug, Clone)]
pub struct RefundArgs {
    #[arg(
        long,
        env = "DSTREAM_XMR_REFUND_MIN_SERVED_BYTES",
        default_value_t = DEFAULT_REFUND_MIN_SERVED_BYTES
    )]
    pub refund_min_served_bytes: u64,

    /// Defaults to the minimum.
    #[arg(long, env = "DSTREAM_XMR_REFUND_FULL_SERVED_BYTES")]
    pub refund_full_served_bytes: Option<u64>,

    #[arg(
        long,
        env = "DSTREAM_XMR_REFUND_MAX_RECEIPTS",
        default_value_t = DEFAULT_REFUND_MAX_RECEIPTS
    )]
    pub refund_max_receipts: usize,

    #[arg(
        long,
        env = "DSTREAM_XMR_REFUND_MAX_RECEIPT_AGE_SEC",
        default_value_t = DEFAULT_REFUND_MAX_RECEIPT_AGE_SECS
    )]
    pub refund_max_receipt_age_sec: u64,

    #[arg(
        long,
        env = "DSTREAM_XMR_REFUND_MAX_SERVED_BYTES_PER_RECEIPT",
        default_value_t = DEFAULT_REFUND_MAX_SERVED_BYTES_PER_RECEIPT
    )]
    pub refund_max_served_bytes_per_receipt: u64,

    #[arg(
        long,
        env = "DSTREAM_XMR_REFUND_MIN_SESSION_AGE_SEC",
        default_value_t = DEFAULT_REFUND_MIN_SESSION_AGE_SECS
    )]
    pub refund_min_session_age_sec: u64,

    #[arg(
        long,
        env = "DSTREAM_XMR_REFUND_MAX_FUTURE_SKEW_SEC",
        default_value_t = DEFAULT_REFUND_MAX_FUTURE_SKEW_SECS
    )]
    pub refund_max_future_skew_sec: u64,

    /// Comma-separated hex pubkeys allowed to author receipts on a
    /// viewer's behalf.
    #[arg(
        long,
        env = "DSTREAM_XMR_REFUND_RECOGNIZED_PEERS",
        value_delimiter = ',',
        num_args = 0..
    )]
    pub refund_recognized_peers: Vec<String>,
}

impl RefundArgs {
    /// Builds the policy config, clamped into range.
    pub fn to_policy(&self) -> RefundPolicyConfig {
        RefundPolicyConfig {
            min_served_bytes: self.refund_min_served_bytes,
            full_served_bytes: self
                .refund_full_served_bytes
                .unwrap_or(self.refund_min_served_bytes),
            max_receipts: self.refund_max_receipts,
            max_receipt_age_secs: self.refund_max_receipt_age_sec,
            max_served_bytes_per_receipt: self.refund_max_served_bytes_per_receipt,
            min_session_age_secs: self.refund_min_session_age_sec,
            max_future_skew_secs: self.refund_max_future_skew_sec,
            recognized_peers: self.refund_recognized_peers.iter().cloned().collect(),
        }
        .normalized()
    }
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub wallet: WalletArgs,

    #[command(flatten)]
    pub refund: RefundArgs,

    /// Secret the session-token signing key is derived from.
    ///
    /// Optional in development (a random one is drawn per process, so
    /// tokens die with it). Required with `--production`.
    #[arg(long, env = "DSTREAM_XMR_SESSION_SECRET", hide_env_values = true)]
    pub session_secret: Option<String>,

    /// Refuse to start without an explicit session secret.
    #[arg(long, env = "DSTREAM_PRODUCTION")]
    pub production: bool,

    /// Quiet period after the last stake deposit before the owner may slash.
    #[arg(
        long,
        env = "DSTREAM_XMR_STAKE_SLASH_MIN_AGE_SEC",
        default_value_t = DEFAULT_SLASH_MIN_AGE_SECS
    )]
    pub slash_min_age_sec: u64,

    /// Sliding lifetime of an escrow session.
    #[arg(
        long,
        env = "DSTREAM_XMR_ESCROW_SESSION_TTL_SEC",
        default_value_t = DEFAULT_ESCROW_SESSION_TTL_SECS
    )]
    pub escrow_session_ttl_sec: u64,

    /// Externally visible origin (scheme://host[:port]). NIP-98 `u` tags are
    /// compared against this plus the request path and query. Falls back
    /// to the request's Host header.
    #[arg(long, env = "DSTREAM_PUBLIC_ORIGIN")]
    pub public_origin: Option<String>,

    /// Address to bind both listeners on.
    #[arg(long, env = "DSTREAM_BIND", default_value = "0.0.0.0")]
    pub bind: String,

    /// Port for the HTTP API.
    #[arg(long, env = "DSTREAM_PORT", default_value_t = 8787)]
    pub port: u16,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "DSTREAM_METRICS_PORT", default_value_t = 9787)]
    pub metrics_port: u16,

    /// `pretty` or `json`.
    #[arg(long, env = "DSTREAM_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,

    /// Default filter when `RUST_LOG` is unset.
    #[arg(
        long,
        env = "DSTREAM_LOG_LEVEL",
        default_value = "dstream_node=info,dstream_escrow=info,dstream_protocol=info,tower_http=info"
    )]
    pub log_level: String,
}

/// Arguments for the `probe` subcommand.
#[derive(Parser, Debug)]
pub struct ProbeArgs {
    #[command(flatten)]
    pub wallet: WalletArgs,

    /// `active` exercises every method; `passive` skips side effects.
    #[arg(long, default_value = "passive")]
    pub mode: String,
}
