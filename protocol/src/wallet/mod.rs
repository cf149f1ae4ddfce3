//! # Wallet RPC Collaborator
//!
//! The server never holds user keys, but it does run a wallet: every tip
//! and stake session gets a fresh subaddress in it, refunds and slashes
//! are sweeps out of it, and escrow-v3 drives its multisig methods. This
//! module is the typed boundary to that wallet.
//!
//! ```text
//! WalletRpcClient ──▶ dyn RpcTransport ──┬─▶ HttpTransport (reqwest, JSON-RPC 2.0)
//!                                        └─▶ MemoryWallet  (in-process double)
//! ```

pub mod capability;
pub mod client;
pub mod error;
pub mod memory;
pub mod transport;
pub mod types;

pub use capability::{all_profile_methods, evaluate_profiles, CapabilityProfile, ProfileReadiness};
pub use client::WalletRpcClient;
pub use error::WalletRpcError;
pub use memory::MemoryWallet;
pub use transport::{HttpTransport, HttpTransportConfig, RpcTransport};
pub use types::{
    AddressListing, Balance, CreatedAddress, InjectTransfer, MethodProbe, MultisigRound,
    ProbeMode, SignedMultisig, SubaddrCoord, SubaddressBalance, SubaddressEntry, SweepResult,
    TransferRecord,
};
