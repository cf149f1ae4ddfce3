//! # dstream Escrow-v3
//!
//! Coordinates an N-of-M Monero multisig wallet between a stream owner
//! (the coordinator, whose wallet RPC we drive) and a set of participants
//! who bring their own wallets and hand us their multisig info.
//!
//! ```text
//!  participants ──prepare info──▶ ┐
//!                                 ├─ make ─▶ exchange × k ─▶ import ─▶ sign ─▶ submit
//!  coordinator ──prepare_multisig─┘
//! ```
//!
//! Sessions are in-memory with a sliding TTL. See [`store`] for the
//! consistency rules and [`session`] for the phase machine.

pub mod coordinator;
pub mod error;
pub mod session;
pub mod store;

pub use coordinator::{CreateEscrow, EscrowCoordinator};
pub use error::EscrowError;
pub use session::{ContributionRound, EscrowPhase, EscrowSession, EscrowSessionView, NewEscrowSession};
pub use store::EscrowStore;
