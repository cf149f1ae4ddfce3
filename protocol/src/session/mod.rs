//! # Tip & Stake Sessions
//!
//! Issuing a session is three steps: draw a nonce, create a labelled
//! subaddress in the wallet, sign a token recording which subaddress was
//! created. Everything after that (tip lookups, stake totals, refunds)
//! starts by verifying the token and ends by asking the wallet about that
//! one subaddress.

pub mod label;
pub mod token;

pub use label::{parse_session_label, session_label, LabelIndex, SessionKind, SubaddrIndex};
pub use token::{
    new_nonce, SessionCodec, SessionPayload, SessionTokenError, StakeSession, TipSession,
};
