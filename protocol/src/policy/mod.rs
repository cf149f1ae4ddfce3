//! # Settlement Policy
//!
//! Pure decision functions over wallet data and signed evidence. Nothing
//! in here talks to a wallet or reads a clock; callers pass `now` in.
//!
//! - [`refund`]: may a viewer reclaim their stake, and with how much credit?
//! - [`slash`]: may the stream owner sweep it instead?

pub mod refund;
pub mod slash;

pub use refund::{
    credit_percent_bps, evaluate_refund, ReceiptDecision, RefundContributionReceipt,
    RefundDecision, RefundDenial, RefundPolicyConfig, RefundRequest, RejectReason,
};
pub use slash::{can_slash, SlashDecision, SlashQuery};
