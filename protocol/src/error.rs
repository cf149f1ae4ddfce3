//! # Settlement Error Taxonomy
//!
//! Module errors (`AuthError`, `SessionTokenError`, `WalletRpcError`, ...)
//! describe what went wrong locally. [`SettlementError`] is what a request
//! handler ultimately reports: one variant per class of failure, each with
//! a fixed HTTP status and a message safe to show the caller.
//!
//! | Variant        | Status  | Typical cause                                  |
//! |----------------|---------|------------------------------------------------|
//! | `Auth`         | 401     | missing/stale/mismatched NIP-98 attestation    |
//! | `Scope`        | 400/403 | caller not allowed to act on this stream/session |
//! | `Validation`   | 400     | malformed body or fields                       |
//! | `NotConfigured`| 404     | no wallet RPC behind this node                 |
//! | `NotFound`     | 404     | unknown or expired escrow session              |
//! | `PolicyDenied` | 403/409 | refund threshold, slash window, phase ordering |
//! | `Upstream`     | 502     | wallet RPC call failed                         |

use thiserror::Error;

use crate::auth::AuthError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SettlementError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("{message}")]
    Scope { status: u16, message: String },

    #[error("{0}")]
    Validation(String),

    #[error("xmr wallet rpc not configured")]
    NotConfigured,

    #[error("{0}")]
    NotFound(String),

    /// `reason` is the machine-readable code, `detail` the human message.
    #[error("{detail}")]
    PolicyDenied {
        status: u16,
        reason: String,
        detail: String,
    },

    #[error("xmr {action} error ({message})")]
    Upstream { action: String, message: String },
}

impl SettlementError {
    /// 403 for a caller acting outside its role.
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Scope {
            status: 403,
            message: message.into(),
        }
    }

    /// 400 for a token or identity that does not resolve to a valid scope.
    pub fn bad_scope(message: impl Into<String>) -> Self {
        Self::Scope {
            status: 400,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn denied(status: u16, reason: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::PolicyDenied {
            status,
            reason: reason.into(),
            detail: detail.into(),
        }
    }

    /// Wraps a failed wallet call. `action` names the endpoint, e.g.
    /// `"stake refund"` or `"escrow make"`.
    pub fn upstream(action: impl Into<String>, source: impl std::fmt::Display) -> Self {
        Self::Upstream {
            action: action.into(),
            message: source.to_string(),
        }
    }

    /// HTTP status code for this error.
    pub fn status(&self) -> u16 {
        match self {
            Self::Auth(_) => 401,
            Self::Scope { status, .. } => *status,
            Self::Validation(_) => 400,
            Self::NotConfigured | Self::NotFound(_) => 404,
            Self::PolicyDenied { status, .. } => *status,
            Self::Upstream { .. } => 502,
        }
    }

    /// Machine-readable reason for policy denials.
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::PolicyDenied { reason, .. } => Some(reason),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(SettlementError::from(AuthError::Stale).status(), 401);
        assert_eq!(SettlementError::forbidden("x").status(), 403);
        assert_eq!(SettlementError::bad_scope("x").status(), 400);
        assert_eq!(SettlementError::validation("x").status(), 400);
        assert_eq!(SettlementError::NotConfigured.status(), 404);
        assert_eq!(SettlementError::denied(409, "slash_window", "wait").status(), 409);
        assert_eq!(SettlementError::upstream("tip", "boom").status(), 502);
    }

    #[test]
    fn messages_are_the_response_bodies() {
        assert_eq!(
            SettlementError::from(AuthError::UrlMismatch).to_string(),
            "NIP-98 url mismatch"
        );
        assert_eq!(
            SettlementError::NotConfigured.to_string(),
            "xmr wallet rpc not configured"
        );
        assert_eq!(
            SettlementError::upstream("escrow make", "wallet rpc error -1: nope").to_string(),
            "xmr escrow make error (wallet rpc error -1: nope)"
        );
        let denied = SettlementError::denied(403, "no_valid_receipts", "refund threshold not met");
        assert_eq!(denied.reason(), Some("no_valid_receipts"));
        assert_eq!(denied.to_string(), "refund threshold not met");
    }
}
