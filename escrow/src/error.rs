//! Escrow coordination errors. Every variant knows its HTTP status so the
//! node can map them without a lookup table.

use dstream_protocol::wallet::WalletRpcError;
use thiserror::Error;

use crate::session::EscrowPhase;

#[derive(Debug, Error)]
pub enum EscrowError {
    /// Unknown id, or the session expired.
    #[error("session not found")]
    NotFound,

    #[error("{0}")]
    Forbidden(&'static str),

    #[error("invalid phase transition ({from} -> {to})")]
    InvalidPhase { from: EscrowPhase, to: &'static str },

    /// Right phase, but somebody has not shown up yet.
    #[error("{0}")]
    MissingInfos(&'static str),

    #[error("{0}")]
    Validation(String),

    #[error("xmr wallet rpc not configured")]
    WalletNotConfigured,

    #[error("xmr escrow {action} error ({source})")]
    Wallet {
        action: &'static str,
        source: WalletRpcError,
    },
}

impl EscrowError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn status(&self) -> u16 {
        match self {
            Self::NotFound | Self::WalletNotConfigured => 404,
            Self::Forbidden(_) => 403,
            Self::InvalidPhase { .. } | Self::MissingInfos(_) => 409,
            Self::Validation(_) => 400,
            Self::Wallet { .. } => 502,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_and_statuses() {
        let e = EscrowError::InvalidPhase {
            from: EscrowPhase::Signed,
            to: "make",
        };
        assert_eq!(e.to_string(), "invalid phase transition (signed -> make)");
        assert_eq!(e.status(), 409);

        let e = EscrowError::Wallet {
            action: "sign",
            source: WalletRpcError::Rpc {
                code: -1,
                message: "boom".into(),
            },
        };
        assert_eq!(e.to_string(), "xmr escrow sign error (wallet rpc error -1: boom)");
        assert_eq!(e.status(), 502);
    }
}
