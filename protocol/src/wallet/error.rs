use thiserror::Error;

use crate::config::RPC_METHOD_NOT_FOUND;

/// Everything that can go wrong talking to wallet RPC.
///
/// `Display` strings are what ends up inside `xmr <action> error (...)`
/// response bodies, so they name the failure without echoing credentials.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WalletRpcError {
    /// Non-2xx HTTP status from the wallet endpoint.
    #[error("wallet rpc http {status}{}", body_suffix(.body))]
    Http { status: u16, body: String },

    /// JSON-RPC error object returned by the wallet.
    #[error("wallet rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// The response was not a JSON-RPC 2.0 envelope.
    #[error("wallet rpc: invalid JSON-RPC response")]
    InvalidResponse,

    /// Connection refused, timeout, TLS failure...
    #[error("wallet rpc transport: {0}")]
    Transport(String),

    /// The call succeeded but the result is missing a required field.
    #[error("wallet rpc: {method} returned invalid result")]
    InvalidResult { method: &'static str },

    /// Rejected locally before any I/O.
    #[error("wallet rpc: {0}")]
    InvalidRequest(String),
}

fn body_suffix(body: &str) -> String {
    if body.is_empty() {
        String::new()
    } else {
        format!(": {body}")
    }
}

impl WalletRpcError {
    /// JSON-RPC error code, if the wallet sent one.
    pub fn rpc_code(&self) -> Option<i64> {
        match self {
            Self::Rpc { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Whether the wallet said it does not know the method at all.
    pub fn is_method_not_found(&self) -> bool {
        self.rpc_code() == Some(RPC_METHOD_NOT_FOUND)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_formats() {
        let http = WalletRpcError::Http {
            status: 401,
            body: String::new(),
        };
        assert_eq!(http.to_string(), "wallet rpc http 401");
        let http = WalletRpcError::Http {
            status: 500,
            body: "boom".into(),
        };
        assert_eq!(http.to_string(), "wallet rpc http 500: boom");
        let rpc = WalletRpcError::Rpc {
            code: -32601,
            message: "Method not found".into(),
        };
        assert_eq!(rpc.to_string(), "wallet rpc error -32601: Method not found");
        assert!(rpc.is_method_not_found());
        assert!(!WalletRpcError::InvalidResponse.is_method_not_found());
    }
}
