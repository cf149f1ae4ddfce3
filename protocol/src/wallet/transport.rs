//! JSON-RPC transport.
//!
//! [`RpcTransport`] is the seam between typed wallet operations and the
//! bytes on the wire. Production uses [`HttpTransport`]; tests and
//! `memory:` dev runs use [`MemoryWallet`](super::MemoryWallet), which
//! answers the same methods in-process.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::error::WalletRpcError;
use crate::config::{WALLET_RPC_PATH, WALLET_RPC_TIMEOUT};

/// One JSON-RPC call in, one `result` value (or error) out.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    async fn call(&self, method: &str, params: Value) -> Result<Value, WalletRpcError>;
}

/// Connection settings for a remote wallet RPC.
#[derive(Clone)]
pub struct HttpTransportConfig {
    pub origin: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout: Duration,
}

impl HttpTransportConfig {
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            username: None,
            password: None,
            timeout: WALLET_RPC_TIMEOUT,
        }
    }
}

// The password never appears in Debug output.
impl std::fmt::Debug for HttpTransportConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransportConfig")
            .field("origin", &self.origin)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// `reqwest`-backed transport posting to `{origin}/json_rpc`.
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
    credentials: Option<(String, String)>,
}

impl HttpTransport {
    pub fn new(config: HttpTransportConfig) -> Result<Self, WalletRpcError> {
        let origin = config.origin.trim().trim_end_matches('/');
        if origin.is_empty() {
            return Err(WalletRpcError::InvalidRequest(
                "wallet rpc origin must not be empty".into(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| WalletRpcError::Transport(e.to_string()))?;

        let trimmed = |s: Option<String>| s.map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        // Basic auth only when both halves are configured.
        let credentials = match (trimmed(config.username), trimmed(config.password)) {
            (Some(u), Some(p)) => Some((u, p)),
            _ => None,
        };

        Ok(Self {
            client,
            endpoint: format!("{origin}{WALLET_RPC_PATH}"),
            credentials,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl RpcTransport for HttpTransport {
    async fn call(&self, method: &str, params: Value) -> Result<Value, WalletRpcError> {
        let body = json!({ "jsonrpc": "2.0", "id": "0", "method": method, "params": params });
        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some((user, pass)) = &self.credentials {
            request = request.basic_auth(user, Some(pass));
        }

        tracing::debug!(method, "wallet rpc call");
        let response = request.send().await.map_err(|e| {
            tracing::warn!(method, error = %e, "wallet rpc transport failure");
            WalletRpcError::Transport(e.without_url().to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(WalletRpcError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let envelope: Value = response
            .json()
            .await
            .map_err(|_| WalletRpcError::InvalidResponse)?;
        decode_envelope(envelope)
    }
}

/// Unwraps a JSON-RPC 2.0 response envelope into its `result`.
pub fn decode_envelope(envelope: Value) -> Result<Value, WalletRpcError> {
    if envelope.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
        return Err(WalletRpcError::InvalidResponse);
    }
    if let Some(err) = envelope.get("error") {
        let code = err.get("code").and_then(Value::as_i64).unwrap_or(0);
        let message = err
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        return Err(WalletRpcError::Rpc { code, message });
    }
    Ok(envelope.get("result").cloned().unwrap_or(Value::Null))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_result() {
        let v = decode_envelope(json!({"jsonrpc":"2.0","id":"0","result":{"version":65536}})).unwrap();
        assert_eq!(v["version"], 65536);
    }

    #[test]
    fn envelope_error() {
        let err = decode_envelope(
            json!({"jsonrpc":"2.0","id":"0","error":{"code":-32601,"message":"Method not found"}}),
        )
        .unwrap_err();
        assert!(err.is_method_not_found());
    }

    #[test]
    fn envelope_wrong_version() {
        assert_eq!(
            decode_envelope(json!({"jsonrpc":"1.0","result":{}})),
            Err(WalletRpcError::InvalidResponse)
        );
        assert_eq!(decode_envelope(json!(null)), Err(WalletRpcError::InvalidResponse));
    }

    #[test]
    fn endpoint_and_credentials() {
        let mut cfg = HttpTransportConfig::new(" http://127.0.0.1:18083/ ");
        cfg.username = Some("user".into());
        cfg.password = Some("  ".into());
        let t = HttpTransport::new(cfg).unwrap();
        assert_eq!(t.endpoint(), "http://127.0.0.1:18083/json_rpc");
        assert!(t.credentials.is_none());

        assert!(HttpTransport::new(HttpTransportConfig::new("  ")).is_err());
    }

    #[test]
    fn debug_redacts_password() {
        let mut cfg = HttpTransportConfig::new("http://wallet");
        cfg.password = Some("hunter2".into());
        let dbg = format!("{cfg:?}");
        assert!(!dbg.contains("hunter2"));
        assert!(dbg.contains("<redacted>"));
    }
}
