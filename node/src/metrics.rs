//! # Prometheus Metrics
//!
//! Operational metrics for the settlement service, scraped at `/metrics`
//! on the dedicated metrics port.
//!
//! All metrics are registered in a dedicated [`prometheus::Registry`] with
//! the `dstream` prefix so they do not collide with any default global
//! registry consumers.

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Registry, TextEncoder};
use serde_json::Value;

use dstream_protocol::wallet::{RpcTransport, WalletRpcError};

/// Handles to every metric the node records.
///
/// Prometheus handles are reference counted internally, so cloning is
/// cheap and every clone feeds the same series.
#[derive(Clone)]
pub struct NodeMetrics {
    registry: Registry,
    /// Requests refused by the NIP-98 authenticator.
    pub auth_failures_total: IntCounter,
    /// Tip and stake session tokens issued.
    pub sessions_issued_total: IntCounter,
    pub refunds_settled_total: IntCounter,
    /// Refunds refused by policy (threshold not met).
    pub refunds_denied_total: IntCounter,
    pub slashes_settled_total: IntCounter,
    /// Slashes refused because the stake is still inside its window.
    pub slashes_denied_total: IntCounter,
    /// Wallet RPC calls that returned an error of any kind.
    pub wallet_rpc_errors_total: IntCounter,
    /// Escrow sessions currently held in memory.
    pub escrow_sessions_active: IntGauge,
    /// Wallet RPC round-trip latency.
    pub wallet_rpc_duration_seconds: Histogram,
}

fn counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounter, prometheus::Error> {
    let c = IntCounter::new(name, help)?;
    registry.register(Box::new(c.clone()))?;
    Ok(c)
}

impl NodeMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("dstream".into()), None)?;

        let escrow_sessions_active = IntGauge::new(
            "escrow_sessions_active",
            "Escrow sessions currently held in memory",
        )?;
        registry.register(Box::new(escrow_sessions_active.clone()))?;

        let wallet_rpc_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "wallet_rpc_duration_seconds",
                "Wallet RPC round-trip latency in seconds",
            )
            .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        )?;
        registry.register(Box::new(wallet_rpc_duration_seconds.clone()))?;

        Ok(Self {
            auth_failures_total: counter(
                &registry,
                "auth_failures_total",
                "Requests rejected by NIP-98 verification",
            )?,
            sessions_issued_total: counter(
                &registry,
                "sessions_issued_total",
                "Tip and stake session tokens issued",
            )?,
            refunds_settled_total: counter(
                &registry,
                "refunds_settled_total",
                "Stake refunds swept to the viewer",
            )?,
            refunds_denied_total: counter(
                &registry,
                "refunds_denied_total",
                "Stake refunds refused by policy",
            )?,
            slashes_settled_total: counter(
                &registry,
                "slashes_settled_total",
                "Stakes swept to the stream owner",
            )?,
            slashes_denied_total: counter(
                &registry,
                "slashes_denied_total",
                "Slashes refused inside the quiet window",
            )?,
            wallet_rpc_errors_total: counter(
                &registry,
                "wallet_rpc_errors_total",
                "Wallet RPC calls that failed",
            )?,
            escrow_sessions_active,
            wallet_rpc_duration_seconds,
            registry,
        })
    }

    /// Mirrors the escrow store's live session count.
    pub fn set_escrow_sessions(&self, count: usize) {
        self.escrow_sessions_active
            .set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    /// Encodes all registered metrics into the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Shared metrics state passed to axum handlers.
pub type SharedMetrics = Arc<NodeMetrics>;

/// Axum handler that renders `/metrics` in Prometheus text format.
pub async fn metrics_handler(
    axum::extract::State(metrics): axum::extract::State<SharedMetrics>,
) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}

// ---------------------------------------------------------------------------
// Metered wallet transport
// ---------------------------------------------------------------------------

/// Wraps a wallet transport and records latency and failures of every call.
pub struct MeteredTransport {
    inner: Arc<dyn RpcTransport>,
    metrics: SharedMetrics,
}

impl MeteredTransport {
    pub fn new(inner: Arc<dyn RpcTransport>, metrics: SharedMetrics) -> Self {
        Self { inner, metrics }
    }
}

#[async_trait]
impl RpcTransport for MeteredTransport {
    async fn call(&self, method: &str, params: Value) -> Result<Value, WalletRpcError> {
        let timer = self.metrics.wallet_rpc_duration_seconds.start_timer();
        let result = self.inner.call(method, params).await;
        timer.observe_duration();
        if let Err(e) = &result {
            self.metrics.wallet_rpc_errors_total.inc();
            tracing::warn!(method, error = %e, "wallet rpc call failed");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dstream_protocol::clock::ManualClock;
    use dstream_protocol::wallet::MemoryWallet;
    use serde_json::json;

    #[test]
    fn encodes_with_prefix() {
        let m = NodeMetrics::new().unwrap();
        m.sessions_issued_total.inc();
        m.set_escrow_sessions(3);
        let text = m.encode().unwrap();
        assert!(text.contains("dstream_sessions_issued_total 1"));
        assert!(text.contains("dstream_escrow_sessions_active 3"));
    }

    #[tokio::test]
    async fn metered_transport_counts_failures() {
        let metrics = Arc::new(NodeMetrics::new().unwrap());
        let wallet = Arc::new(MemoryWallet::new(Arc::new(ManualClock::at_secs(1_700_000_000))));
        let t = MeteredTransport::new(wallet, metrics.clone());

        t.call("get_version", json!({})).await.unwrap();
        assert!(t.call("no_such_method", json!({})).await.is_err());

        assert_eq!(metrics.wallet_rpc_errors_total.get(), 1);
        assert_eq!(metrics.wallet_rpc_duration_seconds.get_sample_count(), 2);
    }
}
