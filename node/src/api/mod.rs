//! # HTTP API
//!
//! Builds the axum router that exposes the settlement service. All
//! endpoints share application state through axum's `State` extractor.
//!
//! ## Endpoints
//!
//! | Method | Path                                        | Auth          |
//! |--------|---------------------------------------------|---------------|
//! | GET    | `/health`                                   | none          |
//! | GET    | `/api/xmr/health`                           | none          |
//! | GET    | `/api/xmr/capabilities?mode=`               | none          |
//! | POST   | `/api/xmr/tip/session`                      | none          |
//! | GET    | `/api/xmr/tip/session/:token`               | none          |
//! | POST   | `/api/xmr/tip/list`                         | stream owner  |
//! | POST   | `/api/xmr/stake/session`                    | viewer        |
//! | GET    | `/api/xmr/stake/session/:token`             | token viewer  |
//! | POST   | `/api/xmr/stake/session/:token/refund`      | token viewer  |
//! | POST   | `/api/xmr/stake/slash`                      | stream owner  |
//! | POST   | `/api/xmr/stake/list`                       | stream owner  |
//! | POST   | `/api/xmr/escrow/session`                   | stream owner  |
//! | GET    | `/api/xmr/escrow/session/:id`               | escrow member |
//! | POST   | `/api/xmr/escrow/session/:id/participant`   | participant   |
//! | POST   | `/api/xmr/escrow/session/:id/make`          | coordinator   |
//! | POST   | `/api/xmr/escrow/session/:id/exchange`      | coordinator   |
//! | POST   | `/api/xmr/escrow/session/:id/import`        | coordinator   |
//! | POST   | `/api/xmr/escrow/session/:id/sign`          | coordinator   |
//! | POST   | `/api/xmr/escrow/session/:id/submit`        | coordinator   |
//!
//! "Auth" means a NIP-98 attestation in the `Authorization` header. With
//! no wallet configured every `/api/xmr` endpoint answers 404.

mod error;
mod escrow;
mod extract;
mod stake;
mod tip;
mod wallet;


use std::sync::Arc;

use axum::http::Method;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{extract::State, Json, Router};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use dstream_escrow::EscrowCoordinator;
use dstream_protocol::clock::SharedClock;
use dstream_protocol::ledger::{LedgerAggregate, LedgerTotals, TransferGroup};
use dstream_protocol::policy::RefundPolicyConfig;
use dstream_protocol::wallet::WalletRpcClient;
use dstream_protocol::{Authenticator, SessionCodec, SettlementError};

use crate::metrics::SharedMetrics;

pub use error::{ApiError, ApiResult};

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Runtime settlement settings, resolved once at startup.
#[derive(Debug, Clone)]
pub struct XmrSettings {
    pub account_index: u32,
    pub confirmations_required: u64,
    pub slash_min_age_secs: u64,
    pub refund: RefundPolicyConfig,
    /// External origin NIP-98 URLs are rebuilt against.
    pub public_origin: Option<String>,
}

/// Shared application state available to all request handlers.
///
/// Cheap to clone: everything is behind `Arc` or is a handle.
#[derive(Clone)]
pub struct AppState {
    pub version: String,
    pub settings: Arc<XmrSettings>,
    pub authenticator: Authenticator,
    pub codec: Arc<SessionCodec>,
    /// `None` when no wallet RPC is configured.
    pub wallet: Option<WalletRpcClient>,
    pub clock: SharedClock,
    pub escrow: EscrowCoordinator,
    pub metrics: SharedMetrics,
}

impl AppState {
    /// The wallet, or `404 xmr wallet rpc not configured`.
    pub(crate) fn wallet(&self) -> ApiResult<&WalletRpcClient> {
        self.wallet
            .as_ref()
            .ok_or_else(|| SettlementError::NotConfigured.into())
    }
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the full axum [`Router`] with all API routes, CORS, and tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/xmr/health", get(wallet::health))
        .route("/api/xmr/capabilities", get(wallet::capabilities))
        .route("/api/xmr/tip/session", post(tip::create_session))
        .route("/api/xmr/tip/session/:token", get(tip::get_session))
        .route("/api/xmr/tip/list", post(tip::list))
        .route("/api/xmr/stake/session", post(stake::create_session))
        .route("/api/xmr/stake/session/:token", get(stake::get_session))
        .route("/api/xmr/stake/session/:token/refund", post(stake::refund))
        .route("/api/xmr/stake/slash", post(stake::slash))
        .route("/api/xmr/stake/list", post(stake::list))
        .route("/api/xmr/escrow/session", post(escrow::create))
        .route("/api/xmr/escrow/session/:id", get(escrow::get))
        .route("/api/xmr/escrow/session/:id/participant", post(escrow::participant))
        .route("/api/xmr/escrow/session/:id/make", post(escrow::make))
        .route("/api/xmr/escrow/session/:id/exchange", post(escrow::exchange))
        .route("/api/xmr/escrow/session/:id/import", post(escrow::import))
        .route("/api/xmr/escrow/session/:id/sign", post(escrow::sign))
        .route("/api/xmr/escrow/session/:id/submit", post(escrow::submit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// `GET /health`: liveness only, never touches the wallet.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "ok": true,
        "version": state.version,
        "walletConfigured": state.wallet.is_some(),
    }))
}

// ---------------------------------------------------------------------------
// Shared response shapes
// ---------------------------------------------------------------------------

/// `aggregates` block of the list endpoints.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AggregatesView<'a> {
    group_count: usize,
    totals: &'a LedgerTotals,
    groups: &'a [TransferGroup],
}

impl<'a> From<&'a LedgerAggregate> for AggregatesView<'a> {
    fn from(agg: &'a LedgerAggregate) -> Self {
        Self {
            group_count: agg.groups.len(),
            totals: &agg.totals,
            groups: &agg.groups,
        }
    }
}
