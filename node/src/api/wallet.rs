//! Wallet health and capability probing.

use std::collections::BTreeMap;

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use dstream_protocol::wallet::{
    all_profile_methods, evaluate_profiles, ProbeMode, ProfileReadiness,
};
use dstream_protocol::SettlementError;

use super::{ApiResult, AppState};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    ok: bool,
    version: u64,
    account_index: u32,
    confirmations_required: u64,
}

/// `GET /api/xmr/health`: proves the wallet answers.
pub async fn health(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    let wallet = state.wallet()?;
    let version = wallet
        .get_version()
        .await
        .map_err(|e| SettlementError::upstream("wallet rpc", e))?;
    Ok(Json(HealthResponse {
        ok: true,
        version,
        account_index: state.settings.account_index,
        confirmations_required: state.settings.confirmations_required,
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct CapabilitiesQuery {
    mode: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MethodStatus {
    supported: bool,
    code: Option<i64>,
    message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilitiesResponse {
    ok: bool,
    probe_mode: ProbeMode,
    version: u64,
    account_index: u32,
    confirmations_required: u64,
    profiles: BTreeMap<&'static str, ProfileReadiness>,
    methods: BTreeMap<String, MethodStatus>,
}

/// `GET /api/xmr/capabilities?mode=passive|active`.
///
/// Passive (the default) assumes the side-effecting methods exist rather
/// than calling them.
pub async fn capabilities(
    State(state): State<AppState>,
    Query(query): Query<CapabilitiesQuery>,
) -> ApiResult<Json<CapabilitiesResponse>> {
    let wallet = state.wallet()?;
    let mode = ProbeMode::from_str_lossy(query.mode.as_deref().unwrap_or(""));

    let version = wallet
        .get_version()
        .await
        .map_err(|e| SettlementError::upstream("capability probe", e))?;
    let probes = wallet.probe_methods(&all_profile_methods(), mode).await;
    let profiles = evaluate_profiles(&probes);

    tracing::info!(
        ?mode,
        ready = profiles.values().filter(|p| p.ready).count(),
        "wallet capabilities probed"
    );

    let methods = probes
        .into_iter()
        .map(|p| {
            (
                p.method,
                MethodStatus {
                    supported: p.supported,
                    code: p.code,
                    message: p.message,
                },
            )
        })
        .collect();

    Ok(Json(CapabilitiesResponse {
        ok: true,
        probe_mode: mode,
        version,
        account_index: state.settings.account_index,
        confirmations_required: state.settings.confirmations_required,
        profiles,
        methods,
    }))
}
