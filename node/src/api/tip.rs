//! Tip sessions: a fresh labelled subaddress per tipper, no auth needed to
//! open one or to watch it. Only the stream owner may list them.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use dstream_protocol::amount::decimal;
use dstream_protocol::clock::Clock;
use dstream_protocol::ledger::{aggregate, find_latest_transfer, AggregateQuery};
use dstream_protocol::session::{
    new_nonce, session_label, LabelIndex, SessionKind, SessionPayload, TipSession,
};
use dstream_protocol::wallet::{TransferRecord, WalletRpcClient, WalletRpcError};
use dstream_protocol::SettlementError;

use super::extract::{self, json_body, stream_identity, AuthContext};
use super::{AggregatesView, ApiResult, AppState};

/// Body of every stream-scoped POST.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamRequest {
    #[serde(default)]
    pub stream_pubkey: String,
    #[serde(default)]
    pub stream_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionIssued {
    ok: bool,
    address: String,
    account_index: u32,
    address_index: u32,
    session: String,
}

/// `POST /api/xmr/tip/session`
pub async fn create_session(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<Json<SessionIssued>> {
    let wallet = state.wallet()?;
    let req: StreamRequest = json_body(&body)?;
    let stream = stream_identity(&req.stream_pubkey, &req.stream_id)?;
    let account_index = state.settings.account_index;

    let nonce = new_nonce();
    let label = session_label(SessionKind::Tip, &stream, &nonce);
    let created = wallet
        .create_address(account_index, &label)
        .await
        .map_err(|e| SettlementError::upstream("tip session", e))?;

    let payload = SessionPayload::Tip(TipSession::new(
        &stream,
        account_index,
        created.address_index,
        state.clock.now_ms(),
        nonce,
    ));
    let session = state
        .codec
        .issue(&payload)
        .map_err(|e| SettlementError::upstream("tip session", e))?;

    state.metrics.sessions_issued_total.inc();
    tracing::info!(stream = %stream, address_index = created.address_index, "tip session issued");

    Ok(Json(SessionIssued {
        ok: true,
        address: created.address,
        account_index,
        address_index: created.address_index,
        session,
    }))
}

/// `GET /api/xmr/tip/session/:token`: the latest transfer to the session
/// subaddress, if any.
pub async fn get_session(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> ApiResult<Json<Value>> {
    let wallet = state.wallet()?;
    let session = extract::tip_session(&state, &token)?;

    refresh_quietly(wallet).await;
    let transfers = wallet
        .get_incoming_transfers()
        .await
        .map_err(|e| SettlementError::upstream("tip verify", e))?;
    let latest = find_latest_transfer(
        &transfers,
        session.account_index,
        session.address_index,
        state.settings.confirmations_required,
    );

    Ok(Json(json!({
        "ok": true,
        "streamPubkey": session.stream_pubkey,
        "streamId": session.stream_id,
        "accountIndex": session.account_index,
        "addressIndex": session.address_index,
        "found": latest.is_some(),
        "amountAtomic": latest.as_ref().map(|m| m.amount_atomic.to_string()),
        "confirmed": latest.as_ref().map(|m| m.confirmed),
        "confirmations": latest.as_ref().map(|m| m.confirmations),
        "observedAtMs": latest.as_ref().and_then(|m| m.observed_at_ms),
        "txid": latest.as_ref().and_then(|m| m.txid.clone()),
    })))
}

/// Asks the wallet to rescan before a read. A failed refresh only means
/// slightly stale data, so it is logged and ignored.
pub(crate) async fn refresh_quietly(wallet: &WalletRpcClient) {
    if let Err(e) = wallet.refresh().await {
        tracing::debug!(error = %e, "wallet refresh failed, reading cached transfers");
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TipEntry {
    #[serde(with = "decimal")]
    amount_atomic: u128,
    confirmations: u64,
    confirmed: bool,
    observed_at_ms: Option<u64>,
    txid: Option<String>,
    address_index: u32,
}

/// `POST /api/xmr/tip/list`: every tip to the caller's stream, newest first.
pub async fn list(
    State(state): State<AppState>,
    auth: AuthContext,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let wallet = state.wallet()?;
    let req: StreamRequest = json_body(&body)?;
    let stream = stream_identity(&req.stream_pubkey, &req.stream_id)?;
    let caller = auth.verify(&state)?;
    if !stream.is_owner(&caller.pubkey) {
        return Err(SettlementError::forbidden("not authorized for stream").into());
    }

    let account_index = state.settings.account_index;
    let confirmations_required = state.settings.confirmations_required;
    let upstream = |e: WalletRpcError| SettlementError::upstream("tip list", e);

    let listing = wallet.get_address(account_index).await.map_err(upstream)?;
    let indices = LabelIndex::build(listing.labels()).indices_for(SessionKind::Tip, &stream);
    let transfers: Vec<TransferRecord> = if indices.is_empty() {
        Vec::new()
    } else {
        wallet.get_incoming_transfers().await.map_err(upstream)?
    };

    let mut tips: Vec<TipEntry> = transfers
        .iter()
        .filter(|t| {
            t.subaddr_index.major == account_index
                && indices.contains(&t.subaddr_index.minor)
                && !t.spent
        })
        .map(|t| TipEntry {
            amount_atomic: t.amount_atomic,
            confirmations: t.confirmations,
            confirmed: t.confirmations >= confirmations_required,
            observed_at_ms: t.timestamp_sec.map(|s| s.saturating_mul(1000)),
            txid: t.txid.clone(),
            address_index: t.subaddr_index.minor,
        })
        .collect();
    tips.sort_by(|a, b| b.observed_at_ms.cmp(&a.observed_at_ms));

    let agg = aggregate(
        &transfers,
        &AggregateQuery {
            account_index,
            address_indices: &indices,
            confirmations_required,
        },
    );

    Ok(Json(json!({
        "ok": true,
        "tips": tips,
        "aggregates": AggregatesView::from(&agg),
    })))
}
