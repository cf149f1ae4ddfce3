//! Stake sessions, refunds and slashes.
//!
//! A stake is a viewer's deposit to a session subaddress. The viewer gets
//! it back (refund) by proving, with signed bytes receipts, that they
//! served the swarm. The stream owner takes it (slash) once it has sat
//! untouched for the slash window.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use dstream_protocol::amount::parse_index;
use dstream_protocol::clock::Clock;
use dstream_protocol::config::MIN_REFUND_ADDRESS_LEN;
use dstream_protocol::ledger::{aggregate, stake_totals, AggregateQuery, StakeTotals};
use dstream_protocol::nostr::{parse_bytes_receipt, NostrEvent};
use dstream_protocol::policy::{
    can_slash, evaluate_refund, RefundContributionReceipt, RefundRequest, SlashQuery,
};
use dstream_protocol::session::{
    new_nonce, session_label, LabelIndex, SessionKind, SessionPayload, StakeSession,
};
use dstream_protocol::wallet::WalletRpcError;
use dstream_protocol::SettlementError;

use super::extract::{self, json_body, stream_identity, AuthContext};
use super::tip::{refresh_quietly, StreamRequest};
use super::{AggregatesView, ApiResult, AppState};

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StakeIssued {
    ok: bool,
    address: String,
    account_index: u32,
    address_index: u32,
    viewer_pubkey: String,
    session: String,
}

/// `POST /api/xmr/stake/session`: the authenticated caller becomes the
/// session's viewer.
pub async fn create_session(
    State(state): State<AppState>,
    auth: AuthContext,
    body: Bytes,
) -> ApiResult<Json<StakeIssued>> {
    let wallet = state.wallet()?;
    let caller = auth.verify(&state)?;
    let req: StreamRequest = json_body(&body)?;
    let stream = stream_identity(&req.stream_pubkey, &req.stream_id)?;
    let account_index = state.settings.account_index;

    let nonce = new_nonce();
    let label = session_label(SessionKind::Stake, &stream, &nonce);
    let upstream = |e: WalletRpcError| SettlementError::upstream("stake session", e);
    let created = wallet
        .create_address(account_index, &label)
        .await
        .map_err(upstream)?;

    let session = StakeSession::new(
        &stream,
        &caller.pubkey,
        account_index,
        created.address_index,
        state.clock.now_ms(),
        nonce,
    );
    let viewer_pubkey = session.viewer_pubkey.clone();
    let token = state
        .codec
        .issue(&SessionPayload::Stake(session))
        .map_err(|e| SettlementError::upstream("stake session", e))?;

    state.metrics.sessions_issued_total.inc();
    tracing::info!(
        stream = %stream,
        viewer = %viewer_pubkey,
        address_index = created.address_index,
        "stake session issued"
    );

    Ok(Json(StakeIssued {
        ok: true,
        address: created.address,
        account_index,
        address_index: created.address_index,
        viewer_pubkey,
        session: token,
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StakeStatus {
    ok: bool,
    stream_pubkey: String,
    stream_id: String,
    viewer_pubkey: String,
    account_index: u32,
    address_index: u32,
    confirmations_required: u64,
    #[serde(flatten)]
    totals: StakeTotals,
}

/// `GET /api/xmr/stake/session/:token`: what the viewer has staked so far.
pub async fn get_session(
    State(state): State<AppState>,
    Path(token): Path<String>,
    auth: AuthContext,
) -> ApiResult<Json<StakeStatus>> {
    let wallet = state.wallet()?;
    let session = extract::stake_session(&state, &token)?;
    let caller = auth.verify(&state)?;
    if caller.pubkey != session.viewer_pubkey {
        return Err(SettlementError::forbidden("not authorized for session").into());
    }

    refresh_quietly(wallet).await;
    let transfers = wallet
        .get_incoming_transfers()
        .await
        .map_err(|e| SettlementError::upstream("stake verify", e))?;
    let confirmations_required = state.settings.confirmations_required;
    let totals = stake_totals(
        &transfers,
        session.account_index,
        session.address_index,
        confirmations_required,
    );

    Ok(Json(StakeStatus {
        ok: true,
        stream_pubkey: session.stream_pubkey,
        stream_id: session.stream_id,
        viewer_pubkey: session.viewer_pubkey,
        account_index: session.account_index,
        address_index: session.address_index,
        confirmations_required,
        totals,
    }))
}

// ---------------------------------------------------------------------------
// Refund
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundBody {
    #[serde(default)]
    refund_address: Option<String>,
    /// Kept raw: a receipt that does not even deserialize is reported the
    /// same way as one with a bad signature.
    #[serde(default)]
    receipts: Vec<Value>,
}

/// Plausible Monero address: alphanumeric and at least 20 characters.
/// The wallet does the real validation when it sweeps.
fn normalize_address(raw: Option<&str>) -> Option<String> {
    let value = raw?.trim();
    (value.len() >= MIN_REFUND_ADDRESS_LEN && value.chars().all(|c| c.is_ascii_alphanumeric()))
        .then(|| value.to_string())
}

fn receipt_for_session(
    raw: Value,
    session: &StakeSession,
) -> ApiResult<RefundContributionReceipt> {
    let invalid_sig = || SettlementError::validation("invalid receipt signature");
    let event: NostrEvent = serde_json::from_value(raw).map_err(|_| invalid_sig())?;
    event.verify().map_err(|_| invalid_sig())?;
    let parsed = parse_bytes_receipt(&event, &session.stream()).map_err(|e| {
        tracing::debug!(error = %e, receipt_id = %event.id, "receipt outside session scope");
        SettlementError::validation("invalid receipt scope")
    })?;
    Ok(RefundContributionReceipt::from(&parsed))
}

/// `POST /api/xmr/stake/session/:token/refund`
///
/// Policy first, then balance, then sweep. Nothing is swept unless the
/// receipts clear the refund threshold.
pub async fn refund(
    State(state): State<AppState>,
    Path(token): Path<String>,
    auth: AuthContext,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let wallet = state.wallet()?;
    let session = extract::stake_session(&state, &token)?;
    let caller = auth.verify(&state)?;
    if caller.pubkey != session.viewer_pubkey {
        return Err(SettlementError::forbidden("not authorized for session").into());
    }

    let body: RefundBody = json_body(&body)?;
    let refund_address = normalize_address(body.refund_address.as_deref())
        .ok_or_else(|| SettlementError::validation("invalid refundAddress"))?;
    let receipts = body
        .receipts
        .into_iter()
        .map(|raw| receipt_for_session(raw, &session))
        .collect::<ApiResult<Vec<_>>>()?;

    let cfg = &state.settings.refund;
    let stream = session.stream();
    let decision = evaluate_refund(
        &RefundRequest {
            receipts: &receipts,
            viewer_pubkey: &session.viewer_pubkey,
            session_token: &token,
            stream: &stream,
            session_created_at_ms: session.created_at_ms,
            now_ms: state.clock.now_ms(),
        },
        cfg,
    );

    if !decision.ok {
        state.metrics.refunds_denied_total.inc();
        let reason = decision.reason.map(|r| r.as_str()).unwrap_or("unknown");
        tracing::info!(
            viewer = %session.viewer_pubkey,
            address_index = session.address_index,
            served_bytes = decision.served_bytes,
            accepted = decision.accepted_receipts,
            rejected = decision.rejected_receipts,
            reason,
            "refund denied"
        );
        return Err(SettlementError::denied(
            403,
            reason,
            format!(
                "refund threshold not met (servedBytes={}, required={}, reason={})",
                decision.served_bytes, cfg.min_served_bytes, reason
            ),
        )
        .into());
    }

    let upstream = |e: WalletRpcError| SettlementError::upstream("refund", e);
    let balance = wallet
        .get_balance(session.account_index, &[session.address_index])
        .await
        .map_err(upstream)?;

    let evidence = json!({
        "servedBytes": decision.served_bytes,
        "minServedBytes": cfg.min_served_bytes,
        "fullServedBytes": cfg.full_served_bytes,
        "creditPercentBps": decision.credit_percent_bps,
        "acceptedReceipts": decision.accepted_receipts,
        "rejectedReceipts": decision.rejected_receipts,
        "decisions": decision.decisions,
    });

    if balance.unlocked_for(session.address_index) == 0 {
        return Ok(Json(merge(
            json!({
                "ok": true,
                "action": "refund",
                "settled": false,
                "reason": "no_unlocked_balance",
                "amountAtomic": "0",
                "txids": [],
            }),
            evidence,
        )));
    }

    let sweep = wallet
        .sweep_all(session.account_index, session.address_index, &refund_address)
        .await
        .map_err(upstream)?;

    state.metrics.refunds_settled_total.inc();
    tracing::info!(
        viewer = %session.viewer_pubkey,
        address_index = session.address_index,
        amount_atomic = %sweep.amount_atomic,
        credit_percent_bps = decision.credit_percent_bps,
        "refund settled"
    );

    Ok(Json(merge(
        json!({
            "ok": true,
            "action": "refund",
            "settled": true,
            "amountAtomic": sweep.amount_atomic.to_string(),
            "txids": sweep.txids,
            "destinationAddress": refund_address,
        }),
        evidence,
    )))
}

/// Shallow object merge, `extra` keys last.
fn merge(mut base: Value, extra: Value) -> Value {
    if let (Some(base), Value::Object(extra)) = (base.as_object_mut(), extra) {
        base.extend(extra);
    }
    base
}

// ---------------------------------------------------------------------------
// Slash
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlashBody {
    #[serde(default)]
    stream_pubkey: String,
    #[serde(default)]
    stream_id: String,
    /// Number or numeric string.
    #[serde(default)]
    address_index: Value,
    #[serde(default)]
    destination_address: Option<String>,
}

/// `POST /api/xmr/stake/slash`: the stream owner sweeps a stake that has
/// been quiet for the slash window.
pub async fn slash(
    State(state): State<AppState>,
    auth: AuthContext,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let wallet = state.wallet()?;
    let caller = auth.verify(&state)?;
    let body: SlashBody = json_body(&body)?;
    let address_index = parse_index(&body.address_index)
        .and_then(|i| u32::try_from(i).ok())
        .ok_or_else(|| SettlementError::validation("invalid addressIndex"))?;
    let stream = stream_identity(&body.stream_pubkey, &body.stream_id)?;
    if !stream.is_owner(&caller.pubkey) {
        return Err(SettlementError::forbidden("not authorized for stream").into());
    }

    let account_index = state.settings.account_index;
    let slash_min_age_secs = state.settings.slash_min_age_secs;
    let upstream = |e: WalletRpcError| SettlementError::upstream("slash", e);

    // Only stake subaddresses of this stream are the owner's to take.
    let listing = wallet.get_address(account_index).await.map_err(upstream)?;
    let stakes = LabelIndex::build(listing.labels()).indices_for(SessionKind::Stake, &stream);
    if !stakes.contains(&address_index) {
        return Err(SettlementError::forbidden("addressIndex is not a stake on this stream").into());
    }

    let transfers = wallet.get_incoming_transfers().await.map_err(upstream)?;
    let decision = can_slash(
        &transfers,
        &SlashQuery {
            account_index,
            address_index,
            slash_min_age_secs,
            now_secs: state.clock.now_secs(),
        },
    );
    if !decision.allowed {
        state.metrics.slashes_denied_total.inc();
        let wait = decision.wait_secs.unwrap_or(0);
        tracing::info!(stream = %stream, address_index, wait_secs = wait, "slash denied");
        return Err(SettlementError::denied(
            409,
            "slash_window_not_reached",
            format!("slash window not reached (wait {wait}s)"),
        )
        .into());
    }

    let balance = wallet
        .get_balance(account_index, &[address_index])
        .await
        .map_err(upstream)?;
    if balance.unlocked_for(address_index) == 0 {
        return Ok(Json(json!({
            "ok": true,
            "action": "slash",
            "settled": false,
            "reason": "no_unlocked_balance",
            "amountAtomic": "0",
            "txids": [],
            "addressIndex": address_index,
        })));
    }

    let destination_address = match body
        .destination_address
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty())
    {
        Some(d) => d.to_string(),
        None => listing.address.clone(),
    };

    let sweep = wallet
        .sweep_all(account_index, address_index, &destination_address)
        .await
        .map_err(upstream)?;

    state.metrics.slashes_settled_total.inc();
    tracing::info!(
        stream = %stream,
        address_index,
        amount_atomic = %sweep.amount_atomic,
        "stake slashed"
    );

    Ok(Json(json!({
        "ok": true,
        "action": "slash",
        "settled": true,
        "amountAtomic": sweep.amount_atomic.to_string(),
        "txids": sweep.txids,
        "addressIndex": address_index,
        "destinationAddress": destination_address,
        "slashMinAgeSec": slash_min_age_secs,
        "lastObservedAtMs": decision.last_observed_at_ms(),
    })))
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

/// `POST /api/xmr/stake/list`: one row per stake subaddress of the
/// caller's stream, newest first.
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
    let upstream = |e: WalletRpcError| SettlementError::upstream("stake list", e);

    let listing = wallet.get_address(account_index).await.map_err(upstream)?;
    let indices = LabelIndex::build(listing.labels()).indices_for(SessionKind::Stake, &stream);
    let transfers = if indices.is_empty() {
        Vec::new()
    } else {
        wallet.get_incoming_transfers().await.map_err(upstream)?
    };
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
        "stakes": agg.groups,
        "confirmationsRequired": confirmations_required,
        "aggregates": AggregatesView::from(&agg),
    })))
}
