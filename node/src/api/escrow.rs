//! Escrow-v3 endpoints. Thin: authenticate, parse, hand off to
//! [`EscrowCoordinator`](dstream_escrow::EscrowCoordinator), render the view.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::Value;

use dstream_escrow::{CreateEscrow, EscrowError, EscrowSessionView};
use dstream_protocol::amount::parse_index;
use dstream_protocol::SettlementError;

use super::extract::{json_body, optional_json_body, stream_identity, AuthContext};
use super::{ApiError, ApiResult, AppState};

type ViewResult = ApiResult<Json<EscrowSessionView>>;

fn respond(result: Result<EscrowSessionView, EscrowError>) -> ViewResult {
    result.map(Json).map_err(ApiError::from)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBody {
    #[serde(default)]
    stream_pubkey: String,
    #[serde(default)]
    stream_id: String,
    #[serde(default)]
    participant_pubkeys: Vec<String>,
    #[serde(default)]
    threshold: Value,
}

/// `POST /api/xmr/escrow/session`
pub async fn create(State(state): State<AppState>, auth: AuthContext, body: Bytes) -> ViewResult {
    let caller = auth.verify(&state)?;
    state.wallet()?;
    let body: CreateBody = json_body(&body)?;
    let stream = stream_identity(&body.stream_pubkey, &body.stream_id)?;
    if !stream.is_owner(&caller.pubkey) {
        return Err(SettlementError::forbidden("not authorized for stream").into());
    }

    let result = state
        .escrow
        .create(
            &caller.pubkey,
            CreateEscrow {
                stream,
                participant_pubkeys: body.participant_pubkeys,
                threshold: parse_index(&body.threshold),
            },
        )
        .await;
    respond(result)
}

/// `GET /api/xmr/escrow/session/:id`
pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<String>,
    auth: AuthContext,
) -> ViewResult {
    let caller = auth.verify(&state)?;
    let result = state.escrow.get(&caller.pubkey, &id);
    respond(result)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantBody {
    #[serde(default)]
    phase: String,
    #[serde(default)]
    multisig_info: String,
}

/// `POST /api/xmr/escrow/session/:id/participant`
pub async fn participant(
    State(state): State<AppState>,
    Path(id): Path<String>,
    auth: AuthContext,
    body: Bytes,
) -> ViewResult {
    let caller = auth.verify(&state)?;
    let body: ParticipantBody = json_body(&body)?;
    let result = state
        .escrow
        .contribute(&caller.pubkey, &id, &body.phase, &body.multisig_info);
    respond(result)
}

/// `POST /api/xmr/escrow/session/:id/make`
pub async fn make(
    State(state): State<AppState>,
    Path(id): Path<String>,
    auth: AuthContext,
) -> ViewResult {
    let caller = auth.verify(&state)?;
    let result = state.escrow.make(&caller.pubkey, &id).await;
    respond(result)
}

/// `POST /api/xmr/escrow/session/:id/exchange`
pub async fn exchange(
    State(state): State<AppState>,
    Path(id): Path<String>,
    auth: AuthContext,
) -> ViewResult {
    let caller = auth.verify(&state)?;
    let result = state.escrow.exchange(&caller.pubkey, &id).await;
    respond(result)
}

#[derive(Debug, Default, Deserialize)]
pub struct ImportBody {
    #[serde(default)]
    infos: Vec<String>,
}

/// `POST /api/xmr/escrow/session/:id/import`
pub async fn import(
    State(state): State<AppState>,
    Path(id): Path<String>,
    auth: AuthContext,
    body: Bytes,
) -> ViewResult {
    let caller = auth.verify(&state)?;
    let body: ImportBody = json_body(&body)?;
    let result = state.escrow.import(&caller.pubkey, &id, &body.infos).await;
    respond(result)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxDataBody {
    #[serde(default)]
    tx_data_hex: Option<String>,
}

/// `POST /api/xmr/escrow/session/:id/sign`
pub async fn sign(
    State(state): State<AppState>,
    Path(id): Path<String>,
    auth: AuthContext,
    body: Bytes,
) -> ViewResult {
    let caller = auth.verify(&state)?;
    let body: TxDataBody = json_body(&body)?;
    let tx_data_hex = body.tx_data_hex.unwrap_or_default();
    let result = state.escrow.sign(&caller.pubkey, &id, &tx_data_hex).await;
    respond(result)
}

/// `POST /api/xmr/escrow/session/:id/submit`: body optional, the stored
/// signed set is used when it carries no `txDataHex`.
pub async fn submit(
    State(state): State<AppState>,
    Path(id): Path<String>,
    auth: AuthContext,
    body: Bytes,
) -> ViewResult {
    let caller = auth.verify(&state)?;
    let body: TxDataBody = optional_json_body(&body)?;
    let result = state
        .escrow
        .submit(&caller.pubkey, &id, body.tx_data_hex.as_deref())
        .await;
    respond(result)
}
