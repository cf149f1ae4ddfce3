//! Request helpers shared by every handler: NIP-98 context, body parsing,
//! stream identities and session tokens.
//!
//! Handlers decide *when* to run each check. Several endpoints are
//! order-sensitive (a bad token must answer 400 before auth is looked at),
//! so nothing here rejects a request on extraction.

use std::convert::Infallible;

use axum::async_trait;
use axum::extract::{FromRequestParts, OriginalUri};
use axum::http::request::Parts;
use axum::http::{header, HeaderMap, Method, Uri};
use serde::de::DeserializeOwned;

use dstream_protocol::nostr::StreamIdentity;
use dstream_protocol::session::{SessionTokenError, StakeSession, TipSession};
use dstream_protocol::{AuthenticatedCaller, SettlementError};

use super::error::{ApiError, ApiResult};
use super::AppState;

// ---------------------------------------------------------------------------
// NIP-98
// ---------------------------------------------------------------------------

/// What a NIP-98 attestation must match: the full external URL of this
/// request, its method, and the raw `Authorization` header.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub url: String,
    pub method: Method,
    header: Option<String>,
}

#[async_trait]
impl FromRequestParts<AppState> for AuthContext {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let uri = parts
            .extensions
            .get::<OriginalUri>()
            .map(|u| u.0.clone())
            .unwrap_or_else(|| parts.uri.clone());
        Ok(Self {
            url: external_url(state.settings.public_origin.as_deref(), &parts.headers, &uri),
            method: parts.method.clone(),
            header: parts
                .headers
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
        })
    }
}

impl AuthContext {
    /// Runs the authenticator. Failures are counted and answer 401.
    pub fn verify(&self, state: &AppState) -> ApiResult<AuthenticatedCaller> {
        state
            .authenticator
            .verify_header(self.header.as_deref(), &self.url, self.method.as_str())
            .map_err(|e| {
                state.metrics.auth_failures_total.inc();
                tracing::debug!(error = %e, url = %self.url, method = %self.method, "nip-98 rejected");
                ApiError::from(e)
            })
    }
}

/// Rebuilds the URL the client signed. With a configured public origin the
/// result is `origin + path?query`; otherwise the Host header is trusted,
/// with `x-forwarded-proto` picking the scheme.
pub fn external_url(public_origin: Option<&str>, headers: &HeaderMap, uri: &Uri) -> String {
    let path = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    if let Some(origin) = public_origin.map(str::trim).filter(|o| !o.is_empty()) {
        return format!("{}{}", origin.trim_end_matches('/'), path);
    }
    let header_str = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    let host = header_str(header::HOST.as_str())
        .or_else(|| uri.authority().map(|a| a.as_str()))
        .unwrap_or("localhost");
    let scheme = header_str("x-forwarded-proto")
        .and_then(|p| p.split(',').next())
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .unwrap_or("http");
    format!("{scheme}://{host}{path}")
}

// ---------------------------------------------------------------------------
// Bodies
// ---------------------------------------------------------------------------

/// Parses a JSON body. Anything unparseable is `400 invalid json`.
pub fn json_body<T: DeserializeOwned>(body: &[u8]) -> ApiResult<T> {
    serde_json::from_slice(body).map_err(|_| SettlementError::validation("invalid json").into())
}

/// Like [`json_body`], but an empty body means "all defaults".
pub fn optional_json_body<T: DeserializeOwned + Default>(body: &[u8]) -> ApiResult<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    json_body(body)
}

/// Validates a stream identity from request input. The message names the
/// offending field.
pub fn stream_identity(stream_pubkey: &str, stream_id: &str) -> ApiResult<StreamIdentity> {
    StreamIdentity::parse(stream_pubkey, stream_id)
        .map_err(|e| SettlementError::validation(e.to_string()).into())
}

// ---------------------------------------------------------------------------
// Session tokens
// ---------------------------------------------------------------------------

fn token_rejection(err: SessionTokenError) -> ApiError {
    tracing::debug!(error = %err, "session token rejected");
    match err {
        SessionTokenError::InvalidStream(_) => SettlementError::bad_scope("invalid session scope"),
        _ => SettlementError::bad_scope("invalid session token"),
    }
    .into()
}

pub fn tip_session(state: &AppState, token: &str) -> ApiResult<TipSession> {
    state.codec.verify_tip(token).map_err(token_rejection)
}

pub fn stake_session(state: &AppState, token: &str) -> ApiResult<StakeSession> {
    state.codec.verify_stake(token).map_err(token_rejection)
}
