//! HTTP error rendering.
//!
//! Failures go back as `text/plain` bodies carrying the same messages
//! clients already match on (`missing NIP-98 auth`, `invalid session token`,
//! `xmr stake refund error (...)`), with the status from the error taxonomy.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};

use dstream_escrow::EscrowError;
use dstream_protocol::{AuthError, SettlementError};

/// A request failure, ready to render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    fn from_code(code: u16, message: String) -> Self {
        Self::new(
            StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            message,
        )
    }
}

impl From<SettlementError> for ApiError {
    fn from(err: SettlementError) -> Self {
        Self::from_code(err.status(), err.to_string())
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        SettlementError::from(err).into()
    }
}

impl From<EscrowError> for ApiError {
    fn from(err: EscrowError) -> Self {
        Self::from_code(err.status(), err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::warn!(status = self.status.as_u16(), error = %self.message, "request failed");
        } else {
            tracing::debug!(status = self.status.as_u16(), error = %self.message, "request rejected");
        }
        (
            self.status,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            self.message,
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dstream_protocol::wallet::WalletRpcError;

    #[test]
    fn maps_taxonomy() {
        let e = ApiError::from(AuthError::Stale);
        assert_eq!(e.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(e.message(), "stale NIP-98 auth");

        let e = ApiError::from(SettlementError::upstream(
            "tip verify",
            WalletRpcError::Transport("connection refused".into()),
        ));
        assert_eq!(e.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            e.message(),
            "xmr tip verify error (wallet rpc transport: connection refused)"
        );

        let e = ApiError::from(SettlementError::denied(409, "slash_window", "wait"));
        assert_eq!(e.status(), StatusCode::CONFLICT);

        let e = ApiError::from(EscrowError::NotFound);
        assert_eq!(e.status(), StatusCode::NOT_FOUND);
        assert_eq!(e.message(), "session not found");
    }
}
