//! Conversion of every failure into one JSON error response.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use parley_core::{ApiError, ErrorKind, KeyError, TemplateError};
use parley_share::ShareError;
use parley_store::StoreError;
use tracing::{error, warn};

/// Handler error. The body is `{"kind": .., "message": ..}`.
#[derive(Debug)]
pub struct AppError(pub ApiError);

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        self.0.kind
    }
}

impl From<ApiError> for AppError {
    fn from(e: ApiError) -> Self {
        Self(e)
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        Self(e.into())
    }
}

impl From<KeyError> for AppError {
    fn from(e: KeyError) -> Self {
        Self(e.into())
    }
}

impl From<TemplateError> for AppError {
    fn from(e: TemplateError) -> Self {
        Self(e.into())
    }
}

impl From<ShareError> for AppError {
    fn from(e: ShareError) -> Self {
        Self(e.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.kind.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!(kind = self.0.kind.as_str(), message = %self.0.message, "request failed");
        } else {
            warn!(kind = self.0.kind.as_str(), message = %self.0.message, "request rejected");
        }
        (status, Json(self.0)).into_response()
    }
}

pub type ApiResult<T> = Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind listener: {0}")]
    Bind(#[from] std::io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_kind() {
        let cases = [
            (StoreError::NotFound("Chat:u1:1".into()), StatusCode::NOT_FOUND),
            (StoreError::AlreadyExists("UserProfile:u1".into()), StatusCode::CONFLICT),
            (
                StoreError::IndexNotImplemented(parley_core::ObjectClass::Chat),
                StatusCode::NOT_IMPLEMENTED,
            ),
            (StoreError::Transaction("disk I/O error".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).into_response().status(), status);
        }
    }

    #[test]
    fn share_failures_are_bad_requests() {
        let resp = AppError::from(ShareError::InvalidSignature).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
