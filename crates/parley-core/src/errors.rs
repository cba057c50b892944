use serde::{Deserialize, Serialize};

use crate::keys::KeyError;

/// Failure classes every layer reports through [`ApiError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    InvalidRequest,
    Unauthorized,
    IndexNotImplemented,
    RateLimited,
    UnregisteredClass,
    StorageTransactionFailed,
    Internal,
}

impl ErrorKind {
    /// Short classification string for logging.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::AlreadyExists => "already_exists",
            Self::InvalidRequest => "invalid_request",
            Self::Unauthorized => "unauthorized",
            Self::IndexNotImplemented => "index_not_implemented",
            Self::RateLimited => "rate_limited",
            Self::UnregisteredClass => "unregistered_class",
            Self::StorageTransactionFailed => "storage_transaction_failed",
            Self::Internal => "internal",
        }
    }

    pub fn http_status(self) -> u16 {
        match self {
            Self::NotFound | Self::UnregisteredClass => 404,
            Self::AlreadyExists => 409,
            Self::InvalidRequest => 400,
            Self::Unauthorized => 401,
            Self::IndexNotImplemented => 501,
            Self::RateLimited => 429,
            Self::StorageTransactionFailed | Self::Internal => 500,
        }
    }

    /// Whether the caller, not the server, is at fault.
    pub fn is_client_error(self) -> bool {
        (400..500).contains(&self.http_status())
    }
}

/// The one structured error surfaced to callers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct ApiError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidRequest, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthorized, message)
    }

    pub fn rate_limited() -> Self {
        Self::new(ErrorKind::RateLimited, "Too many requests")
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

impl From<KeyError> for ApiError {
    fn from(e: KeyError) -> Self {
        match e {
            KeyError::UnregisteredClass(_) => Self::new(ErrorKind::UnregisteredClass, e.to_string()),
            _ => Self::invalid_request(e.to_string()),
        }
    }
}
