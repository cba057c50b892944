use parley_core::{ApiError, ObjectClass};
use parley_store::StoreError;

/// Message for every failed verification, so callers cannot tell which
/// check rejected the link.
pub const INVALID_REQUEST: &str = "Invalid request";

#[derive(Debug, thiserror::Error)]
pub enum ShareError {
    #[error("signature mismatch")]
    InvalidSignature,

    #[error("encryption failed")]
    EncryptionFailed,

    #[error("decryption failed")]
    DecryptionFailed,

    #[error("invalid encoding")]
    InvalidEncoding,

    #[error("invalid key material")]
    InvalidKey,

    #[error("invalid link payload: {0}")]
    InvalidPayload(String),

    #[error("link issued for another purpose")]
    WrongPurpose,

    #[error("link expired")]
    LinkExpired,

    #[error("share lifetime must be at least one second")]
    InvalidTtl,

    #[error("{0} objects cannot be shared")]
    NotShareable(String),

    #[error("shared object not found or expired")]
    ShareExpired,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ShareError {
    pub fn not_shareable(class: Option<ObjectClass>) -> Self {
        Self::NotShareable(class.map_or("Share", ObjectClass::as_str).to_string())
    }
}

pub type Result<T> = std::result::Result<T, ShareError>;

impl From<ShareError> for ApiError {
    fn from(e: ShareError) -> Self {
        match e {
            ShareError::InvalidSignature
            | ShareError::DecryptionFailed
            | ShareError::InvalidEncoding
            | ShareError::InvalidPayload(_)
            | ShareError::WrongPurpose
            | ShareError::LinkExpired => ApiError::invalid_request(INVALID_REQUEST),
            ShareError::ShareExpired => ApiError::not_found("Shared object not found or expired"),
            ShareError::NotShareable(_) | ShareError::InvalidTtl => ApiError::invalid_request(e.to_string()),
            ShareError::EncryptionFailed | ShareError::InvalidKey => ApiError::internal(e.to_string()),
            ShareError::Store(inner) => inner.into(),
        }
    }
}
