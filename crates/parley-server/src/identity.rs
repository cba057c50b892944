//! Caller identity.
//!
//! Token issuance lives in front of this service; by the time a request
//! arrives the authenticated user id is carried in [`USER_HEADER`].

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use parley_core::{ApiError, Owner};

use crate::error::AppError;

pub const USER_HEADER: &str = "x-user-id";

/// The authenticated caller. Rejects with 401 when absent or malformed.
#[derive(Clone, Debug)]
pub struct Identity(pub Owner);

impl Identity {
    pub fn from_headers(headers: &HeaderMap) -> Option<Owner> {
        let raw = headers.get(USER_HEADER)?.to_str().ok()?;
        Owner::new(raw.trim()).ok()
    }
}

impl<S: Send + Sync> FromRequestParts<S> for Identity {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Self::from_headers(&parts.headers)
            .map(Identity)
            .ok_or_else(|| ApiError::unauthorized("Missing or invalid user identity").into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn reads_user_header() {
        let mut headers = HeaderMap::new();
        assert!(Identity::from_headers(&headers).is_none());
        headers.insert(USER_HEADER, HeaderValue::from_static("u1"));
        assert_eq!(Identity::from_headers(&headers).unwrap().as_str(), "u1");
        headers.insert(USER_HEADER, HeaderValue::from_static("u1:admin"));
        assert!(Identity::from_headers(&headers).is_none());
    }
}
