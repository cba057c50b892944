//! Email-verification and password-reset links.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parley_core::Clock;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::{Result, ShareError};
use crate::secure_url::SecureUrl;
use crate::share::link_uri;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkPurpose {
    EmailVerification,
    PasswordReset,
}

impl LinkPurpose {
    /// Route segment the link is served under.
    pub fn path(self) -> &'static str {
        match self {
            Self::EmailVerification => "verify-email",
            Self::PasswordReset => "reset-password",
        }
    }
}

impl fmt::Display for LinkPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LinkClaims {
    user_id: u64,
    purpose: LinkPurpose,
    /// Milliseconds since the epoch.
    exp: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct UserLink {
    pub payload: String,
    pub signature: String,
    pub expire_time: DateTime<Utc>,
    pub uri: String,
}

pub struct CapabilityLinks {
    secure: SecureUrl,
    clock: Arc<dyn Clock>,
    public_base_url: String,
    ttl: Duration,
}

impl fmt::Debug for CapabilityLinks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityLinks")
            .field("public_base_url", &self.public_base_url)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl CapabilityLinks {
    pub fn new(secure: SecureUrl, clock: Arc<dyn Clock>, public_base_url: impl Into<String>, ttl: Duration) -> Self {
        Self {
            secure,
            clock,
            public_base_url: public_base_url.into(),
            ttl,
        }
    }

    #[instrument(skip(self))]
    pub async fn issue(&self, user_id: u64, purpose: LinkPurpose) -> Result<UserLink> {
        let exp = self.clock.now_ms().saturating_add(self.ttl.as_millis() as u64);
        let sealed = self
            .secure
            .seal(&LinkClaims {
                user_id,
                purpose,
                exp,
            })
            .await?;
        let expire_time = DateTime::from_timestamp_millis(exp as i64)
            .ok_or_else(|| ShareError::InvalidPayload(format!("expiry {exp} out of range")))?;
        let uri = link_uri(&self.public_base_url, purpose.path(), &sealed.payload, &sealed.signature);
        Ok(UserLink {
            payload: sealed.payload,
            signature: sealed.signature,
            expire_time,
            uri,
        })
    }

    /// The user the link was issued to, if it is intact, unexpired and for
    /// `purpose`.
    #[instrument(skip(self, payload, signature))]
    pub async fn redeem(&self, purpose: LinkPurpose, payload: &str, signature: &str) -> Result<u64> {
        let claims: LinkClaims = self.secure.open(payload, signature).await?;
        if claims.purpose != purpose {
            return Err(ShareError::WrongPurpose);
        }
        if self.clock.now_ms() >= claims.exp {
            debug!(user_id = claims.user_id, "link expired");
            return Err(ShareError::LinkExpired);
        }
        Ok(claims.user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::KeyStore;
    use assert_matches::assert_matches;
    use parley_core::ManualClock;
    use parley_store::{Database, KeyValueStore};
    use secrecy::SecretString;

    fn setup() -> (CapabilityLinks, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let db = Database::in_memory(clock.clone()).unwrap();
        let secure = SecureUrl::new(
            KeyStore::new(KeyValueStore::new(db), Duration::from_secs(3600)),
            SecretString::from("test-secret-key-0123456789".to_string()),
        );
        let links = CapabilityLinks::new(
            secure,
            clock.clone(),
            "http://localhost:8000/v1",
            Duration::from_secs(600),
        );
        (links, clock)
    }

    #[tokio::test]
    async fn issue_and_redeem() {
        let (links, _) = setup();
        let link = links.issue(42, LinkPurpose::EmailVerification).await.unwrap();
        assert!(link.uri.starts_with("http://localhost:8000/v1/verify-email/"));
        let user = links
            .redeem(LinkPurpose::EmailVerification, &link.payload, &link.signature)
            .await
            .unwrap();
        assert_eq!(user, 42);
    }

    #[tokio::test]
    async fn purpose_is_bound() {
        let (links, _) = setup();
        let link = links.issue(7, LinkPurpose::EmailVerification).await.unwrap();
        assert_matches!(
            links.redeem(LinkPurpose::PasswordReset, &link.payload, &link.signature).await,
            Err(ShareError::WrongPurpose)
        );
    }

    #[tokio::test]
    async fn lapsed_link_is_rejected() {
        let (links, clock) = setup();
        let link = links.issue(7, LinkPurpose::PasswordReset).await.unwrap();
        clock.advance(Duration::from_secs(600));
        assert_matches!(
            links.redeem(LinkPurpose::PasswordReset, &link.payload, &link.signature).await,
            Err(ShareError::LinkExpired)
        );
    }

    #[tokio::test]
    async fn forged_signature_is_rejected() {
        let (links, _) = setup();
        let link = links.issue(7, LinkPurpose::PasswordReset).await.unwrap();
        assert_matches!(
            links.redeem(LinkPurpose::PasswordReset, &link.payload, &"0".repeat(64)).await,
            Err(ShareError::InvalidSignature)
        );
    }
}
