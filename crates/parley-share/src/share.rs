//! Time-boxed sharing of private objects.
//!
//! Generating a share copies the object under a random `Share:{token}` key
//! that expires on its own, then seals `{token}` into a link. Resolving a
//! link reads the copy, never the original.

use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use parley_core::{Envelope, Key};
use parley_store::{ObjectStore, StoreError};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::error::{Result, ShareError};
use crate::secure_url::SecureUrl;

const TOKEN_BYTES: usize = 32;

#[derive(Clone, Debug)]
pub struct ShareConfig {
    pub expire: Duration,
    /// Prefix of every link, e.g. `http://localhost:8000/v1`.
    pub public_base_url: String,
    /// Path segment between the base URL and the sealed payload.
    pub prefix: String,
}

impl Default for ShareConfig {
    fn default() -> Self {
        Self {
            expire: Duration::from_secs(3600),
            public_base_url: "http://localhost:8000/v1".into(),
            prefix: "share".into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareLink {
    pub payload: String,
    pub signature: String,
    pub expire_time: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub uri: String,
}

#[derive(Serialize, Deserialize)]
struct ShareClaims {
    token: String,
}

fn new_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

pub(crate) fn link_uri(base: &str, prefix: &str, payload: &str, signature: &str) -> String {
    format!("{}/{prefix}/{payload}/{signature}", base.trim_end_matches('/'))
}

#[derive(Clone, Debug)]
pub struct ShareService {
    store: ObjectStore,
    secure: SecureUrl,
    config: ShareConfig,
}

impl ShareService {
    pub fn new(store: ObjectStore, secure: SecureUrl, config: ShareConfig) -> Self {
        Self {
            store,
            secure,
            config,
        }
    }

    pub fn config(&self) -> &ShareConfig {
        &self.config
    }

    /// Copy `source` under a fresh token and seal a link to the copy. The
    /// copy lives for `ttl`, or the configured lifetime when `None`.
    #[instrument(skip(self), fields(source = %source))]
    pub async fn generate(&self, source: &Key, ttl: Option<Duration>) -> Result<ShareLink> {
        match source.class() {
            Some(class) if class.shareable() => {}
            other => return Err(ShareError::not_shareable(other)),
        }
        let ttl = ttl.unwrap_or(self.config.expire);
        if ttl < Duration::from_secs(1) {
            return Err(ShareError::InvalidTtl);
        }

        let token = new_token();
        let dest = Key::share(token.clone()).map_err(StoreError::from)?;
        let created_at = self.store.database().clock().now();
        if !self.store.copy(source, &dest, ttl).await? {
            return Err(StoreError::AlreadyExists(dest.to_string()).into());
        }

        let sealed = self.secure.seal(&ShareClaims { token }).await?;
        let expire = chrono::Duration::from_std(ttl)
            .map_err(|e| ShareError::InvalidPayload(e.to_string()))?;
        let uri = link_uri(
            &self.config.public_base_url,
            &self.config.prefix,
            &sealed.payload,
            &sealed.signature,
        );
        info!(ttl_secs = ttl.as_secs(), "share generated");
        Ok(ShareLink {
            payload: sealed.payload,
            signature: sealed.signature,
            expire_time: created_at + expire,
            created_at,
            uri,
        })
    }

    /// The shared copy behind a link.
    #[instrument(skip_all)]
    pub async fn resolve(&self, payload: &str, signature: &str) -> Result<Envelope> {
        let claims: ShareClaims = self.secure.open(payload, signature).await?;
        let key = Key::share(claims.token)
            .map_err(|e| ShareError::InvalidPayload(e.to_string()))?;
        match self.store.get(&key).await {
            Ok(env) => Ok(env),
            Err(StoreError::NotFound(_)) => Err(ShareError::ShareExpired),
            Err(e) => Err(e.into()),
        }
    }
}
