//! Symmetric key material for link encryption.
//!
//! The active key lives in the store so every process serving links agrees
//! on it. Reading the key extends its lifetime; once it lapses unused, the
//! next read mints a replacement and older links stop decrypting.

use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chacha20poly1305::aead::{rand_core::RngCore, OsRng};
use parley_store::KeyValueStore;
use tracing::instrument;

use crate::error::{Result, ShareError};

pub const SHARE_KEY: &str = "crypto:share-key";
pub const KEY_LEN: usize = 32;

/// Generate a random 256-bit key.
pub fn generate_key() -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    OsRng.fill_bytes(&mut key);
    key
}

pub fn encode_key(key: &[u8; KEY_LEN]) -> String {
    URL_SAFE_NO_PAD.encode(key)
}

pub fn decode_key(encoded: &str) -> Result<[u8; KEY_LEN]> {
    let bytes = URL_SAFE_NO_PAD
        .decode(encoded.trim())
        .map_err(|_| ShareError::InvalidKey)?;
    bytes.try_into().map_err(|_| ShareError::InvalidKey)
}

#[derive(Clone, Debug)]
pub struct KeyStore {
    kv: KeyValueStore,
    ttl: Duration,
}

impl KeyStore {
    pub fn new(kv: KeyValueStore, ttl: Duration) -> Self {
        Self { kv, ttl }
    }

    /// The active key, created on first use.
    #[instrument(skip(self))]
    pub async fn current(&self) -> Result<[u8; KEY_LEN]> {
        let encoded = self
            .kv
            .get_or_insert_refreshing(SHARE_KEY, self.ttl, || encode_key(&generate_key()))
            .await?;
        decode_key(&encoded)
    }
}
