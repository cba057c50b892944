//! Encrypt-then-sign transport for small JSON claims.
//!
//! A sealed claim travels as two URL segments: the unpadded base64url of
//! `nonce || ciphertext`, and a hex HMAC-SHA256 of that text. Opening checks
//! the HMAC in constant time before anything is decrypted.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chacha20poly1305::aead::{rand_core::RngCore, Aead, KeyInit, OsRng};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::debug;

use crate::error::{Result, ShareError};
use crate::keys::{KeyStore, KEY_LEN};

const NONCE_LEN: usize = 12;

type HmacSha256 = Hmac<Sha256>;

/// Encrypt `plaintext`, returning base64url `nonce || ciphertext`.
pub fn encrypt(plaintext: &[u8], key: &[u8; KEY_LEN]) -> Result<String> {
    let cipher = ChaCha20Poly1305::new(key.into());
    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| ShareError::EncryptionFailed)?;

    let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    combined.extend_from_slice(&nonce_bytes);
    combined.extend_from_slice(&ciphertext);
    Ok(URL_SAFE_NO_PAD.encode(combined))
}

pub fn decrypt(encoded: &str, key: &[u8; KEY_LEN]) -> Result<Vec<u8>> {
    let combined = URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|_| ShareError::InvalidEncoding)?;
    if combined.len() < NONCE_LEN {
        return Err(ShareError::InvalidEncoding);
    }
    let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);
    ChaCha20Poly1305::new(key.into())
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| ShareError::DecryptionFailed)
}

/// A sealed claim ready to be placed in a URL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sealed {
    pub payload: String,
    pub signature: String,
}

#[derive(Clone)]
pub struct SecureUrl {
    keys: KeyStore,
    secret: SecretString,
}

impl std::fmt::Debug for SecureUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureUrl").field("keys", &self.keys).finish_non_exhaustive()
    }
}

impl SecureUrl {
    pub fn new(keys: KeyStore, secret: SecretString) -> Self {
        Self { keys, secret }
    }

    fn mac(&self) -> Result<HmacSha256> {
        <HmacSha256 as Mac>::new_from_slice(self.secret.expose_secret().as_bytes())
            .map_err(|_| ShareError::InvalidKey)
    }

    /// Hex HMAC-SHA256 over the payload text.
    pub fn sign(&self, payload: &str) -> Result<String> {
        let mut mac = self.mac()?;
        mac.update(payload.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    pub fn verify(&self, payload: &str, signature: &str) -> Result<()> {
        let given = hex::decode(signature).map_err(|_| ShareError::InvalidSignature)?;
        let mut mac = self.mac()?;
        mac.update(payload.as_bytes());
        let expected = mac.finalize().into_bytes();
        if given.len() != expected.len() || !bool::from(expected.as_slice().ct_eq(&given)) {
            return Err(ShareError::InvalidSignature);
        }
        Ok(())
    }

    pub async fn seal<T: Serialize>(&self, claims: &T) -> Result<Sealed> {
        let key = self.keys.current().await?;
        let plaintext =
            serde_json::to_vec(claims).map_err(|e| ShareError::InvalidPayload(e.to_string()))?;
        let payload = encrypt(&plaintext, &key)?;
        let signature = self.sign(&payload)?;
        Ok(Sealed { payload, signature })
    }

    /// Verify, then decrypt and parse. Nothing is decrypted unless the
    /// signature matches.
    pub async fn open<T: DeserializeOwned>(&self, payload: &str, signature: &str) -> Result<T> {
        if let Err(e) = self.verify(payload, signature) {
            debug!("rejected link with bad signature");
            return Err(e);
        }
        let key = self.keys.current().await?;
        let plaintext = decrypt(payload, &key)?;
        serde_json::from_slice(&plaintext).map_err(|e| ShareError::InvalidPayload(e.to_string()))
    }
}
