use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Development-only signing secret. Deployments override it via
/// `PARLEY_SECRET_KEY` or the settings file.
const DEFAULT_SECRET_KEY: &str = "parley-dev-secret-change-me";

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ParleySettings {
    pub server: ServerSettings,
    pub database: DatabaseSettings,
    pub share: ShareSettings,
    pub rate_limit: RateLimitSettings,
    pub events: EventSettings,
    /// Long-lived HMAC secret for capability links.
    pub secret_key: String,
}

impl Default for ParleySettings {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            database: DatabaseSettings::default(),
            share: ShareSettings::default(),
            rate_limit: RateLimitSettings::default(),
            events: EventSettings::default(),
            secret_key: DEFAULT_SECRET_KEY.to_string(),
        }
    }
}

impl ParleySettings {
    pub fn validate(&self) -> Result<()> {
        if self.secret_key.len() < 16 {
            return Err(SettingsError::InvalidValue(
                "secretKey must be at least 16 bytes".into(),
            ));
        }
        if self.rate_limit.threshold == 0 {
            return Err(SettingsError::InvalidValue(
                "rateLimit.threshold must be positive".into(),
            ));
        }
        if self.rate_limit.window_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "rateLimit.windowMs must be positive".into(),
            ));
        }
        if self.share.expire_secs == 0 || self.share.key_ttl_secs == 0 {
            return Err(SettingsError::InvalidValue(
                "share expirations must be positive".into(),
            ));
        }
        if self.database.pool_size == 0 {
            return Err(SettingsError::InvalidValue(
                "database.poolSize must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn uses_default_secret(&self) -> bool {
        self.secret_key == DEFAULT_SECRET_KEY
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Public origin prepended to share URIs.
    pub public_base_url: String,
    /// How often expired documents are swept, in seconds.
    pub purge_interval_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            public_base_url: "http://localhost:8000/v1".to_string(),
            purge_interval_secs: 60,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DatabaseSettings {
    /// Database file; relative paths resolve under `~/.parley`.
    pub path: String,
    pub pool_size: u32,
    pub busy_timeout_ms: u32,
    pub cache_size_kib: i64,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: "database/parley.db".to_string(),
            pool_size: 16,
            busy_timeout_ms: 30_000,
            cache_size_kib: 8192,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ShareSettings {
    /// Route segment for share links.
    pub prefix: String,
    /// Lifetime of a shared copy, in seconds.
    pub expire_secs: u64,
    /// Idle lifetime of the symmetric key, refreshed on every use.
    pub key_ttl_secs: u64,
    /// Lifetime of email-verification and password-reset links.
    pub user_link_expire_secs: u64,
}

impl Default for ShareSettings {
    fn default() -> Self {
        Self {
            prefix: "share".to_string(),
            expire_secs: 3600,
            key_ttl_secs: 3600,
            user_link_expire_secs: 86_400,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RateLimitSettings {
    pub enabled: bool,
    /// Maximum summed weight admitted per window.
    pub threshold: u64,
    pub window_ms: u64,
    /// Weight per route template; unlisted routes weigh 1.
    pub route_weights: BTreeMap<String, u32>,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 25,
            window_ms: 60_000,
            route_weights: BTreeMap::from([("/v1/share/{class_name}/{id}/generate".to_string(), 5)]),
        }
    }
}

impl RateLimitSettings {
    pub fn weight_for(&self, route: &str) -> u32 {
        self.route_weights.get(route).copied().unwrap_or(1)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EventSettings {
    /// Per-channel broadcast buffer before slow listeners lag.
    pub channel_capacity: usize,
}

impl Default for EventSettings {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
        }
    }
}
