use std::sync::Arc;
use std::time::Duration;

use parley_core::models::{Chat, CompletionParameters, Prompt, PromptTemplate, UserProfile};
use parley_settings::{ParleySettings, RateLimitSettings};
use parley_share::{CapabilityLinks, KeyStore, SecureUrl, ShareConfig, ShareService};
use parley_store::{
    Collection, Database, EventBus, KeyValueStore, ObjectStore, RateLimitConfig, RateLimiter, Singleton,
    StoreError, UserAccounts,
};
use secrecy::SecretString;

/// Everything a handler can reach, built once at startup.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub chats: Collection<Chat>,
    pub prompts: Collection<Prompt>,
    pub templates: Collection<PromptTemplate>,
    pub parameters: Collection<CompletionParameters>,
    pub profiles: Singleton<UserProfile>,
    pub accounts: UserAccounts,
    pub shares: ShareService,
    pub links: Arc<CapabilityLinks>,
    pub limiter: RateLimiter,
    pub rate_limit: Arc<RateLimitSettings>,
    pub events: EventBus,
}

impl AppState {
    pub fn new(db: Database, settings: &ParleySettings) -> Result<Self, StoreError> {
        let events = EventBus::new(settings.events.channel_capacity);
        let secure = SecureUrl::new(
            KeyStore::new(
                KeyValueStore::new(db.clone()),
                Duration::from_secs(settings.share.key_ttl_secs),
            ),
            SecretString::from(settings.secret_key.clone()),
        );
        let shares = ShareService::new(
            ObjectStore::new(db.clone()),
            secure.clone(),
            ShareConfig {
                expire: Duration::from_secs(settings.share.expire_secs),
                public_base_url: settings.server.public_base_url.clone(),
                prefix: settings.share.prefix.clone(),
            },
        );
        let links = CapabilityLinks::new(
            secure,
            db.clock().clone(),
            settings.server.public_base_url.clone(),
            Duration::from_secs(settings.share.user_link_expire_secs),
        );
        let limiter = RateLimiter::new(
            db.clone(),
            RateLimitConfig {
                threshold: settings.rate_limit.threshold,
                window: Duration::from_millis(settings.rate_limit.window_ms),
            },
        );

        Ok(Self {
            chats: Collection::new(db.clone())?.with_events(events.clone()),
            prompts: Collection::new(db.clone())?.with_events(events.clone()),
            templates: Collection::new(db.clone())?.with_events(events.clone()),
            parameters: Collection::new(db.clone())?.with_events(events.clone()),
            profiles: Singleton::new(db.clone())?.with_events(events.clone()),
            accounts: UserAccounts::new(db.clone()),
            shares,
            links: Arc::new(links),
            limiter,
            rate_limit: Arc::new(settings.rate_limit.clone()),
            events,
            db,
        })
    }
}
