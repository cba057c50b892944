pub mod collection;
pub mod database;
pub mod documents;
pub mod error;
pub mod expiry;
pub mod keyvalue;
pub mod pubsub;
pub mod ratelimit;
pub mod row_helpers;
pub mod schema;
pub mod search;
pub mod sorted_set;

pub use collection::{Collection, NewUser, Singleton, UserAccounts};
pub use database::{ConnectionConfig, Database};
pub use documents::ObjectStore;
pub use error::{Result, StoreError};
pub use expiry::{purge_expired, PurgeStats};
pub use keyvalue::KeyValueStore;
pub use pubsub::{EventBus, Message, Subscription, STOP};
pub use ratelimit::{RateDecision, RateLimitConfig, RateLimiter};
pub use search::{ListQuery, Page, SearchIndex, Sort, SortField};
