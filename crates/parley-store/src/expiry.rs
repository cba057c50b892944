//! Background removal of lapsed documents, values and rate-limit ledgers.
//!
//! Reads already ignore expired rows, so the sweep only reclaims space.

use serde::Serialize;
use tracing::{debug, instrument};

use crate::database::Database;
use crate::documents::DocumentRepo;
use crate::error::Result;
use crate::keyvalue::KvRepo;
use crate::sorted_set::SortedSetRepo;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PurgeStats {
    pub documents: usize,
    pub values: usize,
    pub ledger_entries: usize,
}

impl PurgeStats {
    pub fn total(&self) -> usize {
        self.documents + self.values + self.ledger_entries
    }
}

#[instrument(skip(db))]
pub async fn purge_expired(db: &Database) -> Result<PurgeStats> {
    let stats = db
        .transaction(|conn, now| {
            Ok(PurgeStats {
                documents: DocumentRepo::purge_expired(conn, now)?,
                values: KvRepo::purge_expired(conn, now)?,
                ledger_entries: SortedSetRepo::purge_expired(conn, now)?,
            })
        })
        .await?;
    debug!(
        documents = stats.documents,
        values = stats.values,
        ledger_entries = stats.ledger_entries,
        "expired rows purged"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::keyvalue::KeyValueStore;
    use crate::ratelimit::{RateLimitConfig, RateLimiter};
    use parley_core::{ManualClock, Owner};

    #[tokio::test]
    async fn sweep_reclaims_lapsed_rows() {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let db = Database::in_memory(clock.clone()).unwrap();
        let kv = KeyValueStore::new(db.clone());
        kv.set("short", "v", Some(Duration::from_secs(5))).await.unwrap();
        kv.set("forever", "v", None).await.unwrap();
        let limiter = RateLimiter::new(db.clone(), RateLimitConfig::default());
        limiter.check(&Owner::new("u1").unwrap(), "r", 1).await.unwrap();

        assert_eq!(purge_expired(&db).await.unwrap(), PurgeStats::default());

        clock.advance(Duration::from_secs(61));
        let stats = purge_expired(&db).await.unwrap();
        assert_eq!(stats.values, 1);
        assert_eq!(stats.ledger_entries, 1);
        assert_eq!(stats.total(), 2);
        assert_eq!(kv.get("forever").await.unwrap().as_deref(), Some("v"));
    }
}
