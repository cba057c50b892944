//! Sliding-window admission control over weighted sorted-set ledgers.
//!
//! Each `(owner, route)` pair owns a ledger of calls scored by their arrival
//! time in milliseconds. A check purges entries that fell out of the window,
//! records the new call, reads the survivors back and refreshes the ledger's
//! idle expiration, all in one transaction. The caller is limited when the
//! summed weight exceeds the threshold. Storage failures are errors, never an
//! implicit admission.

use std::time::Duration;

use parley_core::Owner;
use serde::Serialize;
use tracing::{debug, instrument};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::sorted_set::SortedSetRepo;

#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    /// Maximum summed weight admitted within one window.
    pub threshold: u64,
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            threshold: 25,
            window: Duration::from_millis(60_000),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct RateDecision {
    pub admitted: bool,
    /// Summed weight in the window, this call included.
    pub score: u64,
}

#[derive(Clone, Debug)]
pub struct RateLimiter {
    db: Database,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(db: Database, config: RateLimitConfig) -> Self {
        Self { db, config }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    pub fn ledger_key(owner: &Owner, route: &str) -> String {
        format!("ratelimit:{owner}:{route}")
    }

    #[instrument(skip(self), fields(owner = %owner))]
    pub async fn check(&self, owner: &Owner, route: &str, weight: u32) -> Result<RateDecision> {
        let key = Self::ledger_key(owner, route);
        let window_ms = self.config.window.as_millis() as u64;
        let threshold = self.config.threshold;
        let nonce: u64 = rand::random();

        let decision = self
            .db
            .transaction(move |conn, now| {
                let _ = SortedSetRepo::purge_if_expired(conn, &key, now)?;
                let cutoff = now.saturating_sub(window_ms) as i64;
                let _ = SortedSetRepo::remove_range_by_score(conn, &key, i64::MIN, cutoff)?;

                let member = format!("{now}:{nonce:016x}:{weight}");
                let _ = SortedSetRepo::add(conn, &key, &member, now as i64)?;

                let mut score = 0u64;
                for (member, _) in SortedSetRepo::range(conn, &key)? {
                    score += member_weight(&member)?;
                }
                SortedSetRepo::expire(conn, &key, now.saturating_add(window_ms))?;

                Ok(RateDecision {
                    admitted: score <= threshold,
                    score,
                })
            })
            .await?;

        debug!(admitted = decision.admitted, score = decision.score, "rate limit check");
        Ok(decision)
    }
}

fn member_weight(member: &str) -> Result<u64> {
    member
        .rsplit_once(':')
        .and_then(|(_, weight)| weight.parse().ok())
        .ok_or_else(|| StoreError::CorruptRow {
            table: "sorted_set_members",
            column: "member",
            detail: format!("no weight in ledger entry {member:?}"),
        })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use assert_matches::assert_matches;
    use parley_core::ManualClock;

    fn setup() -> (RateLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let db = Database::in_memory(clock.clone()).unwrap();
        (RateLimiter::new(db, RateLimitConfig::default()), clock)
    }

    fn owner(id: &str) -> Owner {
        Owner::new(id).unwrap()
    }

    #[tokio::test]
    async fn twenty_sixth_call_is_denied() {
        let (limiter, _) = setup();
        let u1 = owner("u1");
        for i in 1..=25 {
            let decision = limiter.check(&u1, "/v1/chat", 1).await.unwrap();
            assert!(decision.admitted, "call {i}");
            assert_eq!(decision.score, i);
        }
        let decision = limiter.check(&u1, "/v1/chat", 1).await.unwrap();
        assert!(!decision.admitted);
        assert_eq!(decision.score, 26);
    }

    #[tokio::test]
    async fn window_slides_open_again() {
        let (limiter, clock) = setup();
        let u1 = owner("u1");
        for _ in 0..26 {
            limiter.check(&u1, "/v1/chat", 1).await.unwrap();
        }
        clock.advance(Duration::from_secs(61));
        let decision = limiter.check(&u1, "/v1/chat", 1).await.unwrap();
        assert!(decision.admitted);
        assert_eq!(decision.score, 1);
    }

    #[tokio::test]
    async fn entries_leave_individually() {
        let (limiter, clock) = setup();
        let u1 = owner("u1");
        for _ in 0..20 {
            limiter.check(&u1, "r", 1).await.unwrap();
        }
        clock.advance(Duration::from_secs(30));
        for _ in 0..5 {
            limiter.check(&u1, "r", 1).await.unwrap();
        }
        // first burst is now exactly one window old
        clock.advance(Duration::from_secs(30));
        let decision = limiter.check(&u1, "r", 1).await.unwrap();
        assert_eq!(decision.score, 6);
    }

    #[tokio::test]
    async fn weights_accumulate() {
        let (limiter, _) = setup();
        let u1 = owner("u1");
        for _ in 0..5 {
            assert!(limiter.check(&u1, "gen", 5).await.unwrap().admitted);
        }
        let decision = limiter.check(&u1, "gen", 1).await.unwrap();
        assert!(!decision.admitted);
        assert_eq!(decision.score, 26);
    }

    #[tokio::test]
    async fn ledgers_are_per_owner_and_route() {
        let (limiter, _) = setup();
        for _ in 0..30 {
            limiter.check(&owner("u1"), "a", 1).await.unwrap();
        }
        assert!(limiter.check(&owner("u2"), "a", 1).await.unwrap().admitted);
        assert!(limiter.check(&owner("u1"), "b", 1).await.unwrap().admitted);
    }

    #[tokio::test]
    async fn same_millisecond_calls_are_not_merged() {
        let (limiter, _) = setup();
        let u1 = owner("u1");
        limiter.check(&u1, "r", 3).await.unwrap();
        let decision = limiter.check(&u1, "r", 3).await.unwrap();
        assert_eq!(decision.score, 6);
    }

    #[tokio::test]
    async fn storage_failure_is_an_error() {
        let (limiter, _) = setup();
        limiter.db.shutdown().unwrap();
        assert_matches!(
            limiter.check(&owner("u1"), "r", 1).await,
            Err(StoreError::Closed)
        );
    }

    #[test]
    fn member_weight_parses_suffix() {
        assert_eq!(member_weight("1700:00ff:7").unwrap(), 7);
        assert!(member_weight("garbage").is_err());
    }
}
