//! Ordered sets of `(member, score)` with whole-key expiration.

use rusqlite::{params, Connection};

use crate::documents::ms;
use crate::error::Result;
use crate::row_helpers;

pub struct SortedSetRepo;

impl SortedSetRepo {
    /// Drop every member of `key` if the key's TTL has lapsed.
    pub fn purge_if_expired(conn: &Connection, key: &str, now: u64) -> Result<bool> {
        let expired = conn.execute(
            "DELETE FROM key_expirations WHERE key = ?1 AND expires_at <= ?2",
            params![key, ms(now)],
        )?;
        if expired == 0 {
            return Ok(false);
        }
        conn.execute("DELETE FROM sorted_set_members WHERE key = ?1", [key])?;
        Ok(true)
    }

    pub fn add(conn: &Connection, key: &str, member: &str, score: i64) -> Result<bool> {
        let inserted = conn.execute(
            "INSERT INTO sorted_set_members (key, member, score) VALUES (?1, ?2, ?3)
             ON CONFLICT(key, member) DO UPDATE SET score = excluded.score",
            params![key, member, score],
        )?;
        Ok(inserted == 1)
    }

    /// Remove members whose score lies in `[min, max]`.
    pub fn remove_range_by_score(conn: &Connection, key: &str, min: i64, max: i64) -> Result<usize> {
        Ok(conn.execute(
            "DELETE FROM sorted_set_members WHERE key = ?1 AND score BETWEEN ?2 AND ?3",
            params![key, min, max],
        )?)
    }

    /// All members in ascending score order.
    pub fn range(conn: &Connection, key: &str) -> Result<Vec<(String, i64)>> {
        let mut stmt = conn.prepare_cached(
            "SELECT member, score FROM sorted_set_members WHERE key = ?1 ORDER BY score, member",
        )?;
        let mut rows = stmt.query([key])?;
        let mut members = Vec::new();
        while let Some(row) = rows.next()? {
            members.push((
                row_helpers::get(row, 0, "sorted_set_members", "member")?,
                row_helpers::get(row, 1, "sorted_set_members", "score")?,
            ));
        }
        Ok(members)
    }

    pub fn expire(conn: &Connection, key: &str, expires_at: u64) -> Result<()> {
        conn.execute(
            "INSERT INTO key_expirations (key, expires_at) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET expires_at = excluded.expires_at",
            params![key, ms(expires_at)],
        )?;
        Ok(())
    }

    pub fn purge_expired(conn: &Connection, now: u64) -> Result<usize> {
        let members = conn.execute(
            "DELETE FROM sorted_set_members WHERE key IN
                 (SELECT key FROM key_expirations WHERE expires_at <= ?1)",
            [ms(now)],
        )?;
        conn.execute("DELETE FROM key_expirations WHERE expires_at <= ?1", [ms(now)])?;
        Ok(members)
    }
}
