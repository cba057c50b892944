//! String values with optional expiration.

use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::instrument;

use crate::database::Database;
use crate::documents::ms;
use crate::error::Result;

pub struct KvRepo;

impl KvRepo {
    pub fn purge_if_expired(conn: &Connection, key: &str, now: u64) -> Result<bool> {
        let removed = conn.execute(
            "DELETE FROM kv WHERE key = ?1 AND expires_at IS NOT NULL AND expires_at <= ?2",
            params![key, ms(now)],
        )?;
        Ok(removed > 0)
    }

    pub fn get(conn: &Connection, key: &str, now: u64) -> Result<Option<String>> {
        Ok(conn
            .query_row(
                "SELECT value FROM kv WHERE key = ?1 AND (expires_at IS NULL OR expires_at > ?2)",
                params![key, ms(now)],
                |row| row.get(0),
            )
            .optional()?)
    }

    pub fn set(conn: &Connection, key: &str, value: &str, expires_at: Option<u64>) -> Result<()> {
        conn.execute(
            "INSERT INTO kv (key, value, expires_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
            params![key, value, expires_at.map(ms)],
        )?;
        Ok(())
    }

    pub fn set_if_absent(
        conn: &Connection,
        key: &str,
        value: &str,
        expires_at: Option<u64>,
        now: u64,
    ) -> Result<bool> {
        let _ = Self::purge_if_expired(conn, key, now)?;
        let inserted = conn.execute(
            "INSERT INTO kv (key, value, expires_at) VALUES (?1, ?2, ?3) ON CONFLICT(key) DO NOTHING",
            params![key, value, expires_at.map(ms)],
        )?;
        Ok(inserted == 1)
    }

    pub fn expire(conn: &Connection, key: &str, expires_at: u64) -> Result<bool> {
        let updated = conn.execute(
            "UPDATE kv SET expires_at = ?2 WHERE key = ?1",
            params![key, ms(expires_at)],
        )?;
        Ok(updated == 1)
    }

    pub fn delete(conn: &Connection, key: &str) -> Result<bool> {
        Ok(conn.execute("DELETE FROM kv WHERE key = ?1", [key])? == 1)
    }

    pub fn purge_expired(conn: &Connection, now: u64) -> Result<usize> {
        Ok(conn.execute(
            "DELETE FROM kv WHERE expires_at IS NOT NULL AND expires_at <= ?1",
            [ms(now)],
        )?)
    }
}

#[derive(Clone, Debug)]
pub struct KeyValueStore {
    db: Database,
}

impl KeyValueStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self))]
    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_string();
        self.db.call(move |conn, now| KvRepo::get(conn, &key, now)).await
    }

    #[instrument(skip(self, value))]
    pub async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let key = key.to_string();
        let value = value.to_string();
        self.db
            .transaction(move |conn, now| {
                let expires_at = ttl.map(|ttl| now.saturating_add(ttl.as_millis() as u64));
                KvRepo::set(conn, &key, &value, expires_at)
            })
            .await
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let key = key.to_string();
        self.db.transaction(move |conn, _| KvRepo::delete(conn, &key)).await
    }

    /// Read `key` and push its expiration out by `ttl`; if it is absent, store
    /// the value produced by `make` with that expiration. One transaction.
    #[instrument(skip(self, make))]
    pub async fn get_or_insert_refreshing<F>(&self, key: &str, ttl: Duration, make: F) -> Result<String>
    where
        F: FnOnce() -> String + Send + 'static,
    {
        let key = key.to_string();
        let ttl_ms = ttl.as_millis() as u64;
        self.db
            .transaction(move |conn, now| {
                let expires_at = now.saturating_add(ttl_ms);
                if let Some(value) = KvRepo::get(conn, &key, now)? {
                    let _ = KvRepo::expire(conn, &key, expires_at)?;
                    return Ok(value);
                }
                let value = make();
                KvRepo::set(conn, &key, &value, Some(expires_at))?;
                Ok(value)
            })
            .await
    }
}
