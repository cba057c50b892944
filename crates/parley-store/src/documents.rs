//! Document repository and the async object store built on it.
//!
//! [`DocumentRepo`] holds the single-statement building blocks; each takes a
//! plain `&Connection` so several can be composed inside one transaction.
//! [`ObjectStore`] wraps every logical operation in exactly one
//! `BEGIN IMMEDIATE` transaction.

use std::time::Duration;

use parley_core::{Datetime, Envelope, Key, ObjectClass};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::row_helpers::parse_envelope;

pub(crate) fn ms(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn stamp(now: u64) -> Result<String> {
    Ok(serde_json::to_string(&Datetime::from_millis(now))?)
}

/// JSON path of a field inside the payload, e.g. `messages` -> `$.object.messages`.
pub fn payload_path(field: &str) -> Result<String> {
    let valid = !field.is_empty()
        && field.split('.').all(|segment| {
            let mut chars = segment.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        });
    if !valid {
        return Err(StoreError::InvalidRequest(format!("invalid field path: {field:?}")));
    }
    Ok(format!("$.object.{field}"))
}

/// Stateless document operations over a connection or open transaction.
pub struct DocumentRepo;

impl DocumentRepo {
    /// Drop `key` if its TTL has lapsed. Returns whether a row was removed.
    pub fn purge_if_expired(conn: &Connection, key: &str, now: u64) -> Result<bool> {
        let removed = conn.execute(
            "DELETE FROM documents WHERE key = ?1 AND expires_at IS NOT NULL AND expires_at <= ?2",
            params![key, ms(now)],
        )?;
        Ok(removed > 0)
    }

    pub fn insert_if_absent(
        conn: &Connection,
        key: &Key,
        doc: &str,
        expires_at: Option<u64>,
        now: u64,
    ) -> Result<bool> {
        let key_str = key.to_string();
        let _ = Self::purge_if_expired(conn, &key_str, now)?;
        let inserted = conn.execute(
            "INSERT INTO documents (key, class_name, doc, expires_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(key) DO NOTHING",
            params![key_str, key.namespace(), doc, expires_at.map(ms)],
        )?;
        Ok(inserted == 1)
    }

    pub fn get(conn: &Connection, key: &str, now: u64) -> Result<Option<Envelope>> {
        let raw: Option<String> = conn
            .query_row(
                "SELECT doc FROM documents
                 WHERE key = ?1 AND (expires_at IS NULL OR expires_at > ?2)",
                params![key, ms(now)],
                |row| row.get(0),
            )
            .optional()?;
        raw.as_deref().map(parse_envelope).transpose()
    }

    /// Overwrite `object` and refresh `updated_at` in one statement.
    pub fn replace_payload(conn: &Connection, key: &str, payload: &Value, now: u64) -> Result<bool> {
        let _ = Self::purge_if_expired(conn, key, now)?;
        let updated = conn.execute(
            "UPDATE documents SET doc = json_set(doc, '$.object', json(?2), '$.updated_at', json(?3))
             WHERE key = ?1",
            params![key, payload.to_string(), stamp(now)?],
        )?;
        Ok(updated == 1)
    }

    /// Length of the array at `path`, failing NotFound when the key is absent
    /// or the path does not name an array.
    pub fn array_len(conn: &Connection, key: &str, path: &str, now: u64) -> Result<usize> {
        let _ = Self::purge_if_expired(conn, key, now)?;
        let row: Option<(Option<String>, Option<i64>)> = conn
            .query_row(
                "SELECT json_type(doc, ?2), json_array_length(doc, ?2) FROM documents WHERE key = ?1",
                params![key, path],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        match row {
            None => Err(StoreError::NotFound(key.to_string())),
            Some((Some(kind), Some(len))) if kind == "array" => Ok(len as usize),
            Some(_) => Err(StoreError::NotFound(format!("{key} {path}"))),
        }
    }

    pub fn append(conn: &Connection, key: &str, path: &str, item: &Value, now: u64) -> Result<usize> {
        let len = Self::array_len(conn, key, path, now)?;
        conn.execute(
            "UPDATE documents
             SET doc = json_set(json_insert(doc, ?2, json(?3)), '$.updated_at', json(?4))
             WHERE key = ?1",
            params![key, format!("{path}[#]"), item.to_string(), stamp(now)?],
        )?;
        Ok(len + 1)
    }

    pub fn replace_element(
        conn: &Connection,
        key: &str,
        path: &str,
        index: usize,
        item: &Value,
        now: u64,
    ) -> Result<()> {
        let len = Self::array_len(conn, key, path, now)?;
        if index >= len {
            return Err(StoreError::NotFound(format!("{key} {path}[{index}]")));
        }
        conn.execute(
            "UPDATE documents SET doc = json_set(doc, ?2, json(?3), '$.updated_at', json(?4))
             WHERE key = ?1",
            params![key, format!("{path}[{index}]"), item.to_string(), stamp(now)?],
        )?;
        Ok(())
    }

    pub fn delete(conn: &Connection, key: &str, now: u64) -> Result<bool> {
        let _ = Self::purge_if_expired(conn, key, now)?;
        let removed = conn.execute("DELETE FROM documents WHERE key = ?1", [key])?;
        Ok(removed == 1)
    }

    /// Duplicate `src` under `dest` unless `dest` already exists.
    pub fn copy(
        conn: &Connection,
        src: &str,
        dest: &Key,
        expires_at: Option<u64>,
        now: u64,
    ) -> Result<bool> {
        let dest_str = dest.to_string();
        let _ = Self::purge_if_expired(conn, src, now)?;
        let _ = Self::purge_if_expired(conn, &dest_str, now)?;
        let copied = conn.execute(
            "INSERT INTO documents (key, class_name, doc, expires_at)
             SELECT ?1, ?2, doc, ?3 FROM documents WHERE key = ?4
             ON CONFLICT(key) DO NOTHING",
            params![dest_str, dest.namespace(), expires_at.map(ms), src],
        )?;
        if copied == 1 {
            return Ok(true);
        }
        let src_exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM documents WHERE key = ?1)",
            [src],
            |row| row.get(0),
        )?;
        if src_exists {
            Ok(false)
        } else {
            Err(StoreError::NotFound(src.to_string()))
        }
    }

    /// Next value of the per-class counter. Values are never reused.
    pub fn next_id(conn: &Connection, class: ObjectClass) -> Result<u64> {
        let value: i64 = conn.query_row(
            "INSERT INTO sequences (name, value) VALUES (?1, 1)
             ON CONFLICT(name) DO UPDATE SET value = value + 1
             RETURNING value",
            [format!("sequence:{class}")],
            |row| row.get(0),
        )?;
        Ok(value as u64)
    }

    /// Remaining lifetime of `key`: `None` when it never expires.
    pub fn ttl(conn: &Connection, key: &str, now: u64) -> Result<Option<Duration>> {
        let row: Option<Option<i64>> = conn
            .query_row(
                "SELECT expires_at FROM documents
                 WHERE key = ?1 AND (expires_at IS NULL OR expires_at > ?2)",
                params![key, ms(now)],
                |row| row.get(0),
            )
            .optional()?;
        match row {
            None => Err(StoreError::NotFound(key.to_string())),
            Some(expires_at) => Ok(expires_at.map(|at| Duration::from_millis((at - ms(now)) as u64))),
        }
    }

    pub fn purge_expired(conn: &Connection, now: u64) -> Result<usize> {
        Ok(conn.execute(
            "DELETE FROM documents WHERE expires_at IS NOT NULL AND expires_at <= ?1",
            [ms(now)],
        )?)
    }
}

/// Async object store. Each method is one atomic transaction.
#[derive(Clone, Debug)]
pub struct ObjectStore {
    db: Database,
}

impl ObjectStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Write `envelope` under `key` only if nothing lives there yet.
    #[instrument(skip(self, envelope), fields(key = %key))]
    pub async fn create_if_absent(&self, key: &Key, envelope: &Envelope) -> Result<bool> {
        if key.class().is_some() && envelope.key()? != *key {
            return Err(StoreError::InvalidRequest(format!(
                "envelope does not belong under {key}"
            )));
        }
        let key = key.clone();
        let doc = serde_json::to_string(envelope)?;
        let created = self
            .db
            .transaction(move |conn, now| DocumentRepo::insert_if_absent(conn, &key, &doc, None, now))
            .await?;
        debug!(created, "create if absent");
        Ok(created)
    }

    #[instrument(skip(self), fields(key = %key))]
    pub async fn get(&self, key: &Key) -> Result<Envelope> {
        let key = key.to_string();
        self.db
            .call(move |conn, now| {
                DocumentRepo::get(conn, &key, now)?.ok_or(StoreError::NotFound(key))
            })
            .await
    }

    /// Batch read preserving input order; absent keys yield `None`.
    #[instrument(skip(self, keys), fields(count = keys.len()))]
    pub async fn multi_get(&self, keys: &[Key]) -> Result<Vec<Option<Envelope>>> {
        let keys: Vec<String> = keys.iter().map(ToString::to_string).collect();
        self.db
            .call(move |conn, now| {
                let tx = conn.unchecked_transaction()?;
                let docs = keys
                    .iter()
                    .map(|key| DocumentRepo::get(&tx, key, now))
                    .collect::<Result<Vec<_>>>()?;
                tx.commit()?;
                Ok(docs)
            })
            .await
    }

    /// Replace the payload and refresh `updated_at`, returning the result.
    #[instrument(skip(self, payload), fields(key = %key))]
    pub async fn replace_payload(&self, key: &Key, payload: Value) -> Result<Envelope> {
        let key = key.to_string();
        self.db
            .transaction(move |conn, now| {
                if !DocumentRepo::replace_payload(conn, &key, &payload, now)? {
                    return Err(StoreError::NotFound(key));
                }
                DocumentRepo::get(conn, &key, now)?.ok_or(StoreError::NotFound(key))
            })
            .await
    }

    #[instrument(skip(self, item), fields(key = %key, field))]
    pub async fn append_to_array_field(&self, key: &Key, field: &str, item: Value) -> Result<Envelope> {
        let key = key.to_string();
        let path = payload_path(field)?;
        self.db
            .transaction(move |conn, now| {
                let len = DocumentRepo::append(conn, &key, &path, &item, now)?;
                debug!(len, "appended");
                DocumentRepo::get(conn, &key, now)?.ok_or(StoreError::NotFound(key))
            })
            .await
    }

    #[instrument(skip(self, item), fields(key = %key, field, index))]
    pub async fn replace_array_element(
        &self,
        key: &Key,
        field: &str,
        index: usize,
        item: Value,
    ) -> Result<Envelope> {
        let key = key.to_string();
        let path = payload_path(field)?;
        self.db
            .transaction(move |conn, now| {
                DocumentRepo::replace_element(conn, &key, &path, index, &item, now)?;
                DocumentRepo::get(conn, &key, now)?.ok_or(StoreError::NotFound(key))
            })
            .await
    }

    #[instrument(skip(self), fields(key = %key))]
    pub async fn delete(&self, key: &Key) -> Result<bool> {
        let key = key.to_string();
        self.db
            .transaction(move |conn, now| DocumentRepo::delete(conn, &key, now))
            .await
    }

    /// Copy `src` to `dest` with a bounded lifetime. Returns `false` when
    /// `dest` already exists and `NotFound` when `src` does not.
    #[instrument(skip(self), fields(src = %src, dest = %dest, ttl_ms = ttl.as_millis() as u64))]
    pub async fn copy(&self, src: &Key, dest: &Key, ttl: Duration) -> Result<bool> {
        let src = src.to_string();
        let dest = dest.clone();
        let ttl_ms = ttl.as_millis() as u64;
        self.db
            .transaction(move |conn, now| {
                DocumentRepo::copy(conn, &src, &dest, Some(now.saturating_add(ttl_ms)), now)
            })
            .await
    }

    #[instrument(skip(self))]
    pub async fn next_id(&self, class: ObjectClass) -> Result<u64> {
        self.db
            .transaction(move |conn, _| DocumentRepo::next_id(conn, class))
            .await
    }

    #[instrument(skip(self), fields(key = %key))]
    pub async fn ttl(&self, key: &Key) -> Result<Option<Duration>> {
        let key = key.to_string();
        self.db.call(move |conn, now| DocumentRepo::ttl(conn, &key, now)).await
    }
}
