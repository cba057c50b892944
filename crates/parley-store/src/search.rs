//! Owner-filtered, paginated, sorted listing over per-class search indexes.
//!
//! A class can only be listed once its index has been created (normally by the
//! `create-index` / `migrate-all-index` commands). Listing an unindexed class
//! fails with [`StoreError::IndexNotImplemented`] rather than returning an
//! empty result.

use std::fmt;
use std::str::FromStr;

use parley_core::{Datetime, Envelope, KeyError, ObjectClass, Owner};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::database::Database;
use crate::documents::ms;
use crate::error::{Result, StoreError};
use crate::row_helpers::{self, parse_envelope};
use crate::schema::search_index_ddl;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    CreatedAt,
    UpdatedAt,
    Id,
}

impl SortField {
    fn sql(self) -> &'static str {
        match self {
            Self::CreatedAt => "json_extract(doc, '$.created_at.timestamp')",
            Self::UpdatedAt => "json_extract(doc, '$.updated_at.timestamp')",
            Self::Id => "json_extract(doc, '$.id')",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::CreatedAt => "created_at",
            Self::UpdatedAt => "updated_at",
            Self::Id => "id",
        }
    }
}

impl fmt::Display for SortField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortField {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "created_at" => Ok(Self::CreatedAt),
            "updated_at" => Ok(Self::UpdatedAt),
            "id" => Ok(Self::Id),
            other => Err(StoreError::InvalidRequest(format!("unknown sort field: {other}"))),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Sort {
    pub field: SortField,
    pub ascending: bool,
}

impl Sort {
    pub fn asc(field: SortField) -> Self {
        Self { field, ascending: true }
    }

    pub fn desc(field: SortField) -> Self {
        Self { field, ascending: false }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Page {
    offset: u64,
    limit: u64,
}

impl Page {
    pub fn new(offset: u64, limit: u64) -> Result<Self> {
        if limit == 0 {
            return Err(StoreError::InvalidRequest("limit must be positive".into()));
        }
        Ok(Self { offset, limit })
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }
}

/// Without a page every match is returned; without a sort, ids ascend.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ListQuery {
    pub page: Option<Page>,
    pub sort: Option<Sort>,
}

pub fn index_name(class: ObjectClass) -> String {
    format!("meta_model_index:{class}")
}

pub struct SearchRepo;

impl SearchRepo {
    pub fn has_index(conn: &Connection, class: ObjectClass) -> Result<bool> {
        Ok(conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM search_indexes WHERE class_name = ?1)",
            [class.as_str()],
            |row| row.get(0),
        )?)
    }

    pub fn create_index(conn: &Connection, class: ObjectClass, now: u64) -> Result<()> {
        if !class.indexed() {
            return Err(KeyError::UnregisteredClass(index_name(class)).into());
        }
        let created_at = Datetime::from_millis(now).datetime_iso.to_rfc3339();
        let inserted = conn.execute(
            "INSERT INTO search_indexes (class_name, prefix, created_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(class_name) DO NOTHING",
            params![class.as_str(), class.key_prefix(), created_at],
        )?;
        if inserted == 0 {
            return Err(StoreError::AlreadyExists(index_name(class)));
        }
        conn.execute_batch(&search_index_ddl(class.as_str()))?;
        Ok(())
    }

    pub fn list(
        conn: &Connection,
        class: ObjectClass,
        owner: &Owner,
        query: &ListQuery,
        now: u64,
    ) -> Result<Vec<Envelope>> {
        if !Self::has_index(conn, class)? {
            return Err(StoreError::IndexNotImplemented(class));
        }

        let sort = query.sort.unwrap_or(Sort::asc(SortField::Id));
        let direction = if sort.ascending { "ASC" } else { "DESC" };
        let (limit, offset) = match query.page {
            Some(page) => (ms(page.limit), ms(page.offset)),
            None => (-1, 0),
        };
        let sql = format!(
            "SELECT doc FROM documents
             WHERE class_name = ?1
               AND json_extract(doc, '$.owner') = ?2
               AND (expires_at IS NULL OR expires_at > ?3)
             ORDER BY {field} {direction}, json_extract(doc, '$.id') {direction}
             LIMIT ?4 OFFSET ?5",
            field = sort.field.sql(),
        );

        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params![class.as_str(), owner.as_str(), ms(now), limit, offset])?;
        let mut docs = Vec::new();
        while let Some(row) = rows.next()? {
            let raw: String = row_helpers::get(row, 0, "documents", "doc")?;
            docs.push(parse_envelope(&raw)?);
        }
        Ok(docs)
    }
}

#[derive(Clone, Debug)]
pub struct SearchIndex {
    db: Database,
}

impl SearchIndex {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self))]
    pub async fn create_index(&self, class: ObjectClass) -> Result<()> {
        self.db
            .transaction(move |conn, now| SearchRepo::create_index(conn, class, now))
            .await?;
        info!(index = %index_name(class), "search index created");
        Ok(())
    }

    pub async fn has_index(&self, class: ObjectClass) -> Result<bool> {
        self.db.call(move |conn, _| SearchRepo::has_index(conn, class)).await
    }

    /// Create every missing index. Returns the classes that were created.
    #[instrument(skip(self))]
    pub async fn migrate_all(&self) -> Result<Vec<ObjectClass>> {
        let created = self
            .db
            .transaction(|conn, now| {
                let mut created = Vec::new();
                for class in ObjectClass::indexed_classes() {
                    if SearchRepo::has_index(conn, class)? {
                        continue;
                    }
                    SearchRepo::create_index(conn, class, now)?;
                    created.push(class);
                }
                Ok(created)
            })
            .await?;
        info!(created = created.len(), "search indexes migrated");
        Ok(created)
    }

    #[instrument(skip(self), fields(class = %class, owner = %owner))]
    pub async fn list(&self, class: ObjectClass, owner: &Owner, query: ListQuery) -> Result<Vec<Envelope>> {
        let owner = owner.clone();
        self.db
            .call(move |conn, now| {
                let tx = conn.unchecked_transaction()?;
                let docs = SearchRepo::list(&tx, class, &owner, &query, now)?;
                tx.commit()?;
                Ok(docs)
            })
            .await
    }
}
