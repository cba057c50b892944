//! Process-wide connection pool context.
//!
//! A [`Database`] is created once at startup and handed to every component by
//! clone. All SQLite work runs on the blocking thread pool; callers only see
//! `async` methods. [`Database::shutdown`] releases the pool exactly once and
//! every later call fails with [`StoreError::Closed`].

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use parley_core::Clock;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, TransactionBehavior};
use tracing::{debug, info};

use crate::error::{Result, StoreError};
use crate::schema;

/// Alias for the connection pool type.
pub type ConnectionPool = Pool<SqliteConnectionManager>;

/// Configuration for the connection pool.
#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    /// Maximum pool size (default: 16).
    pub pool_size: u32,
    /// Busy timeout in milliseconds (default: 30000).
    pub busy_timeout_ms: u32,
    /// Cache size in KiB (default: 8192 = 8 MB).
    pub cache_size_kib: i64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            pool_size: 16,
            busy_timeout_ms: 30_000,
            cache_size_kib: 8192,
        }
    }
}

/// Pragma customizer that runs on each new connection.
#[derive(Debug)]
struct PragmaCustomizer {
    busy_timeout_ms: u32,
    cache_size_kib: i64,
}

impl r2d2::CustomizeConnection<Connection, rusqlite::Error> for PragmaCustomizer {
    fn on_acquire(&self, conn: &mut Connection) -> std::result::Result<(), rusqlite::Error> {
        conn.execute_batch(&format!(
            "PRAGMA busy_timeout = {};\
             PRAGMA journal_mode = WAL;\
             PRAGMA cache_size = -{};\
             PRAGMA synchronous = NORMAL;",
            self.busy_timeout_ms, self.cache_size_kib
        ))?;
        Ok(())
    }
}

struct DatabaseInner {
    pool: RwLock<Option<ConnectionPool>>,
    clock: Arc<dyn Clock>,
    path: PathBuf,
}

/// Shared handle to the backing store.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.inner.path)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Database {
    /// Open or create a file-backed database.
    pub fn open(path: &Path, config: &ConnectionConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Database(format!("create dir: {e}")))?;
        }
        let manager = SqliteConnectionManager::file(path);
        let pool = build_pool(manager, config.pool_size, config)?;
        let db = Self::from_pool(pool, clock, path.to_owned())?;
        info!(path = %path.display(), pool_size = config.pool_size, "database opened");
        Ok(db)
    }

    /// Open an in-memory database.
    ///
    /// Every pooled in-memory connection would be its own database, so the
    /// pool holds exactly one connection.
    pub fn in_memory(clock: Arc<dyn Clock>) -> Result<Self> {
        let manager = SqliteConnectionManager::memory();
        let pool = build_pool(manager, 1, &ConnectionConfig::default())?;
        Self::from_pool(pool, clock, PathBuf::from(":memory:"))
    }

    fn from_pool(pool: ConnectionPool, clock: Arc<dyn Clock>, path: PathBuf) -> Result<Self> {
        {
            let conn = pool.get()?;
            initialize(&conn)?;
        }
        Ok(Self {
            inner: Arc::new(DatabaseInner {
                pool: RwLock::new(Some(pool)),
                clock,
                path,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.inner.clock
    }

    pub fn is_closed(&self) -> bool {
        self.inner.pool.read().is_none()
    }

    fn pool(&self) -> Result<ConnectionPool> {
        self.inner.pool.read().clone().ok_or(StoreError::Closed)
    }

    /// Run `f` against a pooled connection without an explicit transaction.
    ///
    /// `f` receives the current clock reading in milliseconds.
    pub async fn call<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection, u64) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool()?;
        let clock = self.inner.clock.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            f(&conn, clock.now_ms())
        })
        .await?
    }

    /// Run `f` inside one `BEGIN IMMEDIATE` transaction.
    ///
    /// The transaction commits only when `f` returns `Ok`; anything else rolls
    /// it back. SQLite failures while it is open surface as
    /// [`StoreError::Transaction`]. The clock is read after the write lock is
    /// held, so writers observe non-decreasing times in commit order.
    pub async fn transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection, u64) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool()?;
        let clock = self.inner.clock.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(|e| StoreError::Transaction(format!("begin: {e}")))?;
            let value = f(&tx, clock.now_ms()).map_err(into_transaction_error)?;
            tx.commit()
                .map_err(|e| StoreError::Transaction(format!("commit: {e}")))?;
            Ok(value)
        })
        .await?
    }

    /// Release the pool. Succeeds once; later calls report [`StoreError::Closed`].
    pub fn shutdown(&self) -> Result<()> {
        let pool = self.inner.pool.write().take().ok_or(StoreError::Closed)?;
        debug!(idle = pool.state().idle_connections, "closing connection pool");
        drop(pool);
        info!(path = %self.inner.path.display(), "database closed");
        Ok(())
    }
}

fn build_pool(
    manager: SqliteConnectionManager,
    max_size: u32,
    config: &ConnectionConfig,
) -> Result<ConnectionPool> {
    let pool = Pool::builder()
        .max_size(max_size)
        .connection_timeout(Duration::from_secs(5))
        .connection_customizer(Box::new(PragmaCustomizer {
            busy_timeout_ms: config.busy_timeout_ms,
            cache_size_kib: config.cache_size_kib,
        }))
        .build(manager)?;
    Ok(pool)
}

fn initialize(conn: &Connection) -> Result<()> {
    conn.execute_batch(schema::CREATE_TABLES)
        .map_err(|e| StoreError::Database(format!("schema: {e}")))?;

    let version: Option<u32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
        .ok();
    if version.is_none() {
        conn.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            [schema::SCHEMA_VERSION],
        )
        .map_err(|e| StoreError::Database(format!("schema version: {e}")))?;
    }
    Ok(())
}

fn into_transaction_error(e: StoreError) -> StoreError {
    match e {
        StoreError::Database(msg) => StoreError::Transaction(msg),
        other => other,
    }
}
