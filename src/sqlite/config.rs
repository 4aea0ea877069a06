use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bb8::{ManageConnection, Pool};
use tokio::task::spawn_blocking;

use crate::error::SqlStmtError;

use super::SqliteDriver;
use super::connection::{Lease, SharedSqliteConnection, SqliteConnection, run_blocking};

const DEFAULT_POOL_SIZE: u32 = 8;
const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Options for configuring a `SQLite` pool.
#[derive(Debug, Clone)]
pub struct SqliteOptions {
    pub db_path: String,
    /// Upper bound on pooled connections. Each open transaction holds one.
    pub pool_size: u32,
    /// How long a statement waits on another connection's write lock.
    pub busy_timeout: Duration,
    pub journal_wal: bool,
}

impl SqliteOptions {
    #[must_use]
    pub fn new(db_path: String) -> Self {
        Self {
            db_path,
            pool_size: DEFAULT_POOL_SIZE,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            journal_wal: true,
        }
    }
}

/// Fluent builder for `SQLite` options.
#[derive(Debug, Clone)]
pub struct SqliteOptionsBuilder {
    opts: SqliteOptions,
}

impl SqliteOptionsBuilder {
    #[must_use]
    pub fn new(db_path: String) -> Self {
        Self {
            opts: SqliteOptions::new(db_path),
        }
    }

    #[must_use]
    pub fn pool_size(mut self, pool_size: u32) -> Self {
        self.opts.pool_size = pool_size;
        self
    }

    #[must_use]
    pub fn busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.opts.busy_timeout = busy_timeout;
        self
    }

    #[must_use]
    pub fn wal(mut self, journal_wal: bool) -> Self {
        self.opts.journal_wal = journal_wal;
        self
    }

    #[must_use]
    pub fn finish(self) -> SqliteOptions {
        self.opts
    }

    /// Open the pool and check out one connection as a smoke test.
    ///
    /// # Errors
    /// Returns [`SqlStmtError::ConfigError`] for an empty path or zero pool size, and
    /// the underlying `SQLite` error if the database cannot be opened.
    pub async fn build(self) -> Result<SqliteDriver, SqlStmtError> {
        SqliteDriver::connect(self.finish()).await
    }
}

/// bb8 manager opening rusqlite connections with the configured pragmas.
#[derive(Debug, Clone)]
pub struct SqliteManager {
    opts: SqliteOptions,
}

impl SqliteManager {
    #[must_use]
    pub fn new(opts: SqliteOptions) -> Self {
        Self { opts }
    }

    /// # Errors
    /// Returns [`SqlStmtError::ConfigError`] for an empty path or a zero pool size.
    pub fn validate(&self) -> Result<(), SqlStmtError> {
        if self.opts.db_path.is_empty() {
            return Err(SqlStmtError::ConfigError("sqlite db_path is empty".into()));
        }
        if self.opts.pool_size == 0 {
            return Err(SqlStmtError::ConfigError(
                "sqlite pool_size must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Build a pool from this manager.
    ///
    /// # Errors
    /// Returns [`SqlStmtError::ConfigError`] for invalid options and the first
    /// connection error otherwise.
    pub async fn build_pool(self) -> Result<Pool<SqliteManager>, SqlStmtError> {
        self.validate()?;
        let pool_size = self.opts.pool_size;
        Pool::builder().max_size(pool_size).build(self).await
    }
}

fn open(opts: &SqliteOptions) -> Result<rusqlite::Connection, SqlStmtError> {
    let conn = rusqlite::Connection::open(&opts.db_path)?;
    conn.busy_timeout(opts.busy_timeout)?;
    if opts.journal_wal {
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
    }
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    Ok(conn)
}

impl ManageConnection for SqliteManager {
    type Connection = SharedSqliteConnection;
    type Error = SqlStmtError;

    #[allow(clippy::manual_async_fn)]
    fn connect(&self) -> impl Future<Output = Result<Self::Connection, Self::Error>> + Send {
        let opts = self.opts.clone();
        async move {
            let conn = spawn_blocking(move || open(&opts))
                .await
                .map_err(|e| {
                    SqlStmtError::ConnectionError(format!("sqlite open join error: {e}"))
                })??;
            tracing::debug!("opened sqlite connection");
            Ok(Arc::new(SqliteConnection::new(conn)))
        }
    }

    #[allow(clippy::manual_async_fn)]
    fn is_valid(
        &self,
        conn: &mut Self::Connection,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        let handle = Arc::clone(conn);
        async move {
            run_blocking(Lease::Shared(handle), |conn| {
                conn.execute_batch("SELECT 1")
                    .map_err(SqlStmtError::SqliteError)
            })
            .await
        }
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}
