//! `SQLite` driver: rusqlite connections in a bb8 pool, with every blocking call
//! moved to `spawn_blocking`.
//!
//! Cached statements are validated once on a dedicated connection outside the pool
//! and then re-bound through the executing connection's own `prepare_cached` cache,
//! so preparing never waits behind open transactions. A transaction holds one pooled
//! connection from `BEGIN` until `COMMIT`/`ROLLBACK`.

mod config;
mod connection;
mod params;
mod query;
mod statement;
mod transaction;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bb8::{ManageConnection, Pool};

use crate::context::Context;
use crate::driver::{Driver, Target};
use crate::error::SqlStmtError;
use crate::params::NamedParams;
use crate::results::ResultSet;
use crate::types::{ExecResult, TxOptions};

pub use config::{SqliteManager, SqliteOptions, SqliteOptionsBuilder};
pub use connection::SqliteConnection;
pub use params::row_value_to_sqlite_value;
pub use query::sqlite_extract_value_sync;
pub use statement::SqliteStatement;
pub use transaction::SqliteTx;

use connection::{Lease, SharedSqliteConnection, run_blocking, run_interruptible, run_owned};
use params::bind_named;
use query::build_result_set;
use transaction::TxConn;

/// Pooled `SQLite` database implementing [`Driver`].
#[derive(Clone)]
pub struct SqliteDriver {
    pool: Pool<SqliteManager>,
    describer: SharedSqliteConnection,
    db_path: Arc<str>,
}

impl fmt::Debug for SqliteDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.pool.state();
        f.debug_struct("SqliteDriver")
            .field("db_path", &self.db_path)
            .field("connections", &state.connections)
            .field("idle_connections", &state.idle_connections)
            .finish()
    }
}

impl SqliteDriver {
    pub(crate) async fn connect(opts: SqliteOptions) -> Result<Self, SqlStmtError> {
        let db_path: Arc<str> = Arc::from(opts.db_path.as_str());
        let manager = SqliteManager::new(opts);
        manager.validate()?;
        let describer = manager.connect().await?;
        let pool = manager.build_pool().await?;
        drop(pool.get().await?);
        tracing::debug!(db_path = %db_path, "sqlite pool ready");
        Ok(Self {
            pool,
            describer,
            db_path,
        })
    }

    #[must_use]
    pub fn db_path(&self) -> &str {
        &self.db_path
    }

    #[must_use]
    pub fn pool(&self) -> &Pool<SqliteManager> {
        &self.pool
    }

    /// Run a batch of statements outside the statement cache (schema setup, pragmas).
    ///
    /// # Errors
    /// Returns the pool checkout error or the first failing statement's error.
    pub async fn execute_batch(&self, sql: &str) -> Result<(), SqlStmtError> {
        let conn = self.pool.get_owned().await?;
        let sql = sql.to_owned();
        run_blocking(Lease::Pooled(conn), move |conn| {
            conn.execute_batch(&sql).map_err(SqlStmtError::SqliteError)
        })
        .await
    }

    async fn checkout(&self, ctx: &Context) -> Result<connection::SqlitePooledConnection, SqlStmtError> {
        ctx.run(
            async { self.pool.get_owned().await.map_err(SqlStmtError::from) },
            || {},
        )
        .await
    }

    async fn lease(&self, ctx: &Context, target: Target<'_, SqliteTx>) -> Result<Lease, SqlStmtError> {
        match target {
            Target::Connection => Ok(Lease::Pooled(self.checkout(ctx).await?)),
            Target::Transaction(tx) => Ok(Lease::Shared(tx.handle()?)),
        }
    }

    async fn finish(&self, ctx: &Context, tx: &SqliteTx, sql: &'static str) -> Result<(), SqlStmtError> {
        let conn = tx.take()?;
        let target = conn.handle();
        ctx.run(run_owned(move || conn.finish(sql)), move || {
            if let Some(target) = target {
                target.interrupt();
            }
        })
        .await
    }
}

#[async_trait]
impl Driver for SqliteDriver {
    type Statement = SqliteStatement;
    type Tx = SqliteTx;

    async fn prepare_named(&self, query: &str) -> Result<SqliteStatement, SqlStmtError> {
        let sql = query.to_owned();
        let stmt = run_blocking(Lease::Shared(Arc::clone(&self.describer)), move |conn| {
            SqliteStatement::describe(conn, &sql)
        })
        .await?;
        tracing::debug!(
            query,
            columns = stmt.columns().len(),
            placeholders = stmt.placeholders().len(),
            "sqlite statement prepared"
        );
        Ok(stmt)
    }

    async fn exec(
        &self,
        ctx: &Context,
        target: Target<'_, SqliteTx>,
        stmt: &SqliteStatement,
        params: &NamedParams,
    ) -> Result<ExecResult, SqlStmtError> {
        stmt.ensure_live()?;
        let lease = self.lease(ctx, target).await?;
        let sql = stmt.query().to_owned();
        let params = params.clone();
        run_interruptible(ctx, lease, move |conn| {
            let affected = {
                let mut prepared = conn.prepare_cached(&sql)?;
                bind_named(&mut prepared, &params)?;
                prepared.raw_execute()?
            };
            let rows_affected = u64::try_from(affected).map_err(|e| {
                SqlStmtError::ExecutionError(format!("sqlite affected rows conversion error: {e}"))
            })?;
            Ok(ExecResult {
                rows_affected,
                last_insert_id: (rows_affected > 0).then(|| conn.last_insert_rowid()),
            })
        })
        .await
    }

    async fn query(
        &self,
        ctx: &Context,
        target: Target<'_, SqliteTx>,
        stmt: &SqliteStatement,
        params: &NamedParams,
    ) -> Result<ResultSet, SqlStmtError> {
        stmt.ensure_live()?;
        let lease = self.lease(ctx, target).await?;
        let sql = stmt.query().to_owned();
        let params = params.clone();
        run_interruptible(ctx, lease, move |conn| {
            let mut prepared = conn.prepare_cached(&sql)?;
            bind_named(&mut prepared, &params)?;
            build_result_set(&mut prepared)
        })
        .await
    }

    async fn begin(&self, ctx: &Context, opts: &TxOptions) -> Result<SqliteTx, SqlStmtError> {
        let conn = self.checkout(ctx).await?;
        let target = Arc::clone(&*conn);
        let opts = *opts;
        // If the context fires mid-BEGIN the finished TxConn is dropped unclaimed,
        // which rolls it back.
        let tx_conn = ctx
            .run(run_owned(move || TxConn::begin(conn, &opts)), move || {
                target.interrupt();
            })
            .await?;
        Ok(SqliteTx::new(tx_conn, opts))
    }

    async fn commit(&self, ctx: &Context, tx: &SqliteTx) -> Result<(), SqlStmtError> {
        self.finish(ctx, tx, "COMMIT").await
    }

    async fn rollback(&self, ctx: &Context, tx: &SqliteTx) -> Result<(), SqlStmtError> {
        self.finish(ctx, tx, "ROLLBACK").await
    }

    async fn release(&self, stmt: &SqliteStatement) -> Result<(), SqlStmtError> {
        if stmt.mark_released() {
            tracing::debug!(query = stmt.query(), "sqlite statement released");
        }
        Ok(())
    }
}
