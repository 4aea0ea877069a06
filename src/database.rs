use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::cache::StatementCache;
use crate::context::Context;
use crate::decode::FromRow;
use crate::driver::{Driver, Target};
use crate::error::SqlStmtError;
use crate::params::NamedParams;
use crate::results::ResultSet;
use crate::types::{ExecResult, TxOptions};

/// Execution handle over a [`Driver`] that runs every query as a cached named
/// statement.
///
/// The root handle (from [`Database::new`]) runs on the base connection. Inside
/// [`transact`](Database::transact) the unit of work receives a transaction-scoped
/// handle bound to the open transaction; both share one [`StatementCache`]. Handles
/// are cheap to clone and never change after construction.
///
/// ```rust,no_run
/// use sql_stmt_cache::prelude::*;
///
/// # async fn demo() -> Result<(), SqlStmtError> {
/// let driver = SqliteOptionsBuilder::new("app.db".into()).build().await?;
/// let db = Database::new(driver);
/// let ctx = Context::background();
///
/// const INSERT: &str = "INSERT INTO abc (id, x) VALUES (:id, :x)";
/// db.transact(&ctx, TxOptions::serializable(), |tx| async move {
///     let ctx = Context::background();
///     tx.exec(&ctx, INSERT, Some(&named_params! { "id" => 1, "x" => 1 })).await?;
///     tx.exec(&ctx, INSERT, Some(&named_params! { "id" => 2, "x" => 2 })).await?;
///     Ok::<_, SqlStmtError>(())
/// })
/// .await?;
///
/// let n: i64 = db.get(&ctx, "SELECT COUNT(*) FROM abc", None).await?;
/// assert_eq!(n, 2);
/// db.close().await?;
/// # Ok(()) }
/// ```
pub struct Database<D: Driver> {
    driver: Arc<D>,
    tx: Option<Arc<D::Tx>>,
    tx_level: u32,
    stmts: Arc<StatementCache<D>>,
}

impl<D: Driver> Clone for Database<D> {
    fn clone(&self) -> Self {
        Self {
            driver: Arc::clone(&self.driver),
            tx: self.tx.clone(),
            tx_level: self.tx_level,
            stmts: Arc::clone(&self.stmts),
        }
    }
}

impl<D: Driver> fmt::Debug for Database<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("in_transaction", &self.tx.is_some())
            .field("tx_level", &self.tx_level)
            .field("stmts", &self.stmts)
            .finish_non_exhaustive()
    }
}

impl<D: Driver> Database<D> {
    /// Root handle over `driver` with an empty statement cache.
    #[must_use]
    pub fn new(driver: D) -> Self {
        Self::from_shared(Arc::new(driver))
    }

    /// Root handle over a driver that other code keeps using directly.
    #[must_use]
    pub fn from_shared(driver: Arc<D>) -> Self {
        Self {
            driver,
            tx: None,
            tx_level: 0,
            stmts: Arc::new(StatementCache::new()),
        }
    }

    /// The underlying connection. Stays usable after [`close`](Database::close).
    #[must_use]
    pub fn driver(&self) -> &D {
        &self.driver
    }

    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.tx.is_some()
    }

    /// How many transaction scopes deep this handle is; 0 for the root handle.
    #[must_use]
    pub fn tx_level(&self) -> u32 {
        self.tx_level
    }

    #[must_use]
    pub fn statement_cache(&self) -> &StatementCache<D> {
        &self.stmts
    }

    fn target(&self) -> Target<'_, D::Tx> {
        match &self.tx {
            Some(tx) => Target::Transaction(tx),
            None => Target::Connection,
        }
    }

    /// Create and/or retrieve the named statement for `query`.
    ///
    /// The statement belongs to the cache; it stays valid until [`close`](Database::close)
    /// and must not be released by the caller.
    ///
    /// # Errors
    /// Returns [`SqlStmtError::Prepare`] if the driver cannot prepare `query`.
    pub async fn stmt(&self, query: &str) -> Result<Arc<D::Statement>, SqlStmtError> {
        self.stmts.resolve(&self.driver, query).await
    }

    /// Execute a statement that returns no rows.
    ///
    /// # Errors
    /// Returns [`SqlStmtError::Prepare`] for bad SQL and [`SqlStmtError::Query`] for
    /// execution failures.
    pub async fn exec(
        &self,
        ctx: &Context,
        query: &str,
        params: Option<&NamedParams>,
    ) -> Result<ExecResult, SqlStmtError> {
        let stmt = self.stmt(query).await?;
        let empty = NamedParams::new();
        let params = params.unwrap_or(&empty);
        self.driver
            .exec(ctx, self.target(), &stmt, params)
            .await
            .map_err(|e| SqlStmtError::query(query, e))
    }

    /// Fetch exactly one row.
    ///
    /// # Errors
    /// Returns [`SqlStmtError::Query`] wrapping [`SqlStmtError::RowNotFound`] or
    /// [`SqlStmtError::TooManyRows`] when the row count is not one, or a decode/driver
    /// error.
    pub async fn get<T: FromRow>(
        &self,
        ctx: &Context,
        query: &str,
        params: Option<&NamedParams>,
    ) -> Result<T, SqlStmtError> {
        let rs = self.query_rows(ctx, query, params).await?;
        let row = match rs.results.as_slice() {
            [row] => row,
            [] => return Err(SqlStmtError::query(query, SqlStmtError::RowNotFound)),
            rows => {
                return Err(SqlStmtError::query(
                    query,
                    SqlStmtError::TooManyRows(rows.len()),
                ));
            }
        };
        T::from_row(row).map_err(|e| SqlStmtError::query(query, e))
    }

    /// Fetch zero or more rows.
    ///
    /// # Errors
    /// Returns [`SqlStmtError::Prepare`] for bad SQL and [`SqlStmtError::Query`] for
    /// execution or decode failures.
    pub async fn select<T: FromRow>(
        &self,
        ctx: &Context,
        query: &str,
        params: Option<&NamedParams>,
    ) -> Result<Vec<T>, SqlStmtError> {
        let rs = self.query_rows(ctx, query, params).await?;
        rs.results
            .iter()
            .map(T::from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| SqlStmtError::query(query, e))
    }

    /// Like [`select`](Database::select) but returns the raw [`ResultSet`].
    ///
    /// # Errors
    /// Same as [`select`](Database::select).
    pub async fn query_rows(
        &self,
        ctx: &Context,
        query: &str,
        params: Option<&NamedParams>,
    ) -> Result<ResultSet, SqlStmtError> {
        let stmt = self.stmt(query).await?;
        let empty = NamedParams::new();
        let params = params.unwrap_or(&empty);
        self.driver
            .query(ctx, self.target(), &stmt, params)
            .await
            .map_err(|e| SqlStmtError::query(query, e))
    }

    /// Run `f` inside a transaction, committing if it returns `Ok` and rolling back
    /// if it returns `Err`.
    ///
    /// `f` receives a transaction-scoped handle sharing this handle's statement
    /// cache. `opts` always names the isolation level. Nested transactions are not
    /// supported: calling this on a transaction-scoped handle fails without
    /// beginning anything or calling `f`.
    ///
    /// # Errors
    /// - [`SqlStmtError::UnsupportedNesting`] when already inside a transaction.
    /// - [`SqlStmtError::TxBegin`] / [`SqlStmtError::TxCommit`] when the driver fails.
    /// - [`SqlStmtError::TxAborted`] with `f`'s error after a clean rollback.
    /// - [`SqlStmtError::TxRollback`] when the rollback itself fails; `f`'s error is
    ///   kept as its `cause`.
    pub async fn transact<T, F, Fut>(
        &self,
        ctx: &Context,
        opts: TxOptions,
        f: F,
    ) -> Result<T, SqlStmtError>
    where
        F: FnOnce(Database<D>) -> Fut,
        Fut: Future<Output = Result<T, SqlStmtError>>,
    {
        if self.tx.is_some() {
            return Err(SqlStmtError::UnsupportedNesting {
                depth: self.tx_level,
            });
        }

        let depth = self.tx_level + 1;
        let tx = self
            .driver
            .begin(ctx, &opts)
            .await
            .map_err(|e| SqlStmtError::TxBegin {
                depth,
                source: Box::new(e),
            })?;
        let tx = Arc::new(tx);
        tracing::debug!(depth, isolation = ?opts.isolation, read_only = opts.read_only, "transaction begun");

        let scoped = Database {
            driver: Arc::clone(&self.driver),
            tx: Some(Arc::clone(&tx)),
            tx_level: depth,
            stmts: Arc::clone(&self.stmts),
        };

        match f(scoped).await {
            Ok(value) => {
                self.driver
                    .commit(ctx, &tx)
                    .await
                    .map_err(|e| SqlStmtError::TxCommit {
                        depth,
                        source: Box::new(e),
                    })?;
                tracing::debug!(depth, "transaction committed");
                Ok(value)
            }
            Err(cause) => match self.driver.rollback(ctx, &tx).await {
                Ok(()) => {
                    tracing::debug!(depth, error = %cause, "transaction rolled back");
                    Err(SqlStmtError::TxAborted {
                        depth,
                        source: Box::new(cause),
                    })
                }
                Err(rollback_err) => {
                    tracing::warn!(depth, error = %rollback_err, cause = %cause, "transaction rollback failed");
                    Err(SqlStmtError::TxRollback {
                        depth,
                        source: Box::new(rollback_err),
                        cause: Box::new(cause),
                    })
                }
            },
        }
    }

    /// Release every cached statement. Does not close the underlying connection.
    ///
    /// # Errors
    /// Returns the first statement release failure, or
    /// [`SqlStmtError::ExecutionError`] when called on a transaction-scoped handle,
    /// which never owns the cache.
    pub async fn close(&self) -> Result<(), SqlStmtError> {
        if self.tx.is_some() {
            return Err(SqlStmtError::ExecutionError(format!(
                "cannot close the statement cache from inside a transaction (tx level {})",
                self.tx_level
            )));
        }
        self.stmts.teardown(&self.driver).await
    }
}
