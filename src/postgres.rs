//! Postgres driver: tokio-postgres clients in a deadpool pool.
//!
//! `:name` placeholders are compiled to `$n` once, when a statement is first
//! cached, and validated on a describe client taken out of the pool, so preparing
//! never waits behind clients held by open transactions. Each pooled client keeps
//! its own server-side prepared statement through deadpool's `prepare_cached`, so a
//! cached statement runs on whichever client executes it, including a
//! transaction's.

mod config;
mod named;
mod params;
mod query;
mod transaction;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use deadpool_postgres::{ClientWrapper, Object, Pool};
use tokio::sync::{Mutex, MutexGuard};
use tokio_postgres::{CancelToken, NoTls};

use crate::context::Context;
use crate::driver::{Driver, Target};
use crate::error::SqlStmtError;
use crate::params::NamedParams;
use crate::results::ResultSet;
use crate::types::{ExecResult, TxOptions};

pub use config::{PostgresOptions, PostgresOptionsBuilder};
pub use named::{NamedQuery, compile_named};
pub use params::Params;
pub use query::{build_result_set_from_statement, postgres_extract_value};
pub use transaction::PostgresTx;

use transaction::begin_statement;

/// A query compiled to `$n` form and validated by the server.
#[derive(Debug)]
pub struct PostgresStatement {
    query: String,
    named: NamedQuery,
    columns: Vec<String>,
    released: AtomicBool,
}

impl PostgresStatement {
    #[must_use]
    pub fn query(&self) -> &str {
        &self.query
    }

    #[must_use]
    pub fn named(&self) -> &NamedQuery {
        &self.named
    }

    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    fn ensure_live(&self) -> Result<(), SqlStmtError> {
        if self.is_released() {
            Err(SqlStmtError::ExecutionError(format!(
                "statement has been released: {}",
                self.query
            )))
        } else {
            Ok(())
        }
    }
}

/// Pooled Postgres database implementing [`Driver`].
#[derive(Clone)]
pub struct PostgresDriver {
    pool: Pool,
    describer: Arc<Mutex<Option<ClientWrapper>>>,
}

impl fmt::Debug for PostgresDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = self.pool.status();
        f.debug_struct("PostgresDriver")
            .field("max_size", &status.max_size)
            .field("size", &status.size)
            .field("available", &status.available)
            .finish()
    }
}

pub(crate) fn spawn_cancel(token: CancelToken) {
    tracing::debug!("sending postgres cancel request");
    tokio::spawn(async move {
        if let Err(e) = token.cancel_query(NoTls).await {
            tracing::warn!(error = %e, "postgres cancel request failed");
        }
    });
}

/// The client a statement runs on: a fresh pool checkout, or the transaction's.
enum Session<'a> {
    Pooled(Object),
    Tx(MutexGuard<'a, Option<Object>>),
}

impl Session<'_> {
    fn client(&self) -> Result<&Object, SqlStmtError> {
        match self {
            Session::Pooled(client) => Ok(client),
            Session::Tx(guard) => guard.as_ref().ok_or(SqlStmtError::TransactionDone),
        }
    }
}

/// Check out a client and remove it from the pool for good.
async fn detach(pool: &Pool) -> Result<ClientWrapper, SqlStmtError> {
    Ok(Object::take(pool.get().await?))
}

impl PostgresDriver {
    pub(crate) async fn connect(opts: PostgresOptions) -> Result<Self, SqlStmtError> {
        let pool = config::create_pool(opts)?;
        let driver = Self::from_pool(pool).await?;
        tracing::debug!(max_size = driver.pool.status().max_size, "postgres pool ready");
        Ok(driver)
    }

    /// Wrap an already configured pool. One client is taken out of it to validate
    /// statements on.
    ///
    /// # Errors
    /// Returns the pool error if no client can be checked out.
    pub async fn from_pool(pool: Pool) -> Result<Self, SqlStmtError> {
        let describer = detach(&pool).await?;
        Ok(Self {
            pool,
            describer: Arc::new(Mutex::new(Some(describer))),
        })
    }

    #[must_use]
    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Run a batch of statements outside the statement cache (schema setup).
    ///
    /// # Errors
    /// Returns the pool checkout error or the first failing statement's error.
    pub async fn execute_batch(&self, sql: &str) -> Result<(), SqlStmtError> {
        let client = self.pool.get().await?;
        client.batch_execute(sql).await?;
        Ok(())
    }

    async fn session<'a>(
        &self,
        ctx: &Context,
        target: Target<'a, PostgresTx>,
    ) -> Result<Session<'a>, SqlStmtError> {
        match target {
            Target::Connection => {
                let client = ctx
                    .run(
                        async { self.pool.get().await.map_err(SqlStmtError::from) },
                        || {},
                    )
                    .await?;
                Ok(Session::Pooled(client))
            }
            Target::Transaction(tx) => Ok(Session::Tx(tx.session().await?)),
        }
    }
}

#[async_trait]
impl Driver for PostgresDriver {
    type Statement = PostgresStatement;
    type Tx = PostgresTx;

    async fn prepare_named(&self, query: &str) -> Result<PostgresStatement, SqlStmtError> {
        let named = compile_named(query)?;
        let mut describer = self.describer.lock().await;
        let client = match describer.take() {
            Some(client) if !client.is_closed() => client,
            _ => {
                tracing::warn!("postgres describe client closed; taking a new one from the pool");
                detach(&self.pool).await?
            }
        };
        let client = describer.insert(client);
        let stmt = client.prepare(&named.sql).await?;
        let columns = stmt.columns().iter().map(|c| c.name().to_owned()).collect();
        tracing::debug!(query, sql = %named.sql, params = named.names.len(), "postgres statement prepared");
        Ok(PostgresStatement {
            query: query.to_owned(),
            named,
            columns,
            released: AtomicBool::new(false),
        })
    }

    async fn exec(
        &self,
        ctx: &Context,
        target: Target<'_, PostgresTx>,
        stmt: &PostgresStatement,
        params: &NamedParams,
    ) -> Result<ExecResult, SqlStmtError> {
        stmt.ensure_live()?;
        let values = stmt.named.bind(params)?;
        let session = self.session(ctx, target).await?;
        let client = session.client()?;
        let prepared = client.prepare_cached(&stmt.named.sql).await?;
        let params = Params::new(&values);
        let cancel = client.cancel_token();
        let rows_affected = ctx
            .run(
                async {
                    client
                        .execute(&prepared, params.as_refs())
                        .await
                        .map_err(SqlStmtError::from)
                },
                move || spawn_cancel(cancel),
            )
            .await?;
        Ok(ExecResult {
            rows_affected,
            last_insert_id: None,
        })
    }

    async fn query(
        &self,
        ctx: &Context,
        target: Target<'_, PostgresTx>,
        stmt: &PostgresStatement,
        params: &NamedParams,
    ) -> Result<ResultSet, SqlStmtError> {
        stmt.ensure_live()?;
        let values = stmt.named.bind(params)?;
        let session = self.session(ctx, target).await?;
        let client = session.client()?;
        let prepared = client.prepare_cached(&stmt.named.sql).await?;
        let params = Params::new(&values);
        let cancel = client.cancel_token();
        let rows = ctx
            .run(
                async {
                    client
                        .query(&prepared, params.as_refs())
                        .await
                        .map_err(SqlStmtError::from)
                },
                move || spawn_cancel(cancel),
            )
            .await?;
        build_result_set_from_statement(&prepared, &rows)
    }

    async fn begin(&self, ctx: &Context, opts: &TxOptions) -> Result<PostgresTx, SqlStmtError> {
        let sql = begin_statement(opts)?;
        let client = ctx
            .run(
                async { self.pool.get().await.map_err(SqlStmtError::from) },
                || {},
            )
            .await?;
        let cancel = client.cancel_token();
        // Owned by the tx from here on, so a failed or abandoned BEGIN is rolled back
        // on drop.
        let tx = PostgresTx::new(client, *opts);
        {
            let session = Session::Tx(tx.session().await?);
            let client = session.client()?;
            ctx.run(
                async { client.batch_execute(&sql).await.map_err(SqlStmtError::from) },
                move || spawn_cancel(cancel),
            )
            .await?;
        }
        Ok(tx)
    }

    async fn commit(&self, ctx: &Context, tx: &PostgresTx) -> Result<(), SqlStmtError> {
        tx.finish(ctx, "COMMIT").await
    }

    async fn rollback(&self, ctx: &Context, tx: &PostgresTx) -> Result<(), SqlStmtError> {
        tx.finish(ctx, "ROLLBACK").await
    }

    async fn release(&self, stmt: &PostgresStatement) -> Result<(), SqlStmtError> {
        if !stmt.released.swap(true, Ordering::AcqRel) {
            self.pool
                .manager()
                .statement_caches
                .remove(&stmt.named.sql, &[]);
            tracing::debug!(query = stmt.query(), "postgres statement released");
        }
        Ok(())
    }
}
