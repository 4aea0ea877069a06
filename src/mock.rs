//! Recording driver used by the unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::context::Context;
use crate::driver::{Driver, Target};
use crate::error::SqlStmtError;
use crate::params::NamedParams;
use crate::results::ResultSet;
use crate::types::{ExecResult, RowValues, TxOptions};

#[derive(Debug)]
pub(crate) struct MockStmt {
    pub(crate) query: String,
}

#[derive(Debug)]
pub(crate) struct MockTx {
    pub(crate) id: usize,
    pub(crate) opts: TxOptions,
    done: AtomicBool,
}

#[derive(Debug, Default)]
pub(crate) struct MockDriver {
    prepares: Mutex<HashMap<String, usize>>,
    releases: Mutex<HashMap<String, usize>>,
    failing_releases: Mutex<HashSet<String>>,
    events: Mutex<Vec<String>>,
    params_seen: Mutex<Vec<NamedParams>>,
    next_tx: AtomicUsize,
    pub(crate) fail_begin: AtomicBool,
    pub(crate) fail_commit: AtomicBool,
    pub(crate) fail_rollback: AtomicBool,
}

impl MockDriver {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn prepare_count(&self, query: &str) -> usize {
        self.prepares.lock().unwrap().get(query).copied().unwrap_or(0)
    }

    pub(crate) fn total_prepares(&self) -> usize {
        self.prepares.lock().unwrap().values().sum()
    }

    pub(crate) fn release_count(&self, query: &str) -> usize {
        self.releases.lock().unwrap().get(query).copied().unwrap_or(0)
    }

    pub(crate) fn fail_release_of(&self, query: &str) {
        self.failing_releases.lock().unwrap().insert(query.to_owned());
    }

    pub(crate) fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub(crate) fn params_seen(&self) -> Vec<NamedParams> {
        self.params_seen.lock().unwrap().clone()
    }

    fn record(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }

    fn run_on(&self, verb: &str, target: Target<'_, MockTx>, stmt: &MockStmt) -> Result<(), SqlStmtError> {
        match target {
            Target::Connection => self.record(format!("{verb} conn {}", stmt.query)),
            Target::Transaction(tx) => {
                if tx.done.load(Ordering::SeqCst) {
                    return Err(SqlStmtError::TransactionDone);
                }
                self.record(format!("{verb} tx{} {}", tx.id, stmt.query));
            }
        }
        if stmt.query.contains("duplicate") {
            return Err(SqlStmtError::ExecutionError(
                "UNIQUE constraint failed: abc.id".into(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Driver for MockDriver {
    type Statement = MockStmt;
    type Tx = MockTx;

    async fn prepare_named(&self, query: &str) -> Result<MockStmt, SqlStmtError> {
        *self
            .prepares
            .lock()
            .unwrap()
            .entry(query.to_owned())
            .or_default() += 1;
        // Give concurrent resolvers a chance to race.
        tokio::time::sleep(Duration::from_millis(1)).await;
        if query.contains("oops") {
            return Err(SqlStmtError::ExecutionError(format!(
                "syntax error near \"{query}\""
            )));
        }
        Ok(MockStmt {
            query: query.to_owned(),
        })
    }

    async fn exec(
        &self,
        ctx: &Context,
        target: Target<'_, MockTx>,
        stmt: &MockStmt,
        params: &NamedParams,
    ) -> Result<ExecResult, SqlStmtError> {
        ctx.check()?;
        self.params_seen.lock().unwrap().push(params.clone());
        self.run_on("exec", target, stmt)?;
        Ok(ExecResult {
            rows_affected: 1,
            last_insert_id: None,
        })
    }

    /// Returns one `n` column; the row count comes from the `rows` param (default 1).
    async fn query(
        &self,
        ctx: &Context,
        target: Target<'_, MockTx>,
        stmt: &MockStmt,
        params: &NamedParams,
    ) -> Result<ResultSet, SqlStmtError> {
        ctx.check()?;
        self.params_seen.lock().unwrap().push(params.clone());
        self.run_on("query", target, stmt)?;
        if stmt.query.contains("sleep") {
            ctx.run(std::future::pending::<Result<(), SqlStmtError>>(), || {
                self.record("interrupt".into());
            })
            .await?;
        }
        let rows = params.get("rows").and_then(RowValues::as_int).copied().unwrap_or(1);
        let mut rs = ResultSet::with_capacity(0);
        rs.set_column_names(std::sync::Arc::new(vec!["n".to_owned()]));
        for i in 0..rows {
            rs.add_row_values(vec![RowValues::Int(i)]);
        }
        Ok(rs)
    }

    async fn begin(&self, ctx: &Context, opts: &TxOptions) -> Result<MockTx, SqlStmtError> {
        ctx.check()?;
        if self.fail_begin.load(Ordering::SeqCst) {
            return Err(SqlStmtError::ConnectionError("connection refused".into()));
        }
        let id = self.next_tx.fetch_add(1, Ordering::SeqCst) + 1;
        self.record(format!("begin tx{id} {:?}", opts.isolation));
        Ok(MockTx {
            id,
            opts: *opts,
            done: AtomicBool::new(false),
        })
    }

    async fn commit(&self, ctx: &Context, tx: &MockTx) -> Result<(), SqlStmtError> {
        if tx.done.swap(true, Ordering::SeqCst) {
            return Err(SqlStmtError::TransactionDone);
        }
        ctx.check()?;
        self.record(format!("commit tx{}", tx.id));
        if self.fail_commit.load(Ordering::SeqCst) {
            return Err(SqlStmtError::ExecutionError("could not serialize access".into()));
        }
        Ok(())
    }

    async fn rollback(&self, ctx: &Context, tx: &MockTx) -> Result<(), SqlStmtError> {
        if tx.done.swap(true, Ordering::SeqCst) {
            return Err(SqlStmtError::TransactionDone);
        }
        ctx.check()?;
        self.record(format!("rollback tx{}", tx.id));
        if self.fail_rollback.load(Ordering::SeqCst) {
            return Err(SqlStmtError::ExecutionError("connection reset".into()));
        }
        Ok(())
    }

    async fn release(&self, stmt: &MockStmt) -> Result<(), SqlStmtError> {
        *self
            .releases
            .lock()
            .unwrap()
            .entry(stmt.query.clone())
            .or_default() += 1;
        if self.failing_releases.lock().unwrap().contains(&stmt.query) {
            return Err(SqlStmtError::ExecutionError(format!(
                "release failed for {}",
                stmt.query
            )));
        }
        Ok(())
    }
}
