use async_trait::async_trait;

use crate::context::Context;
use crate::error::SqlStmtError;
use crate::params::NamedParams;
use crate::results::ResultSet;
use crate::types::{ExecResult, TxOptions};

/// Where a cached statement runs: straight on the connection, or re-bound to an
/// open transaction's session.
#[derive(Debug)]
pub enum Target<'a, Tx> {
    Connection,
    Transaction(&'a Tx),
}

impl<Tx> Clone for Target<'_, Tx> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<Tx> Copy for Target<'_, Tx> {}

impl<Tx> Target<'_, Tx> {
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        matches!(self, Target::Transaction(_))
    }
}

/// The SQL client a [`Database`](crate::Database) sits on.
///
/// Implementations own connection handling, named-parameter binding and row
/// decoding. Statements are always prepared against the base connection so one
/// handle can be reused by any number of transactions; `exec`/`query` receive the
/// [`Target`] to re-bind to.
#[async_trait]
pub trait Driver: Send + Sync + 'static {
    /// Prepared named statement. Owned by the statement cache once handed over.
    type Statement: Send + Sync + 'static;
    /// Open transaction. Completed through `commit` or `rollback`, each at most once;
    /// dropping one that is still open must roll it back.
    type Tx: Send + Sync + 'static;

    /// Parse and prepare `query` against the base connection.
    async fn prepare_named(&self, query: &str) -> Result<Self::Statement, SqlStmtError>;

    /// Run a statement that does not return rows.
    async fn exec(
        &self,
        ctx: &Context,
        target: Target<'_, Self::Tx>,
        stmt: &Self::Statement,
        params: &NamedParams,
    ) -> Result<ExecResult, SqlStmtError>;

    /// Run a statement and materialise every row it returns.
    async fn query(
        &self,
        ctx: &Context,
        target: Target<'_, Self::Tx>,
        stmt: &Self::Statement,
        params: &NamedParams,
    ) -> Result<ResultSet, SqlStmtError>;

    async fn begin(&self, ctx: &Context, opts: &TxOptions) -> Result<Self::Tx, SqlStmtError>;

    async fn commit(&self, ctx: &Context, tx: &Self::Tx) -> Result<(), SqlStmtError>;

    async fn rollback(&self, ctx: &Context, tx: &Self::Tx) -> Result<(), SqlStmtError>;

    /// Free whatever the driver holds for `stmt`. Called once per statement, at
    /// cache teardown.
    async fn release(&self, stmt: &Self::Statement) -> Result<(), SqlStmtError>;
}
