use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::context::Context;
use crate::database::Database;
use crate::decode::FromRow;
use crate::driver::Driver;
use crate::error::SqlStmtError;
use crate::params::NamedParams;
use crate::types::{ExecResult, TxOptions};

/// Query surface shared by root and transaction-scoped handles.
///
/// Code written against `Executor` runs unchanged whether it is handed the root
/// handle or the handle a unit of work receives from [`transact`](Executor::transact).
///
/// ```rust,no_run
/// use sql_stmt_cache::prelude::*;
///
/// async fn add_user<E: Executor>(db: &E, ctx: &Context, name: &str) -> Result<i64, SqlStmtError> {
///     db.exec(ctx, "INSERT INTO users (name) VALUES (:name)", Some(&named_params! { "name" => name }))
///         .await?;
///     db.get(ctx, "SELECT id FROM users WHERE name = :name", Some(&named_params! { "name" => name }))
///         .await
/// }
/// ```
#[async_trait]
pub trait Executor: Clone + Send + Sync + Sized {
    type Statement: Send + Sync;

    async fn stmt(&self, query: &str) -> Result<Arc<Self::Statement>, SqlStmtError>;

    async fn exec(
        &self,
        ctx: &Context,
        query: &str,
        params: Option<&NamedParams>,
    ) -> Result<ExecResult, SqlStmtError>;

    async fn get<T: FromRow + Send>(
        &self,
        ctx: &Context,
        query: &str,
        params: Option<&NamedParams>,
    ) -> Result<T, SqlStmtError>;

    async fn select<T: FromRow + Send>(
        &self,
        ctx: &Context,
        query: &str,
        params: Option<&NamedParams>,
    ) -> Result<Vec<T>, SqlStmtError>;

    async fn transact<T, F, Fut>(
        &self,
        ctx: &Context,
        opts: TxOptions,
        f: F,
    ) -> Result<T, SqlStmtError>
    where
        T: Send,
        F: FnOnce(Self) -> Fut + Send,
        Fut: Future<Output = Result<T, SqlStmtError>> + Send;
}

#[async_trait]
impl<D: Driver> Executor for Database<D> {
    type Statement = D::Statement;

    async fn stmt(&self, query: &str) -> Result<Arc<D::Statement>, SqlStmtError> {
        Database::stmt(self, query).await
    }

    async fn exec(
        &self,
        ctx: &Context,
        query: &str,
        params: Option<&NamedParams>,
    ) -> Result<ExecResult, SqlStmtError> {
        Database::exec(self, ctx, query, params).await
    }

    async fn get<T: FromRow + Send>(
        &self,
        ctx: &Context,
        query: &str,
        params: Option<&NamedParams>,
    ) -> Result<T, SqlStmtError> {
        Database::get(self, ctx, query, params).await
    }

    async fn select<T: FromRow + Send>(
        &self,
        ctx: &Context,
        query: &str,
        params: Option<&NamedParams>,
    ) -> Result<Vec<T>, SqlStmtError> {
        Database::select(self, ctx, query, params).await
    }

    async fn transact<T, F, Fut>(
        &self,
        ctx: &Context,
        opts: TxOptions,
        f: F,
    ) -> Result<T, SqlStmtError>
    where
        T: Send,
        F: FnOnce(Self) -> Fut + Send,
        Fut: Future<Output = Result<T, SqlStmtError>> + Send,
    {
        Database::transact(self, ctx, opts, f).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockDriver;
    use crate::named_params;

    async fn count_twice<E: Executor>(db: &E, ctx: &Context) -> Result<Vec<i64>, SqlStmtError> {
        db.exec(ctx, "INSERT a", None).await?;
        db.select(ctx, "SELECT n", Some(&named_params! { "rows" => 2 }))
            .await
    }

    #[tokio::test]
    async fn generic_code_runs_on_root_and_scoped_handles() {
        let db = Database::new(MockDriver::new());
        let ctx = Context::background();

        assert_eq!(count_twice(&db, &ctx).await.unwrap(), vec![0, 1]);
        let inner = Executor::transact(&db, &ctx, TxOptions::serializable(), |tx| async move {
            count_twice(&tx, &Context::background()).await
        })
        .await
        .unwrap();
        assert_eq!(inner, vec![0, 1]);

        assert_eq!(
            db.driver().events(),
            vec![
                "exec conn INSERT a",
                "query conn SELECT n",
                "begin tx1 Serializable",
                "exec tx1 INSERT a",
                "query tx1 SELECT n",
                "commit tx1",
            ]
        );
        assert_eq!(db.driver().prepare_count("INSERT a"), 1);
    }
}
