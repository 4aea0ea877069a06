use std::fmt;

use deadpool_postgres::Object;
use tokio::runtime::Handle;
use tokio::sync::{Mutex, MutexGuard};

use crate::context::Context;
use crate::error::SqlStmtError;
use crate::types::{IsolationLevel, TxOptions};

use super::spawn_cancel;

/// `BEGIN` text for `opts`.
///
/// # Errors
/// Returns `SqlStmtError::ParameterError` for levels Postgres has no equivalent of.
pub(crate) fn begin_statement(opts: &TxOptions) -> Result<String, SqlStmtError> {
    let level = match opts.isolation {
        IsolationLevel::Default => None,
        IsolationLevel::ReadUncommitted => Some("READ UNCOMMITTED"),
        IsolationLevel::ReadCommitted => Some("READ COMMITTED"),
        IsolationLevel::RepeatableRead => Some("REPEATABLE READ"),
        IsolationLevel::Serializable => Some("SERIALIZABLE"),
        other => {
            return Err(SqlStmtError::ParameterError(format!(
                "postgres does not support isolation level {other:?}"
            )));
        }
    };
    let mut sql = String::from("BEGIN");
    if let Some(level) = level {
        sql.push_str(" ISOLATION LEVEL ");
        sql.push_str(level);
    }
    if opts.read_only {
        sql.push_str(" READ ONLY");
    }
    Ok(sql)
}

/// Open Postgres transaction. Owns one pooled client until commit or rollback;
/// dropping it unfinished sends `ROLLBACK` before the client returns to the pool.
pub struct PostgresTx {
    client: Mutex<Option<Object>>,
    opts: TxOptions,
}

impl PostgresTx {
    pub(crate) fn new(client: Object, opts: TxOptions) -> Self {
        Self {
            client: Mutex::new(Some(client)),
            opts,
        }
    }

    #[must_use]
    pub fn options(&self) -> &TxOptions {
        &self.opts
    }

    /// Exclusive access to the transaction's client for one statement.
    pub(crate) async fn session(&self) -> Result<MutexGuard<'_, Option<Object>>, SqlStmtError> {
        let guard = self.client.lock().await;
        if guard.is_none() {
            return Err(SqlStmtError::TransactionDone);
        }
        Ok(guard)
    }

    /// Run `sql` (COMMIT or ROLLBACK) and release the client. Only the first call
    /// gets to run; a failed or abandoned finish leaves the client to `Drop`.
    pub(crate) async fn finish(&self, ctx: &Context, sql: &'static str) -> Result<(), SqlStmtError> {
        let mut guard = self.client.lock().await;
        let Some(client) = guard.as_ref() else {
            return Err(SqlStmtError::TransactionDone);
        };
        let cancel = client.cancel_token();
        let res = ctx
            .run(
                async { client.batch_execute(sql).await.map_err(SqlStmtError::from) },
                move || spawn_cancel(cancel),
            )
            .await;
        let client = guard.take();
        match res {
            Ok(()) => Ok(()),
            Err(err) => {
                if let Some(client) = client {
                    rollback_detached(client);
                }
                Err(err)
            }
        }
    }
}

fn rollback_detached(client: Object) {
    match Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                if let Err(e) = client.batch_execute("ROLLBACK").await {
                    tracing::warn!(error = %e, "implicit postgres rollback failed");
                }
            });
        }
        Err(_) => {
            tracing::warn!("no runtime to roll back postgres transaction; discarding client");
            let _ = Object::take(client);
        }
    }
}

impl Drop for PostgresTx {
    fn drop(&mut self) {
        if let Some(client) = self.client.get_mut().take() {
            tracing::warn!("rolling back unfinished postgres transaction");
            rollback_detached(client);
        }
    }
}

impl fmt::Debug for PostgresTx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresTx")
            .field("opts", &self.opts)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_names_level_and_access_mode() {
        assert_eq!(
            begin_statement(&TxOptions::serializable()).unwrap(),
            "BEGIN ISOLATION LEVEL SERIALIZABLE"
        );
        assert_eq!(
            begin_statement(&TxOptions::new(IsolationLevel::Default).read_only(true)).unwrap(),
            "BEGIN READ ONLY"
        );
        assert_eq!(
            begin_statement(&TxOptions::new(IsolationLevel::RepeatableRead)).unwrap(),
            "BEGIN ISOLATION LEVEL REPEATABLE READ"
        );
    }

    #[test]
    fn unsupported_levels_are_rejected() {
        for level in [
            IsolationLevel::WriteCommitted,
            IsolationLevel::Snapshot,
            IsolationLevel::Linearizable,
        ] {
            assert!(matches!(
                begin_statement(&TxOptions::new(level)),
                Err(SqlStmtError::ParameterError(_))
            ));
        }
    }
}
