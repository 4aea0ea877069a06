use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::runtime::Handle;

use crate::error::SqlStmtError;
use crate::types::{IsolationLevel, TxOptions};

use super::connection::{SharedSqliteConnection, SqlitePooledConnection};

/// `SQLite` runs every transaction serializably; the levels only decide whether the
/// write lock is taken up front.
pub(crate) fn begin_statement(opts: &TxOptions) -> &'static str {
    match opts.isolation {
        IsolationLevel::Serializable | IsolationLevel::Linearizable => "BEGIN IMMEDIATE",
        _ => "BEGIN DEFERRED",
    }
}

/// The pooled connection an open transaction runs on.
///
/// Dropping one that was never finished rolls it back before the connection goes
/// back to the pool.
pub(crate) struct TxConn {
    conn: Option<SqlitePooledConnection>,
    read_only: bool,
}

impl TxConn {
    /// Issue BEGIN on `conn`. Call from a blocking thread.
    pub(crate) fn begin(conn: SqlitePooledConnection, opts: &TxOptions) -> Result<Self, SqlStmtError> {
        conn.lock_blocking().execute_batch(begin_statement(opts))?;
        let tx = Self {
            conn: Some(conn),
            read_only: opts.read_only,
        };
        if opts.read_only
            && let Some(conn) = &tx.conn
        {
            conn.lock_blocking()
                .execute_batch("PRAGMA query_only = ON")?;
        }
        Ok(tx)
    }

    pub(crate) fn handle(&self) -> Option<SharedSqliteConnection> {
        self.conn.as_ref().map(|c| Arc::clone(&**c))
    }

    /// Run COMMIT or ROLLBACK. Call from a blocking thread. The connection is left
    /// outside any transaction whatever the outcome.
    pub(crate) fn finish(mut self, sql: &'static str) -> Result<(), SqlStmtError> {
        let Some(conn) = self.conn.take() else {
            return Err(SqlStmtError::TransactionDone);
        };
        reset(&conn, sql, self.read_only)
    }
}

fn reset(conn: &SharedSqliteConnection, sql: &str, read_only: bool) -> Result<(), SqlStmtError> {
    let guard = conn.lock_blocking();
    // SQLite already rolled back on its own (interrupted write, SQLITE_FULL, IOERR).
    // A lost COMMIT is still reported.
    let res = if sql == "ROLLBACK" && guard.is_autocommit() {
        tracing::debug!("sqlite transaction already rolled back");
        Ok(())
    } else {
        guard.execute_batch(sql)
    };
    if !guard.is_autocommit() {
        let _ = guard.execute_batch("ROLLBACK");
    }
    if read_only {
        let _ = guard.execute_batch("PRAGMA query_only = OFF");
    }
    res.map_err(SqlStmtError::SqliteError)
}

impl Drop for TxConn {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        tracing::warn!("rolling back unfinished sqlite transaction");
        let read_only = self.read_only;
        // The pooled connection moves into the closure so it is only returned to the
        // pool after the rollback ran.
        let rollback = move || {
            if let Err(e) = reset(&conn, "ROLLBACK", read_only) {
                tracing::warn!(error = %e, "implicit sqlite rollback failed");
            }
        };
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(rollback);
            }
            Err(_) => rollback(),
        }
    }
}

/// Open `SQLite` transaction. Owns one pooled connection until commit or rollback.
pub struct SqliteTx {
    conn: Mutex<Option<TxConn>>,
    opts: TxOptions,
}

impl SqliteTx {
    pub(crate) fn new(conn: TxConn, opts: TxOptions) -> Self {
        Self {
            conn: Mutex::new(Some(conn)),
            opts,
        }
    }

    #[must_use]
    pub fn options(&self) -> &TxOptions {
        &self.opts
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.conn
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// The transaction's connection, for running a statement inside it.
    pub(crate) fn handle(&self) -> Result<SharedSqliteConnection, SqlStmtError> {
        self.conn
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(TxConn::handle)
            .ok_or(SqlStmtError::TransactionDone)
    }

    /// Take the connection for commit or rollback. Only the first caller gets it.
    pub(crate) fn take(&self) -> Result<TxConn, SqlStmtError> {
        self.conn
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(SqlStmtError::TransactionDone)
    }
}

impl fmt::Debug for SqliteTx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteTx")
            .field("opts", &self.opts)
            .field("done", &self.is_done())
            .finish()
    }
}
