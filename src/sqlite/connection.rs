use std::fmt;
use std::sync::Arc;

use bb8::PooledConnection;
use tokio::sync::{Mutex, MutexGuard};
use tokio::task::spawn_blocking;

use crate::context::Context;
use crate::error::SqlStmtError;

use super::config::SqliteManager;

/// One rusqlite connection plus the handle that interrupts statements running on it.
pub struct SqliteConnection {
    conn: Mutex<rusqlite::Connection>,
    interrupt: rusqlite::InterruptHandle,
}

pub(crate) type SharedSqliteConnection = Arc<SqliteConnection>;
pub(crate) type SqlitePooledConnection = PooledConnection<'static, SqliteManager>;

impl SqliteConnection {
    pub(crate) fn new(conn: rusqlite::Connection) -> Self {
        let interrupt = conn.get_interrupt_handle();
        Self {
            conn: Mutex::new(conn),
            interrupt,
        }
    }

    /// Lock from a blocking thread. Panics inside an async context.
    pub(crate) fn lock_blocking(&self) -> MutexGuard<'_, rusqlite::Connection> {
        self.conn.blocking_lock()
    }

    /// Abort whatever statement is currently running on this connection.
    pub fn interrupt(&self) {
        self.interrupt.interrupt();
    }
}

impl fmt::Debug for SqliteConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteConnection").finish_non_exhaustive()
    }
}

/// A connection borrowed for one blocking call.
///
/// A pooled lease goes back to the pool only once the blocking call has finished,
/// even if the awaiting future was dropped first.
pub(crate) enum Lease {
    Pooled(SqlitePooledConnection),
    Shared(SharedSqliteConnection),
}

impl Lease {
    pub(crate) fn handle(&self) -> &SharedSqliteConnection {
        match self {
            Lease::Pooled(conn) => &**conn,
            Lease::Shared(conn) => conn,
        }
    }
}

pub(crate) async fn run_blocking<F, R>(lease: Lease, func: F) -> Result<R, SqlStmtError>
where
    F: FnOnce(&mut rusqlite::Connection) -> Result<R, SqlStmtError> + Send + 'static,
    R: Send + 'static,
{
    run_owned(move || {
        let mut guard = lease.handle().lock_blocking();
        func(&mut guard)
    })
    .await
}

/// Run `func` on the blocking pool. Whatever `func` owns is dropped there, after it
/// returns, even when the awaiting future is gone.
pub(crate) async fn run_owned<F, R>(func: F) -> Result<R, SqlStmtError>
where
    F: FnOnce() -> Result<R, SqlStmtError> + Send + 'static,
    R: Send + 'static,
{
    spawn_blocking(func)
        .await
        .map_err(|e| SqlStmtError::ExecutionError(format!("sqlite spawn_blocking join error: {e}")))?
}

/// [`run_blocking`] bounded by `ctx`: when the context fires first the running
/// statement is interrupted, and a call still queued behind the connection lock
/// never starts.
pub(crate) async fn run_interruptible<F, R>(
    ctx: &Context,
    lease: Lease,
    func: F,
) -> Result<R, SqlStmtError>
where
    F: FnOnce(&mut rusqlite::Connection) -> Result<R, SqlStmtError> + Send + 'static,
    R: Send + 'static,
{
    let target = Arc::clone(lease.handle());
    let guard_ctx = ctx.clone();
    ctx.run(
        run_blocking(lease, move |conn| {
            guard_ctx.check()?;
            func(conn)
        }),
        move || {
            tracing::debug!("interrupting sqlite statement");
            target.interrupt();
        },
    )
    .await
}
