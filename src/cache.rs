use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::driver::Driver;
use crate::error::SqlStmtError;

struct Entries<S> {
    stmts: HashMap<String, Arc<S>>,
    closed: bool,
}

/// Query text → prepared statement map shared by a root handle and every
/// transaction-scoped handle derived from it.
///
/// The lock covers the whole lookup-or-prepare sequence, so each distinct query is
/// prepared at most once. It is never held while a statement executes.
pub struct StatementCache<D: Driver> {
    entries: Mutex<Entries<D::Statement>>,
}

impl<D: Driver> Default for StatementCache<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: Driver> StatementCache<D> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Entries {
                stmts: HashMap::new(),
                closed: false,
            }),
        }
    }

    /// Return the cached statement for `query`, preparing it on first use.
    ///
    /// # Errors
    /// Returns [`SqlStmtError::Prepare`] if the driver rejects the query (nothing is
    /// cached in that case) and [`SqlStmtError::CacheClosed`] after teardown.
    pub async fn resolve(&self, driver: &D, query: &str) -> Result<Arc<D::Statement>, SqlStmtError> {
        let mut entries = self.entries.lock().await;
        if entries.closed {
            return Err(SqlStmtError::CacheClosed);
        }
        if let Some(stmt) = entries.stmts.get(query) {
            return Ok(Arc::clone(stmt));
        }

        tracing::debug!(query, "preparing named statement");
        let stmt = driver
            .prepare_named(query)
            .await
            .map_err(|e| SqlStmtError::prepare(query, e))?;
        let stmt = Arc::new(stmt);
        entries.stmts.insert(query.to_owned(), Arc::clone(&stmt));
        Ok(stmt)
    }

    /// Release every cached statement and refuse further use.
    ///
    /// All entries are released even when some releases fail; the first failure is
    /// returned. Calling it again is a no-op.
    ///
    /// # Errors
    /// Returns the first error reported by [`Driver::release`].
    pub async fn teardown(&self, driver: &D) -> Result<(), SqlStmtError> {
        let mut entries = self.entries.lock().await;
        entries.closed = true;
        let stmts = std::mem::take(&mut entries.stmts);
        tracing::debug!(count = stmts.len(), "releasing cached statements");

        let mut first_err = None;
        for (query, stmt) in stmts {
            if let Err(err) = driver.release(&stmt).await {
                tracing::warn!(query = %query, error = %err, "failed to release statement");
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.stmts.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn is_closed(&self) -> bool {
        self.entries.lock().await.closed
    }
}

impl<D: Driver> fmt::Debug for StatementCache<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_struct("StatementCache");
        match self.entries.try_lock() {
            Ok(entries) => dbg
                .field("len", &entries.stmts.len())
                .field("closed", &entries.closed),
            Err(_) => dbg.field("entries", &"<locked>"),
        };
        dbg.finish()
    }
}
