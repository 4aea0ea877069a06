use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::SqlStmtError;

use super::params::placeholder_names;

/// A query validated against the database.
///
/// rusqlite statements borrow their connection, so the handle keeps the query
/// text and what preparing it revealed; every execution re-binds it through the
/// executing connection's own statement cache.
#[derive(Debug)]
pub struct SqliteStatement {
    query: String,
    columns: Vec<String>,
    placeholders: Vec<String>,
    released: AtomicBool,
}

impl SqliteStatement {
    /// Prepare `query` on `conn`, leaving the compiled statement in its cache.
    pub(crate) fn describe(conn: &rusqlite::Connection, query: &str) -> Result<Self, SqlStmtError> {
        let stmt = conn.prepare_cached(query)?;
        let columns = stmt
            .column_names()
            .iter()
            .map(std::string::ToString::to_string)
            .collect();
        let placeholders = placeholder_names(&stmt)?;
        Ok(Self {
            query: query.to_owned(),
            columns,
            placeholders,
            released: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub fn query(&self) -> &str {
        &self.query
    }

    /// Result columns; empty for statements that return no rows.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Placeholder names without their sigil, in binding order.
    #[must_use]
    pub fn placeholders(&self) -> &[String] {
        &self.placeholders
    }

    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    pub(crate) fn ensure_live(&self) -> Result<(), SqlStmtError> {
        if self.is_released() {
            Err(SqlStmtError::ExecutionError(format!(
                "statement has been released: {}",
                self.query
            )))
        } else {
            Ok(())
        }
    }

    /// Returns false when the statement was already released.
    pub(crate) fn mark_released(&self) -> bool {
        !self.released.swap(true, Ordering::AcqRel)
    }
}
