//! Convenient imports for common functionality.
//!
//! This module re-exports the most commonly used types and functions
//! to make it easier to get started with the library.

pub use crate::named_params;
pub use crate::{
    Context, CustomDbRow, Database, Driver, ExecResult, Executor, FromRow, FromValue,
    IsolationLevel, NamedParams, ResultSet, RowValues, SqlStmtError, StatementCache, TxOptions,
};

#[cfg(feature = "postgres")]
pub use crate::postgres::{PostgresDriver, PostgresOptionsBuilder};
#[cfg(feature = "sqlite")]
pub use crate::sqlite::{SqliteDriver, SqliteOptionsBuilder};
