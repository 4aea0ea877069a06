//! Named-statement cache and transaction scoping for async SQL clients.
//!
//! A [`Database`] runs every query as a cached named statement: the first use of a
//! query text prepares it, later uses (from any clone of the handle, and from
//! inside any transaction) reuse the same statement. [`Database::transact`] runs a
//! unit of work in a transaction, commits on success and rolls back on failure.
//!
//! Drivers plug in through the [`Driver`] trait. With the default features the crate
//! ships one for `SQLite` (rusqlite behind a bb8 pool) and one for `PostgreSQL`
//! (tokio-postgres behind a deadpool pool).
//!
//! ```rust,no_run
//! use sql_stmt_cache::prelude::*;
//!
//! # async fn demo() -> Result<(), SqlStmtError> {
//! let driver = SqliteOptionsBuilder::new("users.db".into()).build().await?;
//! driver
//!     .execute_batch("CREATE TABLE IF NOT EXISTS users (id INTEGER PRIMARY KEY, name TEXT UNIQUE)")
//!     .await?;
//! let db = Database::new(driver);
//! let ctx = Context::background();
//!
//! let id: i64 = db
//!     .transact(&ctx, TxOptions::serializable(), |tx| async move {
//!         let ctx = Context::background();
//!         tx.exec(&ctx, "INSERT INTO users (name) VALUES (:name)", Some(&named_params! { "name" => "ada" }))
//!             .await?;
//!         tx.get(&ctx, "SELECT id FROM users WHERE name = :name", Some(&named_params! { "name" => "ada" }))
//!             .await
//!     })
//!     .await?;
//! println!("ada has id {id}");
//! db.close().await?;
//! # Ok(()) }
//! ```

mod cache;
mod context;
mod database;
mod decode;
mod driver;
mod error;
mod executor;
mod params;
pub mod prelude;
mod results;
mod types;

#[cfg(test)]
mod mock;

#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use cache::StatementCache;
pub use context::Context;
pub use database::Database;
pub use decode::{FromRow, FromValue, deserialize_row};
pub use driver::{Driver, Target};
pub use error::SqlStmtError;
pub use executor::Executor;
pub use params::NamedParams;
pub use results::{CustomDbRow, ResultSet};
pub use types::{ExecResult, IsolationLevel, RowValues, TxOptions};

pub use tokio_util::sync::CancellationToken;

#[cfg(feature = "postgres")]
pub use postgres::{PostgresDriver, PostgresOptions, PostgresOptionsBuilder};
#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteDriver, SqliteOptions, SqliteOptionsBuilder};
