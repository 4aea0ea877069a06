use thiserror::Error;

#[derive(Debug, Error)]
pub enum SqlStmtError {
    #[cfg(feature = "postgres")]
    #[error(transparent)]
    PostgresError(#[from] tokio_postgres::Error),

    #[cfg(feature = "sqlite")]
    #[error(transparent)]
    SqliteError(#[from] rusqlite::Error),

    #[cfg(feature = "postgres")]
    #[error(transparent)]
    PoolErrorPostgres(#[from] deadpool_postgres::PoolError),

    /// The driver could not parse or prepare the query text. Never retried.
    #[error("prepare `{query}`: {source}")]
    Prepare {
        query: String,
        #[source]
        source: Box<SqlStmtError>,
    },

    /// Execution, row-count or decode failure of a cached statement.
    #[error("query `{query}`: {source}")]
    Query {
        query: String,
        #[source]
        source: Box<SqlStmtError>,
    },

    #[error("nested tx not currently supported (already at tx level {depth})")]
    UnsupportedNesting { depth: u32 },

    #[error("tx level {depth}: begin: {source}")]
    TxBegin {
        depth: u32,
        #[source]
        source: Box<SqlStmtError>,
    },

    #[error("tx level {depth}: commit: {source}")]
    TxCommit {
        depth: u32,
        #[source]
        source: Box<SqlStmtError>,
    },

    /// Rolling back after a failed unit of work failed too. The data may be left
    /// locked or inconsistent; `cause` is the unit-of-work error that triggered it.
    #[error("tx level {depth}: rollback: {source} (unit of work failed: {cause})")]
    TxRollback {
        depth: u32,
        #[source]
        source: Box<SqlStmtError>,
        cause: Box<SqlStmtError>,
    },

    /// The unit of work failed and the transaction was rolled back cleanly.
    #[error("tx level {depth}: {source}")]
    TxAborted {
        depth: u32,
        #[source]
        source: Box<SqlStmtError>,
    },

    #[error("no rows returned by a query that expected exactly one row")]
    RowNotFound,

    #[error("query that expected exactly one row returned {0} rows")]
    TooManyRows(usize),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("missing named parameter: {0}")]
    MissingParameter(String),

    #[error("operation cancelled: {0}")]
    Cancelled(String),

    #[error("statement cache has been closed")]
    CacheClosed,

    #[error("transaction already completed")]
    TransactionDone,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Parameter conversion error: {0}")]
    ParameterError(String),

    #[error("SQL execution error: {0}")]
    ExecutionError(String),

    #[error("Other database error: {0}")]
    Other(String),
}

impl SqlStmtError {
    pub(crate) fn prepare(query: &str, source: SqlStmtError) -> Self {
        SqlStmtError::Prepare {
            query: query.to_owned(),
            source: Box::new(source),
        }
    }

    pub(crate) fn query(query: &str, source: SqlStmtError) -> Self {
        SqlStmtError::Query {
            query: query.to_owned(),
            source: Box::new(source),
        }
    }

    /// Follow the boxed wrapping chain down to the error that started it.
    ///
    /// For [`SqlStmtError::TxRollback`] this is the rollback failure, not the
    /// unit-of-work error carried in `cause`.
    #[must_use]
    pub fn root_cause(&self) -> &SqlStmtError {
        let mut current = self;
        loop {
            match current {
                SqlStmtError::Prepare { source, .. }
                | SqlStmtError::Query { source, .. }
                | SqlStmtError::TxBegin { source, .. }
                | SqlStmtError::TxCommit { source, .. }
                | SqlStmtError::TxRollback { source, .. }
                | SqlStmtError::TxAborted { source, .. } => current = source,
                _ => return current,
            }
        }
    }

    /// True when the operation stopped because its [`Context`](crate::Context) fired.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self.root_cause(), SqlStmtError::Cancelled(_))
    }

    #[must_use]
    pub fn is_unsupported_nesting(&self) -> bool {
        matches!(self.root_cause(), SqlStmtError::UnsupportedNesting { .. })
    }
}

#[cfg(feature = "sqlite")]
impl From<bb8::RunError<SqlStmtError>> for SqlStmtError {
    fn from(err: bb8::RunError<SqlStmtError>) -> Self {
        match err {
            bb8::RunError::User(inner) => inner,
            bb8::RunError::TimedOut => {
                SqlStmtError::ConnectionError("SQLite pool checkout timed out".into())
            }
        }
    }
}
