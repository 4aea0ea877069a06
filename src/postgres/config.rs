use deadpool_postgres::{Config as PgConfig, ManagerConfig, PoolConfig, RecyclingMethod, Runtime};
use tokio_postgres::NoTls;

use crate::error::SqlStmtError;

use super::PostgresDriver;

/// Options for configuring a Postgres pool.
#[derive(Debug, Clone)]
pub struct PostgresOptions {
    pub config: PgConfig,
    /// Upper bound on pooled connections. Each open transaction holds one.
    pub pool_size: Option<usize>,
}

impl PostgresOptions {
    #[must_use]
    pub fn new(config: PgConfig) -> Self {
        Self {
            config,
            pool_size: None,
        }
    }

    /// Check the fields a connection cannot be made without.
    ///
    /// # Errors
    /// Returns `SqlStmtError::ConfigError` naming the first missing field.
    pub fn validate(&self) -> Result<(), SqlStmtError> {
        let cfg = &self.config;
        let missing = if cfg.dbname.is_none() {
            Some("dbname")
        } else if cfg.host.is_none() && cfg.hosts.is_none() {
            Some("host")
        } else if cfg.port.is_none() && cfg.ports.is_none() {
            Some("port")
        } else if cfg.user.is_none() {
            Some("user")
        } else {
            None
        };
        match missing {
            Some(field) => Err(SqlStmtError::ConfigError(format!("{field} is required"))),
            None if self.pool_size == Some(0) => Err(SqlStmtError::ConfigError(
                "postgres pool_size must be at least 1".into(),
            )),
            None => Ok(()),
        }
    }
}

/// Fluent builder for Postgres options.
#[derive(Debug, Clone)]
pub struct PostgresOptionsBuilder {
    opts: PostgresOptions,
}

impl PostgresOptionsBuilder {
    #[must_use]
    pub fn new(config: PgConfig) -> Self {
        Self {
            opts: PostgresOptions::new(config),
        }
    }

    #[must_use]
    pub fn pool_size(mut self, pool_size: usize) -> Self {
        self.opts.pool_size = Some(pool_size);
        self
    }

    #[must_use]
    pub fn finish(self) -> PostgresOptions {
        self.opts
    }

    /// Create the pool and check out one connection as a smoke test.
    ///
    /// # Errors
    /// Returns `SqlStmtError::ConfigError` if required config fields are missing and
    /// `SqlStmtError::ConnectionError` or a pool error if connecting fails.
    pub async fn build(self) -> Result<PostgresDriver, SqlStmtError> {
        PostgresDriver::connect(self.finish()).await
    }
}

pub(crate) fn create_pool(opts: PostgresOptions) -> Result<deadpool_postgres::Pool, SqlStmtError> {
    opts.validate()?;
    let mut cfg = opts.config;
    // Verified recycling keeps each connection's prepared statement cache alive.
    cfg.manager.get_or_insert(ManagerConfig {
        recycling_method: RecyclingMethod::Verified,
    });
    if let Some(size) = opts.pool_size {
        cfg.pool = Some(PoolConfig::new(size));
    }
    cfg.create_pool(Some(Runtime::Tokio1), NoTls).map_err(|e| {
        SqlStmtError::ConnectionError(format!("Failed to create Postgres pool: {e}"))
    })
}
