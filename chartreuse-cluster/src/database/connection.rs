//! Database connection pool management

use crate::database::config::{DatabaseType, sqlx_url};
use crate::database::error::DatabaseError;
use sqlx::{MySqlPool, PgPool, mysql::MySqlPoolOptions, postgres::PgPoolOptions};
use std::time::Duration;
use tracing::debug;

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// Database connection pool wrapper
#[derive(Debug, Clone)]
pub enum DatabasePool {
    /// PostgreSQL connection pool
    Postgres(PgPool),
    /// MySQL connection pool
    MySql(MySqlPool),
}

impl DatabasePool {
    /// Create a pool that connects on first use
    ///
    /// Only the URL is validated here. One connection is enough for the few
    /// statements a hook runs.
    pub fn connect_lazy(
        database: &str,
        database_type: DatabaseType,
        url: &str,
    ) -> Result<Self, DatabaseError> {
        let url = sqlx_url(url);
        let connection_error = |e: sqlx::Error| DatabaseError::Connection {
            database: database.to_string(),
            message: e.to_string(),
        };
        let pool = match database_type {
            DatabaseType::Postgres => DatabasePool::Postgres(
                PgPoolOptions::new()
                    .max_connections(1)
                    .acquire_timeout(ACQUIRE_TIMEOUT)
                    .connect_lazy(&url)
                    .map_err(connection_error)?,
            ),
            DatabaseType::MySql => DatabasePool::MySql(
                MySqlPoolOptions::new()
                    .max_connections(1)
                    .acquire_timeout(ACQUIRE_TIMEOUT)
                    .connect_lazy(&url)
                    .map_err(connection_error)?,
            ),
        };
        debug!(database = %database, database_type = %database_type, "Connection pool created");
        Ok(pool)
    }

    pub fn database_type(&self) -> DatabaseType {
        match self {
            DatabasePool::Postgres(_) => DatabaseType::Postgres,
            DatabasePool::MySql(_) => DatabaseType::MySql,
        }
    }

    /// Get the underlying PostgreSQL pool
    /// Returns None if this is not a PostgreSQL pool
    pub fn as_postgres(&self) -> Option<&PgPool> {
        match self {
            DatabasePool::Postgres(pool) => Some(pool),
            DatabasePool::MySql(_) => None,
        }
    }
}
