//! Read-only questions asked of a live database.

use crate::alembic::VERSION_TABLE;
use crate::error::Result;
use async_trait::async_trait;

/// Introspection of one live database
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DatabaseInspector: Send + Sync {
    /// Names of the tables in the database
    async fn list_tables(&self) -> Result<Vec<String>>;

    /// Run the owner → writer → reader canary once
    ///
    /// Succeeds only when an HA operator has finished provisioning the database's
    /// roles and their default privileges.
    async fn check_role_privileges(&self) -> Result<()>;
}

/// A database holding nothing but the migration tool's bookkeeping table is empty
pub fn is_database_empty(tables: &[String]) -> bool {
    tables.iter().all(|table| table == VERSION_TABLE)
}
