//! Live database introspection for the migration hooks
//!
//! Connections are opened lazily through sqlx pools, so building an inspector for a
//! database that is never queried costs nothing. PostgreSQL and MySQL are supported.

pub mod config;
pub mod connection;
pub mod error;
pub mod inspector;

pub use config::{DatabaseType, sqlx_url};
pub use connection::DatabasePool;
pub use error::DatabaseError;
pub use inspector::{SqlDatabaseInspector, UnsupportedDialectInspector, inspector_for};
