//! Database access layer.
//!
//! This module provides:
//! - Driver capabilities (pool, connection, statement) and their sqlx adapter
//! - Single-use statement handles and the gateway that opens them
//! - Query and batch executors built on top of the gateway
//! - Type mappings and database dispatch macros

#[macro_use]
pub mod macros;
pub mod batch;
pub mod binder;
pub mod builder;
pub mod connection;
pub mod cursor;
pub mod driver;
pub mod gateway;
pub mod pool;
pub mod query;
pub mod statement;
pub mod types;

pub use batch::{BatchExecutor, BatchMode, BatchRequest};
pub use binder::{Binding, ParamBinder};
pub use builder::GatewayBuilder;
pub use connection::SqlxConnection;
pub use cursor::ResultCursor;
pub use driver::{BoundValue, ConnectionPool, DriverConnection, DriverStatement, PreparedStatement};
pub use gateway::Gateway;
pub use macros::DatabaseType;
pub use pool::{DbPool, PoolStats, SqlxPool};
pub use query::QueryExecutor;
pub use statement::StatementHandle;
