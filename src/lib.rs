//! sqlgate library
//!
//! Pooled, single-use SQL statement execution for SQLite, PostgreSQL and
//! MySQL. Every execution acquires one connection, runs one statement (or one
//! batch in a transaction) and hands the connection back: returned to the
//! pool when everything went well, evicted when anything failed.

pub mod config;
pub mod db;
pub mod error;
pub mod models;

pub use config::{Config, ReleasePolicy};
pub use db::{BatchExecutor, Gateway, GatewayBuilder, ParamBinder, QueryExecutor, ResultCursor};
pub use error::{DbError, DbResult};
