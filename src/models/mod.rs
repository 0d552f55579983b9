//! Data models for sqlgate.
//!
//! This module re-exports the value and row types shared by every backend.

pub mod row;
pub mod value;

pub use row::{ColumnMetadata, Row};
pub use value::{SqlType, SqlValue};
