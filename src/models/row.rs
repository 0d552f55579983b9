//! Decoded result rows.

use crate::models::SqlValue;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMetadata {
    pub name: String,
    /// Database-specific type (e.g., "int8", "varchar", "TEXT")
    pub type_name: String,
    pub nullable: bool,
}

impl ColumnMetadata {
    /// Create new column metadata.
    pub fn new(name: impl Into<String>, type_name: impl Into<String>, nullable: bool) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            nullable,
        }
    }
}

/// One result row. Column metadata is shared by every row of a result.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[ColumnMetadata]>,
    values: Vec<SqlValue>,
}

impl Row {
    pub fn new(columns: Arc<[ColumnMetadata]>, values: Vec<SqlValue>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    pub fn columns(&self) -> &[ColumnMetadata] {
        &self.columns
    }

    /// The column metadata shared with the other rows of the same result.
    pub fn shared_columns(&self) -> Arc<[ColumnMetadata]> {
        Arc::clone(&self.columns)
    }

    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value by 0-based column index.
    pub fn get(&self, index: usize) -> Option<&SqlValue> {
        self.values.get(index)
    }

    /// Value by column name (case-insensitive).
    pub fn get_by_name(&self, name: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
            .and_then(|idx| self.values.get(idx))
    }

    pub fn into_values(self) -> Vec<SqlValue> {
        self.values
    }

    /// Render as a JSON object keyed by column name.
    pub fn to_json_map(&self) -> serde_json::Map<String, serde_json::Value> {
        self.columns
            .iter()
            .zip(&self.values)
            .map(|(col, value)| (col.name.clone(), value.to_json()))
            .collect()
    }
}
