//! Row decoding from sqlx backend rows into [`Row`].
//!
//! # Architecture
//!
//! Decoding uses a two-phase approach:
//! 1. `TypeCategory` classifies column types into logical categories
//! 2. Database-specific decoders handle the actual value extraction

use crate::db::DatabaseType;
use crate::models::{ColumnMetadata, Row, SqlValue};
use chrono::NaiveDateTime;
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueRef};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Decode, Row as _, Type, TypeInfo};
use std::sync::Arc;

// =============================================================================
// Type Classification
// =============================================================================

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Text,
    Binary,
    Json,
    Timestamp,
    Unknown,
}

/// Classify a database type name into a logical category.
pub fn categorize_type(type_name: &str, db: DatabaseType) -> TypeCategory {
    let lower = type_name.to_lowercase();

    // Decimal/Numeric - check first as it overlaps with "numeric" in float checks
    if lower.contains("decimal") || lower.contains("numeric") {
        // SQLite's NUMERIC is actually a float
        if db == DatabaseType::SQLite && lower == "numeric" {
            return TypeCategory::Float;
        }
        return TypeCategory::Decimal;
    }

    if lower.contains("int") || lower.contains("serial") || lower.contains("tiny") {
        return TypeCategory::Integer;
    }

    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }

    if lower.contains("float")
        || lower.contains("double")
        || lower == "real"
        || lower == "float4"
        || lower == "float8"
    {
        return TypeCategory::Float;
    }

    if lower == "json" || lower == "jsonb" {
        return TypeCategory::Json;
    }

    if lower == "timestamp" || lower == "datetime" {
        return TypeCategory::Timestamp;
    }

    if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
        return TypeCategory::Binary;
    }

    if lower.contains("char") || lower == "text" {
        return TypeCategory::Text;
    }

    TypeCategory::Unknown
}

// =============================================================================
// Decimal Type Support
// =============================================================================

/// Raw DECIMAL/NUMERIC value as text, preserving the exact database representation.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl Type<sqlx::MySql> for RawDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("decimal") || name.contains("numeric")
    }
}

impl<'r> Decode<'r, sqlx::MySql> for RawDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::MySql>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

impl Type<sqlx::Postgres> for RawDecimal {
    fn type_info() -> PgTypeInfo {
        <String as Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("numeric") || name.contains("decimal")
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::Postgres>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

// =============================================================================
// Row Decoding
// =============================================================================

/// Convert a backend row into the unified value model.
pub trait DecodeRow {
    fn column_metadata(&self) -> Vec<ColumnMetadata>;
    fn decode_values(&self) -> Vec<SqlValue>;
}

/// Decode a full result set, sharing column metadata across rows.
pub fn decode_rows<R: DecodeRow>(rows: Vec<R>) -> Vec<Row> {
    let Some(first) = rows.first() else {
        return Vec::new();
    };
    let columns: Arc<[ColumnMetadata]> = first.column_metadata().into();
    rows.iter()
        .map(|r| Row::new(Arc::clone(&columns), r.decode_values()))
        .collect()
}

macro_rules! impl_decode_row {
    ($row:ty, $db:expr, $decoder:path) => {
        impl DecodeRow for $row {
            fn column_metadata(&self) -> Vec<ColumnMetadata> {
                self.columns()
                    .iter()
                    .map(|col| {
                        ColumnMetadata::new(
                            col.name(),
                            col.type_info().name(),
                            !col.type_info().is_null(),
                        )
                    })
                    .collect()
            }

            fn decode_values(&self) -> Vec<SqlValue> {
                self.columns()
                    .iter()
                    .enumerate()
                    .map(|(idx, col)| {
                        let category = categorize_type(col.type_info().name(), $db);
                        $decoder(self, idx, category)
                    })
                    .collect()
            }
        }
    };
}

impl_decode_row!(MySqlRow, DatabaseType::MySql, mysql::decode_column);
impl_decode_row!(PgRow, DatabaseType::Postgres, postgres::decode_column);
impl_decode_row!(SqliteRow, DatabaseType::SQLite, sqlite::decode_column);

fn float_value(v: Option<f64>) -> SqlValue {
    v.map(SqlValue::Float).unwrap_or(SqlValue::Null)
}

// =============================================================================
// Database-Specific Decoders
// =============================================================================

mod mysql {
    use super::*;

    pub fn decode_column(row: &MySqlRow, idx: usize, category: TypeCategory) -> SqlValue {
        match category {
            TypeCategory::Decimal => match row.try_get::<Option<RawDecimal>, _>(idx) {
                Ok(Some(v)) => SqlValue::Text(v.0),
                Ok(None) => SqlValue::Null,
                Err(e) => {
                    tracing::error!("Failed to decode DECIMAL: {:?}", e);
                    SqlValue::Null
                }
            },
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => row
                .try_get::<Option<bool>, _>(idx)
                .ok()
                .flatten()
                .map(SqlValue::Bool)
                .unwrap_or(SqlValue::Null),
            TypeCategory::Float => {
                if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
                    return float_value(v);
                }
                float_value(row.try_get::<Option<f32>, _>(idx).ok().flatten().map(f64::from))
            }
            TypeCategory::Binary => decode_bytes(row, idx),
            TypeCategory::Json => row
                .try_get::<Option<serde_json::Value>, _>(idx)
                .ok()
                .flatten()
                .map(SqlValue::Json)
                .unwrap_or(SqlValue::Null),
            TypeCategory::Timestamp => match row.try_get::<Option<NaiveDateTime>, _>(idx) {
                Ok(v) => v.map(SqlValue::Timestamp).unwrap_or(SqlValue::Null),
                Err(_) => decode_text(row, idx),
            },
            _ => decode_text(row, idx),
        }
    }

    fn decode_integer(row: &MySqlRow, idx: usize) -> SqlValue {
        if let Ok(None) = row.try_get::<Option<i64>, _>(idx) {
            return SqlValue::Null;
        }
        if let Ok(Some(v)) = row.try_get::<Option<i8>, _>(idx) {
            return SqlValue::Int(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<i16>, _>(idx) {
            return SqlValue::Int(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<i32>, _>(idx) {
            return SqlValue::Int(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<i64>, _>(idx) {
            return SqlValue::Int(v);
        }
        if let Ok(Some(v)) = row.try_get::<Option<u32>, _>(idx) {
            return SqlValue::Int(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<u64>, _>(idx) {
            // Values above i64::MAX keep their digits as text
            return i64::try_from(v)
                .map(SqlValue::Int)
                .unwrap_or_else(|_| SqlValue::Text(v.to_string()));
        }
        SqlValue::Null
    }

    fn decode_bytes(row: &MySqlRow, idx: usize) -> SqlValue {
        row.try_get::<Option<Vec<u8>>, _>(idx)
            .ok()
            .flatten()
            .map(SqlValue::Bytes)
            .unwrap_or(SqlValue::Null)
    }

    fn decode_text(row: &MySqlRow, idx: usize) -> SqlValue {
        if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
            return v.map(SqlValue::Text).unwrap_or(SqlValue::Null);
        }
        // VARBINARY-backed text columns
        decode_bytes(row, idx)
    }
}

mod postgres {
    use super::*;

    pub fn decode_column(row: &PgRow, idx: usize, category: TypeCategory) -> SqlValue {
        match category {
            TypeCategory::Decimal => match row.try_get::<Option<RawDecimal>, _>(idx) {
                Ok(Some(v)) => SqlValue::Text(v.0),
                Ok(None) => SqlValue::Null,
                Err(e) => {
                    tracing::error!("Failed to decode NUMERIC: {:?}", e);
                    SqlValue::Null
                }
            },
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => row
                .try_get::<Option<bool>, _>(idx)
                .ok()
                .flatten()
                .map(SqlValue::Bool)
                .unwrap_or(SqlValue::Null),
            TypeCategory::Float => {
                if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
                    return float_value(v);
                }
                float_value(row.try_get::<Option<f32>, _>(idx).ok().flatten().map(f64::from))
            }
            TypeCategory::Binary => row
                .try_get::<Option<Vec<u8>>, _>(idx)
                .ok()
                .flatten()
                .map(SqlValue::Bytes)
                .unwrap_or(SqlValue::Null),
            TypeCategory::Json => row
                .try_get::<Option<serde_json::Value>, _>(idx)
                .ok()
                .flatten()
                .map(SqlValue::Json)
                .unwrap_or(SqlValue::Null),
            TypeCategory::Timestamp => row
                .try_get::<Option<NaiveDateTime>, _>(idx)
                .ok()
                .flatten()
                .map(SqlValue::Timestamp)
                .unwrap_or(SqlValue::Null),
            _ => row
                .try_get::<Option<String>, _>(idx)
                .ok()
                .flatten()
                .map(SqlValue::Text)
                .unwrap_or(SqlValue::Null),
        }
    }

    fn decode_integer(row: &PgRow, idx: usize) -> SqlValue {
        if let Ok(None) = row.try_get::<Option<i64>, _>(idx) {
            return SqlValue::Null;
        }
        if let Ok(Some(v)) = row.try_get::<Option<i16>, _>(idx) {
            return SqlValue::Int(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<i32>, _>(idx) {
            return SqlValue::Int(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<i64>, _>(idx) {
            return SqlValue::Int(v);
        }
        SqlValue::Null
    }
}

mod sqlite {
    use super::*;

    pub fn decode_column(row: &SqliteRow, idx: usize, category: TypeCategory) -> SqlValue {
        match category {
            TypeCategory::Integer => row
                .try_get::<Option<i64>, _>(idx)
                .ok()
                .flatten()
                .map(SqlValue::Int)
                .unwrap_or(SqlValue::Null),
            TypeCategory::Boolean => row
                .try_get::<Option<bool>, _>(idx)
                .ok()
                .flatten()
                .map(SqlValue::Bool)
                .unwrap_or(SqlValue::Null),
            TypeCategory::Float | TypeCategory::Decimal => {
                float_value(row.try_get::<Option<f64>, _>(idx).ok().flatten())
            }
            TypeCategory::Binary => row
                .try_get::<Option<Vec<u8>>, _>(idx)
                .ok()
                .flatten()
                .map(SqlValue::Bytes)
                .unwrap_or(SqlValue::Null),
            _ => decode_dynamic(row, idx),
        }
    }

    /// SQLite columns are dynamically typed; expression columns report "NULL"
    /// as their declared type, so try each storage class in turn.
    fn decode_dynamic(row: &SqliteRow, idx: usize) -> SqlValue {
        if let Ok(None) = row.try_get_unchecked::<Option<String>, _>(idx) {
            return SqlValue::Null;
        }
        if let Ok(Some(v)) = row.try_get::<Option<i64>, _>(idx) {
            return SqlValue::Int(v);
        }
        if let Ok(Some(v)) = row.try_get::<Option<f64>, _>(idx) {
            return SqlValue::Float(v);
        }
        if let Ok(Some(v)) = row.try_get::<Option<String>, _>(idx) {
            return SqlValue::Text(v);
        }
        row.try_get::<Option<Vec<u8>>, _>(idx)
            .ok()
            .flatten()
            .map(SqlValue::Bytes)
            .unwrap_or(SqlValue::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categorize_type_integer() {
        assert_eq!(
            categorize_type("INT", DatabaseType::MySql),
            TypeCategory::Integer
        );
        assert_eq!(
            categorize_type("BIGINT", DatabaseType::Postgres),
            TypeCategory::Integer
        );
        assert_eq!(
            categorize_type("INTEGER", DatabaseType::SQLite),
            TypeCategory::Integer
        );
    }

    #[test]
    fn test_categorize_type_decimal() {
        assert_eq!(
            categorize_type("DECIMAL", DatabaseType::MySql),
            TypeCategory::Decimal
        );
        // SQLite NUMERIC is a float
        assert_eq!(
            categorize_type("numeric", DatabaseType::SQLite),
            TypeCategory::Float
        );
    }

    #[test]
    fn test_categorize_type_misc() {
        assert_eq!(
            categorize_type("jsonb", DatabaseType::Postgres),
            TypeCategory::Json
        );
        assert_eq!(
            categorize_type("DATETIME", DatabaseType::MySql),
            TypeCategory::Timestamp
        );
        assert_eq!(
            categorize_type("VARCHAR", DatabaseType::MySql),
            TypeCategory::Text
        );
        assert_eq!(
            categorize_type("NULL", DatabaseType::SQLite),
            TypeCategory::Unknown
        );
    }
}
