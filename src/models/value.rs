//! Bind values and type hints.
//!
//! `SqlValue` is the unified value type passed to and decoded from every
//! backend. `SqlType` is an optional hint attached to a binding; when present
//! the value is coerced to the hinted type before it reaches the driver.

use crate::error::{DbError, DbResult};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Timestamp formats accepted when coercing text to `SqlType::Timestamp`.
const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
];

/// A single bind or result value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    /// Stored as i64 for maximum range
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Json(JsonValue),
    Timestamp(NaiveDateTime),
}

impl SqlValue {
    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this value for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Bytes(_) => "bytes",
            Self::Json(_) => "json",
            Self::Timestamp(_) => "timestamp",
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Convert a JSON value into a bind value.
    ///
    /// Arrays and objects become `SqlValue::Json`.
    pub fn from_json(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => Self::Null,
            JsonValue::Bool(b) => Self::Bool(b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            JsonValue::String(s) => Self::Text(s),
            other => Self::Json(other),
        }
    }

    /// Render this value as JSON. Binary data is base64 encoded.
    pub fn to_json(&self) -> JsonValue {
        use base64::{Engine as _, engine::general_purpose::STANDARD};

        match self {
            Self::Null => JsonValue::Null,
            Self::Bool(b) => JsonValue::Bool(*b),
            Self::Int(i) => JsonValue::Number((*i).into()),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or_else(|| JsonValue::String(f.to_string())),
            Self::Text(s) => JsonValue::String(s.clone()),
            Self::Bytes(b) => JsonValue::String(STANDARD.encode(b)),
            Self::Json(v) => v.clone(),
            Self::Timestamp(ts) => JsonValue::String(ts.to_string()),
        }
    }

    /// Coerce this value to the hinted type.
    ///
    /// A null stays null regardless of the hint; the hint then only selects
    /// the SQL type of the null sent to the driver.
    pub fn coerce(self, hint: SqlType) -> Result<Self, String> {
        let mismatch = |v: &SqlValue| format!("cannot bind {} value as {}", v.type_name(), hint);

        if self.is_null() {
            return Ok(self);
        }

        match hint {
            SqlType::Boolean => match self {
                Self::Bool(_) => Ok(self),
                Self::Int(0) => Ok(Self::Bool(false)),
                Self::Int(1) => Ok(Self::Bool(true)),
                Self::Text(ref s) => match s.to_ascii_lowercase().as_str() {
                    "true" | "1" => Ok(Self::Bool(true)),
                    "false" | "0" => Ok(Self::Bool(false)),
                    _ => Err(mismatch(&self)),
                },
                ref other => Err(mismatch(other)),
            },
            SqlType::SmallInt | SqlType::Integer | SqlType::BigInt => {
                let value = match self {
                    Self::Int(i) => i,
                    Self::Bool(b) => i64::from(b),
                    // i64::MAX as f64 rounds up to 2^63, which is already out of range.
                    Self::Float(f)
                        if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 =>
                    {
                        f as i64
                    }
                    Self::Float(f) if f.fract() == 0.0 && f.is_finite() => {
                        return Err(format!("value {} out of range for {}", f, hint));
                    }
                    Self::Text(ref s) => s.trim().parse::<i64>().map_err(|_| mismatch(&self))?,
                    ref other => return Err(mismatch(other)),
                };
                let in_range = match hint {
                    SqlType::SmallInt => i16::try_from(value).is_ok(),
                    SqlType::Integer => i32::try_from(value).is_ok(),
                    _ => true,
                };
                if in_range {
                    Ok(Self::Int(value))
                } else {
                    Err(format!("value {} out of range for {}", value, hint))
                }
            }
            SqlType::Real | SqlType::Double => {
                let value = match self {
                    Self::Float(f) => f,
                    Self::Int(i) => i as f64,
                    Self::Text(ref s) => s.trim().parse::<f64>().map_err(|_| mismatch(&self))?,
                    ref other => return Err(mismatch(other)),
                };
                if hint == SqlType::Real && value.is_finite() && (value as f32).is_infinite() {
                    Err(format!("value {} out of range for {}", value, hint))
                } else {
                    Ok(Self::Float(value))
                }
            }
            SqlType::Varchar => match self {
                Self::Text(_) => Ok(self),
                Self::Bool(b) => Ok(Self::Text(b.to_string())),
                Self::Int(i) => Ok(Self::Text(i.to_string())),
                Self::Float(f) => Ok(Self::Text(f.to_string())),
                Self::Json(v) => Ok(Self::Text(v.to_string())),
                Self::Timestamp(ts) => Ok(Self::Text(ts.to_string())),
                Self::Bytes(b) => String::from_utf8(b)
                    .map(Self::Text)
                    .map_err(|_| format!("binary value is not valid UTF-8 for {}", hint)),
                Self::Null => Ok(Self::Null),
            },
            SqlType::Blob => match self {
                Self::Bytes(_) => Ok(self),
                Self::Text(s) => Ok(Self::Bytes(s.into_bytes())),
                ref other => Err(mismatch(other)),
            },
            SqlType::Json => match self {
                Self::Json(_) => Ok(self),
                Self::Text(ref s) => serde_json::from_str(s)
                    .map(Self::Json)
                    .map_err(|e| format!("invalid JSON text: {}", e)),
                other => Ok(Self::Json(other.to_json())),
            },
            SqlType::Timestamp => match self {
                Self::Timestamp(_) => Ok(self),
                Self::Text(ref s) => TIMESTAMP_FORMATS
                    .iter()
                    .find_map(|fmt| NaiveDateTime::parse_from_str(s.trim(), fmt).ok())
                    .map(Self::Timestamp)
                    .ok_or_else(|| mismatch(&self)),
                ref other => Err(mismatch(other)),
            },
        }
    }

    /// Coerce with an optional hint, mapping failures to a bind error at `position`.
    pub(crate) fn resolve(self, position: usize, hint: Option<SqlType>) -> DbResult<Self> {
        match hint {
            Some(hint) => self
                .coerce(hint)
                .map_err(|message| DbError::bind(position, message)),
            None => Ok(self),
        }
    }
}

impl std::fmt::Display for SqlValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Text(s) => write!(f, "'{}'", s),
            Self::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

macro_rules! impl_from_int {
    ($($t:ty),+) => {
        $(
            impl From<$t> for SqlValue {
                fn from(v: $t) -> Self {
                    SqlValue::Int(i64::from(v))
                }
            }
        )+
    };
}

impl_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<f32> for SqlValue {
    fn from(v: f32) -> Self {
        SqlValue::Float(f64::from(v))
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Float(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(v: Vec<u8>) -> Self {
        SqlValue::Bytes(v)
    }
}

impl From<JsonValue> for SqlValue {
    fn from(v: JsonValue) -> Self {
        SqlValue::Json(v)
    }
}

impl From<NaiveDateTime> for SqlValue {
    fn from(v: NaiveDateTime) -> Self {
        SqlValue::Timestamp(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

/// SQL type hint for a binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlType {
    Boolean,
    SmallInt,
    Integer,
    BigInt,
    Real,
    Double,
    Varchar,
    Blob,
    Json,
    Timestamp,
}

impl SqlType {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Boolean => "BOOLEAN",
            Self::SmallInt => "SMALLINT",
            Self::Integer => "INTEGER",
            Self::BigInt => "BIGINT",
            Self::Real => "REAL",
            Self::Double => "DOUBLE",
            Self::Varchar => "VARCHAR",
            Self::Blob => "BLOB",
            Self::Json => "JSON",
            Self::Timestamp => "TIMESTAMP",
        }
    }
}

impl std::fmt::Display for SqlType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for SqlType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "boolean" | "bool" => Ok(Self::Boolean),
            "smallint" | "int2" => Ok(Self::SmallInt),
            "integer" | "int" | "int4" => Ok(Self::Integer),
            "bigint" | "int8" => Ok(Self::BigInt),
            "real" | "float4" => Ok(Self::Real),
            "double" | "float8" => Ok(Self::Double),
            "varchar" | "text" => Ok(Self::Varchar),
            "blob" | "bytea" | "binary" => Ok(Self::Blob),
            "json" | "jsonb" => Ok(Self::Json),
            "timestamp" | "datetime" => Ok(Self::Timestamp),
            other => Err(format!("unknown SQL type '{}'", other)),
        }
    }
}
