//! Database dispatch and parameter macros.
//!
//! These declarative macros keep the per-backend code paths linear and let
//! callers build bind parameters from heterogeneous literals.

/// Database backend type for dispatch operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseType {
    MySql,
    Postgres,
    SQLite,
}

impl DatabaseType {
    /// Parse database type from a connection string.
    pub fn from_connection_string(connection_string: &str) -> Option<Self> {
        let lower = connection_string.to_lowercase();
        if lower.starts_with("postgres://") || lower.starts_with("postgresql://") {
            Some(Self::Postgres)
        } else if lower.starts_with("mysql://") || lower.starts_with("mariadb://") {
            Some(Self::MySql)
        } else if lower.starts_with("sqlite://") || lower.starts_with("sqlite:") {
            Some(Self::SQLite)
        } else {
            None
        }
    }

    /// URL scheme used when building a connection string.
    pub fn scheme(&self) -> &'static str {
        match self {
            Self::MySql => "mysql",
            Self::Postgres => "postgres",
            Self::SQLite => "sqlite",
        }
    }

    /// Get the display name for this database type.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::MySql => "MySQL",
            Self::Postgres => "PostgreSQL",
            Self::SQLite => "SQLite",
        }
    }

    /// Get the default port for this database type.
    pub fn default_port(&self) -> Option<u16> {
        match self {
            Self::Postgres => Some(5432),
            Self::MySql => Some(3306),
            Self::SQLite => None,
        }
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Macro for generating backend dispatch match arms over `SqlxConnection`.
///
/// # Example
///
/// ```ignore
/// impl_db_dispatch!(conn, {
///     MySql(c) => mysql::execute(c, sql, params).await,
///     Postgres(c) => postgres::execute(c, sql, params).await,
///     SQLite(c) => sqlite::execute(c, sql, params).await,
/// });
/// ```
#[macro_export]
macro_rules! impl_db_dispatch {
    ($conn:expr, { $($variant:ident($c:ident) => $body:expr),+ $(,)? }) => {
        match $conn {
            $(
                $crate::db::connection::SqlxConnection::$variant($c) => $body,
            )+
        }
    };
}

/// Build a `ParamBinder` from a list of values.
///
/// Each element may be a plain value (type inferred) or `hint => value`.
///
/// ```ignore
/// let row = params![1, "Student1", SqlType::Integer => 18];
/// ```
#[macro_export]
macro_rules! params {
    (@push $b:ident;) => {};
    (@push $b:ident; $hint:expr => $value:expr $(, $($rest:tt)*)?) => {
        $b.append_typed($hint, $value);
        $($crate::params!(@push $b; $($rest)*);)?
    };
    (@push $b:ident; $value:expr $(, $($rest:tt)*)?) => {
        $b.append($value);
        $($crate::params!(@push $b; $($rest)*);)?
    };
    () => {
        $crate::db::ParamBinder::new()
    };
    ($($rest:tt)+) => {{
        let mut binder = $crate::db::ParamBinder::new();
        $crate::params!(@push binder; $($rest)+);
        binder
    }};
}

pub use impl_db_dispatch;
pub use params;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SqlType, SqlValue};

    #[test]
    fn test_database_type_from_connection_string() {
        assert_eq!(
            DatabaseType::from_connection_string("postgresql://u@h/db"),
            Some(DatabaseType::Postgres)
        );
        assert_eq!(
            DatabaseType::from_connection_string("mariadb://u@h/db"),
            Some(DatabaseType::MySql)
        );
        assert_eq!(
            DatabaseType::from_connection_string("sqlite:data.db"),
            Some(DatabaseType::SQLite)
        );
        assert_eq!(DatabaseType::from_connection_string("oracle://x"), None);
    }

    #[test]
    fn test_database_type_equality() {
        assert_eq!(DatabaseType::MySql, DatabaseType::MySql);
        assert_ne!(DatabaseType::MySql, DatabaseType::Postgres);
    }

    #[test]
    fn test_params_macro_untyped() {
        let binder = params![1, "Student1", 18, "CS", 1];
        assert_eq!(binder.len(), 5);
        assert_eq!(binder.as_slice()[1].value, SqlValue::from("Student1"));
        assert!(binder.iter().all(|b| b.hint.is_none()));
    }

    #[test]
    fn test_params_macro_typed() {
        let binder = params![SqlType::Integer => 3, "Student3", SqlType::Varchar => "CS"];
        assert_eq!(binder.len(), 3);
        assert_eq!(binder.as_slice()[0].hint, Some(SqlType::Integer));
        assert_eq!(binder.as_slice()[1].hint, None);
        assert_eq!(binder.as_slice()[2].hint, Some(SqlType::Varchar));
    }

    #[test]
    fn test_params_macro_empty() {
        let binder = params![];
        assert!(binder.is_empty());
    }
}
