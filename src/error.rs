//! Error types for sqlgate.
//!
//! This module defines all error types using `thiserror`. Database-level
//! failures (acquire, prepare, bind, execution) are environmental faults and
//! always evict the connection involved. `IllegalState` and `ModeConflict`
//! are contract violations raised before any connection is touched.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Connection acquire failed: {message}")]
    Acquire { message: String, suggestion: String },

    #[error("Prepare failed: {message}")]
    Prepare {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
    },

    #[error("Bind failed at position {position}: {message}")]
    Bind { position: usize, message: String },

    #[error("Execution failed: {message}")]
    Execution {
        message: String,
        sql_state: Option<String>,
        suggestion: String,
    },

    #[error("Illegal state: {message}")]
    IllegalState { message: String },

    #[error("Batch mode conflict: cannot use {attempted} calls after {current} mode was fixed")]
    ModeConflict {
        current: &'static str,
        attempted: &'static str,
    },

    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Coarse classification of a `DbError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Acquire,
    Prepare,
    Bind,
    Execution,
    IllegalState,
    ModeConflict,
    Connection,
    InvalidInput,
    Internal,
}

impl DbError {
    /// Create an acquire error with a helpful suggestion.
    pub fn acquire(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Acquire {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a prepare error with optional SQL state.
    pub fn prepare(message: impl Into<String>, sql_state: Option<String>) -> Self {
        Self::Prepare {
            message: message.into(),
            sql_state,
        }
    }

    /// Create a bind error for a 1-based parameter position.
    pub fn bind(position: usize, message: impl Into<String>) -> Self {
        Self::Bind {
            position,
            message: message.into(),
        }
    }

    /// Create an execution error with optional SQL state.
    pub fn execution(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Execution {
            message: message.into(),
            sql_state,
            suggestion: suggestion.into(),
        }
    }

    /// Create an illegal state error.
    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::IllegalState {
            message: message.into(),
        }
    }

    /// Create a batch mode conflict error.
    pub fn mode_conflict(current: &'static str, attempted: &'static str) -> Self {
        Self::ModeConflict { current, attempted }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Reclassify a driver error raised while preparing a statement.
    ///
    /// Acquire and connection failures keep their kind; everything else
    /// becomes a prepare failure.
    pub fn from_prepare(err: sqlx::Error) -> Self {
        match DbError::from(err) {
            DbError::Execution {
                message, sql_state, ..
            } => DbError::prepare(message, sql_state),
            DbError::Internal { message } => DbError::prepare(message, None),
            other => other,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Acquire { .. } => ErrorKind::Acquire,
            Self::Prepare { .. } => ErrorKind::Prepare,
            Self::Bind { .. } => ErrorKind::Bind,
            Self::Execution { .. } => ErrorKind::Execution,
            Self::IllegalState { .. } => ErrorKind::IllegalState,
            Self::ModeConflict { .. } => ErrorKind::ModeConflict,
            Self::Connection { .. } => ErrorKind::Connection,
            Self::InvalidInput { .. } => ErrorKind::InvalidInput,
            Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Acquire { suggestion, .. } => Some(suggestion),
            Self::Execution { suggestion, .. } => Some(suggestion),
            Self::Connection { suggestion, .. } => Some(suggestion),
            _ => None,
        }
    }

    /// SQLSTATE reported by the database, if any.
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            Self::Prepare { sql_state, .. } | Self::Execution { sql_state, .. } => {
                sql_state.as_deref()
            }
            _ => None,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Acquire { .. } | Self::Connection { .. })
    }

    /// Programmer errors: the caller broke the single-use or batch-mode contract.
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, Self::IllegalState { .. } | Self::ModeConflict { .. })
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(
                msg.to_string(),
                "Check the connection string format and credentials",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DbError::execution(
                    db_err.message(),
                    code,
                    "Check the SQL syntax and referenced objects",
                )
            }
            sqlx::Error::RowNotFound => DbError::execution(
                "No rows returned",
                None,
                "Verify the query conditions match existing data",
            ),
            sqlx::Error::PoolTimedOut => DbError::acquire(
                "Timed out waiting for a pooled connection",
                "Increase max_connections or acquire_timeout, or release statements sooner",
            ),
            sqlx::Error::PoolClosed => {
                DbError::acquire("Connection pool is closed", "Rebuild the gateway")
            }
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::internal(format!("Decode error: {}", source)),
            sqlx::Error::WorkerCrashed => DbError::internal("Database worker crashed"),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;
