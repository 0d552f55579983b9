//! sqlx-backed driver connection.
//!
//! `SqlxConnection` wraps a pooled connection for one of the supported
//! backends and implements [`DriverConnection`]. Statements are prepared on
//! the server once to validate the SQL and learn the parameter count; the
//! bound rows are then executed through sqlx, which reuses the server-side
//! statement from its per-connection cache.
//!
//! Query rows are streamed, so a row limit stops reading once it is reached.
//!
//! Each backend module below has the same shape. Only parameter binding and
//! the transaction-start statement differ.

use crate::db::driver::{BoundValue, DriverConnection, PreparedStatement};
use crate::db::types::decode_rows;
use crate::db::DatabaseType;
use crate::error::{DbError, DbResult};
use crate::models::{Row, SqlType, SqlValue};
use futures_util::{StreamExt, TryStreamExt};
use sqlx::pool::PoolConnection;
use sqlx::{Either, MySql, Postgres, Sqlite};
use tracing::debug;

/// A connection checked out of one of the backend pools.
pub enum SqlxConnection {
    MySql(PoolConnection<MySql>),
    Postgres(PoolConnection<Postgres>),
    SQLite(PoolConnection<Sqlite>),
}

impl SqlxConnection {
    pub fn db_type(&self) -> DatabaseType {
        match self {
            SqlxConnection::MySql(_) => DatabaseType::MySql,
            SqlxConnection::Postgres(_) => DatabaseType::Postgres,
            SqlxConnection::SQLite(_) => DatabaseType::SQLite,
        }
    }
}

impl std::fmt::Debug for SqlxConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SqlxConnection").field(&self.db_type()).finish()
    }
}

impl DriverConnection for SqlxConnection {
    type Statement = PreparedStatement;

    async fn prepare(&mut self, sql: &str) -> DbResult<PreparedStatement> {
        let param_count = impl_db_dispatch!(self, {
            MySql(c) => mysql::prepare(c, sql).await,
            Postgres(c) => postgres::prepare(c, sql).await,
            SQLite(c) => sqlite::prepare(c, sql).await,
        })?;
        debug!(param_count = ?param_count, "Prepared statement");
        Ok(PreparedStatement::new(sql, param_count))
    }

    /// Disabling auto-commit opens a transaction; re-enabling it commits the
    /// open transaction.
    async fn set_auto_commit(&mut self, enabled: bool) -> DbResult<()> {
        if enabled {
            return self.commit().await;
        }
        let begin = match self.db_type() {
            DatabaseType::MySql => "START TRANSACTION",
            DatabaseType::Postgres | DatabaseType::SQLite => "BEGIN",
        };
        impl_db_dispatch!(self, {
            MySql(c) => mysql::raw(c, begin).await,
            Postgres(c) => postgres::raw(c, begin).await,
            SQLite(c) => sqlite::raw(c, begin).await,
        })
    }

    async fn commit(&mut self) -> DbResult<()> {
        impl_db_dispatch!(self, {
            MySql(c) => mysql::raw(c, "COMMIT").await,
            Postgres(c) => postgres::raw(c, "COMMIT").await,
            SQLite(c) => sqlite::raw(c, "COMMIT").await,
        })
    }

    async fn rollback(&mut self) -> DbResult<()> {
        impl_db_dispatch!(self, {
            MySql(c) => mysql::raw(c, "ROLLBACK").await,
            Postgres(c) => postgres::raw(c, "ROLLBACK").await,
            SQLite(c) => sqlite::raw(c, "ROLLBACK").await,
        })
    }

    async fn execute_update(&mut self, statement: &PreparedStatement) -> DbResult<u64> {
        let row = statement.bound_row()?;
        impl_db_dispatch!(self, {
            MySql(c) => mysql::execute(c, statement.sql(), &row).await,
            Postgres(c) => postgres::execute(c, statement.sql(), &row).await,
            SQLite(c) => sqlite::execute(c, statement.sql(), &row).await,
        })
    }

    async fn execute_query(
        &mut self,
        statement: &PreparedStatement,
        limit: Option<usize>,
    ) -> DbResult<Vec<Row>> {
        let row = statement.bound_row()?;
        let limit = limit.unwrap_or(usize::MAX);
        impl_db_dispatch!(self, {
            MySql(c) => mysql::fetch(c, statement.sql(), &row, limit).await,
            Postgres(c) => postgres::fetch(c, statement.sql(), &row, limit).await,
            SQLite(c) => sqlite::fetch(c, statement.sql(), &row, limit).await,
        })
    }

    async fn execute_batch(&mut self, statement: &PreparedStatement) -> DbResult<Vec<u64>> {
        let mut counts = Vec::with_capacity(statement.batch_rows().len());
        for row in statement.batch_rows() {
            let count = impl_db_dispatch!(&mut *self, {
                MySql(c) => mysql::execute(c, statement.sql(), row).await,
                Postgres(c) => postgres::execute(c, statement.sql(), row).await,
                SQLite(c) => sqlite::execute(c, statement.sql(), row).await,
            })?;
            counts.push(count);
        }
        Ok(counts)
    }
}

fn parameter_count<'q, S: sqlx::Statement<'q>>(statement: &S) -> Option<usize> {
    statement.parameters().map(|params| match params {
        Either::Left(types) => types.len(),
        Either::Right(count) => count,
    })
}

// =============================================================================
// Database-Specific Implementations
// =============================================================================

mod mysql {
    use super::*;
    use sqlx::Executor;
    use sqlx::mysql::MySqlArguments;
    use sqlx::types::Json;

    pub async fn prepare(conn: &mut PoolConnection<MySql>, sql: &str) -> DbResult<Option<usize>> {
        let statement = (&mut **conn)
            .prepare(sql)
            .await
            .map_err(DbError::from_prepare)?;
        Ok(parameter_count(&statement))
    }

    pub async fn raw(conn: &mut PoolConnection<MySql>, sql: &str) -> DbResult<()> {
        (&mut **conn).execute(sql).await?;
        Ok(())
    }

    pub async fn execute(
        conn: &mut PoolConnection<MySql>,
        sql: &str,
        row: &[BoundValue],
    ) -> DbResult<u64> {
        let mut query = sqlx::query(sql);
        for param in row {
            query = bind_param(query, param);
        }
        Ok(query.execute(&mut **conn).await?.rows_affected())
    }

    pub async fn fetch(
        conn: &mut PoolConnection<MySql>,
        sql: &str,
        row: &[BoundValue],
        limit: usize,
    ) -> DbResult<Vec<Row>> {
        let mut query = sqlx::query(sql);
        for param in row {
            query = bind_param(query, param);
        }
        let rows = query
            .fetch(&mut **conn)
            .take(limit)
            .try_collect::<Vec<_>>()
            .await?;
        Ok(decode_rows(rows))
    }

    fn bind_param<'q>(
        query: sqlx::query::Query<'q, MySql, MySqlArguments>,
        param: &'q BoundValue,
    ) -> sqlx::query::Query<'q, MySql, MySqlArguments> {
        match &param.value {
            SqlValue::Null => match param.hint {
                Some(SqlType::Boolean) => query.bind(None::<bool>),
                Some(SqlType::SmallInt | SqlType::Integer | SqlType::BigInt) => {
                    query.bind(None::<i64>)
                }
                Some(SqlType::Real | SqlType::Double) => query.bind(None::<f64>),
                Some(SqlType::Blob) => query.bind(None::<Vec<u8>>),
                Some(SqlType::Timestamp) => query.bind(None::<chrono::NaiveDateTime>),
                _ => query.bind(None::<String>),
            },
            SqlValue::Bool(v) => query.bind(*v),
            SqlValue::Int(v) => query.bind(*v),
            SqlValue::Float(v) => query.bind(*v),
            SqlValue::Text(v) => query.bind(v.as_str()),
            SqlValue::Bytes(v) => query.bind(v.as_slice()),
            SqlValue::Json(v) => query.bind(Json(v)),
            SqlValue::Timestamp(v) => query.bind(*v),
        }
    }
}

mod postgres {
    use super::*;
    use sqlx::Executor;
    use sqlx::postgres::PgArguments;
    use sqlx::types::Json;

    pub async fn prepare(
        conn: &mut PoolConnection<Postgres>,
        sql: &str,
    ) -> DbResult<Option<usize>> {
        let statement = (&mut **conn)
            .prepare(sql)
            .await
            .map_err(DbError::from_prepare)?;
        Ok(parameter_count(&statement))
    }

    pub async fn raw(conn: &mut PoolConnection<Postgres>, sql: &str) -> DbResult<()> {
        (&mut **conn).execute(sql).await?;
        Ok(())
    }

    pub async fn execute(
        conn: &mut PoolConnection<Postgres>,
        sql: &str,
        row: &[BoundValue],
    ) -> DbResult<u64> {
        let mut query = sqlx::query(sql);
        for param in row {
            query = bind_param(query, param);
        }
        Ok(query.execute(&mut **conn).await?.rows_affected())
    }

    pub async fn fetch(
        conn: &mut PoolConnection<Postgres>,
        sql: &str,
        row: &[BoundValue],
        limit: usize,
    ) -> DbResult<Vec<Row>> {
        let mut query = sqlx::query(sql);
        for param in row {
            query = bind_param(query, param);
        }
        let rows = query
            .fetch(&mut **conn)
            .take(limit)
            .try_collect::<Vec<_>>()
            .await?;
        Ok(decode_rows(rows))
    }

    /// PostgreSQL is strict about parameter types, so hints select the exact
    /// integer and float widths.
    fn bind_param<'q>(
        query: sqlx::query::Query<'q, Postgres, PgArguments>,
        param: &'q BoundValue,
    ) -> sqlx::query::Query<'q, Postgres, PgArguments> {
        match (&param.value, param.hint) {
            (SqlValue::Null, Some(SqlType::Boolean)) => query.bind(None::<bool>),
            (SqlValue::Null, Some(SqlType::SmallInt)) => query.bind(None::<i16>),
            (SqlValue::Null, Some(SqlType::Integer)) => query.bind(None::<i32>),
            (SqlValue::Null, Some(SqlType::BigInt)) => query.bind(None::<i64>),
            (SqlValue::Null, Some(SqlType::Real)) => query.bind(None::<f32>),
            (SqlValue::Null, Some(SqlType::Double)) => query.bind(None::<f64>),
            (SqlValue::Null, Some(SqlType::Blob)) => query.bind(None::<Vec<u8>>),
            (SqlValue::Null, Some(SqlType::Json)) => {
                query.bind(None::<Json<serde_json::Value>>)
            }
            (SqlValue::Null, Some(SqlType::Timestamp)) => {
                query.bind(None::<chrono::NaiveDateTime>)
            }
            (SqlValue::Null, _) => query.bind(None::<String>),
            // Coercion already range-checked these narrowing casts
            (SqlValue::Int(v), Some(SqlType::SmallInt)) => query.bind(*v as i16),
            (SqlValue::Int(v), Some(SqlType::Integer)) => query.bind(*v as i32),
            (SqlValue::Float(v), Some(SqlType::Real)) => query.bind(*v as f32),
            (SqlValue::Bool(v), _) => query.bind(*v),
            (SqlValue::Int(v), _) => query.bind(*v),
            (SqlValue::Float(v), _) => query.bind(*v),
            (SqlValue::Text(v), _) => query.bind(v.as_str()),
            (SqlValue::Bytes(v), _) => query.bind(v.as_slice()),
            (SqlValue::Json(v), _) => query.bind(Json(v)),
            (SqlValue::Timestamp(v), _) => query.bind(*v),
        }
    }
}

mod sqlite {
    use super::*;
    use sqlx::Executor;
    use sqlx::sqlite::SqliteArguments;

    pub async fn prepare(conn: &mut PoolConnection<Sqlite>, sql: &str) -> DbResult<Option<usize>> {
        let statement = (&mut **conn)
            .prepare(sql)
            .await
            .map_err(DbError::from_prepare)?;
        Ok(parameter_count(&statement))
    }

    pub async fn raw(conn: &mut PoolConnection<Sqlite>, sql: &str) -> DbResult<()> {
        (&mut **conn).execute(sql).await?;
        Ok(())
    }

    pub async fn execute(
        conn: &mut PoolConnection<Sqlite>,
        sql: &str,
        row: &[BoundValue],
    ) -> DbResult<u64> {
        let mut query = sqlx::query(sql);
        for param in row {
            query = bind_param(query, param);
        }
        Ok(query.execute(&mut **conn).await?.rows_affected())
    }

    pub async fn fetch(
        conn: &mut PoolConnection<Sqlite>,
        sql: &str,
        row: &[BoundValue],
        limit: usize,
    ) -> DbResult<Vec<Row>> {
        let mut query = sqlx::query(sql);
        for param in row {
            query = bind_param(query, param);
        }
        let rows = query
            .fetch(&mut **conn)
            .take(limit)
            .try_collect::<Vec<_>>()
            .await?;
        Ok(decode_rows(rows))
    }

    fn bind_param<'q>(
        query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
        param: &'q BoundValue,
    ) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
        match &param.value {
            SqlValue::Null => match param.hint {
                Some(SqlType::Boolean) => query.bind(None::<bool>),
                Some(SqlType::SmallInt | SqlType::Integer | SqlType::BigInt) => {
                    query.bind(None::<i64>)
                }
                Some(SqlType::Real | SqlType::Double) => query.bind(None::<f64>),
                Some(SqlType::Blob) => query.bind(None::<Vec<u8>>),
                _ => query.bind(None::<String>),
            },
            SqlValue::Bool(v) => query.bind(*v),
            SqlValue::Int(v) => query.bind(*v),
            SqlValue::Float(v) => query.bind(*v),
            SqlValue::Text(v) => query.bind(v.as_str()),
            SqlValue::Bytes(v) => query.bind(v.as_slice()),
            // SQLite doesn't have native JSON type, store as string
            SqlValue::Json(v) => query.bind(v.to_string()),
            SqlValue::Timestamp(v) => query.bind(*v),
        }
    }
}
