//! Pool and driver capabilities consumed by the statement layer.
//!
//! The gateway never talks to a concrete database. It only needs:
//! - a [`ConnectionPool`] that can hand out, take back and evict connections,
//! - a [`DriverConnection`] that can prepare and execute statements,
//! - a [`DriverStatement`] that accepts positional bindings.
//!
//! The sqlx adapter in [`super::pool`] and [`super::connection`] implements
//! these for MySQL, PostgreSQL and SQLite. Tests substitute a recording fake.

use crate::error::{DbError, DbResult};
use crate::models::{Row, SqlType, SqlValue};
use std::future::Future;

/// Shared pool of physical connections.
///
/// Implementations must tolerate concurrent calls from many tasks.
/// `release` and `evict` are synchronous so they can run from `Drop`.
pub trait ConnectionPool: Send + Sync + 'static {
    type Connection: DriverConnection;

    /// Take a connection out of the pool.
    fn acquire(&self) -> impl Future<Output = DbResult<Self::Connection>> + Send;

    /// Return a connection in a known-good state for reuse.
    fn release(&self, connection: Self::Connection);

    /// Permanently remove a connection from the pool.
    fn evict(&self, connection: Self::Connection);
}

/// A live database connection owned by exactly one statement handle.
pub trait DriverConnection: Send + 'static {
    type Statement: DriverStatement;

    fn prepare(&mut self, sql: &str) -> impl Future<Output = DbResult<Self::Statement>> + Send;

    /// Disabling auto-commit opens a transaction that lasts until
    /// `commit` or `rollback`.
    fn set_auto_commit(&mut self, enabled: bool) -> impl Future<Output = DbResult<()>> + Send;

    fn commit(&mut self) -> impl Future<Output = DbResult<()>> + Send;

    fn rollback(&mut self) -> impl Future<Output = DbResult<()>> + Send;

    fn execute_update(
        &mut self,
        statement: &Self::Statement,
    ) -> impl Future<Output = DbResult<u64>> + Send;

    /// Fetch at most `limit` rows; `None` fetches the whole result.
    fn execute_query(
        &mut self,
        statement: &Self::Statement,
        limit: Option<usize>,
    ) -> impl Future<Output = DbResult<Vec<Row>>> + Send;

    /// Run every staged batch row in order and return one count per row.
    fn execute_batch(
        &mut self,
        statement: &Self::Statement,
    ) -> impl Future<Output = DbResult<Vec<u64>>> + Send;
}

/// Bind state of a prepared statement.
pub trait DriverStatement: Send + Sync + 'static {
    /// Bind `value` at the 1-based `position`.
    fn bind(&mut self, position: usize, value: SqlValue, hint: Option<SqlType>) -> DbResult<()>;

    /// Stage the currently bound row as a batch entry and clear bind state.
    fn add_batch(&mut self) -> DbResult<()>;

    fn clear_parameters(&mut self);
}

/// A bound parameter slot. The hint is kept so typed nulls reach the driver.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundValue {
    pub value: SqlValue,
    pub hint: Option<SqlType>,
}

/// Client-side bind buffer for a statement prepared on the server.
///
/// Values are coerced to their hint when bound, so a type mismatch surfaces
/// as a bind failure before anything is sent to the database.
#[derive(Debug, Clone)]
pub struct PreparedStatement {
    sql: String,
    param_count: Option<usize>,
    current: Vec<Option<BoundValue>>,
    batch: Vec<Vec<BoundValue>>,
}

impl PreparedStatement {
    /// `param_count` is the number of placeholders reported by the server,
    /// when the backend exposes it.
    pub fn new(sql: impl Into<String>, param_count: Option<usize>) -> Self {
        Self {
            sql: sql.into(),
            param_count,
            current: Vec::new(),
            batch: Vec::new(),
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn param_count(&self) -> Option<usize> {
        self.param_count
    }

    /// The current row, checked for gaps.
    pub fn bound_row(&self) -> DbResult<Vec<BoundValue>> {
        collect_row(&self.current, self.param_count)
    }

    pub fn batch_rows(&self) -> &[Vec<BoundValue>] {
        &self.batch
    }
}

impl DriverStatement for PreparedStatement {
    fn bind(&mut self, position: usize, value: SqlValue, hint: Option<SqlType>) -> DbResult<()> {
        if position == 0 {
            return Err(DbError::bind(position, "bind positions start at 1"));
        }
        if let Some(count) = self.param_count {
            if position > count {
                return Err(DbError::bind(
                    position,
                    format!("statement has only {} parameter(s)", count),
                ));
            }
        }

        let value = value.resolve(position, hint)?;
        if self.current.len() < position {
            self.current.resize(position, None);
        }
        self.current[position - 1] = Some(BoundValue { value, hint });
        Ok(())
    }

    fn add_batch(&mut self) -> DbResult<()> {
        let row = collect_row(&self.current, self.param_count)?;
        self.batch.push(row);
        self.current.clear();
        Ok(())
    }

    fn clear_parameters(&mut self) {
        self.current.clear();
    }
}

fn collect_row(
    current: &[Option<BoundValue>],
    param_count: Option<usize>,
) -> DbResult<Vec<BoundValue>> {
    let expected = param_count.unwrap_or(current.len());
    (0..expected)
        .map(|idx| {
            current
                .get(idx)
                .cloned()
                .flatten()
                .ok_or_else(|| DbError::bind(idx + 1, "no value bound"))
        })
        .collect()
}
