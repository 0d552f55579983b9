//! Multi-row batch execution.
//!
//! Rows are collected in one of two modes, fixed by the first call:
//!
//! - **list**: whole rows via [`BatchExecutor::push_row`] or
//!   [`BatchExecutor::push_list`];
//! - **accumulate**: single values via [`BatchExecutor::add`] closed by
//!   [`BatchExecutor::end_row`].
//!
//! Mixing the two fails with [`DbError::ModeConflict`]. The batch runs in one
//! transaction that is committed on success and rolled back on failure.

use crate::db::binder::ParamBinder;
use crate::db::driver::ConnectionPool;
use crate::db::gateway::Gateway;
use crate::db::statement::StatementHandle;
use crate::error::{DbError, DbResult};
use crate::models::{SqlType, SqlValue};
use tracing::{debug, warn};

/// How rows are being added to a [`BatchRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatchMode {
    #[default]
    Empty,
    List,
    Accumulate,
}

impl BatchMode {
    pub fn name(&self) -> &'static str {
        match self {
            BatchMode::Empty => "empty",
            BatchMode::List => "list",
            BatchMode::Accumulate => "accumulate",
        }
    }
}

impl std::fmt::Display for BatchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Statement text plus the rows to run it with.
#[derive(Debug, Clone, Default)]
pub struct BatchRequest {
    sql: String,
    mode: BatchMode,
    rows: Vec<ParamBinder>,
    pending: ParamBinder,
}

impl BatchRequest {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            ..Default::default()
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn mode(&self) -> BatchMode {
        self.mode
    }

    /// Completed rows, in insertion order.
    pub fn rows(&self) -> &[ParamBinder] {
        &self.rows
    }

    /// Values added since the last `end_row`.
    pub fn pending(&self) -> &ParamBinder {
        &self.pending
    }

    pub fn push_row(&mut self, row: ParamBinder) -> DbResult<()> {
        self.enter(BatchMode::List)?;
        self.rows.push(row);
        Ok(())
    }

    pub fn push_list<I, V>(&mut self, values: I) -> DbResult<()>
    where
        I: IntoIterator<Item = V>,
        V: Into<SqlValue>,
    {
        self.push_row(values.into_iter().collect())
    }

    pub fn add(&mut self, value: impl Into<SqlValue>) -> DbResult<()> {
        self.enter(BatchMode::Accumulate)?;
        self.pending.append(value);
        Ok(())
    }

    pub fn add_typed(&mut self, hint: SqlType, value: impl Into<SqlValue>) -> DbResult<()> {
        self.enter(BatchMode::Accumulate)?;
        self.pending.append_typed(hint, value);
        Ok(())
    }

    /// Close the pending row. An empty row is allowed for statements
    /// without placeholders.
    pub fn end_row(&mut self) -> DbResult<()> {
        self.enter(BatchMode::Accumulate)?;
        self.rows.push(std::mem::take(&mut self.pending));
        Ok(())
    }

    fn enter(&mut self, mode: BatchMode) -> DbResult<()> {
        match self.mode {
            BatchMode::Empty => {
                self.mode = mode;
                Ok(())
            }
            current if current == mode => Ok(()),
            current => Err(DbError::mode_conflict(current.name(), mode.name())),
        }
    }
}

/// A batch bound to a gateway, executed at most once.
///
/// ```ignore
/// let mut batch = gateway.batch("INSERT INTO students (id, name) VALUES (?, ?)");
/// batch.push_list([SqlValue::from(1), SqlValue::from("A")])?;
/// batch.push_list([SqlValue::from(2), SqlValue::from("B")])?;
/// let counts = batch.execute_batch().await?;
/// ```
pub struct BatchExecutor<P: ConnectionPool> {
    gateway: Gateway<P>,
    request: BatchRequest,
    finalized: bool,
}

impl<P: ConnectionPool> std::fmt::Debug for BatchExecutor<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchExecutor")
            .field("request", &self.request)
            .field("finalized", &self.finalized)
            .finish()
    }
}

impl<P: ConnectionPool> BatchExecutor<P> {
    pub(crate) fn new(gateway: Gateway<P>, sql: impl Into<String>) -> Self {
        Self::from_request(gateway, BatchRequest::new(sql))
    }

    /// Bind a prebuilt request to a gateway.
    pub fn from_request(gateway: Gateway<P>, request: BatchRequest) -> Self {
        Self {
            gateway,
            request,
            finalized: false,
        }
    }

    pub fn request(&self) -> &BatchRequest {
        &self.request
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn push_row(&mut self, row: ParamBinder) -> DbResult<&mut Self> {
        self.request.push_row(row)?;
        Ok(self)
    }

    pub fn push_list<I, V>(&mut self, values: I) -> DbResult<&mut Self>
    where
        I: IntoIterator<Item = V>,
        V: Into<SqlValue>,
    {
        self.request.push_list(values)?;
        Ok(self)
    }

    pub fn add(&mut self, value: impl Into<SqlValue>) -> DbResult<&mut Self> {
        self.request.add(value)?;
        Ok(self)
    }

    pub fn add_typed(&mut self, hint: SqlType, value: impl Into<SqlValue>) -> DbResult<&mut Self> {
        self.request.add_typed(hint, value)?;
        Ok(self)
    }

    pub fn end_row(&mut self) -> DbResult<&mut Self> {
        self.request.end_row()?;
        Ok(self)
    }

    /// Run every row in one transaction and return the per-row counts.
    ///
    /// A batch with no rows returns an empty vector without touching the
    /// pool. On failure the transaction is rolled back and the connection
    /// evicted.
    pub async fn execute_batch(&mut self) -> DbResult<Vec<u64>> {
        if self.finalized {
            return Err(DbError::illegal_state(
                "batch has already been executed; build a new one from the gateway",
            ));
        }
        if !self.request.pending.is_empty() {
            return Err(DbError::illegal_state(format!(
                "batch has {} value(s) not closed by end_row",
                self.request.pending.len()
            )));
        }
        self.finalized = true;

        if self.request.rows.is_empty() {
            debug!("Empty batch, nothing to execute");
            return Ok(Vec::new());
        }

        let mut handle = self.gateway.open_batch(&self.request.sql).await?;
        match run_batch(&mut handle, &self.request.rows).await {
            Ok(counts) => {
                handle.close();
                Ok(counts)
            }
            Err(e) => {
                if let Err(rollback_err) = handle.rollback().await {
                    warn!(
                        statement_id = %handle.id(),
                        error = %rollback_err,
                        "Rollback after failed batch also failed"
                    );
                }
                handle.mark_poisoned();
                handle.close();
                Err(e)
            }
        }
    }
}

async fn run_batch<P: ConnectionPool>(
    handle: &mut StatementHandle<P>,
    rows: &[ParamBinder],
) -> DbResult<Vec<u64>> {
    for row in rows {
        handle.bind_row(row)?;
        handle.add_to_batch()?;
    }
    let counts = handle.execute_batch().await?;
    handle.commit().await?;
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_mode_rows() {
        let mut request = BatchRequest::new("INSERT INTO t VALUES (?, ?)");
        request.push_list([SqlValue::from(1), SqlValue::from("A")]).unwrap();
        request.push_row(crate::params![2, "B"]).unwrap();

        assert_eq!(request.mode(), BatchMode::List);
        assert_eq!(request.rows().len(), 2);
        assert_eq!(request.rows()[1].as_slice()[1].value, SqlValue::from("B"));
    }

    #[test]
    fn test_accumulate_mode_rows() {
        let mut request = BatchRequest::new("INSERT INTO t VALUES (?, ?)");
        request.add(1).unwrap();
        request.add_typed(SqlType::Varchar, "A").unwrap();
        request.end_row().unwrap();
        request.add(2).unwrap();

        assert_eq!(request.mode(), BatchMode::Accumulate);
        assert_eq!(request.rows().len(), 1);
        assert_eq!(request.rows()[0].as_slice()[1].hint, Some(SqlType::Varchar));
        assert_eq!(request.pending().len(), 1);
    }

    #[test]
    fn test_list_then_accumulate_conflicts() {
        let mut request = BatchRequest::new("INSERT INTO t VALUES (?)");
        request.push_list([1]).unwrap();

        let err = request.add(2).unwrap_err();
        assert!(matches!(
            err,
            DbError::ModeConflict {
                current: "list",
                attempted: "accumulate"
            }
        ));
        assert!(request.end_row().is_err());
        assert_eq!(request.rows().len(), 1);
    }

    #[test]
    fn test_accumulate_then_list_conflicts() {
        let mut request = BatchRequest::new("INSERT INTO t VALUES (?)");
        request.add(1).unwrap();

        let err = request.push_list([2]).unwrap_err();
        assert!(err.is_contract_violation());
        assert!(matches!(
            err,
            DbError::ModeConflict {
                current: "accumulate",
                attempted: "list"
            }
        ));
    }

    #[test]
    fn test_end_row_without_values() {
        let mut request = BatchRequest::new("DELETE FROM t");
        request.end_row().unwrap();
        assert_eq!(request.rows().len(), 1);
        assert!(request.rows()[0].is_empty());
    }
}
