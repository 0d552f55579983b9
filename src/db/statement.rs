//! Single-use statement handle.
//!
//! A [`StatementHandle`] owns one pooled connection and one prepared
//! statement for the duration of a single execute cycle. Closing hands the
//! connection back to the pool exactly once, either returning it for reuse or
//! evicting it, according to the [`ReleasePolicy`] and what happened on the
//! handle. An unclosed handle is closed on drop.
//!
//! A handle dropped while a driver call is still pending (the calling future
//! was cancelled) has a connection in an unknown state, so it is evicted
//! whatever the policy says.

use crate::config::ReleasePolicy;
use crate::db::binder::ParamBinder;
use crate::db::cursor::ResultCursor;
use crate::db::driver::{ConnectionPool, DriverConnection, DriverStatement};
use crate::error::{DbError, DbResult};
use crate::models::Row;
use std::sync::Arc;
use tracing::{debug, error, warn};
use uuid::Uuid;

type StatementOf<P> =
    <<P as ConnectionPool>::Connection as DriverConnection>::Statement;

/// A connection plus a prepared statement, usable until closed.
pub struct StatementHandle<P: ConnectionPool> {
    id: Uuid,
    pool: Arc<P>,
    connection: Option<P::Connection>,
    statement: Option<StatementOf<P>>,
    policy: ReleasePolicy,
    in_transaction: bool,
    poisoned: bool,
    in_flight: bool,
    max_rows: Option<usize>,
    truncated: bool,
}

impl<P: ConnectionPool> std::fmt::Debug for StatementHandle<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatementHandle")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .field("policy", &self.policy)
            .field("in_transaction", &self.in_transaction)
            .field("poisoned", &self.poisoned)
            .field("in_flight", &self.in_flight)
            .field("max_rows", &self.max_rows)
            .finish_non_exhaustive()
    }
}

impl<P: ConnectionPool> StatementHandle<P> {
    pub(crate) fn new(
        pool: Arc<P>,
        connection: P::Connection,
        statement: StatementOf<P>,
        in_transaction: bool,
        policy: ReleasePolicy,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            pool,
            connection: Some(connection),
            statement: Some(statement),
            policy,
            in_transaction,
            poisoned: false,
            in_flight: false,
            max_rows: None,
            truncated: false,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.connection.is_none()
    }

    /// True once a bind, execute or commit has failed on this handle.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// True while auto-commit is disabled and the transaction is still open.
    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    /// True while a driver call started by this handle has not completed.
    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    /// Cap the number of rows [`execute_query`](Self::execute_query) fetches.
    /// `None` fetches every row.
    pub fn set_max_rows(&mut self, max_rows: Option<usize>) {
        self.max_rows = max_rows;
    }

    pub fn max_rows(&self) -> Option<usize> {
        self.max_rows
    }

    /// True when the last query stopped at the row cap with rows left over.
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub(crate) fn mark_poisoned(&mut self) {
        self.poisoned = true;
    }

    /// Bind every value of `params`; binding *i* goes to position *i + 1*.
    pub fn bind_row(&mut self, params: &ParamBinder) -> DbResult<()> {
        let id = self.id;
        let (_, statement) = self.parts("bind_row")?;
        let result = params.iter().enumerate().try_for_each(|(idx, binding)| {
            statement.bind(idx + 1, binding.value.clone(), binding.hint)
        });
        if let Err(e) = &result {
            debug!(statement_id = %id, error = %e, "Bind failed");
        }
        self.poison_on_err(result)
    }

    /// Run the bound statement as an update and return the affected row count.
    pub async fn execute_update(&mut self) -> DbResult<u64> {
        let (connection, statement) = self.start("execute_update")?;
        let result = connection.execute_update(statement).await;
        if let Ok(rows_affected) = &result {
            debug!(statement_id = %self.id, rows_affected, "Executed update");
        }
        self.settle(result)
    }

    /// Run the bound statement as a query and return the decoded rows, at
    /// most [`max_rows`](Self::max_rows) of them.
    pub async fn execute_query(&mut self) -> DbResult<Vec<Row>> {
        let max_rows = self.max_rows;
        // One extra row tells a full result apart from a truncated one.
        let fetch_limit = max_rows.map(|n| n.saturating_add(1));
        let (connection, statement) = self.start("execute_query")?;
        let result = connection.execute_query(statement, fetch_limit).await;
        let mut rows = self.settle(result)?;

        self.truncated = max_rows.is_some_and(|n| rows.len() > n);
        if let Some(n) = max_rows {
            rows.truncate(n);
        }
        debug!(
            statement_id = %self.id,
            row_count = rows.len(),
            truncated = self.truncated,
            "Executed query"
        );
        Ok(rows)
    }

    /// Stage the currently bound row as a batch entry and clear bind state.
    pub fn add_to_batch(&mut self) -> DbResult<()> {
        let (_, statement) = self.parts("add_to_batch")?;
        let result = statement.add_batch();
        self.poison_on_err(result)
    }

    /// Run every staged row and return one count per row, in staging order.
    pub async fn execute_batch(&mut self) -> DbResult<Vec<u64>> {
        let (connection, statement) = self.start("execute_batch")?;
        let result = connection.execute_batch(statement).await;
        if let Ok(counts) = &result {
            debug!(statement_id = %self.id, rows = counts.len(), "Executed batch");
        }
        self.settle(result)
    }

    /// Commit the transaction opened for a batch handle.
    pub async fn commit(&mut self) -> DbResult<()> {
        if !self.in_transaction {
            self.ensure_open("commit")?;
            return Err(DbError::illegal_state(
                "commit requires a batch statement with an open transaction",
            ));
        }
        let (connection, _) = self.start("commit")?;
        let result = connection.commit().await;
        if result.is_ok() {
            self.in_transaction = false;
            debug!(statement_id = %self.id, "Committed transaction");
        }
        self.settle(result)
    }

    /// Roll back the open transaction. A no-op without one.
    ///
    /// Permitted on a poisoned handle so failure paths can undo partial work.
    pub async fn rollback(&mut self) -> DbResult<()> {
        if !self.in_transaction {
            return self.ensure_open("rollback");
        }
        let (connection, _) = self.start("rollback")?;
        let result = connection.rollback().await;
        if result.is_ok() {
            self.in_transaction = false;
            debug!(statement_id = %self.id, "Rolled back transaction");
        }
        self.settle(result)
    }

    /// Wrap already-fetched rows in a cursor that keeps this handle open
    /// until the cursor is closed.
    pub fn into_cursor(self, rows: Vec<Row>) -> ResultCursor<P> {
        ResultCursor::new(rows, self)
    }

    /// Hand the connection back to the pool. Calling again is a no-op.
    ///
    /// A poisoned handle, one whose transaction is still open, or one with a
    /// driver call still pending is always evicted.
    /// [`ReleasePolicy::AlwaysEvict`] evicts clean handles too.
    pub fn close(&mut self) {
        let Some(connection) = self.connection.take() else {
            return;
        };
        self.statement = None;

        let unclean = self.poisoned || self.in_transaction || self.in_flight;
        let evict = unclean || self.policy == ReleasePolicy::AlwaysEvict;

        if evict {
            if unclean {
                warn!(
                    statement_id = %self.id,
                    poisoned = self.poisoned,
                    in_transaction = self.in_transaction,
                    in_flight = self.in_flight,
                    "Evicting connection"
                );
            } else {
                debug!(statement_id = %self.id, "Evicting connection per release policy");
            }
            self.pool.evict(connection);
        } else {
            debug!(statement_id = %self.id, "Returning connection to pool");
            self.pool.release(connection);
        }
    }

    fn ensure_open(&self, operation: &str) -> DbResult<()> {
        if self.is_closed() {
            Err(DbError::illegal_state(format!(
                "{} called on a closed statement",
                operation
            )))
        } else {
            Ok(())
        }
    }

    fn parts(&mut self, operation: &str) -> DbResult<(&mut P::Connection, &mut StatementOf<P>)> {
        match (self.connection.as_mut(), self.statement.as_mut()) {
            (Some(connection), Some(statement)) => Ok((connection, statement)),
            _ => Err(DbError::illegal_state(format!(
                "{} called on a closed statement",
                operation
            ))),
        }
    }

    /// Like [`parts`](Self::parts), but marks a driver call as pending until
    /// [`settle`](Self::settle) runs.
    fn start(&mut self, operation: &str) -> DbResult<(&mut P::Connection, &mut StatementOf<P>)> {
        self.ensure_open(operation)?;
        self.in_flight = true;
        self.parts(operation)
    }

    fn settle<T>(&mut self, result: DbResult<T>) -> DbResult<T> {
        self.in_flight = false;
        self.poison_on_err(result)
    }

    fn poison_on_err<T>(&mut self, result: DbResult<T>) -> DbResult<T> {
        if let Err(e) = &result {
            self.poisoned = true;
            error!(statement_id = %self.id, error = %e, kind = ?e.kind(), "Statement failed");
        }
        result
    }
}

impl<P: ConnectionPool> Drop for StatementHandle<P> {
    fn drop(&mut self) {
        if self.is_closed() {
            return;
        }
        warn!(
            statement_id = %self.id,
            "Statement released via Drop - consider using explicit close()"
        );
        self.close();
    }
}
