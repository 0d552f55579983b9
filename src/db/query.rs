//! Single-row update and query execution.

use crate::db::binder::ParamBinder;
use crate::db::cursor::ResultCursor;
use crate::db::driver::ConnectionPool;
use crate::db::gateway::Gateway;
use crate::db::statement::StatementHandle;
use crate::error::{DbError, DbResult};
use crate::models::{SqlType, SqlValue};

/// One statement with one row of parameters, executed at most once.
///
/// ```ignore
/// let updated = gateway
///     .query("UPDATE students SET major = ? WHERE id = ?")
///     .set("CS")
///     .set(1)
///     .execute_update()
///     .await?;
/// ```
pub struct QueryExecutor<P: ConnectionPool> {
    gateway: Gateway<P>,
    sql: String,
    params: ParamBinder,
    max_rows: Option<usize>,
    executed: bool,
}

impl<P: ConnectionPool> std::fmt::Debug for QueryExecutor<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryExecutor")
            .field("sql", &self.sql)
            .field("params", &self.params.len())
            .field("max_rows", &self.max_rows)
            .field("executed", &self.executed)
            .finish()
    }
}

impl<P: ConnectionPool> QueryExecutor<P> {
    pub(crate) fn new(gateway: Gateway<P>, sql: impl Into<String>) -> Self {
        let max_rows = gateway.max_rows();
        Self {
            gateway,
            sql: sql.into(),
            params: ParamBinder::new(),
            max_rows,
            executed: false,
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &ParamBinder {
        &self.params
    }

    pub fn is_executed(&self) -> bool {
        self.executed
    }

    /// Append the next positional value.
    pub fn set(mut self, value: impl Into<SqlValue>) -> Self {
        self.params.append(value);
        self
    }

    /// Append the next positional value with an explicit type.
    pub fn set_typed(mut self, hint: SqlType, value: impl Into<SqlValue>) -> Self {
        self.params.append_typed(hint, value);
        self
    }

    /// Append several positional values in order.
    pub fn set_list<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<SqlValue>,
    {
        self.params.extend(values);
        self
    }

    /// Replace all parameters with `params`.
    pub fn with_params(mut self, params: ParamBinder) -> Self {
        self.params = params;
        self
    }

    /// Stop reading query results after `max_rows` rows. The cursor reports
    /// whether more rows were available.
    pub fn max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = Some(max_rows);
        self
    }

    /// Execute as an update and return the number of affected rows.
    ///
    /// The connection is evicted if binding or execution fails.
    pub async fn execute_update(&mut self) -> DbResult<u64> {
        self.mark_executed()?;
        let mut handle = self.gateway.open_single(&self.sql).await?;

        let result = run_update(&mut handle, &self.params).await;
        handle.close();
        result
    }

    /// Execute as a query. The returned cursor keeps the connection until it
    /// is closed or dropped.
    pub async fn execute_query(&mut self) -> DbResult<ResultCursor<P>> {
        self.mark_executed()?;
        let mut handle = self.gateway.open_single(&self.sql).await?;
        handle.set_max_rows(self.max_rows);

        match run_query(&mut handle, &self.params).await {
            Ok(rows) => Ok(handle.into_cursor(rows)),
            Err(e) => {
                handle.close();
                Err(e)
            }
        }
    }

    fn mark_executed(&mut self) -> DbResult<()> {
        if self.executed {
            return Err(DbError::illegal_state(
                "query has already been executed; build a new one from the gateway",
            ));
        }
        self.executed = true;
        Ok(())
    }
}

async fn run_update<P: ConnectionPool>(
    handle: &mut StatementHandle<P>,
    params: &ParamBinder,
) -> DbResult<u64> {
    handle.bind_row(params)?;
    handle.execute_update().await
}

async fn run_query<P: ConnectionPool>(
    handle: &mut StatementHandle<P>,
    params: &ParamBinder,
) -> DbResult<Vec<crate::models::Row>> {
    handle.bind_row(params)?;
    handle.execute_query().await
}
