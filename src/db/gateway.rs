//! Pool-facing entry point.
//!
//! The [`Gateway`] is the only component that acquires connections. Every
//! connection it hands out lives inside a [`StatementHandle`], which returns
//! or evicts it on close.

use crate::config::ReleasePolicy;
use crate::db::batch::BatchExecutor;
use crate::db::driver::{ConnectionPool, DriverConnection};
use crate::db::query::QueryExecutor;
use crate::db::statement::StatementHandle;
use crate::error::DbResult;
use std::sync::Arc;
use tracing::{debug, warn};

/// Opens statement handles against a shared pool.
///
/// Cloning is cheap; clones share the same pool.
pub struct Gateway<P: ConnectionPool> {
    pool: Arc<P>,
    policy: ReleasePolicy,
    max_rows: Option<usize>,
}

impl<P: ConnectionPool> Clone for Gateway<P> {
    fn clone(&self) -> Self {
        Self {
            pool: Arc::clone(&self.pool),
            policy: self.policy,
            max_rows: self.max_rows,
        }
    }
}

impl<P: ConnectionPool> std::fmt::Debug for Gateway<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("policy", &self.policy)
            .field("max_rows", &self.max_rows)
            .finish_non_exhaustive()
    }
}

impl<P: ConnectionPool> Gateway<P> {
    /// Create a gateway with the default release policy.
    pub fn new(pool: P) -> Self {
        Self::with_policy(pool, ReleasePolicy::default())
    }

    pub fn with_policy(pool: P, policy: ReleasePolicy) -> Self {
        Self::from_shared(Arc::new(pool), policy)
    }

    /// Create a gateway over a pool that is also held elsewhere.
    pub fn from_shared(pool: Arc<P>, policy: ReleasePolicy) -> Self {
        Self {
            pool,
            policy,
            max_rows: None,
        }
    }

    /// Default row cap for queries built from this gateway.
    pub fn with_max_rows(mut self, max_rows: Option<usize>) -> Self {
        self.max_rows = max_rows;
        self
    }

    pub fn max_rows(&self) -> Option<usize> {
        self.max_rows
    }

    pub fn pool(&self) -> &Arc<P> {
        &self.pool
    }

    pub fn release_policy(&self) -> ReleasePolicy {
        self.policy
    }

    /// Start building a single-row update or query.
    pub fn query(&self, sql: impl Into<String>) -> QueryExecutor<P> {
        QueryExecutor::new(self.clone(), sql)
    }

    /// Start building a multi-row batch.
    pub fn batch(&self, sql: impl Into<String>) -> BatchExecutor<P> {
        BatchExecutor::new(self.clone(), sql)
    }

    /// Open a handle with auto-commit enabled.
    pub async fn open_single(&self, sql: &str) -> DbResult<StatementHandle<P>> {
        self.open(sql, true).await
    }

    /// Open a handle inside a transaction. The caller must commit or roll
    /// back before closing, otherwise the connection is evicted.
    pub async fn open_batch(&self, sql: &str) -> DbResult<StatementHandle<P>> {
        self.open(sql, false).await
    }

    async fn open(&self, sql: &str, auto_commit: bool) -> DbResult<StatementHandle<P>> {
        let mut connection = self.pool.acquire().await?;

        let prepared = connection.prepare(sql).await;
        let statement = match prepared {
            Ok(statement) => statement,
            Err(e) => {
                warn!(error = %e, "Prepare failed, evicting connection");
                self.pool.evict(connection);
                return Err(e);
            }
        };

        if !auto_commit {
            let started = connection.set_auto_commit(false).await;
            if let Err(e) = started {
                warn!(error = %e, "Disabling auto-commit failed, evicting connection");
                self.pool.evict(connection);
                return Err(e);
            }
        }

        let handle = StatementHandle::new(
            Arc::clone(&self.pool),
            connection,
            statement,
            !auto_commit,
            self.policy,
        );
        debug!(statement_id = %handle.id(), auto_commit, "Opened statement");
        Ok(handle)
    }
}
