//! Recording fake pool shared by the integration tests.
//!
//! Every pool, connection and statement call is appended to one event log so
//! tests can assert on exact call sequences. Failures are injected through
//! [`Script`].

#![allow(dead_code)]

use sqlgate::db::{ConnectionPool, DriverConnection, DriverStatement};
use sqlgate::error::{DbError, DbResult};
use sqlgate::models::{ColumnMetadata, Row, SqlType, SqlValue};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Acquire(usize),
    Release(usize),
    Evict(usize),
    Prepare(String),
    AutoCommit(bool),
    Bind {
        position: usize,
        value: SqlValue,
        hint: Option<SqlType>,
    },
    AddBatch,
    ExecuteUpdate,
    ExecuteQuery,
    ExecuteBatch(usize),
    Commit,
    Rollback,
}

/// Failures and results the fake should produce.
#[derive(Debug, Clone, Default)]
pub struct Script {
    pub fail_acquire: bool,
    pub fail_prepare: bool,
    pub fail_auto_commit: bool,
    /// Fail the bind at this 1-based position.
    pub fail_bind_at: Option<usize>,
    pub fail_execute: bool,
    pub fail_commit: bool,
    /// Execute calls never complete, as with a stuck server.
    pub hang_execute: bool,
    pub update_count: u64,
    pub query_rows: Vec<Vec<SqlValue>>,
}

type Log = Arc<Mutex<Vec<Event>>>;

pub struct FakePool {
    log: Log,
    script: Arc<Script>,
    next_id: Mutex<usize>,
}

impl FakePool {
    pub fn new() -> Self {
        Self::with_script(Script::default())
    }

    pub fn with_script(script: Script) -> Self {
        Self {
            log: Arc::new(Mutex::new(Vec::new())),
            script: Arc::new(script),
            next_id: Mutex::new(0),
        }
    }

    pub fn events(&self) -> Vec<Event> {
        self.log.lock().unwrap().clone()
    }

    pub fn count(&self, matches: impl Fn(&Event) -> bool) -> usize {
        self.log.lock().unwrap().iter().filter(|e| matches(e)).count()
    }

    pub fn acquires(&self) -> usize {
        self.count(|e| matches!(e, Event::Acquire(_)))
    }

    pub fn releases(&self) -> usize {
        self.count(|e| matches!(e, Event::Release(_)))
    }

    pub fn evictions(&self) -> usize {
        self.count(|e| matches!(e, Event::Evict(_)))
    }

    pub fn binds(&self) -> Vec<(usize, SqlValue, Option<SqlType>)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Bind {
                    position,
                    value,
                    hint,
                } => Some((position, value, hint)),
                _ => None,
            })
            .collect()
    }
}

pub struct FakeConnection {
    id: usize,
    log: Log,
    script: Arc<Script>,
}

impl FakeConnection {
    fn record(&self, event: Event) {
        self.log.lock().unwrap().push(event);
    }

    async fn hang_if_scripted(&self) {
        if self.script.hang_execute {
            std::future::pending::<()>().await;
        }
    }

    fn fail_if(&self, fail: bool, what: &str) -> DbResult<()> {
        if fail {
            Err(DbError::execution(format!("{} failed", what), None, "injected"))
        } else {
            Ok(())
        }
    }
}

pub struct FakeStatement {
    log: Log,
    script: Arc<Script>,
    staged: usize,
}

impl ConnectionPool for FakePool {
    type Connection = FakeConnection;

    async fn acquire(&self) -> DbResult<FakeConnection> {
        if self.script.fail_acquire {
            return Err(DbError::acquire("pool exhausted", "injected"));
        }
        let id = {
            let mut next = self.next_id.lock().unwrap();
            *next += 1;
            *next
        };
        self.log.lock().unwrap().push(Event::Acquire(id));
        Ok(FakeConnection {
            id,
            log: Arc::clone(&self.log),
            script: Arc::clone(&self.script),
        })
    }

    fn release(&self, connection: FakeConnection) {
        self.log.lock().unwrap().push(Event::Release(connection.id));
    }

    fn evict(&self, connection: FakeConnection) {
        self.log.lock().unwrap().push(Event::Evict(connection.id));
    }
}

impl DriverConnection for FakeConnection {
    type Statement = FakeStatement;

    async fn prepare(&mut self, sql: &str) -> DbResult<FakeStatement> {
        self.record(Event::Prepare(sql.to_string()));
        if self.script.fail_prepare {
            return Err(DbError::prepare("syntax error", Some("42000".into())));
        }
        Ok(FakeStatement {
            log: Arc::clone(&self.log),
            script: Arc::clone(&self.script),
            staged: 0,
        })
    }

    async fn set_auto_commit(&mut self, enabled: bool) -> DbResult<()> {
        self.record(Event::AutoCommit(enabled));
        self.fail_if(self.script.fail_auto_commit, "set_auto_commit")
    }

    async fn commit(&mut self) -> DbResult<()> {
        self.record(Event::Commit);
        self.fail_if(self.script.fail_commit, "commit")
    }

    async fn rollback(&mut self) -> DbResult<()> {
        self.record(Event::Rollback);
        Ok(())
    }

    async fn execute_update(&mut self, _statement: &FakeStatement) -> DbResult<u64> {
        self.record(Event::ExecuteUpdate);
        self.hang_if_scripted().await;
        self.fail_if(self.script.fail_execute, "execute_update")?;
        Ok(self.script.update_count)
    }

    async fn execute_query(
        &mut self,
        _statement: &FakeStatement,
        limit: Option<usize>,
    ) -> DbResult<Vec<Row>> {
        self.record(Event::ExecuteQuery);
        self.hang_if_scripted().await;
        self.fail_if(self.script.fail_execute, "execute_query")?;
        let width = self.script.query_rows.first().map_or(0, Vec::len);
        let columns: Arc<[ColumnMetadata]> = (0..width)
            .map(|idx| ColumnMetadata::new(format!("c{}", idx + 1), "TEXT", true))
            .collect();
        Ok(self
            .script
            .query_rows
            .iter()
            .take(limit.unwrap_or(usize::MAX))
            .map(|values| Row::new(Arc::clone(&columns), values.clone()))
            .collect())
    }

    async fn execute_batch(&mut self, statement: &FakeStatement) -> DbResult<Vec<u64>> {
        self.record(Event::ExecuteBatch(statement.staged));
        self.hang_if_scripted().await;
        self.fail_if(self.script.fail_execute, "execute_batch")?;
        Ok(vec![1; statement.staged])
    }
}

impl DriverStatement for FakeStatement {
    fn bind(&mut self, position: usize, value: SqlValue, hint: Option<SqlType>) -> DbResult<()> {
        self.log.lock().unwrap().push(Event::Bind {
            position,
            value,
            hint,
        });
        if self.script.fail_bind_at == Some(position) {
            return Err(DbError::bind(position, "injected bind failure"));
        }
        Ok(())
    }

    fn add_batch(&mut self) -> DbResult<()> {
        self.log.lock().unwrap().push(Event::AddBatch);
        self.staged += 1;
        Ok(())
    }

    fn clear_parameters(&mut self) {}
}
