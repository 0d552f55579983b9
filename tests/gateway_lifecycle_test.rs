//! Connection lifecycle tests against a recording fake pool.
//!
//! These tests verify that every execution path hands its connection back
//! exactly once: returned after a clean run, evicted after any failure.

mod common;

use common::{Event, FakePool, Script};
use sqlgate::config::ReleasePolicy;
use sqlgate::db::{BatchMode, Gateway};
use sqlgate::error::{DbError, ErrorKind};
use sqlgate::models::{SqlType, SqlValue};
use sqlgate::params;
use std::time::Duration;
use tokio::time::timeout;

fn gateway(script: Script) -> Gateway<FakePool> {
    Gateway::new(FakePool::with_script(script))
}

// =========================================================================
// Binding
// =========================================================================

#[tokio::test]
async fn test_binder_positions_follow_insertion_order() {
    let gateway = gateway(Script::default());

    gateway
        .query("INSERT INTO students VALUES (?, ?, ?, ?, ?)")
        .with_params(params![1, "Student1", 18, "CS", 1])
        .execute_update()
        .await
        .unwrap();

    let binds = gateway.pool().binds();
    let positions: Vec<usize> = binds.iter().map(|(p, _, _)| *p).collect();
    assert_eq!(positions, vec![1, 2, 3, 4, 5]);
    assert_eq!(binds[1].1, SqlValue::from("Student1"));
    assert_eq!(binds[3].1, SqlValue::from("CS"));
}

#[tokio::test]
async fn test_typed_bindings_pass_hint() {
    let gateway = gateway(Script::default());

    gateway
        .query("UPDATE students SET age = ? WHERE id = ?")
        .set_typed(SqlType::Integer, SqlValue::Null)
        .set(7)
        .execute_update()
        .await
        .unwrap();

    let binds = gateway.pool().binds();
    assert_eq!(binds[0], (1, SqlValue::Null, Some(SqlType::Integer)));
    assert_eq!(binds[1], (2, SqlValue::Int(7), None));
}

// =========================================================================
// Single execution
// =========================================================================

#[tokio::test]
async fn test_update_returns_row_count_and_releases() {
    let gateway = gateway(Script {
        update_count: 3,
        ..Default::default()
    });

    let count = gateway
        .query("DELETE FROM students WHERE major = ?")
        .set("CS")
        .execute_update()
        .await
        .unwrap();

    assert_eq!(count, 3);
    assert_eq!(gateway.pool().acquires(), 1);
    assert_eq!(gateway.pool().releases(), 1);
    assert_eq!(gateway.pool().evictions(), 0);
}

#[tokio::test]
async fn test_execute_twice_is_illegal_and_does_not_acquire() {
    let gateway = gateway(Script::default());
    let mut query = gateway.query("DELETE FROM students");

    query.execute_update().await.unwrap();
    let err = query.execute_update().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IllegalState);
    assert!(err.is_contract_violation());

    let err = query.execute_query().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IllegalState);

    assert_eq!(gateway.pool().acquires(), 1);
}

#[tokio::test]
async fn test_bind_failure_evicts_once() {
    let gateway = gateway(Script {
        fail_bind_at: Some(2),
        ..Default::default()
    });

    let err = gateway
        .query("INSERT INTO t VALUES (?, ?)")
        .set(1)
        .set(2)
        .execute_update()
        .await
        .unwrap_err();

    assert!(matches!(err, DbError::Bind { position: 2, .. }));
    assert!(!gateway.pool().events().contains(&Event::ExecuteUpdate));
    assert_eq!(gateway.pool().evictions(), 1);
    assert_eq!(gateway.pool().releases(), 0);
}

#[tokio::test]
async fn test_execute_failure_evicts_once() {
    let gateway = gateway(Script {
        fail_execute: true,
        ..Default::default()
    });

    let err = gateway
        .query("UPDATE t SET x = 1")
        .execute_update()
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Execution);
    assert_eq!(gateway.pool().evictions(), 1);
    assert_eq!(gateway.pool().releases(), 0);
}

#[tokio::test]
async fn test_prepare_failure_evicts_immediately() {
    let gateway = gateway(Script {
        fail_prepare: true,
        ..Default::default()
    });

    let err = gateway
        .query("SELEC nonsense")
        .execute_query()
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Prepare);
    assert_eq!(err.sql_state(), Some("42000"));
    assert_eq!(
        gateway.pool().events(),
        vec![
            Event::Acquire(1),
            Event::Prepare("SELEC nonsense".into()),
            Event::Evict(1),
        ]
    );
}

#[tokio::test]
async fn test_acquire_failure_has_nothing_to_evict() {
    let gateway = gateway(Script {
        fail_acquire: true,
        ..Default::default()
    });

    let err = gateway
        .query("SELECT 1")
        .execute_update()
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Acquire);
    assert!(err.is_retryable());
    assert!(gateway.pool().events().is_empty());
}

// =========================================================================
// Statement handles
// =========================================================================

#[tokio::test]
async fn test_close_twice_releases_once() {
    let gateway = gateway(Script::default());
    let mut handle = gateway.open_single("SELECT 1").await.unwrap();

    handle.close();
    handle.close();
    drop(handle);

    assert_eq!(gateway.pool().releases(), 1);
    assert_eq!(gateway.pool().evictions(), 0);
}

#[tokio::test]
async fn test_close_twice_evicts_once_under_always_evict() {
    let gateway = Gateway::with_policy(FakePool::new(), ReleasePolicy::AlwaysEvict);
    let mut handle = gateway.open_single("SELECT 1").await.unwrap();

    handle.close();
    handle.close();
    drop(handle);

    assert_eq!(gateway.pool().evictions(), 1);
    assert_eq!(gateway.pool().releases(), 0);
}

#[tokio::test]
async fn test_operations_after_close_are_illegal() {
    let gateway = gateway(Script::default());
    let mut handle = gateway.open_single("SELECT ?").await.unwrap();
    handle.close();

    assert!(handle.is_closed());
    assert_eq!(
        handle.bind_row(&params![1]).unwrap_err().kind(),
        ErrorKind::IllegalState
    );
    assert_eq!(
        handle.execute_update().await.unwrap_err().kind(),
        ErrorKind::IllegalState
    );
    assert_eq!(
        handle.commit().await.unwrap_err().kind(),
        ErrorKind::IllegalState
    );
}

#[tokio::test]
async fn test_dropped_idle_handle_is_released() {
    let gateway = gateway(Script::default());
    {
        let handle = gateway.open_single("SELECT 1").await.unwrap();
        assert!(!handle.is_in_flight());
    }
    assert_eq!(gateway.pool().releases(), 1);
    assert_eq!(gateway.pool().evictions(), 0);
}

#[tokio::test]
async fn test_cancelled_update_evicts() {
    let gateway = gateway(Script {
        hang_execute: true,
        ..Default::default()
    });
    let mut query = gateway.query("UPDATE t SET x = ?").set(1);

    let outcome = timeout(Duration::from_millis(20), query.execute_update()).await;

    assert!(outcome.is_err());
    assert_eq!(gateway.pool().count(|e| *e == Event::ExecuteUpdate), 1);
    assert_eq!(gateway.pool().evictions(), 1);
    assert_eq!(gateway.pool().releases(), 0);
}

#[tokio::test]
async fn test_cancelled_query_on_handle_evicts() {
    let gateway = gateway(Script {
        hang_execute: true,
        ..Default::default()
    });
    let mut handle = gateway.open_single("SELECT 1").await.unwrap();

    let outcome = timeout(Duration::from_millis(20), handle.execute_query()).await;
    assert!(outcome.is_err());
    assert!(handle.is_in_flight());

    handle.close();
    assert_eq!(gateway.pool().evictions(), 1);
    assert_eq!(gateway.pool().releases(), 0);
}

#[tokio::test]
async fn test_unfinished_transaction_is_evicted() {
    let gateway = gateway(Script::default());
    let mut handle = gateway.open_batch("INSERT INTO t VALUES (?)").await.unwrap();
    assert!(handle.in_transaction());

    handle.close();
    assert_eq!(gateway.pool().evictions(), 1);
    assert_eq!(gateway.pool().releases(), 0);
}

#[tokio::test]
async fn test_always_evict_policy() {
    let gateway = Gateway::with_policy(FakePool::new(), ReleasePolicy::AlwaysEvict);

    gateway
        .query("UPDATE t SET x = 1")
        .execute_update()
        .await
        .unwrap();

    assert_eq!(gateway.pool().evictions(), 1);
    assert_eq!(gateway.pool().releases(), 0);
}

// =========================================================================
// Cursors
// =========================================================================

#[tokio::test]
async fn test_cursor_holds_connection_until_closed() {
    let gateway = gateway(Script {
        query_rows: vec![
            vec![SqlValue::Int(1), SqlValue::from("A")],
            vec![SqlValue::Int(2), SqlValue::from("B")],
        ],
        ..Default::default()
    });

    let mut cursor = gateway
        .query("SELECT id, name FROM students")
        .execute_query()
        .await
        .unwrap();

    assert_eq!(cursor.len(), 2);
    assert_eq!(cursor.columns().len(), 2);
    assert_eq!(gateway.pool().releases(), 0);

    let first = cursor.next_row().unwrap();
    assert_eq!(first.get(1), Some(&SqlValue::from("A")));
    assert_eq!(cursor.len(), 1);

    cursor.close();
    assert_eq!(gateway.pool().releases(), 1);
    assert_eq!(gateway.pool().evictions(), 0);
}

#[tokio::test]
async fn test_dropped_cursor_releases() {
    let gateway = gateway(Script {
        query_rows: vec![vec![SqlValue::Int(1)]],
        ..Default::default()
    });

    let rows: Vec<_> = gateway
        .query("SELECT 1")
        .execute_query()
        .await
        .unwrap()
        .collect();

    assert_eq!(rows.len(), 1);
    assert_eq!(gateway.pool().releases(), 1);
}

#[tokio::test]
async fn test_max_rows_caps_cursor() {
    let rows = (1..=5).map(|i| vec![SqlValue::Int(i)]).collect();
    let gateway = gateway(Script {
        query_rows: rows,
        ..Default::default()
    });

    let cursor = gateway
        .query("SELECT id FROM t")
        .max_rows(2)
        .execute_query()
        .await
        .unwrap();
    assert_eq!(cursor.len(), 2);
    assert!(cursor.has_more());
    let ids: Vec<_> = cursor.filter_map(|row| row.get(0).and_then(SqlValue::as_i64)).collect();
    assert_eq!(ids, vec![1, 2]);

    let cursor = gateway
        .query("SELECT id FROM t")
        .max_rows(5)
        .execute_query()
        .await
        .unwrap();
    assert_eq!(cursor.len(), 5);
    assert!(!cursor.has_more());
    cursor.close();

    assert_eq!(gateway.pool().releases(), 2);
}

#[tokio::test]
async fn test_gateway_default_max_rows() {
    let rows = (1..=3).map(|i| vec![SqlValue::Int(i)]).collect();
    let gateway = Gateway::new(FakePool::with_script(Script {
        query_rows: rows,
        ..Default::default()
    }))
    .with_max_rows(Some(1));

    let cursor = gateway.query("SELECT id FROM t").execute_query().await.unwrap();
    assert_eq!(cursor.len(), 1);
    assert!(cursor.has_more());
}

#[tokio::test]
async fn test_failed_query_evicts() {
    let gateway = gateway(Script {
        fail_execute: true,
        ..Default::default()
    });

    let result = gateway.query("SELECT 1").execute_query().await;
    assert!(result.is_err());
    assert_eq!(gateway.pool().evictions(), 1);
}

// =========================================================================
// Batches
// =========================================================================

#[tokio::test]
async fn test_batch_commits_explicitly() {
    let gateway = gateway(Script::default());
    let mut batch = gateway.batch("INSERT INTO t VALUES (?, ?)");
    batch
        .push_list([SqlValue::from(1), SqlValue::from("A")])
        .unwrap()
        .push_list([SqlValue::from(2), SqlValue::from("B")])
        .unwrap()
        .push_list([SqlValue::from(3), SqlValue::from("C")])
        .unwrap();

    let counts = batch.execute_batch().await.unwrap();
    assert_eq!(counts, vec![1, 1, 1]);

    let events = gateway.pool().events();
    assert_eq!(events[1], Event::Prepare("INSERT INTO t VALUES (?, ?)".into()));
    assert_eq!(events[2], Event::AutoCommit(false));
    assert!(events.contains(&Event::ExecuteBatch(3)));
    assert_eq!(events[events.len() - 2], Event::Commit);
    assert_eq!(events[events.len() - 1], Event::Release(1));
}

#[tokio::test]
async fn test_accumulate_mode_batch() {
    let gateway = gateway(Script::default());
    let mut batch = gateway.batch("INSERT INTO t VALUES (?, ?)");
    batch.add(1).unwrap().add("A").unwrap().end_row().unwrap();
    batch
        .add(2)
        .unwrap()
        .add_typed(SqlType::Varchar, "B")
        .unwrap()
        .end_row()
        .unwrap();
    assert_eq!(batch.request().mode(), BatchMode::Accumulate);

    let counts = batch.execute_batch().await.unwrap();
    assert_eq!(counts, vec![1, 1]);
    assert_eq!(gateway.pool().count(|e| *e == Event::AddBatch), 2);
    assert_eq!(gateway.pool().binds()[3].2, Some(SqlType::Varchar));
}

#[tokio::test]
async fn test_batch_mode_conflicts() {
    let gateway = gateway(Script::default());

    let mut list_first = gateway.batch("INSERT INTO t VALUES (?)");
    list_first.push_list([1]).unwrap();
    let err = list_first.add(2).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ModeConflict);

    let mut accumulate_first = gateway.batch("INSERT INTO t VALUES (?)");
    accumulate_first.add(1).unwrap();
    let err = accumulate_first.push_row(params![2]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ModeConflict);

    assert_eq!(gateway.pool().acquires(), 0);
}

#[tokio::test]
async fn test_batch_failure_rolls_back_and_evicts() {
    let gateway = gateway(Script {
        fail_execute: true,
        ..Default::default()
    });
    let mut batch = gateway.batch("INSERT INTO t VALUES (?)");
    batch.push_list([1]).unwrap();

    let err = batch.execute_batch().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Execution);

    let events = gateway.pool().events();
    assert!(events.contains(&Event::Rollback));
    assert!(!events.contains(&Event::Commit));
    assert_eq!(gateway.pool().evictions(), 1);
    assert_eq!(gateway.pool().releases(), 0);
}

#[tokio::test]
async fn test_commit_failure_evicts() {
    let gateway = gateway(Script {
        fail_commit: true,
        ..Default::default()
    });
    let mut batch = gateway.batch("INSERT INTO t VALUES (?)");
    batch.push_list([1]).unwrap();

    assert!(batch.execute_batch().await.is_err());
    assert_eq!(gateway.pool().evictions(), 1);
}

#[tokio::test]
async fn test_auto_commit_failure_evicts() {
    let gateway = gateway(Script {
        fail_auto_commit: true,
        ..Default::default()
    });
    let mut batch = gateway.batch("INSERT INTO t VALUES (?)");
    batch.push_list([1]).unwrap();

    assert!(batch.execute_batch().await.is_err());
    assert_eq!(gateway.pool().evictions(), 1);
    assert!(!gateway.pool().events().contains(&Event::AddBatch));
}

#[tokio::test]
async fn test_empty_batch_does_not_acquire() {
    let gateway = gateway(Script::default());
    let mut batch = gateway.batch("INSERT INTO t VALUES (?)");

    assert_eq!(batch.execute_batch().await.unwrap(), Vec::<u64>::new());
    assert!(batch.is_finalized());
    assert_eq!(gateway.pool().acquires(), 0);
}

#[tokio::test]
async fn test_batch_executes_once() {
    let gateway = gateway(Script::default());
    let mut batch = gateway.batch("INSERT INTO t VALUES (?)");
    batch.push_list([1]).unwrap();

    batch.execute_batch().await.unwrap();
    let err = batch.execute_batch().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IllegalState);
    assert_eq!(gateway.pool().acquires(), 1);
}

#[tokio::test]
async fn test_partial_row_blocks_execution() {
    let gateway = gateway(Script::default());
    let mut batch = gateway.batch("INSERT INTO t VALUES (?, ?)");
    batch.add(1).unwrap().add("A").unwrap().end_row().unwrap();
    batch.add(2).unwrap();

    let err = batch.execute_batch().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IllegalState);
    assert!(!batch.is_finalized());
    assert_eq!(gateway.pool().acquires(), 0);

    batch.add("B").unwrap().end_row().unwrap();
    assert_eq!(batch.execute_batch().await.unwrap(), vec![1, 1]);
}

#[tokio::test]
async fn test_concurrent_executions_share_pool() {
    let gateway = gateway(Script {
        update_count: 1,
        ..Default::default()
    });

    let tasks: Vec<_> = (0..8)
        .map(|i| {
            let gateway = gateway.clone();
            tokio::spawn(async move {
                gateway
                    .query("UPDATE t SET x = ? WHERE id = ?")
                    .set(i)
                    .set(i)
                    .execute_update()
                    .await
            })
        })
        .collect();

    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap(), 1);
    }
    assert_eq!(gateway.pool().acquires(), 8);
    assert_eq!(gateway.pool().releases(), 8);
}
