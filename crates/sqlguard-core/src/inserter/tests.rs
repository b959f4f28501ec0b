//! Tests for the batch insert accumulator

use super::*;
use crate::guard::{Abort, run_guarded};
use crate::test_support::{RecordingDb, RecordingTransaction, TxEvent};
use crate::{SqlError, run_in_transaction, values};
use pretty_assertions::assert_eq;
use rstest::rstest;

fn id_name_config(batch_size: usize) -> InsertConfig {
    InsertConfig::new(BackendKind::Sqlite, "t", ["id", "name"]).with_batch_size(batch_size)
}

// =============================================================================
// SQL generation
// =============================================================================

#[test]
fn test_build_insert_sql_single_row() {
    let columns = vec!["id".to_string(), "name".to_string()];
    assert_eq!(
        build_insert_sql(BackendKind::Postgres, "t", &columns, 1),
        "INSERT INTO t (id, name) VALUES ($1,$2)"
    );
}

#[test]
fn test_build_insert_sql_numbers_placeholders_row_major() {
    let columns = vec!["a".to_string(), "b".to_string(), "c".to_string()];
    assert_eq!(
        build_insert_sql(BackendKind::Sqlite, "x", &columns, 3),
        "INSERT INTO x (a, b, c) VALUES ($1,$2,$3), ($4,$5,$6), ($7,$8,$9)"
    );
}

#[test]
fn test_build_insert_sql_positional_for_mysql() {
    let columns = vec!["id".to_string(), "name".to_string()];
    assert_eq!(
        build_insert_sql(BackendKind::Mysql, "t", &columns, 2),
        "INSERT INTO t (id, name) VALUES (?,?), (?,?)"
    );
}

#[test]
fn test_config_clamps_batch_size() {
    assert_eq!(id_name_config(0).effective_batch_size(), 1);
    assert_eq!(
        InsertConfig::new(BackendKind::Generic, "t", ["id"]).effective_batch_size(),
        DEFAULT_BATCH_SIZE
    );
}

#[test]
fn test_config_deserializes_with_defaults() {
    let config: InsertConfig = toml::from_str(
        r#"
        table = "events"
        columns = ["id", "payload"]
        backend = "postgres"
        "#,
    )
    .unwrap();

    assert_eq!(config.batch_size, DEFAULT_BATCH_SIZE);
    assert!(config.bulk_load);
    assert_eq!(config.backend, BackendKind::Postgres);
}

// =============================================================================
// Statement strategy
// =============================================================================

#[tokio::test]
async fn test_two_rows_then_one_row_scenario() {
    let tx = RecordingTransaction::new();
    let written = run_guarded(async {
        let mut inserter = Inserter::new(&tx, id_name_config(2)).await?;
        inserter.add(values![1_i64, "a"]).await?;
        inserter.add(values![2_i64, "b"]).await?;
        assert_eq!(inserter.pending_rows(), 0);
        inserter.add(values![3_i64, "c"]).await?;
        assert_eq!(inserter.pending_rows(), 1);
        inserter.finish().await
    })
    .await
    .unwrap();

    assert_eq!(written, 3);
    assert_eq!(
        tx.executed(),
        vec![
            (
                "INSERT INTO t (id, name) VALUES ($1,$2), ($3,$4)".to_string(),
                values![1_i64, "a", 2_i64, "b"],
            ),
            (
                "INSERT INTO t (id, name) VALUES ($1,$2)".to_string(),
                values![3_i64, "c"],
            ),
        ]
    );
}

#[rstest]
#[case::exact_multiple(6, 3, 2)]
#[case::remainder(7, 3, 3)]
#[case::fewer_than_batch(2, 5, 1)]
#[case::no_rows(0, 4, 0)]
#[case::batch_of_one(3, 1, 3)]
#[tokio::test]
async fn test_flush_count(#[case] rows: i64, #[case] batch: usize, #[case] statements: usize) {
    let tx = RecordingTransaction::new();
    let config = InsertConfig::new(BackendKind::Postgres, "t", ["id"])
        .with_batch_size(batch)
        .with_bulk_load(false);

    let written = run_guarded(async {
        let mut inserter = Inserter::new(&tx, config).await?;
        for id in 0..rows {
            inserter.add(values![id]).await?;
        }
        inserter.finish().await
    })
    .await
    .unwrap();

    assert_eq!(written, rows as u64);
    assert_eq!(tx.executed().len(), statements);
}

#[tokio::test]
async fn test_params_follow_row_order_across_batches() {
    let tx = RecordingTransaction::new();
    run_guarded(async {
        let mut inserter = Inserter::new(&tx, id_name_config(3)).await?;
        for id in 1..=4_i64 {
            inserter.add(values![id, format!("n{}", id)]).await?;
        }
        inserter.finish().await
    })
    .await
    .unwrap();

    let executed = tx.executed();
    assert_eq!(executed[0].1, values![1_i64, "n1", 2_i64, "n2", 3_i64, "n3"]);
    assert_eq!(executed[1].1, values![4_i64, "n4"]);
}

#[tokio::test]
async fn test_explicit_flush_with_nothing_pending_is_noop() {
    let tx = RecordingTransaction::new();
    run_guarded(async {
        let mut inserter = Inserter::new(&tx, id_name_config(10)).await?;
        inserter.flush().await?;
        inserter.add(values![1_i64, "a"]).await?;
        inserter.flush().await?;
        inserter.flush().await?;
        inserter.finish().await
    })
    .await
    .unwrap();

    assert_eq!(tx.executed().len(), 1);
}

#[tokio::test]
#[should_panic(expected = "row width does not match")]
async fn test_wrong_width_row_panics() {
    let tx = RecordingTransaction::new();
    let mut inserter = Inserter::new(&tx, id_name_config(1)).await.unwrap();
    let _ = inserter.add(values![1_i64]).await;
}

#[tokio::test]
async fn test_wrong_width_row_leaves_state_untouched() {
    let tx = RecordingTransaction::new();
    let mut inserter = Inserter::new(&tx, id_name_config(2)).await.unwrap();
    inserter.add(values![1_i64, "a"]).await.unwrap();

    let outcome = futures::FutureExt::catch_unwind(std::panic::AssertUnwindSafe(
        inserter.add(values![2_i64, "b", "extra"]),
    ))
    .await;

    assert!(outcome.is_err());
    assert_eq!(inserter.pending_rows(), 1);
    assert!(tx.executed().is_empty());
    drop(inserter);
}

#[tokio::test]
#[should_panic(expected = "needs at least one column")]
async fn test_empty_column_list_panics() {
    let tx = RecordingTransaction::new();
    let config = InsertConfig::new(BackendKind::Sqlite, "t", Vec::<String>::new());
    let _ = Inserter::new(&tx, config).await;
}

#[tokio::test]
async fn test_failed_flush_empties_buffer_and_raises_cause() {
    let tx = RecordingTransaction::new().fail_execute_at(0, SqlError::Query("constraint".into()));
    let mut inserter = Inserter::new(&tx, id_name_config(2)).await.unwrap();
    inserter.add(values![1_i64, "a"]).await.unwrap();

    let abort = inserter.add(values![2_i64, "b"]).await.unwrap_err();

    assert_eq!(abort.cause(), &SqlError::Query("constraint".into()));
    assert_eq!(inserter.pending_rows(), 0);
    assert_eq!(inserter.rows_written(), 0);
}

// =============================================================================
// Inside a unit of work
// =============================================================================

#[tokio::test]
async fn test_flush_failure_rolls_back_unit_of_work() {
    let tx = RecordingTransaction::new()
        .fail_execute_at(1, SqlError::Query("duplicate key value".into()));
    let db = RecordingDb::new(tx);

    let err = run_in_transaction(&db, |tx| {
        Box::pin(async move {
            let mut inserter = Inserter::new(tx, id_name_config(1)).await?;
            inserter.add(values![1_i64, "a"]).await?;
            inserter.add(values![1_i64, "a"]).await?;
            inserter.finish().await
        })
    })
    .await
    .unwrap_err();

    assert_eq!(err, SqlError::Query("duplicate key value".into()));
    let events = db.tx.events();
    assert_eq!(events.last(), Some(&TxEvent::Rollback));
    assert!(!events.contains(&TxEvent::Commit));
}

#[tokio::test]
async fn test_successful_inserts_commit() {
    let db = RecordingDb::new(RecordingTransaction::new());

    let written = run_in_transaction(&db, |tx| {
        Box::pin(async move {
            let mut inserter = Inserter::new(tx, id_name_config(100)).await?;
            inserter.add(values![1_i64, "a"]).await?;
            inserter.add(values![2_i64, "b"]).await?;
            let written = inserter.finish().await?;
            Ok::<_, Abort>(written)
        })
    })
    .await
    .unwrap();

    assert_eq!(written, 2);
    assert_eq!(
        db.tx.events(),
        vec![
            TxEvent::Execute("INSERT INTO t (id, name) VALUES ($1,$2), ($3,$4)".into()),
            TxEvent::Commit,
        ]
    );
}

// =============================================================================
// Bulk-load strategy
// =============================================================================

#[tokio::test]
async fn test_postgres_streams_rows_through_bulk_load() {
    let tx = RecordingTransaction::new().with_bulk_load();
    let config = InsertConfig::new(BackendKind::Postgres, "t", ["id", "name"]).with_batch_size(1);

    let written = run_guarded(async {
        let mut inserter = Inserter::new(&tx, config).await?;
        assert!(inserter.is_bulk_load());
        inserter.add(values![1_i64, "a"]).await?;
        inserter.add(values![2_i64, "b"]).await?;
        inserter.flush().await?;
        inserter.finish().await
    })
    .await
    .unwrap();

    assert_eq!(written, 2);
    assert!(tx.executed().is_empty());
    assert_eq!(tx.copied(), vec![values![1_i64, "a"], values![2_i64, "b"]]);
    assert_eq!(
        tx.events(),
        vec![
            TxEvent::CopyOpen("t (id, name)".into()),
            TxEvent::CopyRow,
            TxEvent::CopyRow,
            TxEvent::CopyFinish,
        ]
    );
}

#[tokio::test]
async fn test_bulk_load_disabled_uses_statements_on_postgres() {
    let tx = RecordingTransaction::new().with_bulk_load();
    let config = InsertConfig::new(BackendKind::Postgres, "t", ["id"]).with_bulk_load(false);

    run_guarded(async {
        let mut inserter = Inserter::new(&tx, config).await?;
        assert!(!inserter.is_bulk_load());
        inserter.add(values![1_i64]).await?;
        inserter.finish().await
    })
    .await
    .unwrap();

    assert_eq!(tx.events(), vec![TxEvent::Execute("INSERT INTO t (id) VALUES ($1)".into())]);
}

#[tokio::test]
async fn test_bulk_load_unavailable_raises_at_construction() {
    let tx = RecordingTransaction::new();
    let config = InsertConfig::new(BackendKind::Postgres, "t", ["id"]);

    let err = run_guarded(async { Inserter::new(&tx, config).await.map(|_| ()) })
        .await
        .unwrap_err();

    assert!(matches!(err, SqlError::NotSupported(_)));
}
