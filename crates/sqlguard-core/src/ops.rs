//! Thin wrappers that forward to a driver capability and raise on failure
//!
//! Every function here performs exactly one driver call. A failure is logged
//! at `debug` and comes back as the abort signal carrying the driver's error
//! unchanged; nothing is retried.

use crate::guard::{Guarded, guarded, raise};
use crate::{
    BackendKind, Execute, FromRow, Prepare, PreparedStatement, Query, QueryResult, Result, Row,
    RowScanner, StatementResult, ToValue, Value,
};

fn sql_preview(sql: &str) -> &str {
    match sql.char_indices().nth(100) {
        Some((idx, _)) => &sql[..idx],
        None => sql,
    }
}

fn raise_logged<T>(op: &'static str, sql: &str, result: Result<T>) -> Guarded<T> {
    if let Err(e) = &result {
        tracing::debug!(op, sql_preview = %sql_preview(sql), error = %e, "driver call failed");
    }
    raise(result)
}

/// Execute a statement that returns no rows
pub async fn exec<E>(db: &E, sql: &str, params: &[Value]) -> Guarded<StatementResult>
where
    E: Execute + ?Sized,
{
    raise_logged("exec", sql, db.execute(sql, params).await)
}

/// Run a query and fetch all of its rows
pub async fn query<Q>(db: &Q, sql: &str, params: &[Value]) -> Guarded<QueryResult>
where
    Q: Query + ?Sized,
{
    raise_logged("query", sql, db.query(sql, params).await)
}

/// Run a query and return its first row. No rows raises `NotFound`.
pub async fn query_row<Q>(db: &Q, sql: &str, params: &[Value]) -> Guarded<Row>
where
    Q: Query + ?Sized,
{
    raise_logged("query_row", sql, db.query_row(sql, params).await)
}

/// Prepare a statement
pub async fn prepare<P>(db: &P, sql: &str) -> Guarded<Box<dyn PreparedStatement>>
where
    P: Prepare + ?Sized,
{
    raise_logged("prepare", sql, db.prepare(sql).await)
}

/// Execute a prepared statement
pub async fn exec_prepared<S>(stmt: &S, params: &[Value]) -> Guarded<StatementResult>
where
    S: PreparedStatement + ?Sized,
{
    raise_logged("exec_prepared", "<prepared>", stmt.execute(params).await)
}

/// Query through a prepared statement
pub async fn query_prepared<S>(stmt: &S, params: &[Value]) -> Guarded<QueryResult>
where
    S: PreparedStatement + ?Sized,
{
    raise_logged("query_prepared", "<prepared>", stmt.query(params).await)
}

/// Decode a row into `T`
pub fn scan<T, R>(row: &R) -> Guarded<T>
where
    T: FromRow,
    R: RowScanner + ?Sized,
{
    raise_logged("scan", "", T::from_values(row.row_values()))
}

/// Convert `v` into a driver value
pub fn value<V>(v: &V) -> Guarded<Value>
where
    V: ToValue + ?Sized,
{
    raise_logged("value", "", v.to_value())
}

/// Run a `SELECT COUNT(*) ...` query and return the count
pub async fn count<Q>(db: &Q, sql: &str, params: &[Value]) -> Guarded<i64>
where
    Q: Query + ?Sized,
{
    let row = query_row(db, sql, params).await?;
    let (count,): (i64,) = scan(&row)?;
    Ok(count)
}

/// Remove every row of `table` with the statement `backend` supports
pub async fn truncate<E>(db: &E, backend: BackendKind, table: &str) -> Guarded<StatementResult>
where
    E: Execute + ?Sized,
{
    exec(db, &backend.truncate_sql(table), &[]).await
}

/// Apply `f` to every row of `result` under its own boundary.
///
/// Iteration stops at the first row that raises; that error is returned.
pub fn for_each_row<F>(result: QueryResult, mut f: F) -> Result<()>
where
    F: FnMut(&Row) -> Guarded<()>,
{
    guarded(|| {
        for row in &result.rows {
            f(row)?;
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::{Abort, run_guarded};
    use crate::test_support::RecordingTransaction;
    use crate::{SqlError, values};
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_exec_forwards_statement_and_params() {
        let tx = RecordingTransaction::new();
        let result = run_guarded(exec(&tx, "DELETE FROM t WHERE id = $1", &values![4_i64]))
            .await
            .unwrap();

        assert_eq!(result.affected_rows, 1);
        assert_eq!(
            tx.executed(),
            vec![(
                "DELETE FROM t WHERE id = $1".to_string(),
                values![4_i64]
            )]
        );
    }

    #[tokio::test]
    async fn test_exec_failure_is_raised_with_original_cause() {
        let tx = RecordingTransaction::new().fail_execute_at(0, SqlError::Query("syntax".into()));
        let abort = exec(&tx, "DELETE", &[]).await.unwrap_err();
        assert_eq!(abort.cause(), &SqlError::Query("syntax".into()));
    }

    #[tokio::test]
    async fn test_count_scans_first_column() {
        let tx = RecordingTransaction::new().with_query_rows(vec![values![42_i64]]);
        let n = run_guarded(count(&tx, "SELECT COUNT(*) FROM t", &[]))
            .await
            .unwrap();
        assert_eq!(n, 42);
    }

    #[tokio::test]
    async fn test_query_row_with_no_rows_is_not_found() {
        let tx = RecordingTransaction::new();
        let err = run_guarded(query_row(&tx, "SELECT 1 WHERE false", &[]))
            .await
            .unwrap_err();
        assert!(matches!(err, SqlError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_truncate_uses_backend_statement() {
        let tx = RecordingTransaction::new();
        run_guarded(async {
            truncate(&tx, BackendKind::Sqlite, "a").await?;
            truncate(&tx, BackendKind::Postgres, "b").await?;
            Ok::<_, Abort>(())
        })
        .await
        .unwrap();

        let sql: Vec<String> = tx.executed().into_iter().map(|(sql, _)| sql).collect();
        assert_eq!(sql, vec!["DELETE FROM a", "TRUNCATE TABLE b"]);
    }

    #[tokio::test]
    async fn test_for_each_row_stops_at_first_raise() {
        let tx = RecordingTransaction::new().with_query_rows(vec![
            values![1_i64],
            values!["not a number"],
            values![3_i64],
        ]);
        let result = run_guarded(query(&tx, "SELECT id FROM t", &[]))
            .await
            .unwrap();

        let mut seen = Vec::new();
        let err = for_each_row(result, |row| {
            let (id,): (i64,) = scan(row)?;
            seen.push(id);
            Ok(())
        })
        .unwrap_err();

        assert_eq!(seen, vec![1]);
        assert!(matches!(err, SqlError::Conversion(_)));
    }

    #[test]
    fn test_value_surfaces_conversion_error() {
        struct Positive(i64);
        impl ToValue for Positive {
            fn to_value(&self) -> Result<Value> {
                if self.0 > 0 {
                    Ok(Value::Int64(self.0))
                } else {
                    Err(SqlError::Conversion(format!("{} is not positive", self.0)))
                }
            }
        }

        assert_eq!(guarded(|| value(&Positive(3))), Ok(Value::Int64(3)));
        assert_eq!(
            guarded(|| value(&Positive(-1))),
            Err(SqlError::Conversion("-1 is not positive".into()))
        );
    }
}
