//! In-memory doubles that record every driver call

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::{
    Begin, BulkLoad, CopyIn, Execute, Prepare, PreparedStatement, Query, QueryResult, Result, Row,
    SqlError, StatementResult, Transaction, Value,
};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TxEvent {
    Execute(String),
    Query(String),
    CopyOpen(String),
    CopyRow,
    CopyFinish,
    Commit,
    Rollback,
}

#[derive(Default)]
struct Log {
    events: Vec<TxEvent>,
    executed: Vec<(String, Vec<Value>)>,
    copied: Vec<Vec<Value>>,
}

/// Transaction double. Clones share the same log.
#[derive(Clone, Default)]
pub(crate) struct RecordingTransaction {
    log: Arc<Mutex<Log>>,
    query_rows: Vec<Vec<Value>>,
    execute_failures: HashMap<usize, SqlError>,
    commit_error: Option<SqlError>,
    rollback_error: Option<SqlError>,
    bulk_supported: bool,
}

impl RecordingTransaction {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Rows returned by every query
    pub(crate) fn with_query_rows(mut self, rows: Vec<Vec<Value>>) -> Self {
        self.query_rows = rows;
        self
    }

    /// Make the `index`-th execute call (0-based) fail with `error`
    pub(crate) fn fail_execute_at(mut self, index: usize, error: SqlError) -> Self {
        self.execute_failures.insert(index, error);
        self
    }

    pub(crate) fn fail_commit(mut self, error: SqlError) -> Self {
        self.commit_error = Some(error);
        self
    }

    pub(crate) fn fail_rollback(mut self, error: SqlError) -> Self {
        self.rollback_error = Some(error);
        self
    }

    pub(crate) fn with_bulk_load(mut self) -> Self {
        self.bulk_supported = true;
        self
    }

    pub(crate) fn events(&self) -> Vec<TxEvent> {
        self.log.lock().unwrap().events.clone()
    }

    pub(crate) fn executed(&self) -> Vec<(String, Vec<Value>)> {
        self.log.lock().unwrap().executed.clone()
    }

    pub(crate) fn copied(&self) -> Vec<Vec<Value>> {
        self.log.lock().unwrap().copied.clone()
    }

    fn push(&self, event: TxEvent) {
        self.log.lock().unwrap().events.push(event);
    }
}

#[async_trait]
impl Execute for RecordingTransaction {
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        let mut log = self.log.lock().unwrap();
        let index = log.executed.len();
        log.events.push(TxEvent::Execute(sql.to_string()));
        log.executed.push((sql.to_string(), params.to_vec()));
        match self.execute_failures.get(&index) {
            Some(err) => Err(err.clone()),
            None => Ok(StatementResult { affected_rows: 1 }),
        }
    }
}

#[async_trait]
impl Query for RecordingTransaction {
    async fn query(&self, sql: &str, _params: &[Value]) -> Result<QueryResult> {
        self.push(TxEvent::Query(sql.to_string()));
        let width = self.query_rows.first().map_or(0, Vec::len);
        let columns: Arc<[String]> = (0..width).map(|i| format!("c{}", i)).collect();
        let mut result = QueryResult::empty();
        result.rows = self
            .query_rows
            .iter()
            .map(|values| Row::new(columns.clone(), values.clone()))
            .collect();
        Ok(result)
    }
}

#[async_trait]
impl Prepare for RecordingTransaction {
    async fn prepare(&self, sql: &str) -> Result<Box<dyn PreparedStatement>> {
        Ok(Box::new(RecordingStatement {
            sql: sql.to_string(),
            tx: self.clone(),
        }))
    }
}

#[async_trait]
impl CopyIn for RecordingTransaction {
    async fn copy_in(&self, table: &str, columns: &[String]) -> Result<Box<dyn BulkLoad>> {
        if !self.bulk_supported {
            return Err(SqlError::NotSupported("no bulk load".into()));
        }
        self.push(TxEvent::CopyOpen(format!("{} ({})", table, columns.join(", "))));
        Ok(Box::new(RecordingBulkLoad {
            log: self.log.clone(),
            rows: 0,
        }))
    }
}

#[async_trait]
impl Transaction for RecordingTransaction {
    async fn commit(self: Box<Self>) -> Result<()> {
        self.push(TxEvent::Commit);
        self.commit_error.clone().map_or(Ok(()), Err)
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.push(TxEvent::Rollback);
        self.rollback_error.clone().map_or(Ok(()), Err)
    }
}

struct RecordingStatement {
    sql: String,
    tx: RecordingTransaction,
}

#[async_trait]
impl PreparedStatement for RecordingStatement {
    async fn execute(&self, params: &[Value]) -> Result<StatementResult> {
        self.tx.execute(&self.sql, params).await
    }

    async fn query(&self, params: &[Value]) -> Result<QueryResult> {
        self.tx.query(&self.sql, params).await
    }

    async fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

struct RecordingBulkLoad {
    log: Arc<Mutex<Log>>,
    rows: u64,
}

#[async_trait]
impl BulkLoad for RecordingBulkLoad {
    async fn send_row(&mut self, row: &[Value]) -> Result<()> {
        let mut log = self.log.lock().unwrap();
        log.events.push(TxEvent::CopyRow);
        log.copied.push(row.to_vec());
        self.rows += 1;
        Ok(())
    }

    async fn finish(self: Box<Self>) -> Result<u64> {
        self.log.lock().unwrap().events.push(TxEvent::CopyFinish);
        Ok(self.rows)
    }
}

/// Connection double that hands out a clone of one recording transaction
pub(crate) struct RecordingDb {
    pub(crate) tx: RecordingTransaction,
    begin_error: Option<SqlError>,
}

impl RecordingDb {
    pub(crate) fn new(tx: RecordingTransaction) -> Self {
        Self {
            tx,
            begin_error: None,
        }
    }

    pub(crate) fn fail_begin(mut self, error: SqlError) -> Self {
        self.begin_error = Some(error);
        self
    }
}

#[async_trait]
impl Begin for RecordingDb {
    async fn begin_transaction(&self) -> Result<Box<dyn Transaction>> {
        match &self.begin_error {
            Some(err) => Err(err.clone()),
            None => Ok(Box::new(self.tx.clone())),
        }
    }
}
