//! SQLite connection implementation

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{Connection as RusqliteConnection, OpenFlags, params_from_iter};
use sqlguard_core::{
    Begin, ColumnMeta, Connection, CopyIn, Execute, Prepare, PreparedStatement, Query,
    QueryResult, Result, Row, SqlError, StatementResult, Transaction, Value,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// SQLite connection wrapper
pub struct SqliteConnection {
    conn: Arc<Mutex<RusqliteConnection>>,
    closed: AtomicBool,
}

/// Settings applied to every connection before first use
const PRAGMAS: &[(&str, &str)] = &[
    ("foreign_keys", "ON"),
    ("journal_mode", "WAL"),
    ("synchronous", "NORMAL"),
];

impl SqliteConnection {
    /// Open (or create) the database at `path`.
    ///
    /// `:memory:` opens a private in-memory database and `file:` URIs are
    /// passed through. A leading `~/` is expanded and relative paths are
    /// resolved against the working directory.
    pub fn open(path: &str) -> Result<Self> {
        tracing::info!(path = %path, "opening SQLite database");

        let conn = if path == ":memory:" {
            RusqliteConnection::open_in_memory().map_err(|e| {
                SqlError::Connection(format!("Failed to open in-memory database: {}", e))
            })?
        } else {
            let resolved = resolve_path(path)?;
            RusqliteConnection::open_with_flags(&resolved, open_flags()).map_err(|e| {
                SqlError::Connection(format!(
                    "Failed to open SQLite database at '{}': {}",
                    resolved, e
                ))
            })?
        };

        for (pragma, value) in PRAGMAS {
            conn.pragma_update(None, pragma, value).map_err(|e| {
                SqlError::Connection(format!("Failed to set {} = {}: {}", pragma, value, e))
            })?;
        }

        tracing::info!(path = %path, "SQLite database connection established");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            closed: AtomicBool::new(false),
        })
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        Self::open(":memory:")
    }

    /// Execute several `;`-separated statements, e.g. a schema script
    pub async fn execute_batch(&self, sql: &str) -> Result<()> {
        tracing::debug!("executing SQL batch");
        self.ensure_open()?;
        let conn = self.conn.lock();
        conn.execute_batch(sql)
            .map_err(|e| SqlError::Query(format!("Failed to execute batch: {}", e)))
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SqlError::Connection("SQLite connection is closed".into()));
        }
        Ok(())
    }
}

fn open_flags() -> OpenFlags {
    OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_URI
        | OpenFlags::SQLITE_OPEN_NO_MUTEX
}

fn resolve_path(path: &str) -> Result<String> {
    if path.starts_with("file:") {
        return Ok(path.to_string());
    }

    let expanded: PathBuf = match path.strip_prefix("~/") {
        Some(rest) => {
            let home = std::env::var_os("HOME").ok_or_else(|| {
                SqlError::Configuration("Unable to determine HOME directory".into())
            })?;
            PathBuf::from(home).join(rest)
        }
        None if path.starts_with('~') => {
            return Err(SqlError::Configuration(
                "~user paths are not supported; use an absolute path".into(),
            ));
        }
        None => PathBuf::from(path),
    };

    let absolute = if expanded.is_relative() {
        let cwd = std::env::current_dir().map_err(|e| {
            SqlError::Configuration(format!("Unable to resolve working directory: {}", e))
        })?;
        cwd.join(expanded)
    } else {
        expanded
    };

    // rusqlite would create the file but not its directory
    if let Some(parent) = absolute.parent()
        && !parent.exists()
    {
        return Err(SqlError::Connection(format!(
            "Parent directory does not exist: {}",
            parent.display()
        )));
    }

    Ok(absolute.to_string_lossy().into_owned())
}

#[async_trait]
impl Execute for SqliteConnection {
    #[tracing::instrument(skip(self, sql, params), fields(sql_preview = %sql.chars().take(100).collect::<String>()))]
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        self.ensure_open()?;
        let conn = self.conn.lock();
        execute_on(&conn, sql, params)
    }
}

#[async_trait]
impl Query for SqliteConnection {
    #[tracing::instrument(skip(self, sql, params), fields(sql_preview = %sql.chars().take(100).collect::<String>()))]
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        self.ensure_open()?;
        let conn = self.conn.lock();
        query_on(&conn, sql, params)
    }
}

#[async_trait]
impl Prepare for SqliteConnection {
    async fn prepare(&self, sql: &str) -> Result<Box<dyn PreparedStatement>> {
        self.ensure_open()?;
        Ok(Box::new(SqlitePreparedStatement::new(
            Arc::clone(&self.conn),
            sql,
        )?))
    }
}

#[async_trait]
impl Begin for SqliteConnection {
    async fn begin_transaction(&self) -> Result<Box<dyn Transaction>> {
        tracing::debug!("beginning SQLite transaction");
        self.ensure_open()?;
        {
            let conn = self.conn.lock();
            // DEFERRED takes the write lock at the first write
            conn.execute_batch("BEGIN DEFERRED")
                .map_err(|e| SqlError::Query(format!("Failed to begin transaction: {}", e)))?;
        }
        tracing::debug!("SQLite transaction started");
        Ok(Box::new(SqliteTransaction {
            conn: Arc::clone(&self.conn),
            finished: false,
        }))
    }
}

#[async_trait]
impl Connection for SqliteConnection {
    fn driver_name(&self) -> &str {
        "sqlite"
    }

    async fn close(&self) -> Result<()> {
        tracing::info!("closing SQLite connection");
        self.closed.store(true, Ordering::Release);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// SQLite transaction wrapper.
///
/// Issues raw `BEGIN DEFERRED` / `COMMIT` / `ROLLBACK` SQL so that it can share
/// the connection `Arc<Mutex<…>>` without running into rusqlite's borrow-based
/// transaction lifetime requirements.
pub struct SqliteTransaction {
    conn: Arc<Mutex<RusqliteConnection>>,
    finished: bool,
}

impl SqliteTransaction {
    fn end(&mut self, statement: &str) -> Result<()> {
        self.finished = true;
        let conn = self.conn.lock();
        let result = conn.execute_batch(statement).map_err(|e| {
            SqlError::Query(format!("Failed to {} transaction: {}", statement.to_lowercase(), e))
        });
        // A failed COMMIT leaves the transaction open
        if result.is_err()
            && !conn.is_autocommit()
            && let Err(e) = conn.execute_batch("ROLLBACK")
        {
            tracing::error!(error = %e, "rollback after failed {} also failed", statement);
        }
        result
    }
}

impl Drop for SqliteTransaction {
    fn drop(&mut self) {
        if !self.finished {
            tracing::warn!(
                "SQLite transaction dropped without commit or rollback, issuing automatic rollback"
            );
            let conn = self.conn.lock();
            if let Err(e) = conn.execute_batch("ROLLBACK") {
                tracing::error!(error = %e, "automatic rollback on drop failed");
            }
        }
    }
}

#[async_trait]
impl Execute for SqliteTransaction {
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        tracing::debug!(sql_preview = %sql.chars().take(100).collect::<String>(), "executing statement in SQLite transaction");
        let conn = self.conn.lock();
        execute_on(&conn, sql, params)
    }
}

#[async_trait]
impl Query for SqliteTransaction {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        tracing::debug!(sql_preview = %sql.chars().take(100).collect::<String>(), "executing query in SQLite transaction");
        let conn = self.conn.lock();
        query_on(&conn, sql, params)
    }
}

#[async_trait]
impl Prepare for SqliteTransaction {
    async fn prepare(&self, sql: &str) -> Result<Box<dyn PreparedStatement>> {
        Ok(Box::new(SqlitePreparedStatement::new(
            Arc::clone(&self.conn),
            sql,
        )?))
    }
}

impl CopyIn for SqliteTransaction {}

#[async_trait]
impl Transaction for SqliteTransaction {
    async fn commit(mut self: Box<Self>) -> Result<()> {
        tracing::debug!("committing SQLite transaction");
        self.end("COMMIT")?;
        tracing::debug!("SQLite transaction committed successfully");
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<()> {
        tracing::debug!("rolling back SQLite transaction");
        self.end("ROLLBACK")?;
        tracing::debug!("SQLite transaction rolled back successfully");
        Ok(())
    }
}

/// Prepared statement backed by rusqlite's statement cache.
///
/// The SQL is compiled once here to surface syntax errors early; every
/// execution fetches the compiled statement from the connection's cache.
pub struct SqlitePreparedStatement {
    conn: Arc<Mutex<RusqliteConnection>>,
    sql: String,
}

impl SqlitePreparedStatement {
    fn new(conn: Arc<Mutex<RusqliteConnection>>, sql: &str) -> Result<Self> {
        {
            let guard = conn.lock();
            guard
                .prepare_cached(sql)
                .map_err(|e| SqlError::Query(format!("Failed to prepare statement: {}", e)))?;
        }
        Ok(Self {
            conn,
            sql: sql.to_string(),
        })
    }
}

#[async_trait]
impl PreparedStatement for SqlitePreparedStatement {
    async fn execute(&self, params: &[Value]) -> Result<StatementResult> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(&self.sql)
            .map_err(|e| SqlError::Query(format!("Failed to prepare statement: {}", e)))?;
        let rusqlite_params = values_to_rusqlite(params);
        let rows_affected = stmt
            .execute(params_from_iter(rusqlite_params.iter()))
            .map_err(|e| SqlError::Query(format!("Failed to execute statement: {}", e)))?;
        Ok(StatementResult {
            affected_rows: rows_affected as u64,
        })
    }

    async fn query(&self, params: &[Value]) -> Result<QueryResult> {
        let start_time = std::time::Instant::now();
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(&self.sql)
            .map_err(|e| SqlError::Query(format!("Failed to prepare query: {}", e)))?;
        collect_rows(&mut stmt, params, start_time)
    }

    async fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

fn execute_on(conn: &RusqliteConnection, sql: &str, params: &[Value]) -> Result<StatementResult> {
    let rusqlite_params = values_to_rusqlite(params);

    let rows_affected = conn
        .execute(sql, params_from_iter(rusqlite_params.iter()))
        .map_err(|e| SqlError::Query(format!("Failed to execute statement: {}", e)))?;

    tracing::debug!(affected_rows = rows_affected, "statement executed");
    Ok(StatementResult {
        affected_rows: rows_affected as u64,
    })
}

fn query_on(conn: &RusqliteConnection, sql: &str, params: &[Value]) -> Result<QueryResult> {
    let start_time = std::time::Instant::now();
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| SqlError::Query(format!("Failed to prepare query: {}", e)))?;
    collect_rows(&mut stmt, params, start_time)
}

fn collect_rows(
    stmt: &mut rusqlite::Statement<'_>,
    params: &[Value],
    start_time: std::time::Instant,
) -> Result<QueryResult> {
    let columns: Vec<ColumnMeta> = stmt
        .columns()
        .iter()
        .enumerate()
        .map(|(idx, col)| ColumnMeta {
            name: col.name().to_string(),
            // sqlite3_column_decltype, i.e. the type from CREATE TABLE
            data_type: col.decl_type().unwrap_or("DYNAMIC").to_string(),
            ordinal: idx,
        })
        .collect();
    let column_names: Arc<[String]> = columns.iter().map(|c| c.name.clone()).collect();

    let rusqlite_params = values_to_rusqlite(params);
    let mut rows = Vec::new();
    let mut query_rows = stmt
        .query(params_from_iter(rusqlite_params.iter()))
        .map_err(|e| SqlError::Query(format!("Failed to execute query: {}", e)))?;

    while let Some(row) = query_rows
        .next()
        .map_err(|e| SqlError::Query(format!("Failed to fetch row: {}", e)))?
    {
        let mut values = Vec::with_capacity(columns.len());
        for i in 0..columns.len() {
            values.push(rusqlite_to_value(row, i)?);
        }
        rows.push(Row::new(Arc::clone(&column_names), values));
    }

    let execution_time_ms = start_time.elapsed().as_millis() as u64;
    tracing::debug!(
        row_count = rows.len(),
        execution_time_ms = execution_time_ms,
        "query executed successfully"
    );
    Ok(QueryResult {
        columns,
        rows,
        execution_time_ms,
    })
}

/// Convert our Value types to rusqlite-compatible types
fn values_to_rusqlite(values: &[Value]) -> Vec<rusqlite::types::Value> {
    values.iter().map(value_to_rusqlite).collect()
}

fn value_to_rusqlite(value: &Value) -> rusqlite::types::Value {
    use rusqlite::types::Value as Sql;

    match value {
        Value::Null => Sql::Null,
        Value::Bool(b) => Sql::Integer(i64::from(*b)),
        Value::Int16(i) => Sql::Integer(i64::from(*i)),
        Value::Int32(i) => Sql::Integer(i64::from(*i)),
        Value::Int64(i) => Sql::Integer(*i),
        Value::Float32(f) => Sql::Real(f64::from(*f)),
        Value::Float64(f) => Sql::Real(*f),
        Value::Decimal(d) => Sql::Text(d.clone()),
        Value::String(s) => Sql::Text(s.clone()),
        Value::Bytes(b) => Sql::Blob(b.clone()),
        Value::Date(d) => Sql::Text(d.to_string()),
        Value::Time(t) => Sql::Text(t.to_string()),
        Value::DateTime(dt) => Sql::Text(dt.to_string()),
        Value::DateTimeUtc(dt) => Sql::Text(dt.to_rfc3339()),
        Value::Json(j) => Sql::Text(j.to_string()),
        Value::Uuid(u) => Sql::Text(u.to_string()),
        // SQLite has no array type; store the JSON rendering
        Value::Array(items) => Sql::Text(array_to_json(items).to_string()),
    }
}

fn array_to_json(items: &[Value]) -> serde_json::Value {
    serde_json::Value::Array(items.iter().map(value_to_json).collect())
}

fn value_to_json(value: &Value) -> serde_json::Value {
    use serde_json::Value as Json;

    match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::from(*b),
        Value::Int16(i) => Json::from(*i),
        Value::Int32(i) => Json::from(*i),
        Value::Int64(i) => Json::from(*i),
        Value::Float32(f) => Json::from(f64::from(*f)),
        Value::Float64(f) => Json::from(*f),
        Value::Json(j) => j.clone(),
        Value::Array(inner) => array_to_json(inner),
        other => Json::String(other.to_string()),
    }
}

/// Convert rusqlite row value to our Value type
fn rusqlite_to_value(row: &rusqlite::Row, idx: usize) -> Result<Value> {
    use rusqlite::types::ValueRef;

    let value_ref = row
        .get_ref(idx)
        .map_err(|e| SqlError::Query(e.to_string()))?;

    let value = match value_ref {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int64(i),
        ValueRef::Real(f) => Value::Float64(f),
        ValueRef::Text(s) => Value::String(String::from_utf8_lossy(s).to_string()),
        // Text stored in untyped columns can come back as a blob
        ValueRef::Blob(b) => match std::str::from_utf8(b) {
            Ok(s) => Value::String(s.to_string()),
            Err(_) => Value::Bytes(b.to_vec()),
        },
    };

    Ok(value)
}
