//! PostgreSQL connection implementation

use async_trait::async_trait;
use sqlguard_core::{
    Begin, BulkLoad, ColumnMeta, Connection, CopyIn, Execute, Prepare, PreparedStatement, Query,
    QueryResult, Result, Row, SqlError, StatementResult, Transaction, Value,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::{Mutex, MutexGuard};
use tokio_postgres::tls::{MakeTlsConnect, TlsConnect};
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, NoTls, Socket, Statement};

use crate::copy::PostgresBulkLoad;
use crate::tls::TlsSettings;
use crate::value::{bind_params, postgres_to_value};

/// Runtime that owns the socket tasks of every PostgreSQL connection.
///
/// Connection futures are spawned here so a connection outlives the
/// runtime of whichever caller opened it.
fn postgres_runtime() -> Result<&'static tokio::runtime::Runtime> {
    static RUNTIME: OnceLock<std::result::Result<tokio::runtime::Runtime, String>> =
        OnceLock::new();
    RUNTIME
        .get_or_init(|| {
            tokio::runtime::Builder::new_multi_thread()
                .worker_threads(2)
                .enable_all()
                .thread_name("sqlguard-postgres-runtime")
                .build()
                .map_err(|e| e.to_string())
        })
        .as_ref()
        .map_err(|e| {
            SqlError::Driver(format!("Failed to create runtime for PostgreSQL driver: {}", e))
        })
}

pub(crate) fn format_postgres_error(error: &tokio_postgres::Error) -> String {
    let Some(db_error) = error.as_db_error() else {
        return error.to_string();
    };

    let code = db_error.code();
    let mut message = db_error.message().to_string();

    if let Some(detail) = db_error.detail()
        && !detail.trim().is_empty()
    {
        message.push_str(&format!(" (detail: {})", detail));
    }
    if let Some(hint) = db_error.hint()
        && !hint.trim().is_empty()
    {
        message.push_str(&format!(" (hint: {})", hint));
    }
    if let Some(column) = db_error.column()
        && !column.trim().is_empty()
    {
        message.push_str(&format!(" (column: {})", column));
    }

    match code.code() {
        "23505" => format!("duplicate value violates unique constraint: {}", message),
        "23503" => format!("foreign key violation: {}", message),
        "23502" => format!("null value violates not-null constraint: {}", message),
        "22007" => format!("invalid datetime format: {}", message),
        "22P02" => format!("invalid input syntax: {}", message),
        other => format!("{} (code: {})", message, other),
    }
}

/// PostgreSQL connection wrapper
pub struct PostgresConnection {
    client: Arc<Mutex<Client>>,
    closed: AtomicBool,
    /// Set when a transaction is dropped unfinished; the next caller rolls it back
    abandoned: Arc<AtomicBool>,
}

impl PostgresConnection {
    /// Connect with an explicit tokio-postgres config
    pub async fn connect(mut config: tokio_postgres::Config, tls: &TlsSettings) -> Result<Self> {
        tracing::info!(
            host = ?config.get_hosts(),
            database = ?config.get_dbname(),
            ssl_mode = ?tls.mode,
            "connecting to PostgreSQL database"
        );
        config.ssl_mode(tls.mode.to_postgres());

        let client = match tls.build_connector()? {
            Some(connector) => spawn_connect(config, connector).await?,
            None => spawn_connect(config, NoTls).await?,
        };

        tracing::info!("PostgreSQL connection established");
        Ok(Self {
            client: Arc::new(Mutex::new(client)),
            closed: AtomicBool::new(false),
            abandoned: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Connect from a libpq-style URL or key/value string
    pub async fn connect_url(url: &str) -> Result<Self> {
        let config: tokio_postgres::Config = url
            .parse()
            .map_err(|e| SqlError::Configuration(format!("Invalid PostgreSQL URL: {}", e)))?;
        let tls = match config.get_ssl_mode() {
            tokio_postgres::config::SslMode::Disable => TlsSettings::disabled(),
            _ => TlsSettings::default(),
        };
        Self::connect(config, &tls).await
    }

    /// Lock the client, first rolling back any transaction left open by a drop
    async fn lock(&self) -> Result<MutexGuard<'_, Client>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SqlError::Connection("PostgreSQL connection is closed".into()));
        }
        let client = self.client.lock().await;
        if self.abandoned.swap(false, Ordering::AcqRel) {
            tracing::debug!("rolling back abandoned PostgreSQL transaction");
            client.batch_execute("ROLLBACK").await.map_err(|e| {
                SqlError::Query(format!(
                    "Failed to roll back abandoned transaction: {}",
                    format_postgres_error(&e)
                ))
            })?;
        }
        Ok(client)
    }
}

async fn spawn_connect<T>(config: tokio_postgres::Config, tls: T) -> Result<Client>
where
    T: MakeTlsConnect<Socket> + Send + 'static,
    T::Stream: Send + 'static,
    T::TlsConnect: Send,
    <T::TlsConnect as TlsConnect<Socket>>::Future: Send,
{
    let runtime = postgres_runtime()?;

    let (client, connection) = runtime
        .spawn(async move { config.connect(tls).await })
        .await
        .map_err(|e| SqlError::Connection(format!("PostgreSQL connection task failed: {}", e)))?
        .map_err(|e| {
            SqlError::Connection(format!(
                "Failed to connect to PostgreSQL: {}",
                format_postgres_error(&e)
            ))
        })?;

    runtime.spawn(async move {
        if let Err(e) = connection.await {
            tracing::error!(error = %e, "PostgreSQL connection error");
        }
    });

    Ok(client)
}

#[async_trait]
impl Execute for PostgresConnection {
    #[tracing::instrument(skip(self, sql, params), fields(sql_preview = %sql.chars().take(100).collect::<String>()))]
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        let client = self.lock().await?;
        execute_on(&client, sql, params).await
    }
}

#[async_trait]
impl Query for PostgresConnection {
    #[tracing::instrument(skip(self, sql, params), fields(sql_preview = %sql.chars().take(100).collect::<String>()))]
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        let client = self.lock().await?;
        query_on(&client, sql, params).await
    }
}

#[async_trait]
impl Prepare for PostgresConnection {
    async fn prepare(&self, sql: &str) -> Result<Box<dyn PreparedStatement>> {
        let statement = {
            let client = self.lock().await?;
            prepare_on(&client, sql).await?
        };
        Ok(Box::new(PostgresPreparedStatement {
            client: Arc::clone(&self.client),
            statement,
        }))
    }
}

#[async_trait]
impl Begin for PostgresConnection {
    async fn begin_transaction(&self) -> Result<Box<dyn Transaction>> {
        tracing::debug!("beginning PostgreSQL transaction");
        {
            let client = self.lock().await?;
            client.batch_execute("BEGIN").await.map_err(|e| {
                SqlError::Query(format!(
                    "Failed to begin transaction: {}",
                    format_postgres_error(&e)
                ))
            })?;
        }
        Ok(Box::new(PostgresTransaction {
            client: Arc::clone(&self.client),
            abandoned: Arc::clone(&self.abandoned),
            copy_active: Arc::new(AtomicBool::new(false)),
            finished: false,
        }))
    }
}

#[async_trait]
impl Connection for PostgresConnection {
    fn driver_name(&self) -> &str {
        "postgresql"
    }

    async fn close(&self) -> Result<()> {
        tracing::info!("closing PostgreSQL connection");
        self.closed.store(true, Ordering::Release);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.client.try_lock().is_ok_and(|c| c.is_closed())
    }
}

/// PostgreSQL transaction wrapper.
///
/// Shares the connection's client; statements are ordered by its mutex.
/// Dropping it unfinished marks the connection so the next operation on it
/// issues the ROLLBACK.
pub struct PostgresTransaction {
    client: Arc<Mutex<Client>>,
    abandoned: Arc<AtomicBool>,
    copy_active: Arc<AtomicBool>,
    finished: bool,
}

impl PostgresTransaction {
    async fn lock(&self) -> Result<MutexGuard<'_, Client>> {
        ensure_copy_idle(&self.copy_active)?;
        Ok(self.client.lock().await)
    }

    /// Issue COMMIT or ROLLBACK. A rejected call leaves the transaction
    /// unfinished, so dropping it still rolls back on the next use.
    async fn end(&mut self, statement: &str) -> Result<()> {
        ensure_copy_idle(&self.copy_active)?;
        let client = Arc::clone(&self.client);
        let guard = client.lock().await;
        self.finished = true;
        guard.batch_execute(statement).await.map_err(|e| {
            SqlError::Query(format!(
                "Failed to {} transaction: {}",
                statement.to_lowercase(),
                format_postgres_error(&e)
            ))
        })
    }
}

fn ensure_copy_idle(copy_active: &AtomicBool) -> Result<()> {
    if copy_active.load(Ordering::Acquire) {
        return Err(SqlError::Driver(
            "a bulk load is in progress on this transaction".into(),
        ));
    }
    Ok(())
}

impl Drop for PostgresTransaction {
    fn drop(&mut self) {
        if !self.finished {
            tracing::warn!(
                "PostgreSQL transaction dropped without commit or rollback, rolling back on next use"
            );
            self.abandoned.store(true, Ordering::Release);
        }
    }
}

#[async_trait]
impl Execute for PostgresTransaction {
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        tracing::debug!(sql_preview = %sql.chars().take(100).collect::<String>(), "executing statement in transaction");
        let client = self.lock().await?;
        execute_on(&client, sql, params).await
    }
}

#[async_trait]
impl Query for PostgresTransaction {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        tracing::debug!(sql_preview = %sql.chars().take(100).collect::<String>(), "executing query in transaction");
        let client = self.lock().await?;
        query_on(&client, sql, params).await
    }
}

#[async_trait]
impl Prepare for PostgresTransaction {
    async fn prepare(&self, sql: &str) -> Result<Box<dyn PreparedStatement>> {
        let statement = {
            let client = self.lock().await?;
            prepare_on(&client, sql).await?
        };
        Ok(Box::new(PostgresPreparedStatement {
            client: Arc::clone(&self.client),
            statement,
        }))
    }
}

#[async_trait]
impl CopyIn for PostgresTransaction {
    async fn copy_in(&self, table: &str, columns: &[String]) -> Result<Box<dyn BulkLoad>> {
        let client = self.lock().await?;
        let load =
            PostgresBulkLoad::open(&client, table, columns, Arc::clone(&self.copy_active)).await?;
        Ok(Box::new(load))
    }
}

#[async_trait]
impl Transaction for PostgresTransaction {
    async fn commit(mut self: Box<Self>) -> Result<()> {
        tracing::debug!("committing PostgreSQL transaction");
        self.end("COMMIT").await?;
        tracing::debug!("PostgreSQL transaction committed successfully");
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<()> {
        tracing::debug!("rolling back PostgreSQL transaction");
        self.end("ROLLBACK").await?;
        tracing::debug!("PostgreSQL transaction rolled back successfully");
        Ok(())
    }
}

/// Server-side prepared statement; deallocated when dropped
pub struct PostgresPreparedStatement {
    client: Arc<Mutex<Client>>,
    statement: Statement,
}

#[async_trait]
impl PreparedStatement for PostgresPreparedStatement {
    async fn execute(&self, params: &[Value]) -> Result<StatementResult> {
        let client = self.client.lock().await;
        execute_statement(&client, &self.statement, params).await
    }

    async fn query(&self, params: &[Value]) -> Result<QueryResult> {
        let start_time = std::time::Instant::now();
        let client = self.client.lock().await;
        query_statement(&client, &self.statement, params, start_time).await
    }

    async fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

async fn prepare_on(client: &Client, sql: &str) -> Result<Statement> {
    client.prepare(sql).await.map_err(|e| {
        SqlError::Query(format!("Failed to prepare statement: {}", format_postgres_error(&e)))
    })
}

// Statements are prepared first so parameters can be coerced to the
// declared types, e.g. an Int64 bound to an INT4 column.
async fn execute_on(client: &Client, sql: &str, params: &[Value]) -> Result<StatementResult> {
    let statement = prepare_on(client, sql).await?;
    execute_statement(client, &statement, params).await
}

async fn execute_statement(
    client: &Client,
    statement: &Statement,
    params: &[Value],
) -> Result<StatementResult> {
    let pg_params = bind_params(statement.params(), params);
    let param_refs: Vec<&(dyn ToSql + Sync)> =
        pg_params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();

    let affected_rows = client
        .execute(statement, &param_refs)
        .await
        .map_err(|e| {
            SqlError::Query(format!("Failed to execute statement: {}", format_postgres_error(&e)))
        })?;

    tracing::debug!(affected_rows, "statement executed");
    Ok(StatementResult { affected_rows })
}

async fn query_on(client: &Client, sql: &str, params: &[Value]) -> Result<QueryResult> {
    let start_time = std::time::Instant::now();
    let statement = prepare_on(client, sql).await?;
    query_statement(client, &statement, params, start_time).await
}

async fn query_statement(
    client: &Client,
    statement: &Statement,
    params: &[Value],
    start_time: std::time::Instant,
) -> Result<QueryResult> {
    let pg_params = bind_params(statement.params(), params);
    let param_refs: Vec<&(dyn ToSql + Sync)> =
        pg_params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();

    let pg_rows = client.query(statement, &param_refs).await.map_err(|e| {
        SqlError::Query(format!("Failed to execute query: {}", format_postgres_error(&e)))
    })?;

    // Column metadata comes from the statement so empty results keep it
    let columns: Vec<ColumnMeta> = statement
        .columns()
        .iter()
        .enumerate()
        .map(|(idx, col)| ColumnMeta {
            name: col.name().to_string(),
            data_type: col.type_().name().to_string(),
            ordinal: idx,
        })
        .collect();
    let column_names: Arc<[String]> = columns.iter().map(|c| c.name.clone()).collect();

    let mut rows = Vec::with_capacity(pg_rows.len());
    for pg_row in &pg_rows {
        let mut values = Vec::with_capacity(columns.len());
        for idx in 0..columns.len() {
            values.push(postgres_to_value(pg_row, idx)?);
        }
        rows.push(Row::new(Arc::clone(&column_names), values));
    }

    let execution_time_ms = start_time.elapsed().as_millis() as u64;
    tracing::debug!(
        row_count = rows.len(),
        execution_time_ms,
        "query executed successfully"
    );
    Ok(QueryResult {
        columns,
        rows,
        execution_time_ms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_runtime_is_shared() {
        let first = postgres_runtime().unwrap() as *const _;
        let second = postgres_runtime().unwrap() as *const _;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_connect_url_rejects_garbage() {
        let err = PostgresConnection::connect_url("host=localhost port=notaport")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, SqlError::Configuration(_)));
    }

    #[test]
    fn test_open_copy_blocks_transaction_statements() {
        let copy_active = AtomicBool::new(true);
        assert!(matches!(
            ensure_copy_idle(&copy_active),
            Err(SqlError::Driver(msg)) if msg.contains("bulk load")
        ));

        copy_active.store(false, Ordering::Release);
        assert_eq!(ensure_copy_idle(&copy_active), Ok(()));
    }
}
