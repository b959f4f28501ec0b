//! Capability traits implemented by drivers
//!
//! Each helper in [`crate::ops`] asks only for the capability it needs, so a
//! transaction, a connection or a test double can be passed wherever it fits.

use crate::{BackendKind, QueryResult, Result, Row, SqlError, StatementResult, Value};
use async_trait::async_trait;

/// Run a statement that does not return rows
#[async_trait]
pub trait Execute: Send + Sync {
    /// Execute a statement that modifies data (INSERT/UPDATE/DELETE/DDL)
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult>;
}

/// Run a statement that returns rows
#[async_trait]
pub trait Query: Send + Sync {
    /// Execute a query and fetch all of its rows
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult>;

    /// Execute a query and return its first row.
    ///
    /// An empty result is reported as [`SqlError::NotFound`] so that it
    /// surfaces when the row is used, the same way a driver error would.
    async fn query_row(&self, sql: &str, params: &[Value]) -> Result<Row> {
        let result = self.query(sql, params).await?;
        result
            .rows
            .into_iter()
            .next()
            .ok_or_else(|| SqlError::NotFound("query returned no rows".to_string()))
    }
}

/// Prepare a statement for repeated execution
#[async_trait]
pub trait Prepare: Send + Sync {
    async fn prepare(&self, sql: &str) -> Result<Box<dyn PreparedStatement>>;
}

/// Open a transaction
#[async_trait]
pub trait Begin: Send + Sync {
    async fn begin_transaction(&self) -> Result<Box<dyn Transaction>>;
}

/// Open a bulk-load channel (PostgreSQL `COPY ... FROM STDIN`)
#[async_trait]
pub trait CopyIn: Send + Sync {
    /// Start streaming rows into `table`. Drivers without a bulk path keep
    /// the default, which reports [`SqlError::NotSupported`].
    async fn copy_in(&self, table: &str, columns: &[String]) -> Result<Box<dyn BulkLoad>> {
        let _ = columns;
        Err(SqlError::NotSupported(format!(
            "bulk load into {} is not supported by this driver",
            table
        )))
    }
}

/// An open bulk-load channel.
///
/// Rows sent are only durable once [`BulkLoad::finish`] returns; dropping the
/// channel without finishing aborts the load.
#[async_trait]
pub trait BulkLoad: Send {
    /// Stream one row. The row width must match the column list given when
    /// the channel was opened.
    async fn send_row(&mut self, row: &[Value]) -> Result<()>;

    /// Close the channel, returning the number of rows the server accepted
    async fn finish(self: Box<Self>) -> Result<u64>;
}

/// A database transaction
#[async_trait]
pub trait Transaction: Execute + Query + Prepare + CopyIn {
    /// Commit the transaction
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Rollback the transaction
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// A database connection
#[async_trait]
pub trait Connection: Execute + Query + Prepare + Begin {
    /// Get the driver name (e.g., "sqlite", "postgresql")
    fn driver_name(&self) -> &str;

    /// Backend family, used to pick insert strategy and truncation statement
    fn backend_kind(&self) -> BackendKind {
        BackendKind::from_driver_name(self.driver_name())
    }

    /// Close the connection
    async fn close(&self) -> Result<()>;

    /// Check if the connection is closed
    fn is_closed(&self) -> bool;
}

/// A prepared statement
#[async_trait]
pub trait PreparedStatement: Send + Sync {
    /// Execute the prepared statement with parameters
    async fn execute(&self, params: &[Value]) -> Result<StatementResult>;

    /// Query the prepared statement with parameters
    async fn query(&self, params: &[Value]) -> Result<QueryResult>;

    /// Close/deallocate the prepared statement
    async fn close(self: Box<Self>) -> Result<()>;
}
