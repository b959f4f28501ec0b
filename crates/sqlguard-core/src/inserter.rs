//! Batched multi-row inserts
//!
//! An [`Inserter`] buffers rows on the client and writes them as one
//! `INSERT INTO ... VALUES (...), (...)` statement whenever `batch_size` rows
//! are pending, plus once more at [`Inserter::finish`]. On PostgreSQL it can
//! instead stream every row through `COPY ... FROM STDIN`.
//!
//! The inserter borrows the transaction it writes through, so it cannot
//! outlive the unit of work. Failures raise the abort signal and are not
//! retried; the enclosing [`crate::run_in_transaction`] rolls back.

use serde::{Deserialize, Serialize};

use crate::guard::{Guarded, raise};
use crate::{BackendKind, BulkLoad, CopyIn, Execute, Value, ops};

pub const DEFAULT_BATCH_SIZE: usize = 1000;

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_bulk_load() -> bool {
    true
}

/// Where and how an [`Inserter`] writes rows
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertConfig {
    /// Target table
    pub table: String,
    /// Column names, in the order row values are given
    pub columns: Vec<String>,
    /// Rows per statement (values below 1 are treated as 1)
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Backend family of the transaction
    #[serde(default)]
    pub backend: BackendKind,
    /// Use the bulk-load channel when the backend has one
    #[serde(default = "default_bulk_load")]
    pub bulk_load: bool,
}

impl InsertConfig {
    pub fn new<I, S>(backend: BackendKind, table: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            table: table.into(),
            columns: columns.into_iter().map(Into::into).collect(),
            batch_size: DEFAULT_BATCH_SIZE,
            backend,
            bulk_load: true,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_bulk_load(mut self, enabled: bool) -> Self {
        self.bulk_load = enabled;
        self
    }

    /// Batch size actually used, never below 1
    pub fn effective_batch_size(&self) -> usize {
        self.batch_size.max(1)
    }

    fn uses_bulk_load(&self) -> bool {
        self.bulk_load && self.backend.supports_bulk_load()
    }
}

enum Strategy {
    Statement { rows: usize, buffer: Vec<Value> },
    BulkLoad { load: Box<dyn BulkLoad>, sent: u64 },
    Closed,
}

/// Accumulates rows for one table and writes them in batches.
///
/// ```no_run
/// # use sqlguard_core::{Abort, BackendKind, Begin, InsertConfig, Inserter, Result, values};
/// # async fn example(db: &dyn Begin) -> Result<u64> {
/// sqlguard_core::run_in_transaction(db, |tx| {
///     Box::pin(async move {
///         let config = InsertConfig::new(BackendKind::Sqlite, "t", ["id", "name"]);
///         let mut inserter = Inserter::new(tx, config).await?;
///         inserter.add(values![1_i64, "a"]).await?;
///         inserter.add(values![2_i64, "b"]).await?;
///         inserter.finish().await
///     })
/// })
/// .await
/// # }
/// ```
pub struct Inserter<'t, E: Execute + CopyIn + ?Sized> {
    tx: &'t E,
    backend: BackendKind,
    table: String,
    columns: Vec<String>,
    batch_size: usize,
    strategy: Strategy,
    written: u64,
}

impl<'t, E: Execute + CopyIn + ?Sized> Inserter<'t, E> {
    /// Bind an inserter to `tx`.
    ///
    /// The strategy is fixed here: a bulk-load channel is opened right away
    /// when the backend supports it and `config.bulk_load` is set.
    ///
    /// # Panics
    ///
    /// Panics if `config.columns` is empty.
    pub async fn new(tx: &'t E, config: InsertConfig) -> Guarded<Self> {
        assert!(
            !config.columns.is_empty(),
            "inserter for {} needs at least one column",
            config.table
        );

        let batch_size = config.effective_batch_size();
        let strategy = if config.uses_bulk_load() {
            let load = raise(tx.copy_in(&config.table, &config.columns).await)?;
            tracing::debug!(table = %config.table, "opened bulk load");
            Strategy::BulkLoad { load, sent: 0 }
        } else {
            let params = batch_size.saturating_mul(config.columns.len());
            if params > config.backend.max_bind_params() {
                tracing::warn!(
                    table = %config.table,
                    batch_size,
                    params,
                    limit = config.backend.max_bind_params(),
                    "batch exceeds the backend's bind parameter limit"
                );
            }
            Strategy::Statement {
                rows: 0,
                buffer: Vec::with_capacity(params.min(4096)),
            }
        };

        Ok(Self {
            tx,
            backend: config.backend,
            table: config.table,
            columns: config.columns,
            batch_size,
            strategy,
            written: 0,
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn is_bulk_load(&self) -> bool {
        matches!(self.strategy, Strategy::BulkLoad { .. })
    }

    /// Rows buffered and not yet sent to the database
    pub fn pending_rows(&self) -> usize {
        match &self.strategy {
            Strategy::Statement { rows, .. } => *rows,
            _ => 0,
        }
    }

    /// Rows written by flushes that succeeded so far
    pub fn rows_written(&self) -> u64 {
        self.written
    }

    /// Buffer one row, flushing when the batch is full.
    ///
    /// # Panics
    ///
    /// Panics if `row.len()` differs from the number of columns. Nothing is
    /// buffered or flushed in that case.
    pub async fn add(&mut self, row: Vec<Value>) -> Guarded<()> {
        assert_eq!(
            row.len(),
            self.columns.len(),
            "row width does not match the column list of {}",
            self.table
        );

        let full = match &mut self.strategy {
            Strategy::Statement { rows, buffer } => {
                buffer.extend(row);
                *rows += 1;
                *rows == self.batch_size
            }
            Strategy::BulkLoad { load, sent } => {
                raise(load.send_row(&row).await)?;
                *sent += 1;
                false
            }
            Strategy::Closed => unreachable!("inserter used after finish"),
        };

        if full {
            self.flush().await?;
        }
        Ok(())
    }

    /// Write all buffered rows as one statement.
    ///
    /// Does nothing when no rows are pending or when rows go through the
    /// bulk-load channel. The buffer is emptied before the statement runs, so
    /// a failed flush drops its rows.
    pub async fn flush(&mut self) -> Guarded<()> {
        let (rows, params) = match &mut self.strategy {
            Strategy::Statement { rows, buffer } if *rows > 0 => {
                let taken = (std::mem::take(rows), std::mem::take(buffer));
                buffer.reserve(taken.1.len());
                taken
            }
            _ => return Ok(()),
        };

        let sql = build_insert_sql(self.backend, &self.table, &self.columns, rows);
        tracing::debug!(table = %self.table, rows, params = params.len(), "flushing batch insert");
        ops::exec(self.tx, &sql, &params).await?;
        self.written += rows as u64;
        Ok(())
    }

    /// Write what is left and release the inserter, returning the total
    /// number of rows written.
    pub async fn finish(mut self) -> Guarded<u64> {
        match std::mem::replace(&mut self.strategy, Strategy::Closed) {
            Strategy::Statement { rows, buffer } => {
                self.strategy = Strategy::Statement { rows, buffer };
                self.flush().await?;
                self.strategy = Strategy::Closed;
                Ok(self.written)
            }
            Strategy::BulkLoad { load, sent } => {
                let accepted = raise(load.finish().await)?;
                tracing::debug!(table = %self.table, sent, accepted, "bulk load finished");
                self.written = accepted;
                Ok(accepted)
            }
            Strategy::Closed => Ok(self.written),
        }
    }
}

impl<E: Execute + CopyIn + ?Sized> Drop for Inserter<'_, E> {
    fn drop(&mut self) {
        match &self.strategy {
            Strategy::Statement { rows, .. } if *rows > 0 => {
                tracing::warn!(
                    table = %self.table,
                    pending = *rows,
                    "inserter dropped with unflushed rows; they are lost"
                );
            }
            Strategy::BulkLoad { sent, .. } => {
                tracing::warn!(
                    table = %self.table,
                    sent = *sent,
                    "bulk load dropped before finish; the load is aborted"
                );
            }
            _ => {}
        }
    }
}

/// Build `INSERT INTO <table> (<cols>) VALUES ($1,$2), ($3,$4), ...` for
/// `rows` rows. Placeholders are numbered row-major starting at 1.
pub fn build_insert_sql(
    backend: BackendKind,
    table: &str,
    columns: &[String],
    rows: usize,
) -> String {
    let width = columns.len();
    let groups: Vec<String> = (0..rows)
        .map(|row| {
            let placeholders: Vec<String> = (0..width)
                .map(|col| backend.placeholder(row * width + col + 1))
                .collect();
            format!("({})", placeholders.join(","))
        })
        .collect();

    format!(
        "INSERT INTO {} ({}) VALUES {}",
        table,
        columns.join(", "),
        groups.join(", ")
    )
}

#[cfg(test)]
mod tests;
