//! `COPY ... FROM STDIN` bulk loading in the text format

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use futures::SinkExt;
use sqlguard_core::{BulkLoad, Result, SqlError, Value};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_postgres::{Client, CopyInSink};

use crate::connection::format_postgres_error;

/// Statement opening a text-format copy of `columns` into `table`
pub(crate) fn copy_statement(table: &str, columns: &[String]) -> String {
    format!("COPY {} ({}) FROM STDIN", table, columns.join(", "))
}

/// An open `COPY FROM STDIN` stream.
///
/// While it is open the owning transaction refuses other statements, since
/// the connection is in copy mode until [`BulkLoad::finish`].
pub struct PostgresBulkLoad {
    sink: Pin<Box<CopyInSink<Bytes>>>,
    width: usize,
    rows: u64,
    buffer: BytesMut,
    copy_active: Arc<AtomicBool>,
}

impl PostgresBulkLoad {
    pub(crate) async fn open(
        client: &Client,
        table: &str,
        columns: &[String],
        copy_active: Arc<AtomicBool>,
    ) -> Result<Self> {
        let statement = copy_statement(table, columns);
        tracing::debug!(statement = %statement, "opening COPY stream");

        if copy_active.swap(true, Ordering::AcqRel) {
            return Err(SqlError::Driver(
                "a bulk load is already open on this transaction".into(),
            ));
        }

        let sink = match client.copy_in::<_, Bytes>(statement.as_str()).await {
            Ok(sink) => sink,
            Err(e) => {
                copy_active.store(false, Ordering::Release);
                return Err(SqlError::Query(format!(
                    "Failed to start COPY into {}: {}",
                    table,
                    format_postgres_error(&e)
                )));
            }
        };

        Ok(Self {
            sink: Box::pin(sink),
            width: columns.len(),
            rows: 0,
            buffer: BytesMut::with_capacity(4096),
            copy_active,
        })
    }
}

impl Drop for PostgresBulkLoad {
    fn drop(&mut self) {
        // The sink aborts the COPY when dropped unfinished
        self.copy_active.store(false, Ordering::Release);
    }
}

#[async_trait]
impl BulkLoad for PostgresBulkLoad {
    async fn send_row(&mut self, row: &[Value]) -> Result<()> {
        if row.len() != self.width {
            return Err(SqlError::Driver(format!(
                "COPY row has {} values, expected {}",
                row.len(),
                self.width
            )));
        }

        encode_row(row, &mut self.buffer);
        let chunk = self.buffer.split().freeze();
        self.sink.send(chunk).await.map_err(|e| {
            SqlError::Query(format!("Failed to send COPY row: {}", format_postgres_error(&e)))
        })?;
        self.rows += 1;
        Ok(())
    }

    async fn finish(mut self: Box<Self>) -> Result<u64> {
        let copied = self.sink.as_mut().finish().await.map_err(|e| {
            SqlError::Query(format!("Failed to finish COPY: {}", format_postgres_error(&e)))
        })?;
        tracing::debug!(sent = self.rows, copied, "COPY stream finished");
        Ok(copied)
    }
}

/// Append one row in COPY text format: tab-separated, newline-terminated
pub(crate) fn encode_row(row: &[Value], out: &mut BytesMut) {
    for (i, value) in row.iter().enumerate() {
        if i > 0 {
            out.put_u8(b'\t');
        }
        encode_field(value, out);
    }
    out.put_u8(b'\n');
}

fn encode_field(value: &Value, out: &mut BytesMut) {
    match value {
        Value::Null => out.put_slice(b"\\N"),
        Value::Bool(b) => out.put_u8(if *b { b't' } else { b'f' }),
        Value::Int16(i) => out.put_slice(i.to_string().as_bytes()),
        Value::Int32(i) => out.put_slice(i.to_string().as_bytes()),
        Value::Int64(i) => out.put_slice(i.to_string().as_bytes()),
        Value::Float32(f) => out.put_slice(float_text(f64::from(*f)).as_bytes()),
        Value::Float64(f) => out.put_slice(float_text(*f).as_bytes()),
        // bytea hex input; the leading backslash is itself escaped
        Value::Bytes(b) => {
            out.put_slice(b"\\\\x");
            out.put_slice(hex::encode(b).as_bytes());
        }
        Value::DateTimeUtc(dt) => out.put_slice(dt.to_rfc3339().as_bytes()),
        Value::Array(_) => escape_into(&array_literal(value), out),
        other => escape_into(&other.to_string(), out),
    }
}

fn float_text(f: f64) -> String {
    if f.is_nan() {
        "NaN".to_string()
    } else if f.is_infinite() {
        if f > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else {
        f.to_string()
    }
}

fn escape_into(text: &str, out: &mut BytesMut) {
    for byte in text.bytes() {
        match byte {
            b'\\' => out.put_slice(b"\\\\"),
            b'\t' => out.put_slice(b"\\t"),
            b'\n' => out.put_slice(b"\\n"),
            b'\r' => out.put_slice(b"\\r"),
            other => out.put_u8(other),
        }
    }
}

/// Render a value as a PostgreSQL array literal, e.g. `{1,"a b",NULL}`
pub(crate) fn array_literal(value: &Value) -> String {
    match value {
        Value::Array(items) => {
            let elements: Vec<String> = items.iter().map(array_element).collect();
            format!("{{{}}}", elements.join(","))
        }
        other => other.to_string(),
    }
}

fn array_element(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Array(_) => array_literal(value),
        Value::Bool(b) => if *b { "t" } else { "f" }.to_string(),
        Value::Int16(_) | Value::Int32(_) | Value::Int64(_) => value.to_string(),
        Value::Float32(f) => float_text(f64::from(*f)),
        Value::Float64(f) => float_text(*f),
        Value::Bytes(b) => format!("\"\\\\x{}\"", hex::encode(b)),
        Value::DateTimeUtc(dt) => quote_element(&dt.to_rfc3339()),
        other => quote_element(&other.to_string()),
    }
}

fn quote_element(text: &str) -> String {
    let mut quoted = String::with_capacity(text.len() + 2);
    quoted.push('"');
    for c in text.chars() {
        if c == '"' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}
