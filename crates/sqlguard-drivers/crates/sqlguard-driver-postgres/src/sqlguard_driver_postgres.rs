//! PostgreSQL database driver implementation
//!
//! Transactions support bulk loading through `COPY ... FROM STDIN`.

mod connection;
mod copy;
mod driver;
mod tls;
mod value;

pub use connection::{PostgresConnection, PostgresPreparedStatement, PostgresTransaction};
pub use copy::PostgresBulkLoad;
pub use driver::PostgresDriver;
pub use tls::{SslMode, TlsError, TlsSettings};
