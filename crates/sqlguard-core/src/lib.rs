//! sqlguard core - terse database calls with explicit failure boundaries
//!
//! This crate provides:
//!
//! - `Abort` / `Guarded` - the signal raised by wrapped driver calls, and the
//!   `guarded` / `run_guarded` boundaries that turn it back into `SqlError`
//! - `ops` - one-call wrappers (`exec`, `query`, `count`, `truncate`, ...)
//! - `run_in_transaction` - commit on success, rollback on abort
//! - `Inserter` - batched multi-row inserts with a PostgreSQL `COPY` path
//! - Capability traits drivers implement (`Execute`, `Query`, `Begin`, ...)
//!   and the `Value` / `Row` data model

mod backend;
mod config;
mod connection;
mod convert;
mod driver;
mod error;
pub mod guard;
pub mod inserter;
pub mod ops;
mod transaction;
mod types;

#[cfg(test)]
mod test_support;

pub use backend::*;
pub use config::*;
pub use connection::*;
pub use convert::*;
pub use driver::*;
pub use error::*;
pub use guard::{Abort, Guarded, guarded, raise, raise_failure, run_guarded};
pub use inserter::{InsertConfig, Inserter};
pub use transaction::*;
pub use types::*;
