//! sqlguard drivers - concrete implementations of the `sqlguard-core` traits

#[cfg(feature = "postgres")]
pub use sqlguard_driver_postgres as postgres;
#[cfg(feature = "sqlite")]
pub use sqlguard_driver_sqlite as sqlite;

mod registry;

pub use registry::DriverRegistry;

/// Re-export commonly used types from sqlguard-core
pub use sqlguard_core::{
    Abort, BackendKind, Connection, ConnectionConfig, DatabaseDriver, Guarded, InsertConfig,
    Inserter, QueryResult, Result, Row, SqlError, StatementResult, Transaction, Value, ops,
    run_in_transaction,
};
