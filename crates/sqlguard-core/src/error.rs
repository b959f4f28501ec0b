//! Error types for sqlguard

use thiserror::Error;

/// Error returned at the boundary of a unit of work.
///
/// Every driver failure (bad SQL, constraint violation, lost connection,
/// failed conversion of a fetched value) ends up as one of these. Defects in
/// the calling code are not represented here; they panic.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SqlError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Driver error: {0}")]
    Driver(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Conversion error: {0}")]
    Conversion(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("{0}")]
    Other(String),
}

impl From<toml::de::Error> for SqlError {
    fn from(e: toml::de::Error) -> Self {
        SqlError::Configuration(e.to_string())
    }
}

/// Result type alias for sqlguard operations
pub type Result<T> = std::result::Result<T, SqlError>;
