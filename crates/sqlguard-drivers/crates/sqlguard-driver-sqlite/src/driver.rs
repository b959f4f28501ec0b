//! SQLite driver implementation

use async_trait::async_trait;
use sqlguard_core::{Connection, ConnectionConfig, DatabaseDriver, Result, SqlError};
use std::sync::Arc;

use crate::SqliteConnection;

/// SQLite database driver
pub struct SqliteDriver;

impl SqliteDriver {
    /// Create a new SQLite driver instance
    pub fn new() -> Self {
        tracing::debug!("SQLite driver initialized");
        Self
    }
}

impl Default for SqliteDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DatabaseDriver for SqliteDriver {
    fn id(&self) -> &'static str {
        "sqlite"
    }

    fn name(&self) -> &'static str {
        "SQLite"
    }

    #[tracing::instrument(skip(self, config), fields(path = config.get_string("path").as_deref()))]
    async fn connect(&self, config: &ConnectionConfig) -> Result<Arc<dyn Connection>> {
        let path = config.get_string("path").ok_or_else(|| {
            SqlError::Configuration(
                "SQLite requires a 'path' or 'database' setting, e.g. database = \"/path/to/app.db\"".into(),
            )
        })?;

        let conn = SqliteConnection::open(&path).map_err(|e| {
            tracing::error!(error = %e, "failed to connect to SQLite database");
            e
        })?;

        tracing::info!(path = %path, "SQLite connection created");
        Ok(Arc::new(conn))
    }

    fn build_connection_string(&self, config: &ConnectionConfig) -> String {
        config
            .get_string("path")
            .unwrap_or_else(|| ":memory:".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sqlguard_core::BackendKind;

    #[tokio::test]
    async fn test_connect_requires_path() {
        let driver = SqliteDriver::new();
        let err = driver
            .connect(&ConnectionConfig::new("sqlite"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, SqlError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_connect_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.db");
        let config = ConnectionConfig::new_sqlite(path.to_str().unwrap());

        let driver = SqliteDriver::new();
        let conn = driver.connect(&config).await.unwrap();

        assert_eq!(conn.driver_name(), "sqlite");
        assert_eq!(conn.backend_kind(), BackendKind::Sqlite);
        assert_eq!(driver.backend_kind(), BackendKind::Sqlite);
        assert!(path.exists());
    }

    #[test]
    fn test_build_connection_string_defaults_to_memory() {
        let driver = SqliteDriver::new();
        assert_eq!(
            driver.build_connection_string(&ConnectionConfig::new("sqlite")),
            ":memory:"
        );
        assert_eq!(
            driver.build_connection_string(&ConnectionConfig::new_sqlite("/tmp/x.db")),
            "/tmp/x.db"
        );
    }
}
