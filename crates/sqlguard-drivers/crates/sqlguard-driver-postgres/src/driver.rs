//! PostgreSQL driver implementation

use async_trait::async_trait;
use sqlguard_core::{Connection, ConnectionConfig, DatabaseDriver, Result, SqlError};
use std::sync::Arc;

use crate::PostgresConnection;
use crate::tls::TlsSettings;

const DEFAULT_PORT: u16 = 5432;

/// PostgreSQL database driver
pub struct PostgresDriver;

impl PostgresDriver {
    /// Create a new PostgreSQL driver instance
    pub fn new() -> Self {
        tracing::debug!("PostgreSQL driver initialized");
        Self
    }

    fn target(config: &ConnectionConfig) -> (String, u16, String) {
        let host = config
            .get_string("host")
            .unwrap_or_else(|| "localhost".to_string());
        let port = if config.port > 0 {
            config.port
        } else {
            DEFAULT_PORT
        };
        let database = config
            .get_string("database")
            .unwrap_or_else(|| "postgres".to_string());
        (host, port, database)
    }
}

impl Default for PostgresDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DatabaseDriver for PostgresDriver {
    fn id(&self) -> &'static str {
        "postgres"
    }

    fn name(&self) -> &'static str {
        "PostgreSQL"
    }

    fn default_port(&self) -> Option<u16> {
        Some(DEFAULT_PORT)
    }

    #[tracing::instrument(skip(self, config), fields(host = %config.host, database = ?config.database))]
    async fn connect(&self, config: &ConnectionConfig) -> Result<Arc<dyn Connection>> {
        let (host, port, database) = Self::target(config);
        let tls = TlsSettings::from_config(config)?;

        let mut pg_config = tokio_postgres::Config::new();
        pg_config.host(&host).port(port).dbname(&database);
        if let Some(user) = config.get_string("user") {
            pg_config.user(&user);
        }
        if let Some(password) = config.get_string("password") {
            pg_config.password(&password);
        }
        if let Some(name) = config.get_string("application_name") {
            pg_config.application_name(&name);
        }
        if let Some(secs) = config.get_string("connect_timeout") {
            let secs: u64 = secs.parse().map_err(|_| {
                SqlError::Configuration(format!("connect_timeout must be whole seconds, got '{}'", secs))
            })?;
            pg_config.connect_timeout(std::time::Duration::from_secs(secs));
        }

        let conn = PostgresConnection::connect(pg_config, &tls)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "failed to connect to PostgreSQL database");
                e
            })?;

        tracing::info!(host = %host, port, database = %database, ssl = ?tls.mode, "PostgreSQL connection created");
        Ok(Arc::new(conn))
    }

    fn build_connection_string(&self, config: &ConnectionConfig) -> String {
        let (host, port, database) = Self::target(config);

        let mut conn_str = String::from("postgresql://");
        if let Some(user) = config.get_string("user") {
            conn_str.push_str(&user);
            if let Some(password) = config.get_string("password") {
                conn_str.push(':');
                conn_str.push_str(&password);
            }
            conn_str.push('@');
        }
        conn_str.push_str(&format!("{}:{}/{}", host, port, database));
        conn_str
    }
}
