//! Driver registry for managing available database drivers

use sqlguard_core::{
    BackendKind, Connection, ConnectionConfig, DatabaseDriver, Result, SqlError,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Registry of available database drivers, keyed by driver id
pub struct DriverRegistry {
    drivers: HashMap<String, Arc<dyn DatabaseDriver>>,
}

impl DriverRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            drivers: HashMap::new(),
        }
    }

    /// Create a registry with all built-in drivers registered
    pub fn with_defaults() -> Self {
        #[allow(unused_mut)]
        let mut registry = Self::new();

        #[cfg(feature = "sqlite")]
        registry.register(Arc::new(crate::sqlite::SqliteDriver::new()));
        #[cfg(feature = "postgres")]
        registry.register(Arc::new(crate::postgres::PostgresDriver::new()));

        registry
    }

    /// Register a new driver
    pub fn register(&mut self, driver: Arc<dyn DatabaseDriver>) {
        let id = driver.id().to_string();
        tracing::info!(driver = %id, "registering database driver");
        self.drivers.insert(id, driver);
    }

    /// Get a driver by id, or by any alias of its backend ("postgresql", "sqlite3", ...)
    pub fn get(&self, name: &str) -> Option<Arc<dyn DatabaseDriver>> {
        let key = name.to_ascii_lowercase();
        let driver = self.drivers.get(&key).cloned().or_else(|| {
            let kind = BackendKind::from_driver_name(&key);
            if kind == BackendKind::Generic {
                return None;
            }
            self.drivers
                .values()
                .find(|driver| driver.backend_kind() == kind)
                .cloned()
        });
        if driver.is_none() {
            tracing::warn!(driver = %name, "driver not found in registry");
        }
        driver
    }

    /// List all registered driver ids
    pub fn list(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.drivers.keys().map(|s| s.as_str()).collect();
        ids.sort_unstable();
        ids
    }

    /// Check if a driver is registered
    pub fn has(&self, name: &str) -> bool {
        self.drivers.contains_key(name)
    }

    /// Open a connection with the driver named by `config.driver`
    pub async fn connect(&self, config: &ConnectionConfig) -> Result<Arc<dyn Connection>> {
        let driver = self.get(&config.driver).ok_or_else(|| {
            SqlError::Configuration(format!("no driver registered for '{}'", config.driver))
        })?;
        driver.connect(config).await
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
