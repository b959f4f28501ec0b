//! Driver entry points

use crate::{BackendKind, Connection, ConnectionConfig, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// Entry point of a driver crate
#[async_trait]
pub trait DatabaseDriver: Send + Sync {
    /// Unique identifier for this driver (e.g., "postgres", "sqlite")
    fn id(&self) -> &'static str {
        self.name()
    }

    /// Human-readable name (e.g., "PostgreSQL", "SQLite")
    fn name(&self) -> &'static str;

    /// Backend family of every connection this driver opens
    fn backend_kind(&self) -> BackendKind {
        BackendKind::from_driver_name(self.id())
    }

    /// `None` for file databases
    fn default_port(&self) -> Option<u16> {
        None
    }

    /// Open a connection described by `config`
    async fn connect(&self, config: &ConnectionConfig) -> Result<Arc<dyn Connection>>;

    /// Render `config` as a URL or path, for display and logs
    fn build_connection_string(&self, config: &ConnectionConfig) -> String;
}
