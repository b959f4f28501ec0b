//! Connection configuration

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{BackendKind, Result, SqlError};

/// Where and how to connect, as read from a config file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Driver ID (e.g., "postgres", "sqlite")
    pub driver: String,
    /// Empty for file databases
    #[serde(default)]
    pub host: String,
    /// 0 selects the driver default
    #[serde(default)]
    pub port: u16,
    /// Database name, or the file path for SQLite
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Driver specific settings such as `ssl_mode`
    #[serde(default)]
    pub params: HashMap<String, String>,
}

impl ConnectionConfig {
    /// Empty configuration for `driver`
    pub fn new(driver: &str) -> Self {
        Self {
            driver: driver.to_string(),
            host: String::new(),
            port: 0,
            database: None,
            username: None,
            password: None,
            params: HashMap::new(),
        }
    }

    pub fn new_sqlite(database_path: &str) -> Self {
        let mut config = Self::new("sqlite");
        config.database = Some(database_path.to_string());
        config
    }

    pub fn new_postgres(host: &str, port: u16, database: &str, username: &str) -> Self {
        let mut config = Self::new("postgres");
        config.host = host.to_string();
        config.port = port;
        config.database = Some(database.to_string());
        config.username = Some(username.to_string());
        config
    }

    /// Parse a configuration from TOML
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self = toml::from_str(source)?;
        if config.driver.trim().is_empty() {
            return Err(SqlError::Configuration("driver must not be empty".into()));
        }
        Ok(config)
    }

    /// Store a parameter; non-string JSON values are kept in their JSON text form
    pub fn with_param(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        let text = match value.into() {
            serde_json::Value::String(text) => text,
            other => other.to_string(),
        };
        self.params.insert(key.to_string(), text);
        self
    }

    /// Look up `key` in `params`, falling back to the matching typed field
    pub fn get_string(&self, key: &str) -> Option<String> {
        if let Some(value) = self.params.get(key) {
            return Some(value.clone());
        }
        match key {
            "host" if !self.host.is_empty() => Some(self.host.clone()),
            "database" | "path" => self.database.clone(),
            "username" | "user" => self.username.clone(),
            "password" => self.password.clone(),
            _ => None,
        }
    }

    /// Get a boolean parameter ("true"/"1"/"yes" are true)
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.params
            .get(key)
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "true" | "1" | "yes" | "on"))
    }

    /// Backend family selected by `driver`
    pub fn backend_kind(&self) -> BackendKind {
        BackendKind::from_driver_name(&self.driver)
    }
}
