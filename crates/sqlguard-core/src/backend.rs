//! Backend family detection and the SQL details that depend on it

use serde::{Deserialize, Serialize};

/// The database family behind a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Postgres,
    Sqlite,
    Mysql,
    #[default]
    Generic,
}

impl BackendKind {
    /// Map a driver name to its backend family. Unknown names are `Generic`.
    pub fn from_driver_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => BackendKind::Postgres,
            "sqlite" | "sqlite3" => BackendKind::Sqlite,
            "mysql" | "mariadb" => BackendKind::Mysql,
            _ => BackendKind::Generic,
        }
    }

    /// Placeholder for the 1-based parameter `index`
    pub fn placeholder(self, index: usize) -> String {
        match self {
            BackendKind::Mysql => "?".to_string(),
            _ => format!("${}", index),
        }
    }

    /// Most bind parameters a single statement may carry
    pub fn max_bind_params(self) -> usize {
        match self {
            BackendKind::Sqlite => 32_766,
            _ => 65_535,
        }
    }

    /// Whether rows can be streamed through a bulk-load channel
    pub fn supports_bulk_load(self) -> bool {
        matches!(self, BackendKind::Postgres)
    }

    /// Statement that removes every row of `table`
    pub fn truncate_sql(self, table: &str) -> String {
        match self {
            BackendKind::Sqlite => format!("DELETE FROM {}", table),
            _ => format!("TRUNCATE TABLE {}", table),
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BackendKind::Postgres => "postgres",
            BackendKind::Sqlite => "sqlite",
            BackendKind::Mysql => "mysql",
            BackendKind::Generic => "generic",
        };
        f.write_str(name)
    }
}
