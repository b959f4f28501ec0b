//! TLS settings for PostgreSQL connections

use native_tls::{Certificate, Identity, TlsConnector as NativeTlsConnector, TlsConnectorBuilder};
use postgres_native_tls::MakeTlsConnector;
use sqlguard_core::{ConnectionConfig, SqlError};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("failed to read {what} from {path}: {source}")]
    Read {
        what: &'static str,
        path: String,
        source: std::io::Error,
    },

    #[error("invalid CA certificate: {0}")]
    InvalidCaCert(String),

    #[error("invalid client identity (cert + key): {0}")]
    InvalidClientIdentity(String),

    #[error("unknown ssl_mode '{0}'")]
    UnknownMode(String),

    #[error("TLS configuration error: {0}")]
    Configuration(String),
}

impl From<TlsError> for SqlError {
    fn from(error: TlsError) -> Self {
        match error {
            TlsError::UnknownMode(_) => SqlError::Configuration(error.to_string()),
            other => SqlError::Connection(other.to_string()),
        }
    }
}

/// libpq `sslmode` values
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SslMode {
    Disable,
    Allow,
    #[default]
    Prefer,
    Require,
    VerifyCa,
    VerifyFull,
}

impl SslMode {
    pub(crate) fn to_postgres(self) -> tokio_postgres::config::SslMode {
        use tokio_postgres::config::SslMode as Pg;
        match self {
            SslMode::Disable => Pg::Disable,
            SslMode::Allow | SslMode::Prefer => Pg::Prefer,
            SslMode::Require | SslMode::VerifyCa | SslMode::VerifyFull => Pg::Require,
        }
    }
}

impl FromStr for SslMode {
    type Err = TlsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "disable" => Ok(SslMode::Disable),
            "allow" => Ok(SslMode::Allow),
            "prefer" => Ok(SslMode::Prefer),
            "require" => Ok(SslMode::Require),
            "verify-ca" | "verify_ca" => Ok(SslMode::VerifyCa),
            "verify-full" | "verify_full" => Ok(SslMode::VerifyFull),
            _ => Err(TlsError::UnknownMode(s.to_string())),
        }
    }
}

/// Mode and certificate files used to build the connector
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsSettings {
    pub mode: SslMode,
    pub ca_cert: Option<PathBuf>,
    pub client_cert: Option<PathBuf>,
    pub client_key: Option<PathBuf>,
}

impl TlsSettings {
    pub fn disabled() -> Self {
        Self {
            mode: SslMode::Disable,
            ..Self::default()
        }
    }

    /// Read `ssl_mode`, `ssl_ca_cert`, `ssl_client_cert` and `ssl_client_key`
    pub fn from_config(config: &ConnectionConfig) -> Result<Self, TlsError> {
        let mode = match config.get_string("ssl_mode") {
            Some(mode) => mode.parse()?,
            None => SslMode::default(),
        };
        let path = |key: &str| {
            config
                .get_string(key)
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from)
        };
        Ok(Self {
            mode,
            ca_cert: path("ssl_ca_cert"),
            client_cert: path("ssl_client_cert"),
            client_key: path("ssl_client_key"),
        })
    }

    /// Build the native-tls connector. Returns `None` for `disable`.
    pub fn build_connector(&self) -> Result<Option<MakeTlsConnector>, TlsError> {
        if self.mode == SslMode::Disable {
            return Ok(None);
        }

        tracing::debug!(mode = ?self.mode, "building PostgreSQL TLS connector");
        let mut builder = NativeTlsConnector::builder();
        self.configure_verification(&mut builder);

        if let Some(path) = &self.ca_cert {
            let pem = read(path, "CA certificate")?;
            let cert = Certificate::from_pem(&pem)
                .map_err(|e| TlsError::InvalidCaCert(e.to_string()))?;
            builder.add_root_certificate(cert);
        }

        if let (Some(cert_path), Some(key_path)) = (&self.client_cert, &self.client_key) {
            let cert = read(cert_path, "client certificate")?;
            let key = read(key_path, "client key")?;
            let identity = Identity::from_pkcs8(&cert, &key)
                .map_err(|e| TlsError::InvalidClientIdentity(e.to_string()))?;
            builder.identity(identity);
        }

        let connector = builder
            .build()
            .map_err(|e| TlsError::Configuration(e.to_string()))?;
        Ok(Some(MakeTlsConnector::new(connector)))
    }

    fn configure_verification(&self, builder: &mut TlsConnectorBuilder) {
        match self.mode {
            SslMode::Disable | SslMode::VerifyFull => {}
            SslMode::VerifyCa => {
                builder.danger_accept_invalid_hostnames(true);
            }
            // Encryption without verification unless a CA was given
            SslMode::Allow | SslMode::Prefer | SslMode::Require => {
                builder.danger_accept_invalid_hostnames(true);
                if self.ca_cert.is_none() {
                    builder.danger_accept_invalid_certs(true);
                }
            }
        }
    }
}

fn read(path: &Path, what: &'static str) -> Result<Vec<u8>, TlsError> {
    fs::read(path).map_err(|source| TlsError::Read {
        what,
        path: path.display().to_string(),
        source,
    })
}
