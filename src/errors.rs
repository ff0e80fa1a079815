//! Typed error hierarchy for panelctl.
//!
//! One enum per subsystem:
//! - `ConfigError`: invalid or incomplete deployment configuration
//! - `MigrateError`: discovery, ledger and apply failures
//! - `ProxyError`: per-request forwarding failures (turned into 502s)
//! - `SupervisorError`: backend process and listener lifecycle failures

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while resolving a deployment configuration.
///
/// All of these are reported before any listener is bound or any ledger row
/// is written.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Deployment mode 'domain' requires a non-empty domain (pass --domain)")]
    MissingDomain,

    #[error("Certificate directory {dir} is missing required file {file}")]
    MissingCertFile { dir: PathBuf, file: &'static str },

    #[error("Certificate path {0} is not a directory")]
    CertPathNotDirectory(PathBuf),

    #[error("Invalid deployment mode '{0}'. Valid values: local, domain")]
    InvalidMode(String),

    #[error("Failed to read config file at {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {path}: {message}")]
    ParseFailed { path: PathBuf, message: String },

    #[error("Failed to write config file at {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from the migration engine.
#[derive(Debug, Error)]
pub enum MigrateError {
    #[error("Failed to scan migrations directory {path}: {source}")]
    Discovery {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Duplicate migration id {id} ({first} and {second})")]
    DuplicateId {
        id: String,
        first: PathBuf,
        second: PathBuf,
    },

    #[error("Migration {id} failed: {source:#}")]
    Apply {
        id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Migration ledger error: {0}")]
    Ledger(#[from] rusqlite::Error),

    #[error("Failed to write migration file at {path}: {source}")]
    CreateFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Migration name '{0}' contains no usable characters")]
    InvalidName(String),

    #[error("No timestamp token sorts after migration '{0}'")]
    TokensExhausted(String),
}

/// Errors from forwarding a single request to the backend.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Backend unreachable: {0}")]
    ConnectionFailed(String),

    #[error("Backend timed out: {0}")]
    Timeout(String),

    #[error("Request failed: {0}")]
    RequestFailed(String),
}

impl From<reqwest::Error> for ProxyError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProxyError::Timeout(e.to_string())
        } else if e.is_connect() {
            ProxyError::ConnectionFailed(e.to_string())
        } else {
            ProxyError::RequestFailed(e.to_string())
        }
    }
}

/// Errors from the deployment supervisor.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("Failed to spawn backend command '{command}': {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Backend process exited unexpectedly ({0})")]
    BackendExited(String),

    #[error("Build command '{command}' failed ({status})")]
    BuildFailed { command: String, status: String },

    #[error("Failed to bind {addr}: {source}")]
    BindFailed {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Listener on {addr} stopped: {source}")]
    ListenerFailed {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to install {signal} handler: {source}")]
    SignalHandler {
        signal: &'static str,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_error_names_unit() {
        let err = MigrateError::Apply {
            id: "20260101000000000_add_servers".to_string(),
            source: anyhow::anyhow!("no such table: servers"),
        };
        let msg = err.to_string();
        assert!(msg.contains("20260101000000000_add_servers"));
        assert!(msg.contains("no such table"));
    }

    #[test]
    fn test_missing_cert_file_message() {
        let err = ConfigError::MissingCertFile {
            dir: PathBuf::from("/etc/ssl/panel"),
            file: "fullchain.pem",
        };
        assert_eq!(
            err.to_string(),
            "Certificate directory /etc/ssl/panel is missing required file fullchain.pem"
        );
    }

    #[test]
    fn test_supervisor_wraps_config_error() {
        let err: SupervisorError = ConfigError::MissingDomain.into();
        assert!(err.to_string().contains("requires a non-empty domain"));
    }
}
