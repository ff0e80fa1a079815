//! Deployment configuration: the saved deployment file, CLI overrides, and
//! the validated, immutable result the server runs with.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

/// Private key file expected under the certificate directory.
pub const PRIVATE_KEY_FILE: &str = "privkey.pem";
/// Full certificate chain expected under the certificate directory.
pub const FULLCHAIN_FILE: &str = "fullchain.pem";

pub const DEFAULT_API_PORT: u16 = 3001;
pub const DEFAULT_WEB_PORT: u16 = 3000;
pub const DEFAULT_HTTP_PORT: u16 = 80;
pub const DEFAULT_HTTPS_PORT: u16 = 443;

/// Where the deployment is reachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentMode {
    /// Single host, served on `web_port`
    #[default]
    Local,
    /// Public domain, served on the standard HTTP/HTTPS ports
    Domain,
}

impl std::fmt::Display for DeploymentMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeploymentMode::Local => write!(f, "local"),
            DeploymentMode::Domain => write!(f, "domain"),
        }
    }
}

impl std::str::FromStr for DeploymentMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(DeploymentMode::Local),
            "domain" => Ok(DeploymentMode::Domain),
            _ => Err(ConfigError::InvalidMode(s.to_string())),
        }
    }
}

/// On-disk deployment record, reused between runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<DeploymentMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ui_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub https_port: Option<u16>,
}

impl DeployFile {
    /// Read the file at `path`, or an empty record if it does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|e| ConfigError::ParseFailed {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let write_err = |source| ConfigError::WriteFailed {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        let content = serde_json::to_string_pretty(self).map_err(|e| ConfigError::ParseFailed {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        std::fs::write(path, content).map_err(write_err)
    }
}

/// Explicit command-line values; any `Some` wins over the saved file.
#[derive(Debug, Clone, Default)]
pub struct DeployOverrides {
    pub api_port: Option<u16>,
    pub web_port: Option<u16>,
    pub mode: Option<DeploymentMode>,
    pub domain: Option<String>,
    pub ssl_path: Option<PathBuf>,
    pub dist_dir: Option<PathBuf>,
}

/// Locations of the TLS key pair inside a certificate directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertPaths {
    pub key: PathBuf,
    pub cert: PathBuf,
}

impl CertPaths {
    /// Check that `dir` holds both required files.
    pub fn from_dir(dir: &Path) -> Result<Self, ConfigError> {
        if !dir.is_dir() {
            return Err(ConfigError::CertPathNotDirectory(dir.to_path_buf()));
        }
        let key = dir.join(PRIVATE_KEY_FILE);
        if !key.is_file() {
            return Err(ConfigError::MissingCertFile {
                dir: dir.to_path_buf(),
                file: PRIVATE_KEY_FILE,
            });
        }
        let cert = dir.join(FULLCHAIN_FILE);
        if !cert.is_file() {
            return Err(ConfigError::MissingCertFile {
                dir: dir.to_path_buf(),
                file: FULLCHAIN_FILE,
            });
        }
        Ok(Self { key, cert })
    }
}

/// Which listeners to open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenPlan {
    Plain {
        port: u16,
    },
    Secure {
        https_port: u16,
        /// Plaintext port that redirects to HTTPS; also the fallback port
        /// if the TLS listener cannot start.
        http_port: u16,
        redirect: bool,
        certs: CertPaths,
    },
}

/// Validated deployment parameters. Built once, never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployConfig {
    pub api_port: u16,
    pub web_port: u16,
    pub mode: DeploymentMode,
    pub domain: Option<String>,
    pub ssl_path: Option<PathBuf>,
    pub dist_dir: PathBuf,
    pub http_port: u16,
    pub https_port: u16,
}

impl DeployConfig {
    /// Merge the saved file with overrides and validate the result.
    ///
    /// Relative paths resolve against `base_dir`. Passing a domain without an
    /// explicit mode selects domain mode.
    pub fn resolve(
        file: &DeployFile,
        overrides: &DeployOverrides,
        base_dir: &Path,
    ) -> Result<Self, ConfigError> {
        let domain = overrides
            .domain
            .clone()
            .or_else(|| file.domain.clone())
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());

        let mode = match (overrides.mode, &overrides.domain) {
            (Some(mode), _) => mode,
            (None, Some(_)) => DeploymentMode::Domain,
            (None, None) => file.mode.unwrap_or_default(),
        };

        let anchor = |p: PathBuf| if p.is_absolute() { p } else { base_dir.join(p) };

        let config = Self {
            api_port: overrides.api_port.or(file.port).unwrap_or(DEFAULT_API_PORT),
            web_port: overrides.web_port.or(file.web_port).unwrap_or(DEFAULT_WEB_PORT),
            mode,
            domain,
            ssl_path: overrides
                .ssl_path
                .clone()
                .or_else(|| file.ssl_path.clone())
                .map(anchor),
            dist_dir: anchor(
                overrides
                    .dist_dir
                    .clone()
                    .or_else(|| file.ui_path.clone())
                    .unwrap_or_else(|| PathBuf::from("dist")),
            ),
            http_port: file.http_port.unwrap_or(DEFAULT_HTTP_PORT),
            https_port: file.https_port.unwrap_or(DEFAULT_HTTPS_PORT),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mode == DeploymentMode::Domain && self.domain.is_none() {
            return Err(ConfigError::MissingDomain);
        }
        if let Some(dir) = &self.ssl_path {
            CertPaths::from_dir(dir)?;
        }
        Ok(())
    }

    /// Decide which listeners to open.
    ///
    /// Local mode serves everything on `web_port` (TLS there if configured,
    /// no redirect listener). Domain mode uses `http_port`/`https_port` with
    /// an HTTP→HTTPS redirect when a certificate is configured.
    pub fn listen_plan(&self) -> Result<ListenPlan, ConfigError> {
        let Some(dir) = &self.ssl_path else {
            let port = match self.mode {
                DeploymentMode::Local => self.web_port,
                DeploymentMode::Domain => self.http_port,
            };
            return Ok(ListenPlan::Plain { port });
        };

        let certs = CertPaths::from_dir(dir)?;
        Ok(match self.mode {
            DeploymentMode::Local => ListenPlan::Secure {
                https_port: self.web_port,
                http_port: self.web_port,
                redirect: false,
                certs,
            },
            DeploymentMode::Domain => ListenPlan::Secure {
                https_port: self.https_port,
                http_port: self.http_port,
                redirect: true,
                certs,
            },
        })
    }

    /// The record written back with `--save`.
    pub fn to_file(&self) -> DeployFile {
        DeployFile {
            port: Some(self.api_port),
            web_port: Some(self.web_port),
            mode: Some(self.mode),
            domain: self.domain.clone(),
            ssl_path: self.ssl_path.clone(),
            ui_path: Some(self.dist_dir.clone()),
            http_port: Some(self.http_port),
            https_port: Some(self.https_port),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cert_dir(with_key: bool, with_chain: bool) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        if with_key {
            std::fs::write(dir.path().join(PRIVATE_KEY_FILE), "key").unwrap();
        }
        if with_chain {
            std::fs::write(dir.path().join(FULLCHAIN_FILE), "chain").unwrap();
        }
        dir
    }

    #[test]
    fn test_mode_from_str() {
        assert_eq!("local".parse::<DeploymentMode>().unwrap(), DeploymentMode::Local);
        assert_eq!("DOMAIN".parse::<DeploymentMode>().unwrap(), DeploymentMode::Domain);
        assert!("cloud".parse::<DeploymentMode>().is_err());
        assert_eq!(DeploymentMode::Domain.to_string(), "domain");
    }

    #[test]
    fn test_resolve_defaults() {
        let base = Path::new("/srv/panel");
        let config =
            DeployConfig::resolve(&DeployFile::default(), &DeployOverrides::default(), base)
                .unwrap();
        assert_eq!(config.api_port, DEFAULT_API_PORT);
        assert_eq!(config.web_port, DEFAULT_WEB_PORT);
        assert_eq!(config.mode, DeploymentMode::Local);
        assert_eq!(config.dist_dir, PathBuf::from("/srv/panel/dist"));
        assert_eq!(
            config.listen_plan().unwrap(),
            ListenPlan::Plain {
                port: DEFAULT_WEB_PORT
            }
        );
    }

    #[test]
    fn test_overrides_win_over_file() {
        let file = DeployFile {
            port: Some(4000),
            web_port: Some(8080),
            ui_path: Some(PathBuf::from("/opt/ui")),
            ..Default::default()
        };
        let overrides = DeployOverrides {
            api_port: Some(5000),
            ..Default::default()
        };
        let config = DeployConfig::resolve(&file, &overrides, Path::new("/")).unwrap();
        assert_eq!(config.api_port, 5000);
        assert_eq!(config.web_port, 8080);
        assert_eq!(config.dist_dir, PathBuf::from("/opt/ui"));
    }

    #[test]
    fn test_domain_mode_requires_domain() {
        let overrides = DeployOverrides {
            mode: Some(DeploymentMode::Domain),
            domain: Some("   ".to_string()),
            ..Default::default()
        };
        let err = DeployConfig::resolve(&DeployFile::default(), &overrides, Path::new("/"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingDomain));
    }

    #[test]
    fn test_domain_override_selects_domain_mode() {
        let file = DeployFile {
            mode: Some(DeploymentMode::Local),
            ..Default::default()
        };
        let overrides = DeployOverrides {
            domain: Some("panel.example.com".to_string()),
            ..Default::default()
        };
        let config = DeployConfig::resolve(&file, &overrides, Path::new("/")).unwrap();
        assert_eq!(config.mode, DeploymentMode::Domain);
        assert_eq!(
            config.listen_plan().unwrap(),
            ListenPlan::Plain {
                port: DEFAULT_HTTP_PORT
            }
        );
    }

    #[test]
    fn test_missing_chain_rejected() {
        let dir = cert_dir(true, false);
        let overrides = DeployOverrides {
            ssl_path: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        let err = DeployConfig::resolve(&DeployFile::default(), &overrides, Path::new("/"))
            .unwrap_err();
        match err {
            ConfigError::MissingCertFile { file, .. } => assert_eq!(file, FULLCHAIN_FILE),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_key_rejected() {
        let dir = cert_dir(false, true);
        let err = CertPaths::from_dir(dir.path()).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingCertFile {
                file: PRIVATE_KEY_FILE,
                ..
            }
        ));
    }

    #[test]
    fn test_domain_with_certs_plans_redirect() {
        let dir = cert_dir(true, true);
        let overrides = DeployOverrides {
            domain: Some("panel.example.com".to_string()),
            ssl_path: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        let config =
            DeployConfig::resolve(&DeployFile::default(), &overrides, Path::new("/")).unwrap();
        match config.listen_plan().unwrap() {
            ListenPlan::Secure {
                https_port,
                http_port,
                redirect,
                certs,
            } => {
                assert_eq!(https_port, DEFAULT_HTTPS_PORT);
                assert_eq!(http_port, DEFAULT_HTTP_PORT);
                assert!(redirect);
                assert_eq!(certs.key, dir.path().join(PRIVATE_KEY_FILE));
            }
            other => panic!("unexpected plan: {other:?}"),
        }
    }

    #[test]
    fn test_local_with_certs_serves_tls_on_web_port() {
        let dir = cert_dir(true, true);
        let overrides = DeployOverrides {
            web_port: Some(8443),
            ssl_path: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        let config =
            DeployConfig::resolve(&DeployFile::default(), &overrides, Path::new("/")).unwrap();
        assert!(matches!(
            config.listen_plan().unwrap(),
            ListenPlan::Secure {
                https_port: 8443,
                redirect: false,
                ..
            }
        ));
    }

    #[test]
    fn test_deploy_file_round_trip_uses_camel_case() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("deploy.json");
        let config = DeployConfig::resolve(
            &DeployFile::default(),
            &DeployOverrides {
                web_port: Some(9000),
                ..Default::default()
            },
            dir.path(),
        )
        .unwrap();
        config.to_file().save(&path).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"webPort\": 9000"));
        assert!(raw.contains("\"uiPath\""));
        assert_eq!(DeployFile::load_or_default(&path).unwrap(), config.to_file());
    }

    #[test]
    fn test_load_missing_file_is_default() {
        let file = DeployFile::load_or_default(Path::new("/nonexistent/deploy.json")).unwrap();
        assert_eq!(file, DeployFile::default());
    }

    #[test]
    fn test_load_invalid_json_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deploy.json");
        std::fs::write(&path, "{ port: ").unwrap();
        assert!(matches!(
            DeployFile::load_or_default(&path),
            Err(ConfigError::ParseFailed { .. })
        ));
    }
}
