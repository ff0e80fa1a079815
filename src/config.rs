//! Project settings for panelctl.
//!
//! Settings live in `panel.toml` at the project root and are layered
//! file → environment (`PANEL_*`) → CLI.
//!
//! # Configuration File Format
//!
//! ```toml
//! [database]
//! path = "data/panel.db"
//!
//! [migrations]
//! dir = "migrations"
//!
//! [backend]
//! command = "node dist/index.js"
//! build_command = "npm run build"
//! dir = "backend"
//!
//! [server]
//! api_prefix = "/api"
//! proxy_timeout_secs = 30
//! shutdown_grace_secs = 10
//! deploy_file = "deploy.json"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// File name of the project settings file.
pub const CONFIG_FILE: &str = "panel.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSection {
    /// SQLite database file, relative to the project directory
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("data/panel.db")
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationsSection {
    /// Directory scanned for `*.sql` migration units
    #[serde(default = "default_migrations_dir")]
    pub dir: PathBuf,
}

fn default_migrations_dir() -> PathBuf {
    PathBuf::from("migrations")
}

impl Default for MigrationsSection {
    fn default() -> Self {
        Self {
            dir: default_migrations_dir(),
        }
    }
}

/// How the backend service is built and started.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendSection {
    /// Shell command that starts the backend; receives `PORT` in its environment
    #[serde(default = "default_backend_command")]
    pub command: String,
    /// Optional shell command that must succeed before migrations run
    #[serde(default)]
    pub build_command: Option<String>,
    /// Working directory for both commands, relative to the project directory
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

fn default_backend_command() -> String {
    "node dist/index.js".to_string()
}

impl Default for BackendSection {
    fn default() -> Self {
        Self {
            command: default_backend_command(),
            build_command: None,
            dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    /// Request paths under this prefix are proxied to the backend
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,
    #[serde(default = "default_proxy_timeout_secs")]
    pub proxy_timeout_secs: u64,
    /// Grace period for in-flight requests on shutdown
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
    /// Saved deployment configuration, relative to the project directory
    #[serde(default = "default_deploy_file")]
    pub deploy_file: PathBuf,
}

fn default_api_prefix() -> String {
    "/api".to_string()
}

fn default_proxy_timeout_secs() -> u64 {
    30
}

fn default_shutdown_grace_secs() -> u64 {
    10
}

fn default_deploy_file() -> PathBuf {
    PathBuf::from("deploy.json")
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            api_prefix: default_api_prefix(),
            proxy_timeout_secs: default_proxy_timeout_secs(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            deploy_file: default_deploy_file(),
        }
    }
}

/// Contents of `panel.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PanelToml {
    #[serde(default)]
    pub database: DatabaseSection,
    #[serde(default)]
    pub migrations: MigrationsSection,
    #[serde(default)]
    pub backend: BackendSection,
    #[serde(default)]
    pub server: ServerSection,
}

impl PanelToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse panel.toml")
    }

    /// Load `panel.toml` from the project directory, or defaults if absent.
    pub fn load_or_default(project_dir: &Path) -> Result<Self> {
        let config_path = project_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize panel.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply `PANEL_*` overrides from `lookup`.
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("PANEL_DATABASE_PATH") {
            self.database.path = PathBuf::from(v);
        }
        if let Some(v) = lookup("PANEL_MIGRATIONS_DIR") {
            self.migrations.dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("PANEL_BACKEND_CMD") {
            self.backend.command = v;
        }
        if let Some(v) = lookup("PANEL_API_PREFIX") {
            self.server.api_prefix = v;
        }
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if !self.server.api_prefix.starts_with('/') || self.server.api_prefix.len() < 2 {
            warnings.push(format!(
                "Invalid api_prefix '{}': should start with '/' and name a path segment",
                self.server.api_prefix
            ));
        }
        if self.server.proxy_timeout_secs == 0 {
            warnings.push("proxy_timeout_secs is 0; proxied requests will fail immediately".into());
        }
        if self.backend.command.trim().is_empty() {
            warnings.push("backend.command is empty".to_string());
        }

        warnings
    }
}

/// Resolved project settings with paths anchored at the project directory.
#[derive(Debug, Clone)]
pub struct PanelConfig {
    pub project_dir: PathBuf,
    pub toml: PanelToml,
    pub verbose: bool,
    pub yes: bool,
}

impl PanelConfig {
    pub fn new(project_dir: PathBuf) -> Result<Self> {
        Self::with_env(project_dir, |key| std::env::var(key).ok())
    }

    pub fn with_env(
        project_dir: PathBuf,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let mut toml = PanelToml::load_or_default(&project_dir)?;
        toml.apply_env(lookup);

        Ok(Self {
            project_dir,
            toml,
            verbose: false,
            yes: false,
        })
    }

    pub fn with_cli_args(project_dir: PathBuf, verbose: bool, yes: bool) -> Result<Self> {
        let mut config = Self::new(project_dir)?;
        config.verbose = verbose;
        config.yes = yes;
        Ok(config)
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.project_dir.join(path)
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.resolve(&self.toml.database.path)
    }

    pub fn migrations_dir(&self) -> PathBuf {
        self.resolve(&self.toml.migrations.dir)
    }

    pub fn deploy_file(&self) -> PathBuf {
        self.resolve(&self.toml.server.deploy_file)
    }

    /// Working directory for backend commands.
    pub fn backend_dir(&self) -> PathBuf {
        match &self.toml.backend.dir {
            Some(dir) => self.resolve(dir),
            None => self.project_dir.clone(),
        }
    }

    pub fn proxy_timeout(&self) -> Duration {
        Duration::from_secs(self.toml.server.proxy_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.toml.server.shutdown_grace_secs)
    }

    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let toml = PanelToml::default();
        assert_eq!(toml.database.path, PathBuf::from("data/panel.db"));
        assert_eq!(toml.migrations.dir, PathBuf::from("migrations"));
        assert_eq!(toml.server.api_prefix, "/api");
        assert_eq!(toml.server.proxy_timeout_secs, 30);
        assert_eq!(toml.server.shutdown_grace_secs, 10);
        assert!(toml.backend.build_command.is_none());
        assert!(toml.validate().is_empty());
    }

    #[test]
    fn test_parse_partial_file() {
        let toml = PanelToml::parse(
            r#"
            [backend]
            command = "bun run start"
            build_command = "bun run build"

            [server]
            api_prefix = "/v1"
            "#,
        )
        .unwrap();
        assert_eq!(toml.backend.command, "bun run start");
        assert_eq!(toml.backend.build_command.as_deref(), Some("bun run build"));
        assert_eq!(toml.server.api_prefix, "/v1");
        assert_eq!(toml.server.proxy_timeout_secs, 30);
        assert_eq!(toml.database.path, PathBuf::from("data/panel.db"));
    }

    #[test]
    fn test_parse_invalid_toml() {
        assert!(PanelToml::parse("[server\napi_prefix = ").is_err());
    }

    #[test]
    fn test_validate_reports_bad_prefix() {
        let mut toml = PanelToml::default();
        toml.server.api_prefix = "api".to_string();
        toml.server.proxy_timeout_secs = 0;
        let warnings = toml.validate();
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].contains("api_prefix"));
    }

    #[test]
    fn test_env_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "[migrations]\ndir = \"db/migrations\"\n",
        )
        .unwrap();

        let config = PanelConfig::with_env(dir.path().to_path_buf(), |key| match key {
            "PANEL_DATABASE_PATH" => Some("/var/lib/panel/panel.db".to_string()),
            _ => None,
        })
        .unwrap();

        assert_eq!(config.database_path(), PathBuf::from("/var/lib/panel/panel.db"));
        assert!(config.migrations_dir().ends_with("db/migrations"));
        assert!(config.migrations_dir().is_absolute());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        let mut toml = PanelToml::default();
        toml.server.shutdown_grace_secs = 3;
        toml.save(&path).unwrap();

        let loaded = PanelToml::load(&path).unwrap();
        assert_eq!(loaded.server.shutdown_grace_secs, 3);
    }
}
