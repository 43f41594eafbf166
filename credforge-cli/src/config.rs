//! CLI configuration handling.
//!
//! The file lives at `config.toml` in the project config directory
//! (`~/.config/credforge/` on Linux). A missing file means defaults, which
//! are only useful once a `client_id` is supplied.
//!
//! ```toml
//! log_level = "debug"
//! default_scopes = ["User.Read"]
//!
//! [client.auth]
//! client_id = "00000000-0000-0000-0000-000000000000"
//! authority = "https://login.microsoftonline.com/contoso"
//! ```

use anyhow::{Context, Result};
use credforge_core::{ClientConfiguration, FileStore, Secret};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable that overrides the configured client secret.
pub const CLIENT_SECRET_ENV: &str = "CREDFORGE_CLIENT_SECRET";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Engine configuration.
    pub client: ClientConfiguration,

    /// Token cache file. Defaults to the project data directory.
    pub cache_path: Option<PathBuf>,

    /// Logging level used when `RUST_LOG` is not set.
    pub log_level: String,

    /// Scopes requested when a command is given none.
    pub default_scopes: Vec<String>,

    /// Path to the configuration file that was loaded.
    #[serde(skip)]
    pub config_path: PathBuf,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            client: ClientConfiguration::default(),
            cache_path: None,
            log_level: default_log_level(),
            default_scopes: Vec::new(),
            config_path: PathBuf::new(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl CliConfig {
    /// Cache file to open, falling back to the engine's default location.
    pub fn cache_path(&self) -> Result<PathBuf> {
        match &self.cache_path {
            Some(path) => Ok(path.clone()),
            None => FileStore::default_path().context("No data directory for the token cache"),
        }
    }

    /// Scopes from the command line, else the configured defaults.
    pub fn scopes_or_default(&self, scopes: Option<&str>) -> Vec<String> {
        match scopes {
            Some(scopes) => split_scopes(scopes),
            None => self.default_scopes.clone(),
        }
    }

    fn apply_secret_override(&mut self, secret: Option<String>) {
        if let Some(secret) = secret.filter(|s| !s.is_empty()) {
            self.client.credentials.client_secret = Some(Secret::new(secret));
        }
    }
}

/// Load configuration from `path`, or the default location when `None`.
pub fn load_config(path: Option<&Path>) -> Result<CliConfig> {
    let config_path = match path {
        Some(path) => path.to_path_buf(),
        None => default_config_path(),
    };

    let mut config = load_from_path(&config_path)?;
    config.apply_secret_override(std::env::var(CLIENT_SECRET_ENV).ok());
    Ok(config)
}

/// Parse the file at `config_path`; a missing file yields defaults.
pub fn load_from_path(config_path: &Path) -> Result<CliConfig> {
    let mut config = if config_path.exists() {
        let contents = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config from {:?}", config_path))?;
        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config from {:?}", config_path))?
    } else {
        CliConfig::default()
    };

    config.config_path = config_path.to_path_buf();
    Ok(config)
}

/// Split a comma- or space-separated scope list.
pub fn split_scopes(scopes: &str) -> Vec<String> {
    scopes
        .split([',', ' '])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn default_config_path() -> PathBuf {
    project_dirs()
        .map(|d| d.config_dir().join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("credforge.toml"))
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "raibid-labs", "credforge")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");

        let config = load_from_path(&path).unwrap();
        assert_eq!(config.log_level, "info");
        assert!(config.default_scopes.is_empty());
        assert!(config.client.auth.client_id.is_empty());
        assert_eq!(config.config_path, path);
    }

    #[test]
    fn test_parse_config_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
log_level = "debug"
default_scopes = ["User.Read", "Mail.Read"]
cache_path = "/tmp/credforge-cache.json"

[client.auth]
client_id = "my-app"
authority = "https://login.contoso.com/contoso"

[client.system]
token_renewal_offset_seconds = 600
"#,
        )
        .unwrap();

        let config = load_from_path(&path).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.default_scopes, vec!["User.Read", "Mail.Read"]);
        assert_eq!(config.client.auth.client_id, "my-app");
        assert_eq!(config.client.auth.authority, "https://login.contoso.com/contoso");
        assert_eq!(config.client.system.token_renewal_offset_seconds, 600);
        assert!(config.client.telemetry.server_telemetry);
        assert_eq!(
            config.cache_path().unwrap(),
            PathBuf::from("/tmp/credforge-cache.json")
        );
    }

    #[test]
    fn test_invalid_config_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "log_level = [").unwrap();

        let err = load_from_path(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config"));
    }

    #[test]
    fn test_secret_override() {
        let mut config = CliConfig::default();
        config.apply_secret_override(Some("from-env".to_string()));
        assert_eq!(
            config.client.credentials.client_secret.as_ref().map(Secret::expose),
            Some("from-env")
        );
        assert!(config.client.is_confidential());

        let mut config = CliConfig::default();
        config.apply_secret_override(Some(String::new()));
        assert!(!config.client.is_confidential());
    }

    #[test]
    fn test_scopes() {
        assert_eq!(split_scopes("User.Read, Mail.Read"), vec!["User.Read", "Mail.Read"]);
        assert_eq!(split_scopes("openid profile"), vec!["openid", "profile"]);

        let config = CliConfig {
            default_scopes: vec!["User.Read".to_string()],
            ..Default::default()
        };
        assert_eq!(config.scopes_or_default(None), vec!["User.Read"]);
        assert_eq!(config.scopes_or_default(Some("Mail.Send")), vec!["Mail.Send"]);
    }
}
