//! Configuration file handling.
//!
//! Palaver reads a TOML file from the platform config directory. Every field
//! can also be supplied through an environment variable, which wins over the
//! file; that is the usual way to point a checkout at a staging deployment.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

pub const API_BASE_URL_ENV: &str = "PALAVER_API_BASE_URL";
pub const IDENTITY_API_KEY_ENV: &str = "PALAVER_IDENTITY_API_KEY";

/// Errors that can occur when loading configuration from disk.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to parse the configuration file as valid TOML.
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "Failed to read config at {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, source } => {
                write!(f, "Failed to parse config at {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the chat service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base_url: Option<String>,

    /// Web API key for the identity provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_api_key: Option<String>,

    /// Browser page where a federated sign-in can be completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub federated_sign_in_url: Option<String>,

    /// Transcript log enabled at startup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<String>,
}

impl Config {
    pub fn load() -> Result<Config, ConfigError> {
        Self::load_from_path(&Self::config_path())
    }

    pub fn load_from_path(config_path: &Path) -> Result<Config, ConfigError> {
        if !config_path.exists() {
            return Ok(Config::default());
        }
        let contents = fs::read_to_string(config_path).map_err(|source| ConfigError::Read {
            path: config_path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: config_path.to_path_buf(),
            source,
        })
    }

    pub fn config_path() -> PathBuf {
        let proj_dirs = ProjectDirs::from("org", "palaver-chat", "palaver")
            .expect("Failed to determine config directory");
        proj_dirs.config_dir().join("config.toml")
    }

    /// Chat service base URL, environment first.
    pub fn resolve_api_base_url(&self) -> Option<String> {
        std::env::var(API_BASE_URL_ENV)
            .ok()
            .filter(|value| !value.is_empty())
            .or_else(|| self.api_base_url.clone())
    }

    /// Identity provider API key, environment first.
    pub fn resolve_identity_api_key(&self) -> Option<String> {
        std::env::var(IDENTITY_API_KEY_ENV)
            .ok()
            .filter(|value| !value.is_empty())
            .or_else(|| self.identity_api_key.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn a_missing_file_yields_the_default_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from_path(&dir.path().join("config.toml")).unwrap();
        assert!(config.api_base_url.is_none());
        assert!(config.identity_api_key.is_none());
    }

    #[test]
    fn a_valid_file_is_parsed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut file = fs::File::create(&path).unwrap();
        writeln!(file, "api_base_url = \"https://chat.example.com/api\"").unwrap();
        writeln!(file, "identity_api_key = \"key-123\"").unwrap();

        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(
            config.api_base_url.as_deref(),
            Some("https://chat.example.com/api")
        );
        assert_eq!(config.identity_api_key.as_deref(), Some("key-123"));
    }

    #[test]
    fn invalid_toml_reports_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "api_base_url = [not toml").unwrap();

        match Config::load_from_path(&path) {
            Err(ConfigError::Parse { .. }) => {}
            other => panic!("expected parse error, got {other:?}"),
        }
    }
}
