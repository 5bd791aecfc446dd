//! Profile configuration: endpoint base URLs and the poll interval.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// File holding the profile configuration.
const CONFIG_FILE: &str = "config.toml";

const DEFAULT_BASE_URL: &str = "http://localhost:5000";
const DEFAULT_POLL_INTERVAL_MS: u64 = 30_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed config: {0}")]
    Toml(#[from] toml::de::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    /// Base URL of the authentication endpoint.
    pub auth_base_url: String,
    /// Base URL of the data-query endpoint.
    pub data_base_url: String,
    /// Fixed polling interval for the metrics feed, in milliseconds.
    pub poll_interval_ms: u64,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            auth_base_url: DEFAULT_BASE_URL.to_string(),
            data_base_url: DEFAULT_BASE_URL.to_string(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

impl DashboardConfig {
    /// Loads `config.toml` from the profile dir (a missing file reads as
    /// defaults), then applies `WORKBOARD_*` environment overrides.
    pub fn load(home: &Path) -> Result<Self, ConfigError> {
        let path = home.join(CONFIG_FILE);
        let mut config: Self = if path.exists() {
            toml::from_str(&std::fs::read_to_string(&path)?)?
        } else {
            Self::default()
        };

        if let Ok(url) = std::env::var("WORKBOARD_AUTH_URL") {
            config.auth_base_url = url;
        }
        if let Ok(url) = std::env::var("WORKBOARD_DATA_URL") {
            config.data_base_url = url;
        }
        if let Ok(raw) = std::env::var("WORKBOARD_POLL_INTERVAL_MS")
            && let Ok(ms) = raw.parse()
        {
            config.poll_interval_ms = ms;
        }
        Ok(config)
    }
}

/// Default profile directory, `~/.workboard`.
pub fn default_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".workboard")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let config = DashboardConfig::load(dir.path()).unwrap();
        assert_eq!(DashboardConfig::default(), config);
    }

    #[test]
    fn partial_file_keeps_defaults_for_absent_keys() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.toml"),
            "auth_base_url = \"https://auth.example\"\n",
        )
        .unwrap();

        let config = DashboardConfig::load(dir.path()).unwrap();
        assert_eq!("https://auth.example", config.auth_base_url);
        assert_eq!(DEFAULT_BASE_URL, config.data_base_url);
        assert_eq!(DEFAULT_POLL_INTERVAL_MS, config.poll_interval_ms);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("config.toml"), "auth_base_url = [").unwrap();
        assert!(DashboardConfig::load(dir.path()).is_err());
    }
}
