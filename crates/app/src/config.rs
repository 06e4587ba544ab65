//! Application configuration
//!
//! Loaded from a TOML file; every field has a default so a missing file or
//! a partial file both work. CLI flags override the loaded values.

use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context};
use billboard_net::DEFAULT_PORT;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::debug;

const CONFIG_FILE: &str = "billboard.toml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Host the ledger server listens on / clients connect to
    pub server_addr: String,
    pub port: u16,
    pub database_path: PathBuf,
    pub roster_path: PathBuf,
    /// Delay between an admin START and the window opening
    pub open_countdown_secs: u64,
    pub request_timeout_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        let data_dir = project_dirs()
            .map(|dirs| dirs.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        Self {
            server_addr: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            database_path: data_dir.join("ledger.db"),
            roster_path: data_dir.join("roster.toml"),
            open_countdown_secs: 15,
            request_timeout_ms: 10_000,
        }
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("dev", "onyx", "billboard")
}

impl AppConfig {
    /// Parse a config document
    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        toml::from_str(content).context("invalid config file")
    }

    /// Load from `path`, or from the default location when it exists
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) if path.exists() => path,
                _ => {
                    debug!("No config file, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config = Self::from_toml(&content)?;
        debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    pub fn default_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join(CONFIG_FILE))
    }

    /// Resolve `server_addr:port`
    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        (self.server_addr.as_str(), self.port)
            .to_socket_addrs()
            .with_context(|| format!("cannot resolve {}", self.server_addr))?
            .next()
            .ok_or_else(|| anyhow!("no address for {}", self.server_addr))
    }

    pub fn open_countdown(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.open_countdown_secs as i64)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = AppConfig::from_toml("port = 9000\nopen_countdown_secs = 5\n").unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.open_countdown(), chrono::Duration::seconds(5));
        assert_eq!(config.server_addr, "127.0.0.1");
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("billboard.toml");
        std::fs::write(&path, "server_addr = \"localhost\"\nport = 7400\n").unwrap();

        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.server_addr, "localhost");
        assert_eq!(config.socket_addr().unwrap().port(), 7400);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(AppConfig::load(Some(&dir.path().join("absent.toml"))).is_err());
    }

    #[test]
    fn test_unknown_value_type_rejected() {
        assert!(AppConfig::from_toml("port = \"not a port\"").is_err());
    }
}
