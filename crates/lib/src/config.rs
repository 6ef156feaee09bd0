//! Configuration for both halves of the update channel.
//!
//! Read from a TOML file (every field optional) and then overridden by
//! `HOTPATCH_*` environment variables:
//!
//! ```toml
//! [client]
//! base_url = "http://127.0.0.1:3000"
//! fetch_timeout_ms = 10000
//! hot = true
//!
//! [server]
//! listen = "127.0.0.1:3000"
//! asset_dir = "dist"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::consts::{DEFAULT_FETCH_TIMEOUT, DEFAULT_SOCKET_PATH};

pub const ENV_BASE_URL: &str = "HOTPATCH_BASE_URL";
pub const ENV_FETCH_TIMEOUT_MS: &str = "HOTPATCH_FETCH_TIMEOUT_MS";
pub const ENV_LISTEN: &str = "HOTPATCH_LISTEN";
pub const ENV_ASSET_DIR: &str = "HOTPATCH_ASSET_DIR";

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read config '{path}': {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("invalid config '{path}': {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: toml::de::Error,
  },

  #[error("invalid value '{value}' for {var}")]
  Env { var: &'static str, value: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
  pub client: ClientConfig,
  pub server: ServerConfig,
}

/// Settings of a connecting client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
  /// Where manifests and units are fetched from.
  pub base_url: String,
  /// Path of the notification socket on the server.
  pub socket_path: String,
  pub fetch_timeout_ms: u64,
  /// When false, every new build is a full reload.
  pub hot: bool,
}

impl Default for ClientConfig {
  fn default() -> Self {
    Self {
      base_url: "http://127.0.0.1:3000".to_string(),
      socket_path: DEFAULT_SOCKET_PATH.to_string(),
      fetch_timeout_ms: DEFAULT_FETCH_TIMEOUT.as_millis() as u64,
      hot: true,
    }
  }
}

impl ClientConfig {
  pub fn fetch_timeout(&self) -> Duration {
    Duration::from_millis(self.fetch_timeout_ms)
  }
}

/// Settings of the dev server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
  pub listen: String,
  /// Build output directory served to clients.
  pub asset_dir: PathBuf,
  pub socket_path: String,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      listen: "127.0.0.1:3000".to_string(),
      asset_dir: PathBuf::from("dist"),
      socket_path: DEFAULT_SOCKET_PATH.to_string(),
    }
  }
}

impl Config {
  /// Load `path`, falling back to defaults when the file does not exist.
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    if !path.exists() {
      debug!(path = %path.display(), "no config file, using defaults");
      return Ok(Self::default());
    }
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source,
    })
  }

  /// Apply `HOTPATCH_*` overrides from the environment.
  pub fn apply_env(&mut self) -> Result<(), ConfigError> {
    if let Ok(url) = std::env::var(ENV_BASE_URL) {
      self.client.base_url = url;
    }
    if let Ok(value) = std::env::var(ENV_FETCH_TIMEOUT_MS) {
      self.client.fetch_timeout_ms = value.parse().map_err(|_| ConfigError::Env {
        var: ENV_FETCH_TIMEOUT_MS,
        value,
      })?;
    }
    if let Ok(listen) = std::env::var(ENV_LISTEN) {
      self.server.listen = listen;
    }
    if let Ok(dir) = std::env::var(ENV_ASSET_DIR) {
      self.server.asset_dir = PathBuf::from(dir);
    }
    Ok(())
  }
}
