use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::RetryPolicy;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub retry: RetryConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  #[serde(default = "default_base_url")]
  pub base_url: String,
  /// Per-request timeout; unset leaves it to the HTTP client
  pub timeout_secs: Option<u64>,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      base_url: default_base_url(),
      timeout_secs: None,
    }
  }
}

fn default_base_url() -> String {
  "http://localhost:3000".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  #[serde(default = "default_true")]
  pub enabled: bool,
  /// Keep cached reads in SQLite so they survive between CLI runs
  #[serde(default)]
  pub persist: bool,
  /// Age after which a cached read is refetched even without an invalidation.
  /// Persisted caches fall back to [`PERSISTED_STALE_SECS`].
  pub stale_secs: Option<u64>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      persist: false,
      stale_secs: None,
    }
  }
}

/// Default `stale_secs` for a persisted cache, which would otherwise outlive
/// every change made by other clients.
pub const PERSISTED_STALE_SECS: u64 = 300;

impl CacheConfig {
  pub fn stale_time(&self) -> Option<Duration> {
    match (self.stale_secs, self.persist) {
      (Some(secs), _) => Some(Duration::from_secs(secs)),
      (None, true) => Some(Duration::from_secs(PERSISTED_STALE_SECS)),
      (None, false) => None,
    }
  }
}

fn default_true() -> bool {
  true
}

/// Read retry settings. Writes are never retried.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
  #[serde(default)]
  pub max_retries: u32,
  #[serde(default = "default_backoff_ms")]
  pub backoff_ms: u64,
}

impl Default for RetryConfig {
  fn default() -> Self {
    Self {
      max_retries: 0,
      backoff_ms: default_backoff_ms(),
    }
  }
}

fn default_backoff_ms() -> u64 {
  500
}

impl From<&RetryConfig> for RetryPolicy {
  fn from(config: &RetryConfig) -> Self {
    RetryPolicy {
      max_retries: config.max_retries,
      backoff: Duration::from_millis(config.backoff_ms),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./comms.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/comms/config.yaml
  ///
  /// Without any file the defaults are used. `COMMS_BASE_URL` overrides
  /// `api.base_url` in every case.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let mut config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Config::default(),
    };

    if let Ok(base_url) = std::env::var("COMMS_BASE_URL") {
      config.api.base_url = base_url;
    }

    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("comms.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("comms").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> std::result::Result<Self, serde_yaml::Error> {
    serde_yaml::from_str(contents)
  }

  /// Get the optional API bearer token from `COMMS_API_TOKEN`.
  pub fn get_api_token() -> Option<String> {
    std::env::var("COMMS_API_TOKEN")
      .ok()
      .filter(|token| !token.is_empty())
  }

  /// Directory for the cache database and log file.
  pub fn data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("comms"))
  }
}
