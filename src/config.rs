use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::cache::{CacheConfig, StaleTime};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheSettings,
  #[serde(default)]
  pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Base URL of the todo REST API
  #[serde(default = "default_base_url")]
  pub base_url: String,
  /// Page size requested from the list endpoint
  #[serde(default = "default_limit")]
  pub limit: u32,
  /// Owner assigned to todos created from this client
  #[serde(default = "default_owner_id")]
  pub owner_id: i64,
  /// Request timeout, in seconds in the config file
  #[serde(default = "default_timeout", deserialize_with = "deserialize_secs")]
  pub timeout: Duration,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      base_url: default_base_url(),
      limit: default_limit(),
      owner_id: default_owner_id(),
      timeout: default_timeout(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheSettings {
  /// `never`, or a number of seconds
  #[serde(default = "default_stale_time", deserialize_with = "deserialize_stale_time")]
  pub stale_time: StaleTime,
  /// Extra attempts after a failed fetch
  #[serde(default = "default_retry")]
  pub retry: u32,
  #[serde(default = "default_retry_delay_ms")]
  pub retry_delay_ms: u64,
}

impl Default for CacheSettings {
  fn default() -> Self {
    Self {
      stale_time: default_stale_time(),
      retry: default_retry(),
      retry_delay_ms: default_retry_delay_ms(),
    }
  }
}

impl CacheSettings {
  pub fn to_cache_config(&self) -> CacheConfig {
    CacheConfig {
      stale_time: self.stale_time,
      retry: self.retry,
      retry_delay: Duration::from_millis(self.retry_delay_ms),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
  /// Default filter directive, overridden by `RUST_LOG`
  #[serde(default = "default_log_level")]
  pub level: String,
  /// Directory for log files (defaults to the platform data directory)
  pub dir: Option<PathBuf>,
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      level: default_log_level(),
      dir: None,
    }
  }
}

fn default_base_url() -> String {
  "https://dummyjson.com".to_string()
}

fn default_limit() -> u32 {
  20
}

fn default_owner_id() -> i64 {
  1
}

fn default_timeout() -> Duration {
  Duration::from_secs(10)
}

fn default_stale_time() -> StaleTime {
  StaleTime::Never
}

fn default_retry() -> u32 {
  2
}

fn default_retry_delay_ms() -> u64 {
  1000
}

fn default_log_level() -> String {
  "info".to_string()
}

fn deserialize_secs<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
  D: Deserializer<'de>,
{
  let secs = u64::deserialize(deserializer)?;
  Ok(Duration::from_secs(secs))
}

fn deserialize_stale_time<'de, D>(deserializer: D) -> Result<StaleTime, D::Error>
where
  D: Deserializer<'de>,
{
  #[derive(Deserialize)]
  #[serde(untagged)]
  enum Raw {
    Secs(u64),
    Word(String),
  }

  match Raw::deserialize(deserializer)? {
    Raw::Secs(secs) => Ok(StaleTime::After(Duration::from_secs(secs))),
    Raw::Word(word) if word.eq_ignore_ascii_case("never") => Ok(StaleTime::Never),
    Raw::Word(word) => Err(serde::de::Error::custom(format!(
      "invalid stale_time '{}', expected 'never' or a number of seconds",
      word
    ))),
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./todoq.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/todoq/config.yaml
  ///
  /// Without a config file the defaults are used.
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

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Config::default(),
    };
    config.validate()?;
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("todoq.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("todoq").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  pub fn validate(&self) -> Result<()> {
    let url = Url::parse(&self.api.base_url)
      .map_err(|e| eyre!("Invalid api.base_url '{}': {}", self.api.base_url, e))?;
    if !matches!(url.scheme(), "http" | "https") {
      return Err(eyre!(
        "Invalid api.base_url '{}': expected an http(s) URL",
        self.api.base_url
      ));
    }
    if self.api.limit == 0 {
      return Err(eyre!("api.limit must be at least 1"));
    }
    Ok(())
  }
}
