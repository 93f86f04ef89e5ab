use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub health: HealthConfig,
  #[serde(default)]
  pub sync: SyncConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Base URL of the laboratory backend, e.g. https://lab.example.com/api
  pub url: String,
  /// Per-attempt request timeout in seconds
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
  /// How many attempts a request gets before falling back
  #[serde(default = "default_retries")]
  pub retries: u32,
  /// Base delay between attempts; attempt N waits N times this
  #[serde(default = "default_retry_delay_ms")]
  pub retry_delay_ms: u64,
  /// Path of the token-obtain endpoint
  #[serde(default = "default_login_path")]
  pub login_path: String,
  /// Path of the token-refresh endpoint
  #[serde(default = "default_refresh_path")]
  pub refresh_path: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Default time-to-live for cached responses, in minutes
  pub ttl_minutes: i64,
  /// Disable to run without the local response cache
  pub enabled: bool,
  /// Override for the offline database location
  pub path: Option<PathBuf>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      ttl_minutes: 30,
      enabled: true,
      path: None,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
  /// Seconds between background reachability probes
  pub interval_secs: u64,
  /// Path probed to judge reachability
  pub path: String,
  /// Probe timeout in seconds, kept short so checks stay cheap
  pub timeout_secs: u64,
}

impl Default for HealthConfig {
  fn default() -> Self {
    Self {
      interval_secs: 30,
      path: "/health/".to_string(),
      timeout_secs: 5,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// Replay queued mutations automatically when the backend recovers
  pub auto_drain: bool,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self { auto_drain: true }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./hemolab.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/hemolab/config.yaml
  /// 4. ~/.config/hemolab/config.yaml
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

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/hemolab/config.yaml\n\
                 See config.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("hemolab.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("hemolab").join("config.yaml");
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

  /// Directory holding the offline database and stored tokens.
  ///
  /// HEMOLAB_DATA_DIR overrides the platform default.
  pub fn data_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("HEMOLAB_DATA_DIR") {
      return Ok(PathBuf::from(dir));
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("hemolab"))
  }

  /// Location of the offline database (cache + pending operations).
  pub fn offline_db_path(&self) -> Result<PathBuf> {
    match &self.cache.path {
      Some(p) => Ok(p.clone()),
      None => Ok(Self::data_dir()?.join("offline.db")),
    }
  }

  pub fn request_timeout(&self) -> Duration {
    Duration::from_secs(self.api.timeout_secs)
  }

  pub fn retry_delay(&self) -> Duration {
    Duration::from_millis(self.api.retry_delay_ms)
  }
}

fn default_timeout_secs() -> u64 {
  10
}

fn default_retries() -> u32 {
  3
}

fn default_retry_delay_ms() -> u64 {
  1000
}

fn default_login_path() -> String {
  "/token/".to_string()
}

fn default_refresh_path() -> String {
  "/token/refresh/".to_string()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_minimal_config_gets_defaults() {
    let config: Config = serde_yaml::from_str(
      r#"
api:
  url: http://localhost:8000/api
"#,
    )
    .unwrap();

    assert_eq!(config.api.retries, 3);
    assert_eq!(config.api.timeout_secs, 10);
    assert_eq!(config.api.refresh_path, "/token/refresh/");
    assert_eq!(config.cache.ttl_minutes, 30);
    assert!(config.cache.enabled);
    assert_eq!(config.health.interval_secs, 30);
    assert!(config.sync.auto_drain);
  }

  #[test]
  fn test_overrides_are_honored() {
    let config: Config = serde_yaml::from_str(
      r#"
api:
  url: https://lab.example.com/api
  retries: 5
  retry_delay_ms: 250
cache:
  ttl_minutes: 5
  enabled: false
health:
  interval_secs: 10
  path: /status/
sync:
  auto_drain: false
"#,
    )
    .unwrap();

    assert_eq!(config.api.retries, 5);
    assert_eq!(config.retry_delay(), Duration::from_millis(250));
    assert_eq!(config.cache.ttl_minutes, 5);
    assert!(!config.cache.enabled);
    assert_eq!(config.health.path, "/status/");
    assert!(!config.sync.auto_drain);
  }
}
