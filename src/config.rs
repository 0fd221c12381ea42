use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{AppError, AppResult, ErrorKind};
use crate::paging::PageStyle;

const APP_NAME: &str = "tierstore";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub store: StoreConfig,
  #[serde(default)]
  pub paging: PagingConfig,
  /// Size of the bounded worker pool shared by all repositories
  #[serde(default = "default_workers")]
  pub workers: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  pub url: String,
  #[serde(default = "default_timeout_ms")]
  pub timeout_ms: u64,
}

impl ApiConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_millis(self.timeout_ms)
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Disabled means every cache read misses
  #[serde(default = "default_true")]
  pub enabled: bool,
  #[serde(default = "default_ttl_secs")]
  pub default_ttl_secs: u64,
  pub path: Option<PathBuf>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      default_ttl_secs: default_ttl_secs(),
      path: None,
    }
  }
}

impl CacheConfig {
  pub fn default_ttl(&self) -> Duration {
    Duration::from_secs(self.default_ttl_secs)
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoreConfig {
  pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PagingConfig {
  #[serde(default = "default_page_size")]
  pub page_size: u32,
  #[serde(default)]
  pub style: PageStyle,
}

impl Default for PagingConfig {
  fn default() -> Self {
    Self {
      page_size: default_page_size(),
      style: PageStyle::default(),
    }
  }
}

fn default_true() -> bool {
  true
}

fn default_timeout_ms() -> u64 {
  10_000
}

fn default_ttl_secs() -> u64 {
  300
}

fn default_page_size() -> u32 {
  25
}

fn default_workers() -> usize {
  8
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./tierstore.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/tierstore/config.yaml
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
        "No configuration file found. Create one at ~/.config/tierstore/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("tierstore.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join(APP_NAME).join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Invalid config file {}: {}", path.display(), e))
  }

  pub fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    if config.paging.page_size == 0 {
      return Err(eyre!("paging.page_size must be positive"));
    }
    if config.workers == 0 {
      return Err(eyre!("workers must be positive"));
    }
    Ok(config)
  }

  pub fn cache_path(&self) -> AppResult<PathBuf> {
    match &self.cache.path {
      Some(p) => Ok(p.clone()),
      None => data_dir().map(|d| d.join("cache.db")),
    }
  }

  pub fn store_path(&self) -> AppResult<PathBuf> {
    match &self.store.path {
      Some(p) => Ok(p.clone()),
      None => data_dir().map(|d| d.join("store.db")),
    }
  }
}

/// Per-user data directory, e.g. ~/.local/share/tierstore.
pub fn data_dir() -> AppResult<PathBuf> {
  dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|h| h.join(".local").join("share")))
    .map(|d| d.join(APP_NAME))
    .ok_or_else(|| AppError::new(ErrorKind::Unknown, "could not determine data directory"))
}

/// Directory holding the rolling log files.
pub fn log_dir() -> AppResult<PathBuf> {
  data_dir().map(|d| d.join("logs"))
}
