use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::{CacheConfig, QueryOptions};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  pub backend: BackendConfig,
  pub cache: CacheSection,
  pub polling: PollingConfig,
  pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
  /// Project URL, e.g. https://abc.supabase.co (the REST path is appended)
  pub url: Option<String>,
  /// Anonymous API key sent as `apikey` and bearer token
  pub anon_key: Option<String>,
  pub request_timeout_secs: u64,
}

impl Default for BackendConfig {
  fn default() -> Self {
    Self {
      url: None,
      anon_key: None,
      request_timeout_secs: 30,
    }
  }
}

impl BackendConfig {
  pub fn request_timeout(&self) -> Duration {
    Duration::from_secs(self.request_timeout_secs)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSection {
  pub stale_time_secs: u64,
  pub gc_time_secs: u64,
  /// Keep successful results on disk between runs
  pub persist: bool,
  /// Database file (defaults to the user data directory)
  pub path: Option<PathBuf>,
  pub max_persisted_age_secs: u64,
}

impl Default for CacheSection {
  fn default() -> Self {
    Self {
      stale_time_secs: 60,
      gc_time_secs: 5 * 60,
      persist: true,
      path: None,
      max_persisted_age_secs: 24 * 60 * 60,
    }
  }
}

impl CacheSection {
  pub fn cache_config(&self) -> CacheConfig {
    CacheConfig {
      stale_time: Duration::from_secs(self.stale_time_secs),
      gc_time: Duration::from_secs(self.gc_time_secs),
      max_persisted_age: Duration::from_secs(self.max_persisted_age_secs),
    }
  }
}

/// Background refresh periods for the live views.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
  pub dashboard_secs: u64,
  pub conversations_secs: u64,
  pub messages_secs: u64,
  /// Reports are not polled, only considered stale after this long
  pub reports_stale_secs: u64,
}

impl Default for PollingConfig {
  fn default() -> Self {
    Self {
      dashboard_secs: 60,
      conversations_secs: 30,
      messages_secs: 10,
      reports_stale_secs: 5 * 60,
    }
  }
}

impl PollingConfig {
  pub fn dashboard(&self, base: QueryOptions) -> QueryOptions {
    base.refetch_interval(Duration::from_secs(self.dashboard_secs))
  }

  pub fn conversations(&self, base: QueryOptions) -> QueryOptions {
    base.refetch_interval(Duration::from_secs(self.conversations_secs))
  }

  pub fn messages(&self, base: QueryOptions) -> QueryOptions {
    base.refetch_interval(Duration::from_secs(self.messages_secs))
  }

  pub fn reports(&self, base: QueryOptions) -> QueryOptions {
    base.stale_time(Duration::from_secs(self.reports_stale_secs))
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LogConfig {
  /// Write logs to this file (rotated daily) instead of stderr
  pub file: Option<PathBuf>,
  /// Filter directives used when no log env var is set
  pub filter: Option<String>,
}

impl Config {
  /// Load configuration from file, then apply environment overrides.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./crm-sync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/crm-sync/config.yaml
  ///
  /// With no file found, defaults are used.
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
      None => Self::default(),
    };
    config.apply_env(|name| std::env::var(name).ok());
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("crm-sync.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("crm-sync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> std::result::Result<Self, serde_yaml::Error> {
    // An empty file deserializes to null
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }
    serde_yaml::from_str(contents)
  }

  /// Override backend settings from the environment.
  ///
  /// Checks CRM_BACKEND_URL first, then SUPABASE_URL as fallback; likewise
  /// CRM_BACKEND_ANON_KEY, then SUPABASE_ANON_KEY.
  fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
    let first = |names: [&str; 2]| names.into_iter().find_map(|n| var(n).filter(|v| !v.is_empty()));

    if let Some(url) = first(["CRM_BACKEND_URL", "SUPABASE_URL"]) {
      self.backend.url = Some(url);
    }
    if let Some(key) = first(["CRM_BACKEND_ANON_KEY", "SUPABASE_ANON_KEY"]) {
      self.backend.anon_key = Some(key);
    }
  }
}
