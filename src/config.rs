use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

const DEFAULT_ORIGIN: &str = "http://localhost:3000";
const DEFAULT_VERSION: &str = "fireinspect-v4";

const CORE_ASSETS: &[&str] = &[
  "/",
  "/landing",
  "/dashboard",
  "/manifest.json",
  "/icons/icon-192x192.png",
  "/icons/icon-512x512.png",
  "/globals.css",
  "/index.js",
  "/_next/static/chunks/main.js",
  "/_next/static/chunks/webpack.js",
  "/_next/static/chunks/app-client.js",
  "/_next/static/css/app.css",
  "/historico",
  "/configuracoes",
  "/inspecao/extintores",
  "/inspecao/mangueiras",
  "/inspecao/acidentes",
  "/inspecao/alarmes",
];

const SECONDARY_ASSETS: &[&str] = &[
  "/historico",
  "/configuracoes",
  "/inspecao/extintores",
  "/inspecao/mangueiras",
  "/inspecao/acidentes",
  "/inspecao/alarmes",
  "/error",
  "/not-found",
];

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  /// Display name recorded as the author of new inspections
  pub author: Option<String>,
  /// Where the databases and logs live (defaults to the platform data dir)
  pub data_dir: Option<PathBuf>,
  /// Application origin the resource proxy serves
  pub origin: Option<String>,
  /// Start with connectivity absent
  #[serde(default)]
  pub offline: bool,
  #[serde(default)]
  pub remote: RemoteConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub worker: WorkerSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RemoteConfig {
  /// Sync endpoint; without one every delivery fails and entries stay queued
  pub endpoint: Option<String>,
  /// Per-request timeout
  pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// In-memory record cache expiry
  #[serde(default = "default_stale_minutes")]
  pub stale_minutes: i64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      stale_minutes: default_stale_minutes(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerSettings {
  #[serde(default = "default_version")]
  pub version: String,
  #[serde(default = "default_retention_days")]
  pub retention_days: i64,
  #[serde(default = "default_janitor_interval")]
  pub janitor_interval_minutes: u64,
  #[serde(default = "default_sync_interval")]
  pub sync_interval_minutes: u64,
  #[serde(default = "default_core_assets")]
  pub core_assets: Vec<String>,
  #[serde(default = "default_secondary_assets")]
  pub secondary_assets: Vec<String>,
}

impl Default for WorkerSettings {
  fn default() -> Self {
    Self {
      version: default_version(),
      retention_days: default_retention_days(),
      janitor_interval_minutes: default_janitor_interval(),
      sync_interval_minutes: default_sync_interval(),
      core_assets: default_core_assets(),
      secondary_assets: default_secondary_assets(),
    }
  }
}

fn default_stale_minutes() -> i64 {
  5
}

fn default_version() -> String {
  DEFAULT_VERSION.to_string()
}

fn default_retention_days() -> i64 {
  7
}

fn default_janitor_interval() -> u64 {
  24 * 60
}

fn default_sync_interval() -> u64 {
  15
}

fn default_core_assets() -> Vec<String> {
  CORE_ASSETS.iter().map(|s| s.to_string()).collect()
}

fn default_secondary_assets() -> Vec<String> {
  SECONDARY_ASSETS.iter().map(|s| s.to_string()).collect()
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./fireinspect.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/fireinspect/config.yaml
  ///
  /// Without any file the built-in defaults apply.
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
      None => {
        tracing::debug!("no configuration file found, using defaults");
        Ok(Self::default())
      }
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("fireinspect.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("fireinspect").join("config.yaml");
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

  fn parse(contents: &str) -> Result<Self> {
    // An empty file is a valid, all-default config
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }

  /// Author for new inspections.
  ///
  /// Checks FIREINSPECT_USER first, then the config file, then the login name.
  pub fn author(&self) -> String {
    std::env::var("FIREINSPECT_USER")
      .ok()
      .filter(|name| !name.trim().is_empty())
      .or_else(|| self.author.clone())
      .or_else(|| std::env::var("USER").ok())
      .unwrap_or_else(|| "inspetor".to_string())
  }

  pub fn data_dir(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.data_dir {
      return Ok(dir.clone());
    }
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;
    Ok(data_dir.join("fireinspect"))
  }

  pub fn origin(&self) -> Result<Url> {
    let origin = self.origin.as_deref().unwrap_or(DEFAULT_ORIGIN);
    Url::parse(origin).map_err(|e| eyre!("Invalid origin '{}': {}", origin, e))
  }

  pub fn remote_endpoint(&self) -> Result<Option<Url>> {
    self
      .remote
      .endpoint
      .as_deref()
      .map(|endpoint| {
        Url::parse(endpoint).map_err(|e| eyre!("Invalid remote endpoint '{}': {}", endpoint, e))
      })
      .transpose()
  }
}
