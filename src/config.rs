use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

/// Bucket name for the current shell version.
pub const CACHE_NAME: &str = "ollama-dashboard-v0.9";

/// Paths making up the offline shell.
pub const SHELL_ASSETS: &[&str] = &[
  "/",
  "/static/icon-192.png",
  "/static/icon-512.png",
  "/static/apple-touch-icon.png",
];

/// Path prefixes that always go straight to the network.
pub const BYPASS_PREFIXES: &[&str] = &["/api/", "/proxy/"];

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Origin the dashboard is served from
  pub upstream: String,
  /// Address the local front listens on
  pub listen: String,
  /// SQLite file for cache buckets (defaults to the data directory)
  pub cache_path: Option<PathBuf>,
  pub worker: WorkerConfig,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      upstream: "http://localhost:5000".to_string(),
      listen: "127.0.0.1:8089".to_string(),
      cache_path: None,
      worker: WorkerConfig::default(),
    }
  }
}

/// Version-tagged worker configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
  /// Version string naming the cache bucket
  pub cache_name: String,
  pub shell_assets: Vec<String>,
  pub bypass_prefixes: Vec<String>,
}

impl Default for WorkerConfig {
  fn default() -> Self {
    Self {
      cache_name: CACHE_NAME.to_string(),
      shell_assets: SHELL_ASSETS.iter().map(|s| s.to_string()).collect(),
      bypass_prefixes: BYPASS_PREFIXES.iter().map(|s| s.to_string()).collect(),
    }
  }
}

impl WorkerConfig {
  /// Default shell and prefixes under a different version name.
  #[cfg(test)]
  pub fn versioned(cache_name: &str) -> Self {
    Self {
      cache_name: cache_name.to_string(),
      ..Self::default()
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./shellcache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/shellcache/config.yaml
  ///
  /// Without a file the built-in defaults are used.
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
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("shellcache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("shellcache").join("config.yaml");
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

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;
    config.upstream_url()?;
    Ok(config)
  }

  /// The upstream origin as a URL.
  pub fn upstream_url(&self) -> Result<Url> {
    Url::parse(&self.upstream).map_err(|e| eyre!("Invalid upstream URL '{}': {}", self.upstream, e))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults_match_shell_constants() {
    let config = Config::default();
    assert_eq!(config.worker.cache_name, "ollama-dashboard-v0.9");
    assert_eq!(config.worker.shell_assets.len(), 4);
    assert_eq!(config.worker.shell_assets[0], "/");
    assert_eq!(config.worker.bypass_prefixes, vec!["/api/", "/proxy/"]);
  }

  #[test]
  fn test_partial_file_keeps_defaults() {
    let config = Config::parse("upstream: http://dashboard.lan:5000\n").unwrap();
    assert_eq!(config.upstream, "http://dashboard.lan:5000");
    assert_eq!(config.listen, "127.0.0.1:8089");
    assert_eq!(config.worker, WorkerConfig::default());
  }

  #[test]
  fn test_worker_section_overrides_version() {
    let yaml = "worker:\n  cache_name: ollama-dashboard-v1.0\n";
    let config = Config::parse(yaml).unwrap();
    assert_eq!(config.worker.cache_name, "ollama-dashboard-v1.0");
    assert_eq!(config.worker.shell_assets, WorkerConfig::default().shell_assets);
  }

  #[test]
  fn test_invalid_upstream_rejected() {
    assert!(Config::parse("upstream: not a url\n").is_err());
  }

  #[test]
  fn test_missing_explicit_path_is_error() {
    let result = Config::load(Some(Path::new("/nonexistent/shellcache.yaml")));
    assert!(result.is_err());
  }

  #[test]
  fn test_versioned() {
    let worker = WorkerConfig::versioned("v2");
    assert_eq!(worker.cache_name, "v2");
    assert_eq!(worker.bypass_prefixes, WorkerConfig::default().bypass_prefixes);
  }
}
