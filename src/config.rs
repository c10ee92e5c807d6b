use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  /// The user reports are pulled for.
  pub user_id: i64,
  /// Current financial year, e.g. "2024-2025". Selects the partition for
  /// partitioned collections; override per run with --year.
  pub year: String,
  /// What a failed fetch does: serve bundled data or surface the error.
  #[serde(default)]
  pub on_fetch_failure: FallbackPolicy,
  /// Cache database path (default: data dir)
  pub database: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Base URL of the reports API
  pub url: String,
  /// Request timeout; a timeout counts as a fetch failure
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
  30
}

/// Policy applied when a fetch or validation failure interrupts a sync.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FallbackPolicy {
  /// Persist the bundled dataset and report soft success (the app default,
  /// so report screens always have something to render).
  #[default]
  Bundled,
  /// Surface the failure to the caller instead of masking it.
  Error,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./repsync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/repsync/config.yaml
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
        "No configuration file found. Create one at ~/.config/repsync/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("repsync.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("repsync").join("config.yaml");
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
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_minimal_config_applies_defaults() {
    let config: Config = serde_yaml::from_str(
      r#"
api:
  url: https://reports.example.com/api
user_id: 7
year: "2024-2025"
"#,
    )
    .unwrap();

    assert_eq!(config.api.timeout_secs, 30);
    assert_eq!(config.on_fetch_failure, FallbackPolicy::Bundled);
    assert!(config.database.is_none());
  }

  #[test]
  fn test_fallback_policy_parses_lowercase() {
    let config: Config = serde_yaml::from_str(
      r#"
api:
  url: https://reports.example.com/api
  timeout_secs: 5
user_id: 7
year: "2024-2025"
on_fetch_failure: error
"#,
    )
    .unwrap();

    assert_eq!(config.on_fetch_failure, FallbackPolicy::Error);
    assert_eq!(config.api.timeout_secs, 5);
  }
}
