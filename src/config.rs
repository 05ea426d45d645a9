//! Configuration Management
//!
//! Persistent settings for the `rescache` binary: where the API lives, the
//! orchestrator timings and the resource types to register.

use crate::registry::Settings;
use crate::resource::ResourceConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

fn default_retry_increment_ms() -> u64 {
    100
}

fn default_terminal_timeout_ms() -> u64 {
    10_000
}

fn default_event_capacity() -> usize {
    1024
}

/// User configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Root URL of the JSON API
    #[serde(default)]
    pub base_url: Option<String>,
    /// Bearer token sent with every request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default = "default_retry_increment_ms")]
    pub retry_increment_ms: u64,
    #[serde(default = "default_terminal_timeout_ms")]
    pub terminal_timeout_ms: u64,
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    /// Resource types keyed by type name
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: None,
            token: None,
            retry_increment_ms: default_retry_increment_ms(),
            terminal_timeout_ms: default_terminal_timeout_ms(),
            event_capacity: default_event_capacity(),
            resources: BTreeMap::new(),
        }
    }
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("yaml") | Some("yml")
    )
}

impl Config {
    /// Get the config file path
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("rescache").join("config.json"))
    }

    /// Load configuration from the default location, falling back to defaults
    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            return Self::default();
        };

        if !path.exists() {
            return Self::default();
        }

        match Self::from_path(&path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Ignoring unreadable config {:?}: {:#}", path, e);
                Self::default()
            }
        }
    }

    /// Load configuration from a JSON or YAML file
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;

        let config = if is_yaml(path) {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Invalid YAML in {:?}", path))?
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Invalid JSON in {:?}", path))?
        };
        Ok(config)
    }

    /// Save configuration as JSON or YAML, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = if is_yaml(path) {
            serde_yaml::to_string(self)?
        } else {
            serde_json::to_string_pretty(self)?
        };
        std::fs::write(path, content)?;

        Ok(())
    }

    /// Registry timings
    pub fn settings(&self) -> Settings {
        Settings {
            retry_increment: Duration::from_millis(self.retry_increment_ms),
            terminal_timeout: Duration::from_millis(self.terminal_timeout_ms),
            event_capacity: self.event_capacity.max(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("rescache-{}", uuid::Uuid::new_v4()))
            .join(name)
    }

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config: Config = serde_json::from_str(r#"{"base_url": "http://localhost"}"#).unwrap();
        assert_eq!(config.base_url.as_deref(), Some("http://localhost"));
        assert_eq!(config.retry_increment_ms, 100);
        assert_eq!(config.terminal_timeout_ms, 10_000);
        assert!(config.resources.is_empty());

        let settings = config.settings();
        assert_eq!(settings.retry_increment, Duration::from_millis(100));
        assert_eq!(settings.terminal_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_yaml_resources() {
        let yaml = r#"
base_url: https://api.example.com
resources:
  posts:
    invalidates: [comments]
    actions:
      publish:
        kind: individual
        invalidation: false
  comments:
    create: false
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        let posts = &config.resources["posts"];
        assert_eq!(posts.invalidates, vec!["comments".to_string()]);
        let publish = posts.action("publish").unwrap();
        assert!(!publish.invalidation.applies(&serde_json::Value::Null));
        assert!(posts.fetch_collection);
        assert!(!config.resources["comments"].create);
    }

    #[test]
    fn test_save_and_reload() {
        for name in ["config.json", "config.yaml"] {
            let path = temp_path(name);
            let mut config = Config::default();
            config.base_url = Some("http://localhost:8080".to_string());
            config.resources.insert("posts".to_string(), ResourceConfig::read_only());
            config.save_to(&path).unwrap();

            let loaded = Config::from_path(&path).unwrap();
            assert_eq!(loaded.base_url, config.base_url);
            assert!(!loaded.resources["posts"].create);
            let _ = std::fs::remove_dir_all(path.parent().unwrap());
        }
    }

    #[test]
    fn test_default_path_is_under_config_dir() {
        if let Some(path) = Config::config_path() {
            assert!(path.ends_with("rescache/config.json"));
        }
    }

    #[test]
    fn test_written_config_loads_into_registry_settings() {
        let path = temp_path("nested/config.yaml");
        let mut config = Config::default();
        config.retry_increment_ms = 5;
        config.save_to(&path).unwrap();

        let settings = Config::from_path(&path).unwrap().settings();
        assert_eq!(settings.retry_increment, Duration::from_millis(5));
        let _ = std::fs::remove_dir_all(path.parent().unwrap().parent().unwrap());
    }

    #[test]
    fn test_from_path_reports_bad_files() {
        let path = temp_path("config.json");
        assert!(Config::from_path(&path).is_err());

        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{not json").unwrap();
        let err = Config::from_path(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("Invalid JSON"));
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }
}
