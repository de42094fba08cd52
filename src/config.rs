//! Configuration module for callmap
//!
//! Loads user configuration from ~/.callmap/config.toml

use crate::annotate::LabelWidths;
use crate::poll::RetryPolicy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Review backend base URL
    pub backend_url: String,
    pub github_api_url: String,
    /// Token for private repositories; `GITHUB_TOKEN` takes precedence
    pub github_token: Option<String>,
    /// Delay between readiness checks (default 1000)
    pub poll_interval_ms: u64,
    pub max_poll_attempts: u32,
    pub request_timeout_secs: u64,
    pub caller_label_width: usize,
    pub callee_label_width: usize,
    /// Number of context lines around changes in local diffs (default 3)
    pub context_lines: u32,
    /// Lines shown above the highlighted range in detail views
    pub popup_slack: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_url: "http://localhost:5000".to_string(),
            github_api_url: "https://api.github.com".to_string(),
            github_token: None,
            poll_interval_ms: 1000,
            max_poll_attempts: 600,
            request_timeout_secs: 30,
            caller_label_width: 27,
            callee_label_width: 29,
            context_lines: 3,
            popup_slack: 3,
        }
    }
}

impl Config {
    /// Load configuration from default path (~/.callmap/config.toml)
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let config: Config = toml::from_str(&contents)
                .with_context(|| format!("Invalid config file: {}", path.display()))?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Get the default config file path
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".callmap")
            .join("config.toml")
    }

    /// Merge CLI and environment overrides into config
    pub fn with_overrides(mut self, backend_url: Option<String>, github_token: Option<String>) -> Self {
        if let Some(url) = backend_url {
            self.backend_url = url;
        }
        if let Some(token) = github_token.filter(|t| !t.is_empty()) {
            self.github_token = Some(token);
        }
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            interval: Duration::from_millis(self.poll_interval_ms),
            max_attempts: self.max_poll_attempts.max(1),
        }
    }

    pub fn label_widths(&self) -> LabelWidths {
        LabelWidths {
            caller: self.caller_label_width,
            callee: self.callee_label_width,
        }
    }

    /// Create a default config file
    pub fn create_default() -> Result<PathBuf> {
        let config_path = Self::default_path();
        Self::create_default_at(&config_path)?;
        Ok(config_path)
    }

    pub fn create_default_at(config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
        }

        let contents = toml::to_string_pretty(&Config::default())
            .context("Failed to serialize config")?;

        std::fs::write(config_path, contents)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.retry_policy(), RetryPolicy::default());
        assert_eq!(config.label_widths(), LabelWidths::default());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "backend_url = \"http://review.internal:8080\"\npoll_interval_ms = 250\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.backend_url, "http://review.internal:8080");
        assert_eq!(config.retry_policy().interval, Duration::from_millis(250));
        assert_eq!(config.max_poll_attempts, 600);
        assert_eq!(config.popup_slack, 3);
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "poll_interval_ms = \"soon\"").unwrap();
        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn test_default_replaces_invalid_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "context_lines = [").unwrap();
        assert!(Config::load_from(&path).is_err());

        Config::create_default_at(&path).unwrap();
        assert_eq!(Config::load_from(&path).unwrap(), Config::default());
    }

    #[test]
    fn test_overrides() {
        let config = Config::default().with_overrides(Some("http://other".to_string()), Some(String::new()));
        assert_eq!(config.backend_url, "http://other");
        assert_eq!(config.github_token, None);

        let config = config.with_overrides(None, Some("tok".to_string()));
        assert_eq!(config.backend_url, "http://other");
        assert_eq!(config.github_token.as_deref(), Some("tok"));
    }

    #[test]
    fn test_created_default_loads_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        Config::create_default_at(&path).unwrap();
        assert_eq!(Config::load_from(&path).unwrap(), Config::default());
    }
}
