//! Orchestrator configuration
//!
//! Stored as JSON at `<config dir>/agent-orchestra/config.json`. Every field
//! has a default so partial files load.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::client::{OrchestratorOptions, RetryPolicy};
use crate::connection::{ConnectionOverrides, is_secret_key};
use crate::error::{OrchestraError, Result};

/// Default maximum number of live sessions
pub const DEFAULT_MAX_SESSIONS: usize = 10;

/// Global configuration shared by every session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestraConfig {
    /// Connection overrides; empty fields fall back to the environment
    #[serde(flatten)]
    pub connection: ConnectionOverrides,
    /// Extra environment for every agent process
    pub agent_env: HashMap<String, String>,
    /// Capacity of the session manager
    pub max_sessions: usize,
    /// Periodically remove inactive sessions idle this long
    pub idle_timeout_minutes: Option<u64>,
    /// Retry behaviour for failed turns; applies to sessions created after a change
    pub retry: RetryPolicy,
    /// Marker stripped from the start of each stdout line; applies to
    /// sessions created after a change
    pub line_prefix: Option<String>,
}

impl Default for OrchestraConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionOverrides::default(),
            agent_env: HashMap::new(),
            max_sessions: DEFAULT_MAX_SESSIONS,
            idle_timeout_minutes: None,
            retry: RetryPolicy::default(),
            line_prefix: None,
        }
    }
}

impl OrchestraConfig {
    /// Default location of the config file
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("agent-orchestra").join("config.json"))
    }

    /// Load from the default location, falling back to defaults
    #[must_use]
    pub fn load() -> Self {
        let Some(path) = Self::default_path() else {
            log::debug!("No config directory on this platform; using defaults");
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        match Self::load_from(&path) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("Ignoring unreadable config {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Load from `path`
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed
    pub fn load_from(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Write to `path`, creating parent directories
    ///
    /// # Errors
    /// Returns error if the file cannot be written
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_vec_pretty(self)?)?;
        log::info!("Saved configuration to {}", path.display());
        Ok(())
    }

    /// Reject values the manager cannot work with
    ///
    /// # Errors
    /// Returns `InvalidConfig` describing the first bad value
    pub fn validate(&self) -> Result<()> {
        if self.max_sessions == 0 {
            return Err(OrchestraError::invalid_config("max_sessions must be at least 1"));
        }
        if self.retry.max_attempts == 0 {
            return Err(OrchestraError::invalid_config(
                "retry.max_attempts must be at least 1",
            ));
        }
        Ok(())
    }

    /// Set a variable for every agent process
    pub fn set_agent_env(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        log::info!("Setting agent env {key}={}", redact(&key, &value));
        self.agent_env.insert(key, value);
    }

    /// Whether switching to `other` requires rebuilding every session
    ///
    /// Only connection overrides and `agent_env` count. `retry`,
    /// `line_prefix`, `max_sessions` and `idle_timeout_minutes` never
    /// restart live sessions.
    #[must_use]
    pub fn connection_changed(&self, other: &Self) -> bool {
        self.connection != other.connection || self.agent_env != other.agent_env
    }

    /// Environment handed to the connection resolver
    #[must_use]
    pub fn resolution_env(&self) -> HashMap<String, String> {
        let mut env: HashMap<String, String> = std::env::vars().collect();
        env.extend(self.agent_env.iter().map(|(k, v)| (k.clone(), v.clone())));
        env
    }

    /// Settings for each orchestrator
    #[must_use]
    pub fn orchestrator_options(&self) -> OrchestratorOptions {
        OrchestratorOptions {
            retry: self.retry.clone(),
            line_prefix: self.line_prefix.clone(),
            env: self.agent_env.clone(),
        }
    }
}

/// Value safe to print for `key`
#[must_use]
pub fn redact<'a>(key: &str, value: &'a str) -> &'a str {
    if is_secret_key(key) { "[redacted]" } else { value }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::connection::ConnectionMode;

    #[test]
    fn partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"connection_mode": "local-binary", "cli_path": "/x/main.js"}"#)
            .unwrap();

        let config = OrchestraConfig::load_from(&path).unwrap();
        assert_eq!(config.connection.mode, Some(ConnectionMode::LocalBinary));
        assert_eq!(config.max_sessions, DEFAULT_MAX_SESSIONS);
        assert_eq!(config.retry, RetryPolicy::default());
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let mut config = OrchestraConfig {
            max_sessions: 4,
            ..OrchestraConfig::default()
        };
        config.set_agent_env("AMP_TOKEN", "secret");
        config.save_to(&path).unwrap();
        assert_eq!(OrchestraConfig::load_from(&path).unwrap(), config);
    }

    #[test]
    fn connection_change_detection() {
        let base = OrchestraConfig::default();
        let mut capacity_only = base.clone();
        capacity_only.max_sessions = 2;
        assert!(!base.connection_changed(&capacity_only));

        let mut new_url = base.clone();
        new_url.connection.server_url = Some("https://amp.example.com".into());
        assert!(base.connection_changed(&new_url));

        let mut tuning_only = base.clone();
        tuning_only.retry = RetryPolicy::no_retry();
        tuning_only.line_prefix = Some("@@".into());
        assert!(!base.connection_changed(&tuning_only));

        let mut new_env = base.clone();
        new_env.set_agent_env("AMP_EXTRA_ARGS", "--verbose");
        assert!(base.connection_changed(&new_env));
    }

    #[test]
    fn rejects_zero_capacity() {
        let config = OrchestraConfig {
            max_sessions: 0,
            ..OrchestraConfig::default()
        };
        assert!(matches!(config.validate(), Err(OrchestraError::InvalidConfig(_))));
    }

    #[test]
    fn redacts_secrets() {
        assert_eq!(redact("AMP_TOKEN", "abc"), "[redacted]");
        assert_eq!(redact("AMP_URL", "https://x"), "https://x");
    }
}
