//! Runner configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via STATEHOOK_CONFIG or --config)
//! 3. Environment variables

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Runner configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Log filter used when RUST_LOG is not set.
    pub log: String,
    /// REPL history file. Defaults to `~/.statehook_history`.
    pub history_path: Option<PathBuf>,
    /// How long one-shot runs wait for timers and async actions after the
    /// last event, in milliseconds.
    pub settle_ms: u64,
    /// Print the current state's data after each step.
    pub print_data: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            log: "warn".to_string(),
            history_path: None,
            settle_ms: 50,
            print_data: false,
        }
    }
}

impl RunnerConfig {
    /// Loads configuration from `path` (or STATEHOOK_CONFIG when `path` is
    /// `None`), then applies environment variable overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match std::env::var("STATEHOOK_CONFIG") {
                Ok(path) => Self::from_file(&path)?,
                Err(_) => Self::default(),
            },
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        // An empty file is a valid, all-defaults configuration.
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(log) = var("STATEHOOK_LOG") {
            self.log = log;
        }
        if let Some(path) = var("STATEHOOK_HISTORY") {
            self.history_path = Some(PathBuf::from(path));
        }
        if let Some(ms) = var("STATEHOOK_SETTLE_MS") {
            match ms.parse() {
                Ok(ms) => self.settle_ms = ms,
                Err(_) => tracing::warn!("Ignoring invalid STATEHOOK_SETTLE_MS '{}'", ms),
            }
        }
        if let Some(flag) = var("STATEHOOK_PRINT_DATA") {
            self.print_data = flag == "1" || flag.to_lowercase() == "true";
        }
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn history_file(&self) -> PathBuf {
        self.history_path.clone().unwrap_or_else(|| {
            home::home_dir()
                .map(|home| home.join(".statehook_history"))
                .unwrap_or_else(|| PathBuf::from(".statehook_history"))
        })
    }
}

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {}", .0.display(), .1)]
    IoError(PathBuf, std::io::Error),

    #[error("failed to parse config file '{}': {}", .0.display(), .1)]
    ParseError(PathBuf, String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = RunnerConfig::default();
        assert_eq!(config.log, "warn");
        assert_eq!(config.settle(), Duration::from_millis(50));
        assert!(!config.print_data);
        assert!(config
            .history_file()
            .to_string_lossy()
            .ends_with(".statehook_history"));
    }

    #[test]
    fn test_from_file_partial() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("statehook.yaml");
        std::fs::write(&path, "settle_ms: 250\nprint_data: true\n").unwrap();

        let config = RunnerConfig::from_file(&path).unwrap();
        assert_eq!(config.settle_ms, 250);
        assert!(config.print_data);
        assert_eq!(config.log, "warn");
    }

    #[test]
    fn test_empty_file_is_default() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.yaml");
        std::fs::write(&path, "\n").unwrap();

        assert_eq!(RunnerConfig::from_file(&path).unwrap(), RunnerConfig::default());
    }

    #[test]
    fn test_file_errors() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing.yaml");
        assert!(matches!(
            RunnerConfig::from_file(&missing),
            Err(ConfigError::IoError(p, _)) if p == missing
        ));

        let bad = dir.path().join("bad.yaml");
        std::fs::write(&bad, "settle_ms: [not, a, number]\n").unwrap();
        let err = RunnerConfig::from_file(&bad).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_, _)));
        assert!(err.to_string().contains("bad.yaml"));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("saved.yaml");
        let config = RunnerConfig {
            log: "statehook_core=debug".to_string(),
            history_path: Some(dir.path().join("history")),
            settle_ms: 10,
            print_data: true,
        };

        config.save(&path).unwrap();
        assert_eq!(RunnerConfig::load(Some(&path)).unwrap().history_path, config.history_path);
        assert_eq!(RunnerConfig::from_file(&path).unwrap(), config);
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("STATEHOOK_LOG", "debug"),
            ("STATEHOOK_HISTORY", "/tmp/h"),
            ("STATEHOOK_PRINT_DATA", "TRUE"),
        ]
        .into_iter()
        .collect();

        let mut config = RunnerConfig::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));
        assert_eq!(config.log, "debug");
        assert_eq!(config.history_file(), PathBuf::from("/tmp/h"));
        assert!(config.print_data);
        assert_eq!(config.settle_ms, 50);
    }

    #[test]
    fn test_invalid_settle_override_is_ignored() {
        let mut config = RunnerConfig::default();
        config.apply_overrides(|key| (key == "STATEHOOK_SETTLE_MS").then(|| "soon".to_string()));
        assert_eq!(config.settle_ms, 50);

        config.apply_overrides(|key| (key == "STATEHOOK_SETTLE_MS").then(|| "5".to_string()));
        assert_eq!(config.settle_ms, 5);
    }
}
