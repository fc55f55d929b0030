//! CLI configuration management.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// CLI configuration, overridable per invocation by flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CliConfig {
    /// Default concurrency limit.
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
    /// Seconds a download step waits for its artifact.
    #[serde(default = "default_artifact_timeout_secs")]
    pub artifact_timeout_secs: u64,
    /// Directory external-action executables are resolved in.
    pub actions_dir: Option<PathBuf>,
}

fn default_max_parallel() -> usize {
    4
}

fn default_artifact_timeout_secs() -> u64 {
    60
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
            artifact_timeout_secs: default_artifact_timeout_secs(),
            actions_dir: None,
        }
    }
}

impl CliConfig {
    /// Load configuration from file, falling back to defaults.
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let path = Self::config_path()?;
        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            Ok(serde_yaml::from_str(&content)?)
        } else {
            Ok(Self::default())
        }
    }

    /// Get the configuration file path.
    pub fn config_path() -> Result<PathBuf, Box<dyn std::error::Error>> {
        let dirs = directories::ProjectDirs::from("dev", "gantry", "gantry")
            .ok_or("Could not determine config directory")?;
        Ok(dirs.config_dir().join("config.yaml"))
    }

    /// Directory actions resolve in: configured, or `./actions`.
    pub fn actions_dir(&self) -> PathBuf {
        self.actions_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("actions"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CliConfig::default();
        assert_eq!(config.max_parallel, 4);
        assert_eq!(config.artifact_timeout_secs, 60);
        assert_eq!(config.actions_dir(), PathBuf::from("actions"));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: CliConfig = serde_yaml::from_str("max_parallel: 8\n").unwrap();
        assert_eq!(config.max_parallel, 8);
        assert_eq!(config.artifact_timeout_secs, 60);
    }
}
