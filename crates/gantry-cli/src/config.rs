//! CLI configuration management.

use gantry_trace::LogFormat;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// CLI configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CliConfig {
    /// Cache directory. Defaults to the platform cache dir.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    /// Directory of published reusable workflows and composite actions.
    #[serde(default)]
    pub catalog_dir: Option<PathBuf>,
    /// JSON file of secret values.
    #[serde(default)]
    pub secrets_file: Option<PathBuf>,
    /// Prefix for secrets read from the environment.
    #[serde(default)]
    pub env_prefix: Option<String>,
    #[serde(default)]
    pub log_format: LogFormat,
}

impl CliConfig {
    /// Load configuration from file.
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let path = Self::config_path()?;
        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            Ok(serde_yaml::from_str(&content)?)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file.
    pub fn save(&self) -> Result<(), Box<dyn std::error::Error>> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_yaml::to_string(self)?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the configuration file path.
    pub fn config_path() -> Result<PathBuf, Box<dyn std::error::Error>> {
        Ok(project_dirs()?.config_dir().join("config.yaml"))
    }

    /// Configured cache directory, or the platform default.
    pub fn resolved_cache_dir(&self) -> Result<PathBuf, Box<dyn std::error::Error>> {
        match &self.cache_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(project_dirs()?.cache_dir().to_path_buf()),
        }
    }

    /// Set a configuration value. An empty value unsets optional keys.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), String> {
        let path = || (!value.is_empty()).then(|| PathBuf::from(value));
        match key {
            "cache_dir" => self.cache_dir = path(),
            "catalog_dir" => self.catalog_dir = path(),
            "secrets_file" => self.secrets_file = path(),
            "env_prefix" => self.env_prefix = (!value.is_empty()).then(|| value.to_string()),
            "log_format" => self.log_format = value.parse()?,
            _ => return Err(format!("Unknown config key: {}", key)),
        }
        Ok(())
    }
}

fn project_dirs() -> Result<directories::ProjectDirs, Box<dyn std::error::Error>> {
    Ok(directories::ProjectDirs::from("dev", "gantry", "gantry")
        .ok_or("Could not determine config directory")?)
}
