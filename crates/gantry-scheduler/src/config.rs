//! Engine configuration.

use crate::composite::DEFAULT_COMPOSITE_DEPTH;
use crate::plan::PlannerConfig;
use gantry_cache::CompressionType;
use gantry_core::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// Engine-wide settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum concurrently running step-owning jobs.
    pub parallelism: usize,
    /// Maximum depth of reusable-workflow invocation chains.
    pub max_nesting_depth: usize,
    /// Maximum depth of composite actions referencing composite actions.
    pub max_composite_depth: usize,
    /// Shell for steps whose definition names none.
    pub default_shell: String,
    /// Per-step timeout in seconds. Zero disables it.
    pub step_timeout_secs: u64,
    pub cache_compression: CompressionType,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            parallelism: 4,
            max_nesting_depth: 4,
            max_composite_depth: DEFAULT_COMPOSITE_DEPTH,
            default_shell: "bash".to_string(),
            step_timeout_secs: 3600,
            cache_compression: CompressionType::Zstd,
        }
    }
}

impl EngineConfig {
    pub fn from_yaml_str(source: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(source)?)
    }

    /// Load from a YAML file and apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config = Self::from_yaml_str(&contents)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply `GANTRY_PARALLELISM` and `GANTRY_DEFAULT_SHELL`.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(value) = lookup("GANTRY_PARALLELISM") {
            match value.parse::<usize>() {
                Ok(n) if n > 0 => self.parallelism = n,
                _ => warn!(value = %value, "Ignoring invalid GANTRY_PARALLELISM"),
            }
        }
        if let Some(shell) = lookup("GANTRY_DEFAULT_SHELL").filter(|s| !s.is_empty()) {
            self.default_shell = shell;
        }
    }

    pub fn planner_config(&self) -> PlannerConfig {
        PlannerConfig {
            max_nesting_depth: self.max_nesting_depth,
            max_composite_depth: self.max_composite_depth,
            default_shell: self.default_shell.clone(),
        }
    }

    pub fn step_timeout(&self) -> Option<Duration> {
        (self.step_timeout_secs > 0).then(|| Duration::from_secs(self.step_timeout_secs))
    }
}
