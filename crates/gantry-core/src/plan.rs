//! Concrete, fully-resolved steps ready for execution.
//!
//! Planning turns [`StepDefinition`](crate::workflow::StepDefinition)s into
//! [`ConcreteStep`]s: composites are inlined, interpolation has been applied,
//! and every command carries an explicit shell.

use crate::workflow::CacheSpec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepKind {
    Run { shell: String, command: String },
    /// The built-in publish action.
    Publish { package: String, access: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcreteStep {
    pub name: String,
    pub kind: StepKind,
    pub env: BTreeMap<String, String>,
    /// Secret names bound into this step's environment, and nothing else.
    pub secrets: Vec<String>,
    pub working_directory: Option<String>,
    pub continue_on_error: bool,
    pub cache: Option<CacheSpec>,
}

impl ConcreteStep {
    pub fn run(name: impl Into<String>, shell: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: StepKind::Run {
                shell: shell.into(),
                command: command.into(),
            },
            env: BTreeMap::new(),
            secrets: Vec::new(),
            working_directory: None,
            continue_on_error: false,
            cache: None,
        }
    }

    pub fn with_secrets(mut self, secrets: &[&str]) -> Self {
        self.secrets = secrets.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_cache(mut self, cache: CacheSpec) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn continuing_on_error(mut self) -> Self {
        self.continue_on_error = true;
        self
    }
}
