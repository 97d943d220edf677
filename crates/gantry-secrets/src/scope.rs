//! Per-step secret scoping.
//!
//! A step's environment is built fresh from exactly the secrets it declares.
//! Nothing a previous step was given carries over, and the values are only
//! reachable through the [`BoundSecrets`] returned for that step.

use gantry_core::Result;
use gantry_core::ResolutionError;
use gantry_core::ports::SecretVault;
use gantry_core::secrets::{MASK, SecretValue};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::debug;

/// Binds secrets into step environments.
///
/// Holds no values of its own: every binding asks the vault again, so a
/// value lives exactly as long as the [`BoundSecrets`] it was handed out in.
pub struct SecretScopeManager {
    vault: Arc<dyn SecretVault>,
}

impl SecretScopeManager {
    pub fn new(vault: Arc<dyn SecretVault>) -> Self {
        Self { vault }
    }

    /// Fetch the secrets `step` declares. Each must be in `granted`.
    pub async fn bind(
        &self,
        step: &str,
        declared: &[String],
        granted: &BTreeSet<String>,
    ) -> Result<BoundSecrets> {
        let mut values = BTreeMap::new();

        for name in declared {
            if !granted.contains(name) {
                return Err(ResolutionError::SecretOutOfScope {
                    step: step.to_string(),
                    secret: name.clone(),
                }
                .into());
            }
            let value = self.vault.get(name).await?;
            values.insert(name.clone(), value);
        }

        debug!(step = %step, secrets = ?values.keys().collect::<Vec<_>>(), "Bound step secrets");
        Ok(BoundSecrets { values })
    }
}

/// The secrets bound to one step.
#[derive(Debug, Default)]
pub struct BoundSecrets {
    values: BTreeMap<String, SecretValue>,
}

impl BoundSecrets {
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Merge the secrets over `env` as name → value variables.
    pub fn apply_to(&self, env: &mut BTreeMap<String, String>) {
        for (name, value) in &self.values {
            env.insert(name.clone(), value.expose().to_string());
        }
    }

    pub fn redactor(&self) -> Redactor {
        Redactor::new(self.values.values().map(|v| v.expose().to_string()))
    }
}

/// Replaces secret values in output with `***`.
#[derive(Debug, Clone, Default)]
pub struct Redactor {
    // Longest first so a value that contains another is masked whole.
    values: Vec<String>,
}

impl Redactor {
    pub fn new(values: impl IntoIterator<Item = String>) -> Self {
        let mut values: Vec<String> = values.into_iter().filter(|v| !v.is_empty()).collect();
        values.sort_by(|a, b| b.len().cmp(&a.len()));
        values.dedup();
        Self { values }
    }

    pub fn redact(&self, input: &str) -> String {
        let mut output = input.to_string();
        for value in &self.values {
            if output.contains(value.as_str()) {
                output = output.replace(value.as_str(), MASK);
            }
        }
        output
    }
}
