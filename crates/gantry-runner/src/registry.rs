//! Registry client that records publishes without contacting a registry.

use async_trait::async_trait;
use gantry_core::Result;
use gantry_core::ports::RegistryClient;
use std::sync::Mutex;
use tracing::info;

pub struct DryRunRegistry {
    identity: String,
    published: Mutex<Vec<String>>,
}

impl DryRunRegistry {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            published: Mutex::new(Vec::new()),
        }
    }

    /// Packages published so far, in order.
    pub fn published(&self) -> Vec<String> {
        self.published.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

impl Default for DryRunRegistry {
    fn default() -> Self {
        Self::new("dry-run")
    }
}

#[async_trait]
impl RegistryClient for DryRunRegistry {
    async fn whoami(&self) -> Result<String> {
        Ok(self.identity.clone())
    }

    async fn publish(&self, package: &str, access: &str) -> Result<()> {
        info!(package = %package, access = %access, "Dry run: package not uploaded");
        if let Ok(mut published) = self.published.lock() {
            published.push(package.to_string());
        }
        Ok(())
    }
}
