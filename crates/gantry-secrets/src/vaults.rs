//! Secret vault implementations.

use async_trait::async_trait;
use gantry_core::Result;
use gantry_core::ports::SecretVault;
use gantry_core::secrets::SecretValue;
use std::collections::HashMap;
use std::sync::Arc;

/// Environment variable secret vault.
pub struct EnvVault {
    prefix: Option<String>,
}

impl EnvVault {
    pub fn new(prefix: Option<String>) -> Self {
        Self { prefix }
    }

    fn resolve_name(&self, name: &str) -> String {
        match &self.prefix {
            Some(p) => format!("{p}_{name}"),
            None => name.to_string(),
        }
    }
}

impl Default for EnvVault {
    fn default() -> Self {
        Self::new(None)
    }
}

#[async_trait]
impl SecretVault for EnvVault {
    async fn get(&self, name: &str) -> Result<SecretValue> {
        std::env::var(self.resolve_name(name))
            .map(SecretValue::new)
            .map_err(|_| gantry_core::Error::SecretNotFound(name.to_string()))
    }
}

/// File-backed secret vault holding a JSON object of name → value.
#[derive(Default)]
pub struct FileVault {
    secrets: HashMap<String, SecretValue>,
}

impl FileVault {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(secrets: HashMap<String, String>) -> Self {
        Self {
            secrets: secrets
                .into_iter()
                .map(|(k, v)| (k, SecretValue::new(v)))
                .collect(),
        }
    }

    pub async fn load_from_file(path: &std::path::Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            gantry_core::Error::Internal(format!("Failed to read secrets file: {e}"))
        })?;

        // The parse error would quote the offending input, so it is not forwarded.
        let secrets: HashMap<String, String> = serde_json::from_str(&content).map_err(|_| {
            gantry_core::Error::Internal(format!(
                "Secrets file {} is not a JSON object of strings",
                path.display()
            ))
        })?;

        Ok(Self::from_map(secrets))
    }

    pub fn len(&self) -> usize {
        self.secrets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }
}

#[async_trait]
impl SecretVault for FileVault {
    async fn get(&self, name: &str) -> Result<SecretValue> {
        self.secrets
            .get(name)
            .cloned()
            .ok_or_else(|| gantry_core::Error::SecretNotFound(name.to_string()))
    }
}

/// Tries each vault in order and returns the first value found.
pub struct ChainVault {
    vaults: Vec<Arc<dyn SecretVault>>,
}

impl ChainVault {
    pub fn new(vaults: Vec<Arc<dyn SecretVault>>) -> Self {
        Self { vaults }
    }
}

#[async_trait]
impl SecretVault for ChainVault {
    async fn get(&self, name: &str) -> Result<SecretValue> {
        for vault in &self.vaults {
            match vault.get(name).await {
                Ok(value) => return Ok(value),
                Err(gantry_core::Error::SecretNotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(gantry_core::Error::SecretNotFound(name.to_string()))
    }
}
