//! Port traits (hexagonal architecture).
//!
//! These traits define the interfaces between the engine and the external
//! collaborators it drives: the process runtime, the secret vault, the blob
//! store backing the cache, the package registry, the job workspace, and the
//! event bus.

use crate::events::Event;
use crate::secrets::SecretValue;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStream {
    Stdout,
    Stderr,
}

/// A line of output from a running step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputLine {
    pub stream: LogStream,
    pub content: String,
}

impl OutputLine {
    pub fn stdout(content: impl Into<String>) -> Self {
        Self {
            stream: LogStream::Stdout,
            content: content.into(),
        }
    }

    pub fn stderr(content: impl Into<String>) -> Self {
        Self {
            stream: LogStream::Stderr,
            content: content.into(),
        }
    }
}

/// A single command invocation. The environment is exactly `env`; nothing is
/// inherited from the engine's own process.
#[derive(Clone)]
pub struct ExecRequest {
    pub shell: String,
    pub command: String,
    pub env: BTreeMap<String, String>,
    pub workdir: Option<PathBuf>,
    pub timeout: Option<Duration>,
}

impl fmt::Debug for ExecRequest {
    // Env values may hold bound secrets; only the names are printed.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecRequest")
            .field("shell", &self.shell)
            .field("command", &self.command)
            .field("env", &self.env.keys().collect::<Vec<_>>())
            .field("workdir", &self.workdir)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub output: Vec<OutputLine>,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs step commands.
#[async_trait]
pub trait ProcessRuntime: Send + Sync {
    async fn execute(&self, request: ExecRequest) -> Result<ExecOutput>;
}

/// Secret vault for retrieving secret values by name.
#[async_trait]
pub trait SecretVault: Send + Sync {
    /// Get a secret value. Missing secrets are `Error::SecretNotFound`.
    async fn get(&self, name: &str) -> Result<SecretValue>;
}

/// Content-addressed blob storage backing the cache.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()>;

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// List stored keys, optionally filtered by prefix.
    async fn list(&self, prefix: Option<&str>) -> Result<Vec<BlobInfo>>;

    async fn delete(&self, key: &str) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobInfo {
    pub key: String,
    pub size_bytes: u64,
}

/// Package registry client used by the publish step.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Identity the client is authenticated as.
    async fn whoami(&self) -> Result<String>;

    async fn publish(&self, package: &str, access: &str) -> Result<()>;
}

/// The files a job works on.
#[async_trait]
pub trait Workspace: Send + Sync {
    /// Read a file relative to the workspace root.
    async fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// Capture the given paths into an opaque archive.
    async fn snapshot(&self, paths: &[String]) -> Result<Vec<u8>>;

    /// Unpack an archive produced by [`Workspace::snapshot`].
    async fn restore(&self, archive: &[u8]) -> Result<()>;
}

/// Event bus for run progress.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, event: Event) -> Result<()>;
}

/// Event bus that drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEventBus;

#[async_trait]
impl EventBus for NullEventBus {
    async fn publish(&self, _event: Event) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exec_request_debug_hides_env_values() {
        let request = ExecRequest {
            shell: "bash".to_string(),
            command: "npm publish".to_string(),
            env: BTreeMap::from([("NPM_TOKEN".to_string(), "s3cr3t".to_string())]),
            workdir: None,
            timeout: None,
        };
        let rendered = format!("{request:?}");
        assert!(rendered.contains("NPM_TOKEN"));
        assert!(!rendered.contains("s3cr3t"));
    }
}
