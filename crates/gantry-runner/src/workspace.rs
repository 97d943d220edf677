//! Host filesystem workspace.

use async_trait::async_trait;
use gantry_cache::archiver::{create_archive, extract_archive};
use gantry_core::ports::Workspace;
use gantry_core::{CacheError, Result};
use std::path::{Component, Path, PathBuf};

/// A job workspace rooted at a host directory.
pub struct FsWorkspace {
    root: PathBuf,
}

impl FsWorkspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        let escapes = relative
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)));
        if escapes {
            return Err(CacheError::Workspace(format!("path `{path}` leaves the workspace")).into());
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl Workspace for FsWorkspace {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let full = self.resolve(path)?;
        tokio::fs::read(&full).await.map_err(|e| {
            CacheError::Workspace(format!("Failed to read {}: {e}", full.display())).into()
        })
    }

    async fn snapshot(&self, paths: &[String]) -> Result<Vec<u8>> {
        for path in paths {
            self.resolve(path)?;
        }
        let root = self.root.clone();
        let paths = paths.to_vec();
        tokio::task::spawn_blocking(move || create_archive(&paths, &root))
            .await
            .map_err(|e| gantry_core::Error::Internal(format!("Archive task failed: {e}")))?
    }

    async fn restore(&self, archive: &[u8]) -> Result<()> {
        let root = self.root.clone();
        let archive = archive.to_vec();
        tokio::task::spawn_blocking(move || extract_archive(&archive, &root))
            .await
            .map_err(|e| gantry_core::Error::Internal(format!("Extract task failed: {e}")))?
    }
}
