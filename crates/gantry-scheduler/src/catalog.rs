//! Immutable `(path, version)` index of reusable workflows and composite actions.
//!
//! Entries are write-once: publishing a version that already exists with
//! different content is rejected, so a pinned reference always resolves to
//! the same snapshot.

use gantry_core::loader::{self, Format};
use gantry_core::workflow::{CompositeAction, VersionedRef, WorkflowDefinition};
use gantry_core::{DefinitionError, InvocationError, ResolutionError, Result};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info};

/// A published workflow at one version.
#[derive(Debug, Clone)]
pub struct WorkflowSnapshot {
    pub reference: VersionedRef,
    pub definition: WorkflowDefinition,
    /// Canonical JSON encoding of the definition.
    pub canonical: Vec<u8>,
    /// Hex SHA-256 of `canonical`.
    pub digest: String,
}

impl WorkflowSnapshot {
    fn new(reference: VersionedRef, definition: WorkflowDefinition) -> Result<Self> {
        let canonical = serde_json::to_vec(&definition)?;
        let digest = hex::encode(Sha256::digest(&canonical));
        Ok(Self {
            reference,
            definition,
            canonical,
            digest,
        })
    }
}

#[derive(Default)]
struct Entries {
    workflows: BTreeMap<VersionedRef, Arc<WorkflowSnapshot>>,
    actions: BTreeMap<VersionedRef, Arc<CompositeAction>>,
}

#[derive(Default)]
pub struct Catalog {
    entries: RwLock<Entries>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a workflow under an immutable version. Republishing identical
    /// content is a no-op.
    pub fn publish_workflow(
        &self,
        reference: VersionedRef,
        definition: WorkflowDefinition,
    ) -> Result<Arc<WorkflowSnapshot>> {
        ensure_pinned(&reference)?;
        loader::validate(&definition)?;
        let snapshot = WorkflowSnapshot::new(reference.clone(), definition)?;

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = entries.workflows.get(&reference) {
            if existing.digest == snapshot.digest {
                return Ok(existing.clone());
            }
            return Err(InvocationError::AlreadyPublished {
                reference: reference.to_string(),
            }
            .into());
        }

        info!(reference = %reference, digest = %snapshot.digest, "Published workflow");
        let snapshot = Arc::new(snapshot);
        entries.workflows.insert(reference, snapshot.clone());
        Ok(snapshot)
    }

    pub fn publish_action(&self, reference: VersionedRef, action: CompositeAction) -> Result<()> {
        ensure_pinned(&reference)?;
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = entries.actions.get(&reference) {
            if **existing == action {
                return Ok(());
            }
            return Err(InvocationError::AlreadyPublished {
                reference: reference.to_string(),
            }
            .into());
        }
        debug!(reference = %reference, "Published composite action");
        entries.actions.insert(reference, Arc::new(action));
        Ok(())
    }

    pub fn workflow(&self, reference: &VersionedRef) -> std::result::Result<Arc<WorkflowSnapshot>, InvocationError> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .workflows
            .get(reference)
            .cloned()
            .ok_or_else(|| InvocationError::VersionNotFound {
                path: reference.path.clone(),
                version: reference.version.clone(),
            })
    }

    pub fn action(&self, reference: &VersionedRef) -> std::result::Result<Arc<CompositeAction>, ResolutionError> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .actions
            .get(reference)
            .cloned()
            .ok_or_else(|| ResolutionError::ActionNotFound {
                reference: reference.to_string(),
            })
    }

    /// Published versions of a workflow or action path.
    pub fn versions(&self, path: &str) -> Vec<String> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .workflows
            .keys()
            .chain(entries.actions.keys())
            .filter(|r| r.path == path)
            .map(|r| r.version.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.workflows.len() + entries.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Load a catalog directory laid out as `<path>/<version>.{yaml,yml,json}`.
    /// Documents with a `jobs` key are workflows, the rest composite actions.
    pub fn load_dir(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let catalog = Self::new();
        let mut files = Vec::new();
        collect_files(root, &mut files)?;

        for file in files {
            let Some(reference) = reference_for(root, &file) else {
                continue;
            };
            let source = std::fs::read_to_string(&file)?;
            let format = Format::from_path(&file);
            let document: serde_json::Value = loader::parse(&source, format)?;

            if document.get("jobs").is_some() {
                let definition: WorkflowDefinition = serde_json::from_value(document)
                    .map_err(|e| DefinitionError::Parse(format!("{}: {e}", file.display())))?;
                catalog.publish_workflow(reference, definition)?;
            } else {
                let action = loader::load_action_str(&source, format)?;
                catalog.publish_action(reference, action)?;
            }
        }

        info!(root = %root.display(), entries = catalog.len(), "Loaded catalog");
        Ok(catalog)
    }
}

fn ensure_pinned(reference: &VersionedRef) -> std::result::Result<(), DefinitionError> {
    if reference.is_immutable() {
        Ok(())
    } else {
        Err(DefinitionError::MovingReference {
            reference: reference.to_string(),
        })
    }
}

fn collect_files(dir: &Path, files: &mut Vec<std::path::PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(&path, files)?;
        } else {
            files.push(path);
        }
    }
    files.sort();
    Ok(())
}

fn reference_for(root: &Path, file: &Path) -> Option<VersionedRef> {
    let extension = file.extension()?.to_str()?;
    if !matches!(extension, "yaml" | "yml" | "json") {
        return None;
    }
    let version = file.file_stem()?.to_str()?;
    let parent = file.parent()?.strip_prefix(root).ok()?;
    let path = parent
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    if path.is_empty() {
        return None;
    }
    Some(VersionedRef::new(path, version))
}
