//! Cache key generation utilities.

use crate::types::CacheKey;
use gantry_core::Result;
use gantry_core::ports::Workspace;
use gantry_core::workflow::CacheSpec;
use sha2::{Digest, Sha256};

/// Derive a key from a namespace and `(path, contents)` manifest entries.
///
/// Each path and its contents are length-prefixed so that moving bytes between
/// adjacent entries changes the digest.
pub fn compute_key(namespace: &str, manifest: &[(String, Vec<u8>)]) -> CacheKey {
    let mut hasher = Sha256::new();
    hasher.update(namespace.as_bytes());

    for (path, contents) in manifest {
        hasher.update((path.len() as u64).to_le_bytes());
        hasher.update(path.as_bytes());
        hasher.update((contents.len() as u64).to_le_bytes());
        hasher.update(contents);
    }

    CacheKey::new(format!("{}-{}", namespace, hex::encode(hasher.finalize())))
}

/// Read the manifest files from the workspace and derive the key.
pub async fn key_for(spec: &CacheSpec, workspace: &dyn Workspace) -> Result<CacheKey> {
    let mut manifest = Vec::with_capacity(spec.manifest.len());
    for path in &spec.manifest {
        let contents = workspace.read(path).await?;
        manifest.push((path.clone(), contents));
    }
    Ok(compute_key(&spec.namespace, &manifest))
}

/// Check if a key matches a prefix pattern.
pub fn matches_prefix(key: &str, prefix: &str) -> bool {
    key.starts_with(prefix)
}

/// Sanitize a key for use in filenames.
pub fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            _ => c,
        })
        .collect()
}
