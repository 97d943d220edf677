//! Tar archives of workspace paths.
//!
//! Archives are uncompressed; the cache manager compresses the whole blob.

use gantry_core::{CacheError, Result};
use std::path::Path;

fn workspace_error(message: String) -> gantry_core::Error {
    CacheError::Workspace(message).into()
}

/// Create an archive of `paths`, relative to `base_dir`. Missing paths are skipped.
pub fn create_archive(paths: &[String], base_dir: &Path) -> Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());

    for p in paths {
        let relative = Path::new(p);
        if relative.is_absolute() {
            return Err(workspace_error(format!("cache path `{p}` must be relative")));
        }

        let abs_path = base_dir.join(relative);
        if !abs_path.exists() {
            continue;
        }

        if abs_path.is_dir() {
            builder
                .append_dir_all(relative, &abs_path)
                .map_err(|e| workspace_error(format!("Failed to pack dir: {e}")))?;
        } else {
            builder
                .append_path_with_name(&abs_path, relative)
                .map_err(|e| workspace_error(format!("Failed to pack file: {e}")))?;
        }
    }

    builder
        .into_inner()
        .map_err(|e| workspace_error(format!("Failed to finish tar: {e}")))
}

/// Extract an archive into `dest`. Entries escaping `dest` are refused by `tar`.
pub fn extract_archive(archive: &[u8], dest: &Path) -> Result<()> {
    let mut archive = tar::Archive::new(archive);
    archive
        .unpack(dest)
        .map_err(|e| workspace_error(format!("Failed to unpack archive: {e}")))
}
