//! Content-addressed dependency cache for Gantry.
//!
//! Keys are derived from a namespace and the content of manifest files, so a
//! changed lockfile produces a different key and an unchanged one always hits.
//! Blobs are compressed and framed with a codec header before they reach the
//! [`BlobStore`](gantry_core::ports::BlobStore).

pub mod archiver;
pub mod compression;
pub mod keys;
pub mod manager;
pub mod store;
pub mod types;

pub use compression::{compress, decompress};
pub use keys::{compute_key, key_for, matches_prefix, sanitize_key};
pub use manager::CacheManager;
pub use store::{FilesystemStore, MemoryStore};
pub use types::{CacheKey, CacheStats, CompressionType, RestoreOutcome, SaveOutcome};
