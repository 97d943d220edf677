//! Secret vaults and per-step secret scoping for Gantry.

pub mod scope;
pub mod vaults;

pub use scope::{BoundSecrets, Redactor, SecretScopeManager};
pub use vaults::{ChainVault, EnvVault, FileVault};
