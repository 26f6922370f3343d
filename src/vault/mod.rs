//! Vault module — users, artifact records and the front-end facade.
//!
//! This module provides:
//! - Binary record format and atomic writes (`format`)
//! - User records and their store (`user`)
//! - Registration, unlock and password rotation (`keymanager`)
//! - Artifact ids, generation metadata and the record store (`artifact`)
//! - The `Vault` facade used by the CLI (`store`)

pub mod artifact;
pub mod format;
pub mod keymanager;
pub mod store;
pub mod user;

// Re-export the most commonly used items.
pub use artifact::{ArtifactId, GenerationMetadata};
pub use keymanager::VaultKeyManager;
pub use store::{DecryptedOutput, Vault};
pub use user::{User, UserId};
