//! Cryptographic primitives for ArtVault.
//!
//! This module provides:
//! - Argon2id + HKDF password derivation into verifier and KEK (`kdf`)
//! - Key types and HKDF key expansion from the master key (`keys`)
//! - AES-256-GCM sealing and master-key wrapping (`encryption`)
//! - Per-artifact authenticated encryption (`cipher`)

pub mod cipher;
pub mod encryption;
pub mod kdf;
pub mod keys;

// Re-export the most commonly used items so callers can write:
//   use crate::crypto::{derive, VaultMasterKey, ...};
pub use cipher::{ArtifactContext, CiphertextRecord, DecryptedArtifact};
pub use encryption::{unwrap_key, wrap_key, WrappedKey};
pub use kdf::{derive, generate_salt, DerivedKeys, KdfFloor, KdfParams};
pub use keys::{KeyEncryptionKey, VaultMasterKey, Verifier};
