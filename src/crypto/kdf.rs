//! Password-based key derivation using Argon2id.
//!
//! One expensive Argon2id run turns `password + salt` into a 32-byte
//! secret.  HKDF-SHA256 then expands that secret into two independent
//! sub-keys with distinct labels:
//!
//! - `artvault-auth` → the authentication **verifier** (stored)
//! - `artvault-kek`  → the **key-encryption key** (never stored)
//!
//! Knowing the verifier does not help recover the KEK: both are outputs
//! of a PRF keyed with a secret that only the password reproduces.

use argon2::{Algorithm, Argon2, Params, Version};
use hkdf::Hkdf;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroize;

use super::keys::{KeyEncryptionKey, Verifier, KEY_LEN};
use crate::errors::{ArtVaultError, Result};

/// Length of the password salt in bytes (256 bits).
pub const SALT_LEN: usize = 32;

const AUTH_LABEL: &[u8] = b"artvault-auth";
const KEK_LABEL: &[u8] = b"artvault-kek";

/// Argon2id cost parameters.
///
/// Stored in every user record so unlock uses exactly the parameters
/// the account was registered with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB (default: 65 536 = 64 MiB).
    pub memory_kib: u32,
    /// Number of iterations (default: 3).
    pub iterations: u32,
    /// Parallelism lanes (default: 4).
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 65_536,
            iterations: 3,
            parallelism: 4,
        }
    }
}

/// Minimum acceptable KDF cost.
///
/// Parameters below the floor are rejected with `WeakParameters`.
/// The floor can be raised in configuration but never lowered below
/// [`KdfFloor::BUILTIN`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfFloor {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl KdfFloor {
    /// Hard minimum: 8 MiB, 1 iteration, 1 lane.
    pub const BUILTIN: KdfFloor = KdfFloor {
        memory_kib: 8_192,
        iterations: 1,
        parallelism: 1,
    };
}

impl Default for KdfFloor {
    fn default() -> Self {
        Self::BUILTIN
    }
}

impl KdfParams {
    /// Reject parameters that fall below `floor`.
    pub fn check(&self, floor: &KdfFloor) -> Result<()> {
        if self.memory_kib < floor.memory_kib {
            return Err(ArtVaultError::WeakParameters(format!(
                "memory cost must be at least {} KiB (got {})",
                floor.memory_kib, self.memory_kib
            )));
        }
        if self.iterations < floor.iterations {
            return Err(ArtVaultError::WeakParameters(format!(
                "iterations must be at least {} (got {})",
                floor.iterations, self.iterations
            )));
        }
        if self.parallelism < floor.parallelism {
            return Err(ArtVaultError::WeakParameters(format!(
                "parallelism must be at least {} (got {})",
                floor.parallelism, self.parallelism
            )));
        }
        Ok(())
    }
}

/// The two sub-keys produced by one derivation.
pub struct DerivedKeys {
    pub verifier: Verifier,
    pub kek: KeyEncryptionKey,
}

/// Derive the verifier and key-encryption key from a password.
///
/// The same password + salt + params always produce the same keys.
/// Refuses to run when `params` fall below `floor`.
pub fn derive(
    password: &[u8],
    salt: &[u8],
    params: &KdfParams,
    floor: &KdfFloor,
) -> Result<DerivedKeys> {
    params.check(floor)?;

    let argon2_params = Params::new(
        params.memory_kib,
        params.iterations,
        params.parallelism,
        Some(KEY_LEN),
    )
    .map_err(|e| ArtVaultError::KeyDerivationFailed(format!("invalid Argon2 params: {e}")))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params);

    let mut secret = [0u8; KEY_LEN];
    let hashed = argon2.hash_password_into(password, salt, &mut secret);
    if let Err(e) = hashed {
        secret.zeroize();
        return Err(ArtVaultError::KeyDerivationFailed(format!(
            "Argon2id hashing failed: {e}"
        )));
    }

    let expanded = expand_pair(&secret);
    secret.zeroize();
    let (mut auth, mut kek) = expanded?;

    let keys = DerivedKeys {
        verifier: Verifier::new(auth),
        kek: KeyEncryptionKey::new(kek),
    };
    auth.zeroize();
    kek.zeroize();
    Ok(keys)
}

/// Expand the Argon2 output into the (verifier, kek) pair.
fn expand_pair(secret: &[u8; KEY_LEN]) -> Result<([u8; KEY_LEN], [u8; KEY_LEN])> {
    // The Argon2 output is already uniformly random, so it is used as
    // the PRK directly; only the labels differ.
    let hk = Hkdf::<Sha256>::from_prk(secret)
        .map_err(|e| ArtVaultError::KeyDerivationFailed(format!("HKDF init failed: {e}")))?;

    let mut auth = [0u8; KEY_LEN];
    let mut kek = [0u8; KEY_LEN];
    hk.expand(AUTH_LABEL, &mut auth)
        .and_then(|()| hk.expand(KEK_LABEL, &mut kek))
        .map_err(|e| ArtVaultError::KeyDerivationFailed(format!("HKDF expand failed: {e}")))?;
    Ok((auth, kek))
}

/// Generate a cryptographically random 32-byte salt.
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    rand::rng().fill_bytes(&mut salt);
    salt
}
