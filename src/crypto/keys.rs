//! Key types and HKDF-SHA256 key expansion.
//!
//! From the Vault Master Key (VMK) we derive:
//! - a pair of **per-artifact** data keys (payload + metadata), salted
//!   with a random per-artifact salt and bound to the artifact id,
//! - a **fingerprint** key for keyed content hashes,
//! - a **search** key for keyed prompt tokens,
//! - a short **key check** value that identifies the VMK without
//!   revealing it.
//!
//! Every key type zeroes its memory on drop and redacts itself in
//! `Debug` output.

use std::fmt;

use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::errors::{ArtVaultError, Result};

/// Length of every symmetric key in bytes (256 bits).
pub const KEY_LEN: usize = 32;

/// Length of the key check value stored in artifact records.
pub const KEY_CHECK_LEN: usize = 16;

macro_rules! secret_key_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Zeroize, ZeroizeOnDrop)]
        pub struct $name {
            bytes: [u8; KEY_LEN],
        }

        impl $name {
            /// Wrap raw key bytes.
            pub fn new(bytes: [u8; KEY_LEN]) -> Self {
                Self { bytes }
            }

            /// Access the raw key bytes.
            pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
                &self.bytes
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(concat!(stringify!($name), "(***)"))
            }
        }
    };
}

secret_key_type!(
    /// Random per-user root key. Only ever held in memory once unwrapped.
    VaultMasterKey
);

secret_key_type!(
    /// Password-derived key used only to wrap and unwrap the VMK.
    KeyEncryptionKey
);

secret_key_type!(
    /// Password-derived authentication verifier.
    Verifier
);

secret_key_type!(
    /// A single-use AES-256-GCM data key.
    DataKey
);

impl VaultMasterKey {
    /// Generate a fresh random master key.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        rand::rng().fill_bytes(&mut bytes);
        let key = Self::new(bytes);
        bytes.zeroize();
        key
    }

    /// Rebuild a master key from an unwrapped byte slice.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|_| ArtVaultError::InvalidRecordFormat("master key length".into()))?;
        Ok(Self::new(arr))
    }

    /// Derive the payload and metadata keys for one artifact.
    pub fn derive_data_keys(&self, salt: &[u8], artifact_id: &str) -> Result<DataKeys> {
        let payload_info = format!("artvault-payload:{artifact_id}");
        let metadata_info = format!("artvault-metadata:{artifact_id}");
        Ok(DataKeys {
            payload: DataKey::new(hkdf_derive(Some(salt), &self.bytes, payload_info.as_bytes())?),
            metadata: DataKey::new(hkdf_derive(
                Some(salt),
                &self.bytes,
                metadata_info.as_bytes(),
            )?),
        })
    }

    /// Key for content fingerprints (stable across artifacts for dedup).
    pub fn derive_fingerprint_key(&self) -> Result<DataKey> {
        hkdf_derive(None, &self.bytes, b"artvault-fingerprint").map(DataKey::new)
    }

    /// Key for prompt search tokens.
    pub fn derive_search_key(&self) -> Result<DataKey> {
        hkdf_derive(None, &self.bytes, b"artvault-search").map(DataKey::new)
    }

    /// A short public value identifying this key.
    pub fn key_check(&self) -> Result<[u8; KEY_CHECK_LEN]> {
        let mut full = hkdf_derive(None, &self.bytes, b"artvault-key-check")?;
        let mut check = [0u8; KEY_CHECK_LEN];
        check.copy_from_slice(&full[..KEY_CHECK_LEN]);
        full.zeroize();
        Ok(check)
    }

    /// Constant-time comparison of two master keys.
    pub fn same_key(&self, other: &VaultMasterKey) -> bool {
        self.bytes.ct_eq(&other.bytes).into()
    }
}

impl Verifier {
    /// Constant-time comparison against another verifier.
    ///
    /// Runtime does not depend on how many leading bytes match.
    pub fn matches(&self, other: &Verifier) -> bool {
        self.bytes.ct_eq(&other.bytes).into()
    }

    /// Rebuild a stored verifier.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|_| ArtVaultError::InvalidRecordFormat("verifier length".into()))?;
        Ok(Self::new(arr))
    }
}

/// The two data keys of one artifact.
pub struct DataKeys {
    pub payload: DataKey,
    pub metadata: DataKey,
}

/// Run HKDF-SHA256 extract + expand with the given `info`.
fn hkdf_derive(salt: Option<&[u8]>, ikm: &[u8], info: &[u8]) -> Result<[u8; KEY_LEN]> {
    let hk = Hkdf::<Sha256>::new(salt, ikm);

    let mut okm = [0u8; KEY_LEN];
    hk.expand(info, &mut okm)
        .map_err(|e| ArtVaultError::KeyDerivationFailed(format!("HKDF expand failed: {e}")))?;

    Ok(okm)
}
