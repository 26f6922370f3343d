//! Per-artifact authenticated encryption.
//!
//! Every artifact gets a random 32-byte salt.  HKDF(salt, VMK) expands
//! into two single-use data keys, one for the payload and one for the
//! metadata blob, each also bound to the artifact id.
//!
//! Associated data:
//!
//! ```text
//! metadata AAD = "artvault-artifact-v1" | len(owner) | owner | len(id) | id
//! payload  AAD = metadata AAD | SHA-256(metadata nonce | metadata ciphertext)
//! ```
//!
//! so a ciphertext cannot be replayed under another owner or artifact
//! id, and metadata blobs cannot be swapped between records.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use super::encryption::{open, seal};
use super::keys::{VaultMasterKey, KEY_CHECK_LEN};
use crate::errors::{ArtVaultError, Result};
use crate::vault::format::{base64_decode, base64_encode};

/// Length of the per-artifact key-derivation salt.
pub const ARTIFACT_SALT_LEN: usize = 32;

const CONTEXT_LABEL: &[u8] = b"artvault-artifact-v1";

/// Who owns an artifact and what it is called.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactContext {
    pub owner_id: String,
    pub artifact_id: String,
}

impl ArtifactContext {
    pub fn new(owner_id: impl Into<String>, artifact_id: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            artifact_id: artifact_id.into(),
        }
    }

    /// Length-prefixed encoding used as associated data.
    fn aad(&self) -> Vec<u8> {
        let owner = self.owner_id.as_bytes();
        let id = self.artifact_id.as_bytes();
        let mut aad = Vec::with_capacity(CONTEXT_LABEL.len() + 8 + owner.len() + id.len());
        aad.extend_from_slice(CONTEXT_LABEL);
        aad.extend_from_slice(&(owner.len() as u32).to_le_bytes());
        aad.extend_from_slice(owner);
        aad.extend_from_slice(&(id.len() as u32).to_le_bytes());
        aad.extend_from_slice(id);
        aad
    }
}

/// An encrypted artifact, ready to be persisted.
///
/// `ciphertext` is stored raw after the JSON header, so it is skipped
/// by serde; every other field goes into the header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CiphertextRecord {
    pub owner_id: String,
    pub artifact_id: String,

    #[serde(serialize_with = "base64_encode", deserialize_with = "base64_decode")]
    pub salt: Vec<u8>,

    #[serde(serialize_with = "base64_encode", deserialize_with = "base64_decode")]
    pub key_check: Vec<u8>,

    #[serde(serialize_with = "base64_encode", deserialize_with = "base64_decode")]
    pub nonce: Vec<u8>,

    #[serde(skip)]
    pub ciphertext: Vec<u8>,

    #[serde(serialize_with = "base64_encode", deserialize_with = "base64_decode")]
    pub metadata_nonce: Vec<u8>,

    #[serde(serialize_with = "base64_encode", deserialize_with = "base64_decode")]
    pub metadata_ciphertext: Vec<u8>,

    /// Keyed content fingerprint (HMAC-SHA256 of the plaintext payload).
    #[serde(serialize_with = "base64_encode", deserialize_with = "base64_decode")]
    pub fingerprint: Vec<u8>,

    pub created_at: DateTime<Utc>,
}

impl CiphertextRecord {
    pub fn context(&self) -> ArtifactContext {
        ArtifactContext::new(self.owner_id.clone(), self.artifact_id.clone())
    }

    fn payload_aad(&self) -> Vec<u8> {
        payload_aad(&self.context(), &self.metadata_nonce, &self.metadata_ciphertext)
    }
}

/// Plaintext released by a successful `decrypt`.  Wiped on drop.
pub struct DecryptedArtifact {
    pub payload: Zeroizing<Vec<u8>>,
    pub metadata: Zeroizing<Vec<u8>>,
}

/// Encrypt an artifact payload and its metadata blob.
pub fn encrypt(
    vault_key: &VaultMasterKey,
    context: &ArtifactContext,
    plaintext: &[u8],
    metadata: &[u8],
) -> Result<CiphertextRecord> {
    let mut salt = vec![0u8; ARTIFACT_SALT_LEN];
    rand::rng().fill_bytes(&mut salt);

    let keys = vault_key.derive_data_keys(&salt, &context.artifact_id)?;

    let sealed_meta = seal(keys.metadata.as_bytes(), metadata, &context.aad())?;
    let aad = payload_aad(context, &sealed_meta.nonce, &sealed_meta.ciphertext);
    let sealed = seal(keys.payload.as_bytes(), plaintext, &aad)?;

    Ok(CiphertextRecord {
        owner_id: context.owner_id.clone(),
        artifact_id: context.artifact_id.clone(),
        salt,
        key_check: vault_key.key_check()?.to_vec(),
        nonce: sealed.nonce.to_vec(),
        ciphertext: sealed.ciphertext,
        metadata_nonce: sealed_meta.nonce.to_vec(),
        metadata_ciphertext: sealed_meta.ciphertext,
        fingerprint: fingerprint(vault_key, plaintext)?.to_vec(),
        created_at: Utc::now(),
    })
}

/// Verify and decrypt a record.
///
/// Nothing is returned unless the metadata tag, the payload tag and the
/// fingerprint all verify.
pub fn decrypt(vault_key: &VaultMasterKey, record: &CiphertextRecord) -> Result<DecryptedArtifact> {
    if record.key_check.len() != KEY_CHECK_LEN {
        return Err(ArtVaultError::AuthenticationFailed);
    }
    let expected_check = vault_key.key_check()?;
    if !bool::from(expected_check.as_slice().ct_eq(record.key_check.as_slice())) {
        return Err(ArtVaultError::KeyDerivationMismatch);
    }

    let context = record.context();
    let keys = vault_key.derive_data_keys(&record.salt, &context.artifact_id)?;

    let metadata = open(
        keys.metadata.as_bytes(),
        &record.metadata_nonce,
        &record.metadata_ciphertext,
        &context.aad(),
    )?;
    let payload = open(
        keys.payload.as_bytes(),
        &record.nonce,
        &record.ciphertext,
        &record.payload_aad(),
    )?;

    let actual = fingerprint(vault_key, &payload)?;
    if !bool::from(actual.as_slice().ct_eq(record.fingerprint.as_slice())) {
        return Err(ArtVaultError::AuthenticationFailed);
    }

    Ok(DecryptedArtifact { payload, metadata })
}

/// Keyed content fingerprint of `payload`.
///
/// Stable for the same VMK so it can be used for deduplication, but
/// useless to anyone without the key.
pub fn fingerprint(vault_key: &VaultMasterKey, payload: &[u8]) -> Result<[u8; 32]> {
    let key = vault_key.derive_fingerprint_key()?;
    let mut mac = Hmac::<Sha256>::new_from_slice(key.as_bytes())
        .map_err(|e| ArtVaultError::EncryptionFailed(format!("HMAC init failed: {e}")))?;
    mac.update(payload);
    let mut out = [0u8; 32];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

fn payload_aad(context: &ArtifactContext, metadata_nonce: &[u8], metadata_ct: &[u8]) -> Vec<u8> {
    let mut digest = Sha256::new();
    digest.update(metadata_nonce);
    digest.update(metadata_ct);
    let mut aad = context.aad();
    aad.extend_from_slice(&digest.finalize());
    aad
}
