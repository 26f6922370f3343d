//! Encrypted session blobs that let a login survive a process restart.
//!
//! The blob at `<data_dir>/sessions/<user_id>.session` holds the VMK
//! sealed under a 32-byte session-local secret.  The secret lives in a
//! separate directory (`<secret_dir>/<user_id>.secret`, mode 0600) so a
//! copy of the data directory alone never yields a usable key.  The
//! session ids, owner and expiry are bound into the associated data, so
//! editing the expiry invalidates the blob.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::crypto::encryption::{open, seal};
use crate::crypto::keys::KEY_LEN;
use crate::crypto::VaultMasterKey;
use crate::erase;
use crate::errors::{ArtVaultError, Result};
use crate::retry::{retry_io, RetryPolicy};
use crate::vault::format::{base64_decode, base64_encode, write_atomic};
use crate::vault::user::UserId;

const SESSION_AAD: &[u8] = b"artvault-session-v1";
const BLOB_EXT: &str = "session";
const SECRET_EXT: &str = "secret";

/// On-disk form of a persisted session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionBlob {
    pub session_id: Uuid,
    pub user_id: UserId,
    pub username: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,

    #[serde(serialize_with = "base64_encode", deserialize_with = "base64_decode")]
    nonce: Vec<u8>,

    #[serde(serialize_with = "base64_encode", deserialize_with = "base64_decode")]
    ciphertext: Vec<u8>,
}

/// Session header fields, without the sealed key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobHeader {
    pub session_id: Uuid,
    pub user_id: UserId,
    pub username: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl BlobHeader {
    fn aad(&self) -> Vec<u8> {
        let mut aad = SESSION_AAD.to_vec();
        aad.extend_from_slice(self.session_id.as_bytes());
        aad.extend_from_slice(self.user_id.to_string().as_bytes());
        aad.extend_from_slice(&(self.username.len() as u32).to_le_bytes());
        aad.extend_from_slice(self.username.as_bytes());
        aad.extend_from_slice(&self.created_at.timestamp_micros().to_le_bytes());
        aad.extend_from_slice(&self.expires_at.timestamp_micros().to_le_bytes());
        aad
    }
}

impl SessionBlob {
    pub fn header(&self) -> BlobHeader {
        BlobHeader {
            session_id: self.session_id,
            user_id: self.user_id,
            username: self.username.clone(),
            created_at: self.created_at,
            expires_at: self.expires_at,
        }
    }
}

/// Reads and writes session blobs and their secrets.
#[derive(Debug, Clone)]
pub struct SessionPersistence {
    blob_dir: PathBuf,
    secret_dir: PathBuf,
    retry: RetryPolicy,
    erase_passes: u32,
}

impl SessionPersistence {
    pub fn new(
        blob_dir: impl Into<PathBuf>,
        secret_dir: impl Into<PathBuf>,
        retry: RetryPolicy,
        erase_passes: u32,
    ) -> Self {
        Self {
            blob_dir: blob_dir.into(),
            secret_dir: secret_dir.into(),
            retry,
            erase_passes,
        }
    }

    fn blob_path(&self, user_id: UserId) -> PathBuf {
        self.blob_dir.join(format!("{user_id}.{BLOB_EXT}"))
    }

    fn secret_path(&self, user_id: UserId) -> PathBuf {
        self.secret_dir.join(format!("{user_id}.{SECRET_EXT}"))
    }

    /// Persist a new session under a freshly generated secret.
    pub fn save(&self, header: &BlobHeader, vmk: &VaultMasterKey) -> Result<()> {
        let secret = self.generate_secret(header.user_id)?;
        self.write_blob(header, vmk, &secret)
    }

    /// Rewrite an existing blob (new expiry) under its current secret.
    pub fn refresh(&self, header: &BlobHeader, vmk: &VaultMasterKey) -> Result<()> {
        let secret = self.load_secret(header.user_id)?;
        self.write_blob(header, vmk, &secret)
    }

    fn write_blob(
        &self,
        header: &BlobHeader,
        vmk: &VaultMasterKey,
        secret: &[u8; KEY_LEN],
    ) -> Result<()> {
        let sealed = seal(secret, vmk.as_bytes(), &header.aad())?;
        let blob = SessionBlob {
            session_id: header.session_id,
            user_id: header.user_id,
            username: header.username.clone(),
            created_at: header.created_at,
            expires_at: header.expires_at,
            nonce: sealed.nonce.to_vec(),
            ciphertext: sealed.ciphertext,
        };
        let json = serde_json::to_vec_pretty(&blob)
            .map_err(|e| ArtVaultError::SerializationError(format!("session blob: {e}")))?;
        write_atomic(&self.blob_path(header.user_id), &json, &self.retry)?;
        debug!(session_id = %header.session_id, "persisted session blob");
        Ok(())
    }

    /// Recover the VMK from a blob.  Fails if the secret is gone or the
    /// blob was altered.
    pub fn open(&self, blob: &SessionBlob) -> Result<VaultMasterKey> {
        let secret = self.load_secret(blob.user_id)?;
        let bytes = open(&secret, &blob.nonce, &blob.ciphertext, &blob.header().aad())?;
        VaultMasterKey::from_slice(&bytes)
    }

    pub fn load(&self, user_id: UserId) -> Result<Option<SessionBlob>> {
        read_blob(&self.blob_path(user_id), &self.retry)
    }

    /// The most recently created blob on disk, if any.
    pub fn latest(&self) -> Result<Option<SessionBlob>> {
        if !self.blob_dir.exists() {
            return Ok(None);
        }

        let mut newest: Option<SessionBlob> = None;
        for entry in fs::read_dir(&self.blob_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(BLOB_EXT) {
                continue;
            }
            match read_blob(&path, &self.retry) {
                Ok(Some(blob)) => {
                    if newest.as_ref().map_or(true, |n| blob.created_at > n.created_at) {
                        newest = Some(blob);
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable session blob"),
            }
        }
        Ok(newest)
    }

    /// Securely delete the blob and the secret for `user_id`.
    pub fn remove(&self, user_id: UserId) -> Result<()> {
        for path in [self.blob_path(user_id), self.secret_path(user_id)] {
            if !path.exists() {
                continue;
            }
            erase::secure_delete(&path, self.erase_passes)?;
        }
        Ok(())
    }

    /// Write a new random secret with owner-only permissions.
    fn generate_secret(&self, user_id: UserId) -> Result<Zeroizing<[u8; KEY_LEN]>> {
        create_private_dir(&self.secret_dir)?;

        let path = self.secret_path(user_id);
        if path.exists() {
            erase::secure_delete(&path, self.erase_passes)?;
        }

        let mut secret = Zeroizing::new([0u8; KEY_LEN]);
        rand::rng().fill_bytes(&mut secret[..]);
        write_atomic(&path, &secret[..], &self.retry)?;
        Ok(secret)
    }

    /// Load a secret and validate its length.
    fn load_secret(&self, user_id: UserId) -> Result<Zeroizing<[u8; KEY_LEN]>> {
        let path = self.secret_path(user_id);
        if !path.exists() {
            return Err(ArtVaultError::SessionNotActive);
        }

        let data = Zeroizing::new(retry_io(&self.retry, "read session secret", || {
            Ok(fs::read(&path)?)
        })?);
        if data.len() != KEY_LEN {
            return Err(ArtVaultError::InvalidRecordFormat(format!(
                "session secret must be exactly {KEY_LEN} bytes, got {}",
                data.len()
            )));
        }

        let mut secret = Zeroizing::new([0u8; KEY_LEN]);
        secret.copy_from_slice(&data);
        Ok(secret)
    }
}

fn read_blob(path: &Path, retry: &RetryPolicy) -> Result<Option<SessionBlob>> {
    if !path.exists() {
        return Ok(None);
    }
    let data = retry_io(retry, "read session blob", || Ok(fs::read(path)?))?;
    serde_json::from_slice(&data)
        .map(Some)
        .map_err(|e| ArtVaultError::InvalidRecordFormat(format!("session blob: {e}")))
}

/// Create `dir` with mode 0700, or check that an existing one is private.
fn create_private_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        return check_private_dir(dir);
    }
    fs::create_dir_all(dir)?;

    // Owner-only access on Unix.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dir, fs::Permissions::from_mode(0o700))?;
    }
    Ok(())
}

#[cfg(unix)]
fn check_private_dir(dir: &Path) -> Result<()> {
    use std::os::unix::fs::MetadataExt;

    let meta = fs::metadata(dir)?;
    // SAFETY: `geteuid` has no preconditions and cannot fail.
    let euid = unsafe { libc::geteuid() };
    if !meta.is_dir() || meta.uid() != euid || meta.mode() & 0o077 != 0 {
        return Err(ArtVaultError::ConfigError(format!(
            "session secret directory {} must be a directory owned by the current user with mode 0700",
            dir.display()
        )));
    }
    Ok(())
}

#[cfg(not(unix))]
fn check_private_dir(_dir: &Path) -> Result<()> {
    Ok(())
}
