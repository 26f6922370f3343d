//! Artifact identifiers, generation metadata and the record store.
//!
//! Records live at `<data_dir>/vault/<user_id>/<artifact_id>.avlt`.
//! Writers to the same artifact are serialized by a per-artifact lock;
//! writers to different artifacts never contend.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use zeroize::Zeroize;

use crate::crypto::CiphertextRecord;
use crate::erase::{self, EraseOutcome};
use crate::errors::{ArtVaultError, Result};
use crate::retry::RetryPolicy;

use super::format::{encode_record, read_record, stage_atomic, write_atomic};
use super::user::UserId;

const RECORD_EXT: &str = "avlt";

/// Validated artifact identifier.
///
/// Safe to use as a file name: ASCII letters, digits, `_`, `-`, `.`,
/// at most 128 characters, never starting with a period.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ArtifactId(String);

impl ArtifactId {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(ArtVaultError::InvalidInput(
                "artifact id cannot be empty".into(),
            ));
        }
        if id.len() > 128 {
            return Err(ArtVaultError::InvalidInput(
                "artifact id cannot exceed 128 characters".into(),
            ));
        }
        if id.starts_with('.') {
            return Err(ArtVaultError::InvalidInput(
                "artifact id cannot start with a period".into(),
            ));
        }
        if !id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-' || b == b'.')
        {
            return Err(ArtVaultError::InvalidInput(format!(
                "artifact id '{id}' contains invalid characters — only ASCII letters, digits, underscores, hyphens, and periods are allowed"
            )));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ArtifactId {
    type Error = ArtVaultError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<ArtifactId> for String {
    fn from(id: ArtifactId) -> Self {
        id.0
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parameters the artifact was generated with.
///
/// Stored only inside the encrypted metadata blob.  Unknown keys are
/// kept in `extra` so nothing a generator reports is lost.  Every string
/// is wiped on drop.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cfg_scale: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sampler: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl GenerationMetadata {
    pub fn with_prompt(prompt: impl Into<String>) -> Self {
        let mut m = Self::default();
        m.prompt = Some(prompt.into());
        m
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| ArtVaultError::SerializationError(format!("metadata: {e}")))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_slice(bytes)
            .map_err(|e| ArtVaultError::SerializationError(format!("metadata: {e}")))
    }
}

impl Zeroize for GenerationMetadata {
    fn zeroize(&mut self) {
        self.prompt.zeroize();
        self.negative_prompt.zeroize();
        self.sampler.zeroize();
        self.model.zeroize();
        self.provider.zeroize();
        self.width = None;
        self.height = None;
        self.steps = None;
        self.cfg_scale = None;
        self.seed = None;
        for (mut key, mut value) in std::mem::take(&mut self.extra) {
            key.zeroize();
            wipe_json(&mut value);
        }
    }
}

impl Drop for GenerationMetadata {
    fn drop(&mut self) {
        self.zeroize();
    }
}

fn wipe_json(value: &mut serde_json::Value) {
    use serde_json::Value;

    match value {
        Value::String(s) => s.zeroize(),
        Value::Array(items) => items.iter_mut().for_each(wipe_json),
        Value::Object(map) => {
            for (mut key, mut inner) in std::mem::take(map) {
                key.zeroize();
                wipe_json(&mut inner);
            }
        }
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
}

type LockTable = HashMap<(UserId, ArtifactId), Arc<Mutex<()>>>;

/// Filesystem store for encrypted artifact records.
pub struct ArtifactStore {
    root: PathBuf,
    retry: RetryPolicy,
    erase_passes: u32,
    locks: Mutex<LockTable>,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>, retry: RetryPolicy, erase_passes: u32) -> Self {
        Self {
            root: root.into(),
            retry,
            erase_passes,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn path_for(&self, owner: UserId, id: &ArtifactId) -> PathBuf {
        self.owner_dir(owner)
            .join(format!("{}.{RECORD_EXT}", id.as_str()))
    }

    fn owner_dir(&self, owner: UserId) -> PathBuf {
        self.root.join(owner.to_string())
    }

    pub fn exists(&self, owner: UserId, id: &ArtifactId) -> bool {
        self.path_for(owner, id).exists()
    }

    /// Run `f` while holding the lock for one artifact.  The table entry
    /// is dropped again once no other caller holds it.
    fn locked<T>(&self, owner: UserId, id: &ArtifactId, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let key = (owner, id.clone());
        let lock = {
            let mut map = self.lock_table()?;
            Arc::clone(map.entry(key.clone()).or_default())
        };
        let result = {
            let _guard = lock
                .lock()
                .map_err(|_| ArtVaultError::CommandFailed("artifact lock poisoned".into()))?;
            f()
        };

        let mut map = self.lock_table()?;
        // One reference in the table, one here: nobody else is waiting.
        if Arc::strong_count(&lock) == 2 {
            map.remove(&key);
        }
        result
    }

    fn lock_table(&self) -> Result<MutexGuard<'_, LockTable>> {
        self.locks
            .lock()
            .map_err(|_| ArtVaultError::CommandFailed("artifact lock table poisoned".into()))
    }

    /// Persist a new record. Fails if the id is already taken.
    pub fn insert(&self, owner: UserId, id: &ArtifactId, record: &CiphertextRecord) -> Result<()> {
        self.locked(owner, id, || {
            let path = self.path_for(owner, id);
            if path.exists() {
                return Err(ArtVaultError::ArtifactAlreadyExists(id.to_string()));
            }
            write_atomic(&path, &encode_record(record)?, &self.retry)?;
            debug!(artifact_id = %id, "stored artifact record");
            Ok(())
        })
    }

    /// Replace an existing record.
    ///
    /// The new record is written and synced to a temp file first.  Only
    /// then is the old ciphertext overwritten in place and the temp file
    /// renamed over it.  Any failure before the overwrite leaves the old
    /// record intact.
    pub fn replace(
        &self,
        owner: UserId,
        id: &ArtifactId,
        record: &CiphertextRecord,
    ) -> Result<EraseOutcome> {
        if record.owner_id != owner.to_string() || record.artifact_id != id.as_str() {
            return Err(ArtVaultError::InvalidInput(format!(
                "record does not belong at artifact '{id}'"
            )));
        }
        self.locked(owner, id, || {
            let path = self.path_for(owner, id);
            if !path.exists() {
                return Err(ArtVaultError::NotFound(id.to_string()));
            }
            let staged = stage_atomic(&path, &encode_record(record)?, &self.retry)?;

            let outcome = erase::overwrite_file(&path, self.erase_passes)?;
            if let EraseOutcome::Incomplete { reason } = &outcome {
                warn!(artifact_id = %id, %reason, "old ciphertext overwrite incomplete");
            }
            staged.commit(&self.retry)?;
            debug!(artifact_id = %id, "replaced artifact record");
            Ok(outcome)
        })
    }

    #[cfg(test)]
    fn lock_entries(&self) -> usize {
        self.locks.lock().map(|m| m.len()).unwrap_or_default()
    }

    /// Load a record and check it belongs where it was found.
    pub fn get(&self, owner: UserId, id: &ArtifactId) -> Result<CiphertextRecord> {
        let path = self.path_for(owner, id);
        self.locked(owner, id, || {
            if !path.exists() {
                return Err(ArtVaultError::NotFound(id.to_string()));
            }
            read_record(&path, &self.retry)
        })
        .and_then(|record| {
            if record.owner_id != owner.to_string() || record.artifact_id != id.as_str() {
                warn!(artifact_id = %id, "record header does not match its location");
                return Err(ArtVaultError::AuthenticationFailed);
            }
            Ok(record)
        })
    }

    /// Securely delete a record.
    pub fn delete(&self, owner: UserId, id: &ArtifactId) -> Result<EraseOutcome> {
        self.locked(owner, id, || {
            let path = self.path_for(owner, id);
            if !path.exists() {
                return Err(ArtVaultError::NotFound(id.to_string()));
            }
            erase::secure_delete(&path, self.erase_passes)
        })
    }

    /// All artifact ids stored for `owner`, sorted.
    pub fn list(&self, owner: UserId) -> Result<Vec<ArtifactId>> {
        let dir = self.owner_dir(owner);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut ids = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if let Some(id) = artifact_id_of(&path) {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }
}

fn artifact_id_of(path: &Path) -> Option<ArtifactId> {
    if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXT) {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    ArtifactId::new(stem).ok()
}
