//! High-level vault operations used by CLI commands.
//!
//! `Vault` wires the key manager, session manager, artifact store and
//! metadata index together behind the front-end entry points.  Callers
//! only ever hold a [`SessionHandle`]; the Vault Master Key stays inside
//! the session manager and is lent to the cipher layer per call.

use std::fmt;
use std::fs;

use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::config::VaultConfig;
use crate::crypto::cipher::{self, ArtifactContext, CiphertextRecord};
use crate::erase::EraseOutcome;
use crate::errors::{ArtVaultError, Result};
use crate::index::{encode_fingerprint, search_tokens, IndexEntry, MetadataIndex};
use crate::session::{
    Clock, SessionHandle, SessionInfo, SessionManager, SessionPersistence, SessionState,
    SystemClock,
};

use super::artifact::{ArtifactId, ArtifactStore, GenerationMetadata};
use super::keymanager::VaultKeyManager;
use super::user::{User, UserId, UserStore};

/// Plaintext returned by [`Vault::decrypt_artifact`].  Wiped on drop.
pub struct DecryptedOutput {
    pub payload: Zeroizing<Vec<u8>>,
    pub metadata: GenerationMetadata,
}

impl fmt::Debug for DecryptedOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecryptedOutput")
            .field("payload_len", &self.payload.len())
            .field("metadata", &"<redacted>")
            .finish()
    }
}

/// The main vault handle.  Create one with `Vault::open`, then log in.
pub struct Vault<C: Clock = SystemClock> {
    config: VaultConfig,
    keys: VaultKeyManager,
    artifacts: ArtifactStore,
    sessions: SessionManager<C>,
    index: MetadataIndex,
}

impl Vault<SystemClock> {
    pub fn open(config: VaultConfig) -> Result<Self> {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> Vault<C> {
    // ------------------------------------------------------------------
    // Construction
    // ------------------------------------------------------------------

    /// Open the vault with an explicit time source.
    pub fn with_clock(config: VaultConfig, clock: C) -> Result<Self> {
        create_private_dir(&config.data_dir)?;

        let retry = config.retry.clone();
        let keys = VaultKeyManager::new(
            UserStore::new(config.users_dir(), retry.clone()),
            config.kdf,
            config.kdf_floor,
        );
        let artifacts = ArtifactStore::new(config.vault_dir(), retry.clone(), config.erase_passes);
        let persist = config.session.persist.then(|| {
            SessionPersistence::new(
                config.sessions_dir(),
                config.secret_dir.clone(),
                retry,
                config.erase_passes,
            )
        });
        let sessions = SessionManager::new(config.session, persist, clock);
        let index = MetadataIndex::open(&config.index_path())?;

        Ok(Self {
            config,
            keys,
            artifacts,
            sessions,
            index,
        })
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    /// Expire overdue sessions before doing anything else.
    fn enter(&self) {
        let swept = self.sessions.sweep_expired();
        if swept > 0 {
            info!(swept, "expired idle sessions");
        }
    }

    // ------------------------------------------------------------------
    // Accounts and sessions
    // ------------------------------------------------------------------

    pub fn register(&self, username: &str, password: &[u8]) -> Result<User> {
        self.enter();
        self.keys.register(username, password)
    }

    pub fn login(&self, username: &str, password: &[u8]) -> Result<SessionHandle> {
        self.enter();
        self.sessions.login(&self.keys, username, password)
    }

    /// Pick up the most recent persisted session, if still valid.
    pub fn resume(&self) -> Result<SessionHandle> {
        self.enter();
        let handle = self.sessions.restore()?;
        if self.keys.users().load_by_id(handle.user_id())?.is_none() {
            self.sessions.logout(&handle);
            return Err(ArtVaultError::SessionNotActive);
        }
        Ok(handle)
    }

    pub fn logout(&self, handle: &SessionHandle) {
        self.enter();
        self.sessions.logout(handle);
    }

    pub fn session_info(&self, handle: &SessionHandle) -> Result<SessionInfo> {
        self.enter();
        self.sessions.session_info(handle)
    }

    pub fn session_state(&self, username: &str) -> SessionState {
        self.sessions.state(username)
    }

    /// Whether an unwrapped key is cached for `user_id` right now.
    pub fn holds_key(&self, user_id: UserId) -> bool {
        self.sessions.holds_key(user_id)
    }

    /// Change the session user's password.  Artifacts are untouched.
    ///
    /// The new record is only saved if the session is still active and its
    /// key matches the one the old password unwraps.
    pub fn rotate_password(
        &self,
        handle: &SessionHandle,
        old_password: &[u8],
        new_password: &[u8],
    ) -> Result<()> {
        self.enter();
        let session = self.sessions.session_info(handle)?;
        self.keys
            .rotate_password(&session.username, old_password, new_password, |user, rotated| {
                let consistent = self
                    .sessions
                    .with_key(handle, |vmk| Ok(vmk.same_key(rotated)))?;
                if !consistent || user.id != handle.user_id() {
                    return Err(ArtVaultError::KeyDerivationMismatch);
                }
                Ok(())
            })?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Artifacts
    // ------------------------------------------------------------------

    /// Encrypt and store a new artifact.
    pub fn encrypt_artifact(
        &self,
        handle: &SessionHandle,
        artifact_id: &str,
        payload: &[u8],
        metadata: &GenerationMetadata,
    ) -> Result<CiphertextRecord> {
        self.enter();
        let id = ArtifactId::new(artifact_id)?;
        let owner = handle.user_id();
        let (record, tokens) = self.seal(handle, &id, payload, metadata)?;

        self.artifacts.insert(owner, &id, &record)?;
        self.index_record(owner, &id, &record, &tokens)?;
        info!(artifact_id = %id, "encrypted artifact");
        Ok(record)
    }

    /// Re-encrypt an existing artifact id with new content.
    pub fn replace_artifact(
        &self,
        handle: &SessionHandle,
        artifact_id: &str,
        payload: &[u8],
        metadata: &GenerationMetadata,
    ) -> Result<CiphertextRecord> {
        self.enter();
        let id = ArtifactId::new(artifact_id)?;
        let owner = handle.user_id();
        let (record, tokens) = self.seal(handle, &id, payload, metadata)?;

        self.artifacts.replace(owner, &id, &record)?;
        self.index_record(owner, &id, &record, &tokens)?;
        info!(artifact_id = %id, "replaced artifact");
        Ok(record)
    }

    fn seal(
        &self,
        handle: &SessionHandle,
        id: &ArtifactId,
        payload: &[u8],
        metadata: &GenerationMetadata,
    ) -> Result<(CiphertextRecord, Vec<String>)> {
        let metadata_bytes = Zeroizing::new(metadata.to_bytes()?);
        let context = ArtifactContext::new(handle.user_id().to_string(), id.as_str());
        let prompt = metadata.prompt.as_deref().unwrap_or_default();

        self.sessions.with_key(handle, |vmk| {
            let record = cipher::encrypt(vmk, &context, payload, &metadata_bytes)?;
            let tokens = search_tokens(vmk, prompt)?;
            Ok((record, tokens))
        })
    }

    fn index_record(
        &self,
        owner: UserId,
        id: &ArtifactId,
        record: &CiphertextRecord,
        tokens: &[String],
    ) -> Result<()> {
        let entry = IndexEntry {
            owner_id: owner,
            artifact_id: id.clone(),
            created_at: record.created_at,
            fingerprint: encode_fingerprint(&record.fingerprint),
        };
        self.index.upsert(&entry, tokens)
    }

    /// Verify and decrypt an artifact.  Nothing is returned unless every
    /// integrity check passes.
    pub fn decrypt_artifact(
        &self,
        handle: &SessionHandle,
        artifact_id: &str,
    ) -> Result<DecryptedOutput> {
        self.enter();
        let id = ArtifactId::new(artifact_id)?;
        let owner = handle.user_id();

        let decrypted = self.sessions.with_key(handle, |vmk| {
            let record = self.artifacts.get(owner, &id)?;
            cipher::decrypt(vmk, &record)
        })?;

        Ok(DecryptedOutput {
            metadata: GenerationMetadata::from_bytes(&decrypted.metadata)?,
            payload: decrypted.payload,
        })
    }

    /// Securely delete an artifact and drop it from the index.
    pub fn delete_artifact(&self, handle: &SessionHandle, artifact_id: &str) -> Result<EraseOutcome> {
        self.enter();
        let id = ArtifactId::new(artifact_id)?;
        let owner = handle.user_id();
        self.sessions.with_key(handle, |_| Ok(()))?;

        let outcome = self.artifacts.delete(owner, &id)?;
        self.index.remove(owner, &id)?;

        if let EraseOutcome::Incomplete { reason } = &outcome {
            warn!(artifact_id = %id, %reason, "artifact deleted but erase incomplete");
        }
        info!(artifact_id = %id, "deleted artifact");
        Ok(outcome)
    }

    /// Non-sensitive listing of the session user's artifacts.
    pub fn list_artifacts(&self, handle: &SessionHandle) -> Result<Vec<IndexEntry>> {
        self.enter();
        self.sessions.with_key(handle, |_| Ok(()))?;
        self.index.list(handle.user_id())
    }

    /// Artifacts whose prompt contains every word of `keyword`.
    pub fn search(&self, handle: &SessionHandle, keyword: &str) -> Result<Vec<IndexEntry>> {
        self.enter();
        let tokens = self
            .sessions
            .with_key(handle, |vmk| search_tokens(vmk, keyword))?;
        self.index.search(handle.user_id(), &tokens)
    }

    /// Stored artifacts with exactly this payload.
    pub fn find_duplicates(&self, handle: &SessionHandle, payload: &[u8]) -> Result<Vec<IndexEntry>> {
        self.enter();
        let fingerprint = self
            .sessions
            .with_key(handle, |vmk| cipher::fingerprint(vmk, payload))?;
        self.index
            .find_by_fingerprint(handle.user_id(), &encode_fingerprint(&fingerprint))
    }
}

fn create_private_dir(dir: &std::path::Path) -> Result<()> {
    if dir.exists() {
        return Ok(());
    }
    fs::create_dir_all(dir)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dir, fs::Permissions::from_mode(0o700))?;
    }
    Ok(())
}
