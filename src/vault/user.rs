//! User records and their on-disk store.
//!
//! One JSON file per account at `<data_dir>/users/<username>.json`.
//! A record never holds plaintext key material: only the password salt,
//! the derived verifier and the wrapped Vault Master Key.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::crypto::{KdfParams, WrappedKey};
use crate::errors::{ArtVaultError, Result};
use crate::retry::{retry_io, RetryPolicy};

use super::format::{base64_decode, base64_encode, write_atomic};

/// Stable, opaque user identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(Uuid);

impl UserId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| ArtVaultError::InvalidInput(format!("'{s}' is not a valid user id")))
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A registered account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,

    #[serde(serialize_with = "base64_encode", deserialize_with = "base64_decode")]
    pub salt: Vec<u8>,

    #[serde(serialize_with = "base64_encode", deserialize_with = "base64_decode")]
    pub verifier: Vec<u8>,

    pub wrapped_key: WrappedKey,

    /// The derivation cost this account was registered (or last rotated) with.
    pub kdf_params: KdfParams,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Reads and atomically writes user records.
#[derive(Debug, Clone)]
pub struct UserStore {
    dir: PathBuf,
    retry: RetryPolicy,
}

impl UserStore {
    pub fn new(dir: impl Into<PathBuf>, retry: RetryPolicy) -> Self {
        Self {
            dir: dir.into(),
            retry,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, username: &str) -> PathBuf {
        self.dir.join(format!("{username}.json"))
    }

    pub fn exists(&self, username: &str) -> Result<bool> {
        validate_username(username)?;
        Ok(self.path_for(username).exists())
    }

    /// Load a user, or `None` if no such account exists.
    pub fn load(&self, username: &str) -> Result<Option<User>> {
        validate_username(username)?;
        let path = self.path_for(username);
        if !path.exists() {
            return Ok(None);
        }

        let data = retry_io(&self.retry, "read user record", || Ok(fs::read(&path)?))?;
        let user: User = serde_json::from_slice(&data)
            .map_err(|e| ArtVaultError::InvalidRecordFormat(format!("user record: {e}")))?;
        Ok(Some(user))
    }

    /// Find the account that owns `id`.
    pub fn load_by_id(&self, id: UserId) -> Result<Option<User>> {
        if !self.dir.exists() {
            return Ok(None);
        }
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if let Some(user) = self.load(name)? {
                if user.id == id {
                    return Ok(Some(user));
                }
            }
        }
        Ok(None)
    }

    /// Write (create or replace) a user record all-or-nothing.
    pub fn save(&self, user: &User) -> Result<()> {
        validate_username(&user.username)?;
        let json = serde_json::to_vec_pretty(user)
            .map_err(|e| ArtVaultError::SerializationError(format!("user record: {e}")))?;
        write_atomic(&self.path_for(&user.username), &json, &self.retry)
    }
}

/// Validate that a username is safe to use as a file name.
///
/// Allowed: lowercase ASCII letters, digits, underscores, hyphens, periods.
/// 3 to 50 characters, not starting with a period.
pub fn validate_username(name: &str) -> Result<()> {
    if name.len() < 3 || name.len() > 50 {
        return Err(ArtVaultError::InvalidInput(
            "username must be 3 to 50 characters".into(),
        ));
    }
    if name.starts_with('.') {
        return Err(ArtVaultError::InvalidInput(
            "username cannot start with a period".into(),
        ));
    }
    if !name.bytes().all(|b| {
        b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_' || b == b'-' || b == b'.'
    }) {
        return Err(ArtVaultError::InvalidInput(format!(
            "username '{name}' may only contain lowercase letters, digits, '_', '-' and '.'"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample(username: &str) -> User {
        let now = Utc::now();
        User {
            id: UserId::new(),
            username: username.into(),
            salt: vec![1; 32],
            verifier: vec![2; 32],
            wrapped_key: WrappedKey {
                nonce: vec![3; 12],
                ciphertext: vec![4; 48],
            },
            kdf_params: KdfParams::default(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn save_then_load() {
        let dir = TempDir::new().unwrap();
        let store = UserStore::new(dir.path(), RetryPolicy::none());
        let user = sample("alice");
        store.save(&user).unwrap();

        assert!(store.exists("alice").unwrap());
        assert_eq!(store.load("alice").unwrap(), Some(user.clone()));
        assert_eq!(store.load_by_id(user.id).unwrap(), Some(user));
    }

    #[test]
    fn missing_user_is_none() {
        let dir = TempDir::new().unwrap();
        let store = UserStore::new(dir.path().join("users"), RetryPolicy::none());
        assert!(store.load("bob").unwrap().is_none());
        assert!(store.load_by_id(UserId::new()).unwrap().is_none());
    }

    #[test]
    fn corrupt_record_is_a_format_error() {
        let dir = TempDir::new().unwrap();
        let store = UserStore::new(dir.path(), RetryPolicy::none());
        fs::write(dir.path().join("carol.json"), b"{not json").unwrap();
        assert!(matches!(
            store.load("carol"),
            Err(ArtVaultError::InvalidRecordFormat(_))
        ));
    }

    #[test]
    fn username_validation() {
        assert!(validate_username("alice").is_ok());
        assert!(validate_username("a.b-c_9").is_ok());
        assert!(validate_username("ab").is_err());
        assert!(validate_username("../etc").is_err());
        assert!(validate_username(".hidden").is_err());
        assert!(validate_username("Alice").is_err());
        assert!(validate_username(&"x".repeat(51)).is_err());
    }

    #[test]
    fn user_id_display_parses_back() {
        let id = UserId::new();
        assert_eq!(UserId::parse(&id.to_string()).unwrap(), id);
        assert!(UserId::parse("nope").is_err());
    }
}
