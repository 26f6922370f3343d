//! Vault Key Manager: registration, unlock and password rotation.
//!
//! Each user owns one random Vault Master Key (VMK).  At rest the VMK is
//! only ever stored wrapped under the password-derived key-encryption
//! key, bound to the user id.  Rotating the password rewraps the same
//! VMK, so artifacts never need re-encryption.

use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use tracing::{debug, info};

use crate::crypto::{
    derive, generate_salt, unwrap_key, wrap_key, KdfFloor, KdfParams, VaultMasterKey, Verifier,
};
use crate::errors::{ArtVaultError, Result};

use super::user::{validate_username, User, UserId, UserStore};

/// Fixed salt for the decoy derivation run for unknown usernames.
const DECOY_SALT: [u8; 32] = [0x5A; 32];

pub struct VaultKeyManager {
    users: UserStore,
    params: KdfParams,
    floor: KdfFloor,
    /// Serializes user-record writes: two registrations cannot claim one
    /// username and two rotations cannot interleave.
    write_lock: Mutex<()>,
}

impl VaultKeyManager {
    pub fn new(users: UserStore, params: KdfParams, floor: KdfFloor) -> Self {
        Self {
            users,
            params,
            floor,
            write_lock: Mutex::new(()),
        }
    }

    pub fn users(&self) -> &UserStore {
        &self.users
    }

    fn lock_writes(&self) -> Result<MutexGuard<'_, ()>> {
        self.write_lock
            .lock()
            .map_err(|_| ArtVaultError::CommandFailed("user record lock poisoned".into()))
    }

    /// Create an account with a fresh random VMK.
    pub fn register(&self, username: &str, password: &[u8]) -> Result<User> {
        validate_username(username)?;
        if password.is_empty() {
            return Err(ArtVaultError::InvalidInput("password cannot be empty".into()));
        }
        self.params.check(&self.floor)?;

        let _guard = self.lock_writes()?;

        if self.users.exists(username)? {
            return Err(ArtVaultError::UserAlreadyExists(username.to_string()));
        }

        let id = UserId::new();
        let salt = generate_salt();
        let keys = derive(password, &salt, &self.params, &self.floor)?;
        let vmk = VaultMasterKey::generate();
        let wrapped_key = wrap_key(&keys.kek, &vmk, &id.to_string())?;

        let now = Utc::now();
        let user = User {
            id,
            username: username.to_string(),
            salt: salt.to_vec(),
            verifier: keys.verifier.as_bytes().to_vec(),
            wrapped_key,
            kdf_params: self.params,
            created_at: now,
            updated_at: now,
        };
        self.users.save(&user)?;

        info!(user_id = %user.id, "registered user");
        Ok(user)
    }

    /// Verify the password and return the unwrapped VMK.
    ///
    /// Unknown usernames and wrong passwords fail identically with
    /// `InvalidCredentials`, after the same amount of derivation work.
    pub fn unlock(&self, username: &str, password: &[u8]) -> Result<(User, VaultMasterKey)> {
        let user = match validate_username(username).and_then(|()| self.users.load(username)) {
            Ok(Some(user)) => user,
            Ok(None) | Err(ArtVaultError::InvalidInput(_)) => {
                let _ = derive(password, &DECOY_SALT, &self.params, &self.floor);
                debug!("unlock attempt for unknown account");
                return Err(ArtVaultError::InvalidCredentials);
            }
            Err(e) => return Err(e),
        };

        user.kdf_params.check(&self.floor)?;

        let keys = derive(password, &user.salt, &user.kdf_params, &self.floor)?;
        let stored = Verifier::from_slice(&user.verifier)?;
        if !keys.verifier.matches(&stored) {
            debug!(user_id = %user.id, "verifier mismatch");
            return Err(ArtVaultError::InvalidCredentials);
        }

        let vmk = unwrap_key(&keys.kek, &user.wrapped_key, &user.id.to_string())?;
        debug!(user_id = %user.id, "unlocked vault key");
        Ok((user, vmk))
    }

    /// Rewrap the VMK under a new password.
    ///
    /// Salt, verifier and wrapped key rotate together in one atomic
    /// replace.  `confirm` sees the prepared record and the unwrapped VMK
    /// before anything is written; if it fails, or anything else does, the
    /// stored record is unchanged.  Returns the updated record.
    pub fn rotate_password(
        &self,
        username: &str,
        old_password: &[u8],
        new_password: &[u8],
        confirm: impl FnOnce(&User, &VaultMasterKey) -> Result<()>,
    ) -> Result<User> {
        if new_password.is_empty() {
            return Err(ArtVaultError::InvalidInput(
                "new password cannot be empty".into(),
            ));
        }

        let _guard = self.lock_writes()?;
        let (user, vmk) = self.unlock(username, old_password)?;

        let salt = generate_salt();
        let keys = derive(new_password, &salt, &self.params, &self.floor)?;
        let wrapped_key = wrap_key(&keys.kek, &vmk, &user.id.to_string())?;

        let rotated = User {
            salt: salt.to_vec(),
            verifier: keys.verifier.as_bytes().to_vec(),
            wrapped_key,
            kdf_params: self.params,
            updated_at: Utc::now(),
            ..user
        };
        confirm(&rotated, &vmk)?;
        self.users.save(&rotated)?;

        info!(user_id = %rotated.id, "rotated password");
        Ok(rotated)
    }
}
