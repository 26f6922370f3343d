//! Session lifecycle and the in-memory cache of unwrapped vault keys.
//!
//! ```text
//! LoggedOut -> Unlocking -> Active -> { Active (refresh), Expiring -> LoggedOut }
//! ```
//!
//! The Vault Master Key of an active session is owned by exactly one
//! slot in this manager.  Callers never receive it; they pass a
//! [`SessionHandle`] to [`SessionManager::with_key`], which lends the key
//! to a closure for the duration of that call only.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{ExpiryMode, SessionConfig};
use crate::crypto::VaultMasterKey;
use crate::erase;
use crate::errors::{ArtVaultError, Result};
use crate::vault::keymanager::VaultKeyManager;
use crate::vault::user::UserId;

use super::clock::{Clock, SystemClock};
use super::persist::{BlobHeader, SessionPersistence};

/// Opaque reference to one login.  Carries no key material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle {
    session_id: Uuid,
    user_id: UserId,
}

impl SessionHandle {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    LoggedOut,
    Unlocking,
    Active,
    Expiring,
}

/// Non-secret description of a live session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    pub session_id: Uuid,
    pub user_id: UserId,
    pub username: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub mode: ExpiryMode,
}

struct Slot {
    session_id: Uuid,
    username: String,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    state: SessionState,
    key: Arc<RwLock<Option<VaultMasterKey>>>,
}

impl Slot {
    fn header(&self, user_id: UserId) -> BlobHeader {
        BlobHeader {
            session_id: self.session_id,
            user_id,
            username: self.username.clone(),
            created_at: self.created_at,
            expires_at: self.expires_at,
        }
    }
}

#[derive(Default)]
struct Inner {
    slots: HashMap<UserId, Slot>,
    /// username -> ticket of the login currently deriving keys.
    unlocking: HashMap<String, u64>,
}

/// Marks a user `Unlocking` until dropped.
///
/// A later login for the same user replaces the ticket, which makes
/// this one stale; a stale or dropped guard can never activate.
struct UnlockingGuard<'a, C: Clock> {
    manager: &'a SessionManager<C>,
    username: String,
    ticket: u64,
}

impl<C: Clock> Drop for UnlockingGuard<'_, C> {
    fn drop(&mut self) {
        let mut inner = self.manager.lock();
        if inner.unlocking.get(&self.username) == Some(&self.ticket) {
            inner.unlocking.remove(&self.username);
        }
    }
}

pub struct SessionManager<C: Clock = SystemClock> {
    inner: Mutex<Inner>,
    tickets: AtomicU64,
    config: SessionConfig,
    persist: Option<SessionPersistence>,
    clock: C,
}

impl<C: Clock> SessionManager<C> {
    pub fn new(config: SessionConfig, persist: Option<SessionPersistence>, clock: C) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            tickets: AtomicU64::new(0),
            config,
            persist,
            clock,
        }
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn deadline(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        Duration::from_std(self.config.timeout)
            .ok()
            .and_then(|timeout| now.checked_add_signed(timeout))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Unlock the user's vault key and start an `Active` session.
    ///
    /// Key derivation runs without holding the session lock.  Any prior
    /// session of the same user is ended first.
    pub fn login(
        &self,
        keys: &VaultKeyManager,
        username: &str,
        password: &[u8],
    ) -> Result<SessionHandle> {
        let guard = self.begin_unlocking(username);
        let (user, vmk) = keys.unlock(username, password)?;
        self.activate(&guard, user.id, vmk)
    }

    fn begin_unlocking(&self, username: &str) -> UnlockingGuard<'_, C> {
        let ticket = self.tickets.fetch_add(1, Ordering::Relaxed);
        self.lock().unlocking.insert(username.to_string(), ticket);
        debug!(ticket, "session unlocking");
        UnlockingGuard {
            manager: self,
            username: username.to_string(),
            ticket,
        }
    }

    fn activate(
        &self,
        guard: &UnlockingGuard<'_, C>,
        user_id: UserId,
        vmk: VaultMasterKey,
    ) -> Result<SessionHandle> {
        let mut inner = self.lock();
        if inner.unlocking.get(&guard.username) != Some(&guard.ticket) {
            debug!(%user_id, "login superseded before activation");
            return Err(ArtVaultError::SessionNotActive);
        }
        inner.unlocking.remove(&guard.username);

        if let Some(prior) = inner.slots.remove(&user_id) {
            self.finish(user_id, prior, "superseded by new login", true);
        }

        let now = self.clock.now();
        let slot = Slot {
            session_id: Uuid::new_v4(),
            username: guard.username.clone(),
            created_at: now,
            expires_at: self.deadline(now),
            state: SessionState::Active,
            key: Arc::new(RwLock::new(None)),
        };

        if let Some(persist) = &self.persist {
            persist.save(&slot.header(user_id), &vmk)?;
        }

        let handle = SessionHandle {
            session_id: slot.session_id,
            user_id,
        };
        *slot.key.write().unwrap_or_else(PoisonError::into_inner) = Some(vmk);
        info!(session_id = %handle.session_id, %user_id, "session active");
        inner.slots.insert(user_id, slot);
        Ok(handle)
    }

    /// `Expiring` -> `LoggedOut`: wipe the key, drop persisted state.
    fn finish(&self, user_id: UserId, mut slot: Slot, reason: &str, remove_persisted: bool) {
        slot.state = SessionState::Expiring;
        {
            let mut key = slot.key.write().unwrap_or_else(PoisonError::into_inner);
            if let Some(mut vmk) = key.take() {
                erase::wipe(&mut vmk);
            }
        }

        if remove_persisted {
            if let Some(persist) = &self.persist {
                if let Err(e) = persist.remove(user_id) {
                    warn!(session_id = %slot.session_id, error = %e, "could not remove persisted session");
                }
            }
        }
        info!(session_id = %slot.session_id, reason, "session ended");
    }

    /// Lend the session's key to `f`.
    ///
    /// Fails with `SessionNotActive` unless `handle` names the current,
    /// unexpired session of its user.  In sliding mode a successful call
    /// pushes the expiry forward.
    pub fn with_key<T>(
        &self,
        handle: &SessionHandle,
        f: impl FnOnce(&VaultMasterKey) -> Result<T>,
    ) -> Result<T> {
        let (key, refreshed) = {
            let mut inner = self.lock();
            let now = self.clock.now();
            let slot = match inner.slots.get_mut(&handle.user_id) {
                Some(slot) if slot.session_id == handle.session_id => slot,
                _ => return Err(ArtVaultError::SessionNotActive),
            };

            if now >= slot.expires_at {
                if let Some(slot) = inner.slots.remove(&handle.user_id) {
                    self.finish(handle.user_id, slot, "expired", true);
                }
                return Err(ArtVaultError::SessionNotActive);
            }

            let refreshed = match self.config.mode {
                ExpiryMode::Sliding => {
                    slot.expires_at = self.deadline(now);
                    Some(slot.header(handle.user_id))
                }
                ExpiryMode::Absolute => None,
            };
            (Arc::clone(&slot.key), refreshed)
        };

        let guard = key.read().unwrap_or_else(PoisonError::into_inner);
        let vmk = guard.as_ref().ok_or(ArtVaultError::SessionNotActive)?;

        if let (Some(header), Some(persist)) = (refreshed, &self.persist) {
            if let Err(e) = persist.refresh(&header, vmk) {
                warn!(session_id = %header.session_id, error = %e, "could not refresh persisted session");
            }
        }

        f(vmk)
    }

    /// End a session.  Unknown or already-ended handles are a no-op.
    pub fn logout(&self, handle: &SessionHandle) {
        let mut inner = self.lock();
        let matches = inner
            .slots
            .get(&handle.user_id)
            .is_some_and(|slot| slot.session_id == handle.session_id);
        if matches {
            if let Some(slot) = inner.slots.remove(&handle.user_id) {
                self.finish(handle.user_id, slot, "logout", true);
            }
        }
    }

    /// Expire every session whose deadline has passed.  Returns how many.
    pub fn sweep_expired(&self) -> usize {
        let mut inner = self.lock();
        let now = self.clock.now();
        let expired: Vec<UserId> = inner
            .slots
            .iter()
            .filter(|(_, slot)| now >= slot.expires_at)
            .map(|(id, _)| *id)
            .collect();

        for user_id in &expired {
            if let Some(slot) = inner.slots.remove(user_id) {
                self.finish(*user_id, slot, "expired", true);
            }
        }
        expired.len()
    }

    /// Describe a live session without touching its expiry.
    pub fn session_info(&self, handle: &SessionHandle) -> Result<SessionInfo> {
        let mut inner = self.lock();
        let now = self.clock.now();
        let slot = match inner.slots.get(&handle.user_id) {
            Some(slot) if slot.session_id == handle.session_id => slot,
            _ => return Err(ArtVaultError::SessionNotActive),
        };

        if now >= slot.expires_at {
            if let Some(slot) = inner.slots.remove(&handle.user_id) {
                self.finish(handle.user_id, slot, "expired", true);
            }
            return Err(ArtVaultError::SessionNotActive);
        }

        Ok(SessionInfo {
            session_id: slot.session_id,
            user_id: handle.user_id,
            username: slot.username.clone(),
            created_at: slot.created_at,
            expires_at: slot.expires_at,
            mode: self.config.mode,
        })
    }

    pub fn state(&self, username: &str) -> SessionState {
        let inner = self.lock();
        if inner.unlocking.contains_key(username) {
            return SessionState::Unlocking;
        }
        let now = self.clock.now();
        inner
            .slots
            .values()
            .find(|slot| slot.username == username)
            .map_or(SessionState::LoggedOut, |slot| {
                if now >= slot.expires_at {
                    SessionState::Expiring
                } else {
                    slot.state
                }
            })
    }

    /// Whether an unwrapped key is currently cached for `user_id`.
    pub fn holds_key(&self, user_id: UserId) -> bool {
        let inner = self.lock();
        inner.slots.get(&user_id).is_some_and(|slot| {
            slot.key
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .is_some()
        })
    }

    /// Re-activate the most recent persisted session.
    ///
    /// `SessionExpired` if that session's deadline has passed (its blob
    /// and secret are erased); `SessionNotActive` if there is nothing to
    /// restore or it can no longer be opened.
    pub fn restore(&self) -> Result<SessionHandle> {
        let persist = self
            .persist
            .as_ref()
            .ok_or(ArtVaultError::SessionNotActive)?;
        let blob = persist.latest()?.ok_or(ArtVaultError::SessionNotActive)?;

        if self.clock.now() >= blob.expires_at {
            persist.remove(blob.user_id)?;
            info!(session_id = %blob.session_id, "persisted session expired");
            return Err(ArtVaultError::SessionExpired);
        }

        let vmk = match persist.open(&blob) {
            Ok(vmk) => vmk,
            Err(e) => {
                warn!(session_id = %blob.session_id, error = %e, "discarding unusable persisted session");
                persist.remove(blob.user_id)?;
                return Err(ArtVaultError::SessionNotActive);
            }
        };

        let handle = SessionHandle {
            session_id: blob.session_id,
            user_id: blob.user_id,
        };

        let mut inner = self.lock();
        if let Some(existing) = inner.slots.get(&blob.user_id) {
            if existing.session_id == blob.session_id {
                return Ok(handle);
            }
        }
        if let Some(prior) = inner.slots.remove(&blob.user_id) {
            self.finish(blob.user_id, prior, "replaced by restored session", false);
        }

        inner.slots.insert(
            blob.user_id,
            Slot {
                session_id: blob.session_id,
                username: blob.username.clone(),
                created_at: blob.created_at,
                expires_at: blob.expires_at,
                state: SessionState::Active,
                key: Arc::new(RwLock::new(Some(vmk))),
            },
        );
        debug!(session_id = %handle.session_id, "restored persisted session");
        Ok(handle)
    }
}
