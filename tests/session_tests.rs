//! Session lifecycle tests driven by a manual clock.

use std::time::Duration as StdDuration;

use artvault::config::{ExpiryMode, Settings, VaultConfig};
use artvault::errors::ArtVaultError;
use artvault::session::{ManualClock, SessionState};
use artvault::vault::{GenerationMetadata, Vault};
use chrono::{Duration, TimeZone, Utc};
use tempfile::TempDir;

const TIMEOUT_SECS: u64 = 600;

fn config(dir: &TempDir, mode: ExpiryMode) -> VaultConfig {
    Settings {
        kdf_memory_kib: 8_192,
        kdf_iterations: 1,
        kdf_parallelism: 1,
        session_secret_dir: Some("secrets".into()),
        session_timeout_secs: TIMEOUT_SECS,
        session_expiry: mode,
        erase_passes: 1,
        ..Settings::default()
    }
    .validate(dir.path())
    .expect("valid settings")
}

fn clock() -> ManualClock {
    ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap())
}

fn vault(dir: &TempDir, mode: ExpiryMode, clock: &ManualClock) -> Vault<ManualClock> {
    let vault = Vault::with_clock(config(dir, mode), clock.clone()).expect("open vault");
    vault.register("alice", b"alice-password").ok();
    vault
}

#[test]
fn absolute_session_expires_and_wipes_key() {
    let dir = TempDir::new().unwrap();
    let clock = clock();
    let vault = vault(&dir, ExpiryMode::Absolute, &clock);
    let s = vault.login("alice", b"alice-password").unwrap();
    assert_eq!(vault.session_state("alice"), SessionState::Active);

    clock.advance(Duration::seconds(TIMEOUT_SECS as i64 - 1));
    vault.list_artifacts(&s).unwrap();

    // Activity does not extend an absolute session.
    clock.advance(Duration::seconds(1));
    assert_eq!(vault.session_state("alice"), SessionState::Expiring);
    assert!(matches!(
        vault.list_artifacts(&s),
        Err(ArtVaultError::SessionNotActive)
    ));
    assert!(!vault.holds_key(s.user_id()));
    assert_eq!(vault.session_state("alice"), SessionState::LoggedOut);
}

#[test]
fn sliding_session_stays_alive_while_used() {
    let dir = TempDir::new().unwrap();
    let clock = clock();
    let vault = vault(&dir, ExpiryMode::Sliding, &clock);
    let s = vault.login("alice", b"alice-password").unwrap();

    for _ in 0..5 {
        clock.advance(Duration::seconds(TIMEOUT_SECS as i64 - 10));
        vault.list_artifacts(&s).unwrap();
    }
    assert!(vault.holds_key(s.user_id()));

    clock.advance(Duration::seconds(TIMEOUT_SECS as i64));
    assert!(matches!(
        vault.decrypt_artifact(&s, "anything"),
        Err(ArtVaultError::SessionNotActive)
    ));
    assert!(!vault.holds_key(s.user_id()));
}

#[test]
fn expired_sessions_are_swept_on_any_entry_point() {
    let dir = TempDir::new().unwrap();
    let clock = clock();
    let vault = vault(&dir, ExpiryMode::Absolute, &clock);
    vault.register("bob", b"bob-password").unwrap();
    let alice = vault.login("alice", b"alice-password").unwrap();

    clock.advance(Duration::seconds(TIMEOUT_SECS as i64 + 1));
    // Bob's login is unrelated, but still clears alice's stale key.
    vault.login("bob", b"bob-password").unwrap();
    assert!(!vault.holds_key(alice.user_id()));
}

#[test]
fn second_login_invalidates_first_handle() {
    let dir = TempDir::new().unwrap();
    let clock = clock();
    let vault = vault(&dir, ExpiryMode::Sliding, &clock);

    let first = vault.login("alice", b"alice-password").unwrap();
    let second = vault.login("alice", b"alice-password").unwrap();
    assert_ne!(first.session_id(), second.session_id());

    let meta = GenerationMetadata::default();
    assert!(matches!(
        vault.encrypt_artifact(&first, "img", b"x", &meta),
        Err(ArtVaultError::SessionNotActive)
    ));
    vault.encrypt_artifact(&second, "img", b"x", &meta).unwrap();
}

#[test]
fn failed_login_leaves_user_logged_out() {
    let dir = TempDir::new().unwrap();
    let clock = clock();
    let vault = vault(&dir, ExpiryMode::Sliding, &clock);

    assert!(vault.login("alice", b"nope").is_err());
    assert_eq!(vault.session_state("alice"), SessionState::LoggedOut);
}

#[test]
fn logout_wipes_key_and_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let clock = clock();
    let vault = vault(&dir, ExpiryMode::Sliding, &clock);
    let s = vault.login("alice", b"alice-password").unwrap();

    vault.logout(&s);
    vault.logout(&s);
    assert!(!vault.holds_key(s.user_id()));
    assert!(matches!(
        vault.session_info(&s),
        Err(ArtVaultError::SessionNotActive)
    ));
}

// ---------------------------------------------------------------------------
// Persisted sessions (one Vault per simulated process)
// ---------------------------------------------------------------------------

#[test]
fn persisted_session_resumes_in_a_new_process() {
    let dir = TempDir::new().unwrap();
    let clock = clock();

    let first = vault(&dir, ExpiryMode::Sliding, &clock);
    let s = first.login("alice", b"alice-password").unwrap();
    first
        .encrypt_artifact(&s, "fox", b"pixels", &GenerationMetadata::with_prompt("fox"))
        .unwrap();
    drop(first);

    clock.advance(Duration::seconds(60));
    let second = vault(&dir, ExpiryMode::Sliding, &clock);
    let resumed = second.resume().unwrap();
    assert_eq!(resumed.session_id(), s.session_id());

    let out = second.decrypt_artifact(&resumed, "fox").unwrap();
    assert_eq!(&out.payload[..], b"pixels");
}

#[test]
fn expired_persisted_session_reports_expiry_once() {
    let dir = TempDir::new().unwrap();
    let clock = clock();

    let first = vault(&dir, ExpiryMode::Absolute, &clock);
    first.login("alice", b"alice-password").unwrap();
    drop(first);

    clock.advance(Duration::from_std(StdDuration::from_secs(TIMEOUT_SECS)).unwrap());
    let second = vault(&dir, ExpiryMode::Absolute, &clock);
    assert!(matches!(second.resume(), Err(ArtVaultError::SessionExpired)));
    // The blob was erased, so there is nothing left to resume.
    assert!(matches!(second.resume(), Err(ArtVaultError::SessionNotActive)));
}

#[test]
fn logout_removes_persisted_session() {
    let dir = TempDir::new().unwrap();
    let clock = clock();

    let first = vault(&dir, ExpiryMode::Sliding, &clock);
    let s = first.login("alice", b"alice-password").unwrap();
    first.logout(&s);
    drop(first);

    let second = vault(&dir, ExpiryMode::Sliding, &clock);
    assert!(matches!(second.resume(), Err(ArtVaultError::SessionNotActive)));
}

#[test]
fn concurrent_logins_leave_exactly_one_session() {
    let dir = TempDir::new().unwrap();
    let clock = clock();
    let vault = vault(&dir, ExpiryMode::Sliding, &clock);

    let handles: Vec<_> = std::thread::scope(|scope| {
        let workers: Vec<_> = (0..4)
            .map(|_| scope.spawn(|| vault.login("alice", b"alice-password")))
            .collect();
        workers.into_iter().map(|w| w.join().unwrap()).collect()
    });

    let live = handles
        .iter()
        .filter_map(|h| h.as_ref().ok())
        .filter(|h| vault.session_info(h).is_ok())
        .count();
    assert_eq!(live, 1);
    assert_eq!(vault.session_state("alice"), SessionState::Active);
}
