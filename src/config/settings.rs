use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::crypto::{KdfFloor, KdfParams};
use crate::errors::{ArtVaultError, Result};
use crate::retry::RetryPolicy;

/// Project-level configuration, loaded from `.artvault.toml`.
///
/// Every field has a default so ArtVault works without any config file.
/// Nothing reads these values directly: [`Settings::validate`] turns them
/// into a [`VaultConfig`] once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Directory (relative to project root) holding users, records and the index.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Where session-local secrets live. Must differ from the session blob dir.
    #[serde(default)]
    pub session_secret_dir: Option<String>,

    /// Argon2 memory cost in KiB (default: 64 MiB).
    #[serde(default = "default_kdf_memory_kib")]
    pub kdf_memory_kib: u32,

    #[serde(default = "default_kdf_iterations")]
    pub kdf_iterations: u32,

    #[serde(default = "default_kdf_parallelism")]
    pub kdf_parallelism: u32,

    /// Floor below which derivation refuses to run. May only be raised.
    #[serde(default = "default_min_kdf_memory_kib")]
    pub min_kdf_memory_kib: u32,

    #[serde(default = "default_min_kdf_iterations")]
    pub min_kdf_iterations: u32,

    #[serde(default = "default_min_kdf_parallelism")]
    pub min_kdf_parallelism: u32,

    /// Session lifetime in seconds (default: one hour).
    #[serde(default = "default_session_timeout_secs")]
    pub session_timeout_secs: u64,

    #[serde(default)]
    pub session_expiry: ExpiryMode,

    /// Keep an encrypted session blob so logins survive process restarts.
    #[serde(default = "default_persist_sessions")]
    pub persist_sessions: bool,

    /// Overwrite passes for secure deletion.
    #[serde(default = "default_erase_passes")]
    pub erase_passes: u32,
}

/// How activity affects session expiry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpiryMode {
    /// Every use of the key pushes expiry forward.
    #[default]
    Sliding,
    /// Expiry is fixed at login.
    Absolute,
}

// ── Serde default helpers ────────────────────────────────────────────

fn default_data_dir() -> String {
    ".artvault".to_string()
}

fn default_kdf_memory_kib() -> u32 {
    KdfParams::default().memory_kib
}

fn default_kdf_iterations() -> u32 {
    KdfParams::default().iterations
}

fn default_kdf_parallelism() -> u32 {
    KdfParams::default().parallelism
}

fn default_min_kdf_memory_kib() -> u32 {
    KdfFloor::BUILTIN.memory_kib
}

fn default_min_kdf_iterations() -> u32 {
    KdfFloor::BUILTIN.iterations
}

fn default_min_kdf_parallelism() -> u32 {
    KdfFloor::BUILTIN.parallelism
}

fn default_session_timeout_secs() -> u64 {
    3_600
}

fn default_persist_sessions() -> bool {
    true
}

fn default_erase_passes() -> u32 {
    3
}

// ── Validated configuration ──────────────────────────────────────────

/// Session timing and persistence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub timeout: Duration,
    pub mode: ExpiryMode,
    pub persist: bool,
}

/// Immutable, validated configuration handed to `Vault::open`.
#[derive(Debug, Clone)]
pub struct VaultConfig {
    pub data_dir: PathBuf,
    pub secret_dir: PathBuf,
    pub kdf: KdfParams,
    pub kdf_floor: KdfFloor,
    pub session: SessionConfig,
    pub erase_passes: u32,
    pub retry: RetryPolicy,
}

impl VaultConfig {
    pub fn users_dir(&self) -> PathBuf {
        self.data_dir.join("users")
    }

    pub fn vault_dir(&self) -> PathBuf {
        self.data_dir.join("vault")
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.data_dir.join("sessions")
    }

    pub fn index_path(&self) -> PathBuf {
        self.data_dir.join("index.db")
    }
}

// ── Implementation ───────────────────────────────────────────────────

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            session_secret_dir: None,
            kdf_memory_kib: default_kdf_memory_kib(),
            kdf_iterations: default_kdf_iterations(),
            kdf_parallelism: default_kdf_parallelism(),
            min_kdf_memory_kib: default_min_kdf_memory_kib(),
            min_kdf_iterations: default_min_kdf_iterations(),
            min_kdf_parallelism: default_min_kdf_parallelism(),
            session_timeout_secs: default_session_timeout_secs(),
            session_expiry: ExpiryMode::default(),
            persist_sessions: default_persist_sessions(),
            erase_passes: default_erase_passes(),
        }
    }
}

impl Settings {
    /// Name of the config file we look for in the project root.
    pub const FILE_NAME: &'static str = ".artvault.toml";

    /// Load settings from `<project_dir>/.artvault.toml`.
    ///
    /// If the file does not exist, defaults are returned.
    /// If the file exists but cannot be parsed, an error is returned.
    pub fn load(project_dir: &Path) -> Result<Self> {
        let config_path = project_dir.join(Self::FILE_NAME);

        if !config_path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(&config_path)?;

        toml::from_str(&contents).map_err(|e| {
            ArtVaultError::ConfigError(format!("Failed to parse {}: {e}", config_path.display()))
        })
    }

    pub fn kdf_params(&self) -> KdfParams {
        KdfParams {
            memory_kib: self.kdf_memory_kib,
            iterations: self.kdf_iterations,
            parallelism: self.kdf_parallelism,
        }
    }

    pub fn kdf_floor(&self) -> KdfFloor {
        KdfFloor {
            memory_kib: self.min_kdf_memory_kib,
            iterations: self.min_kdf_iterations,
            parallelism: self.min_kdf_parallelism,
        }
    }

    /// Check every value against its safety floor and resolve paths.
    pub fn validate(&self, project_dir: &Path) -> Result<VaultConfig> {
        let floor = self.kdf_floor();
        if floor.memory_kib < KdfFloor::BUILTIN.memory_kib
            || floor.iterations < KdfFloor::BUILTIN.iterations
            || floor.parallelism < KdfFloor::BUILTIN.parallelism
        {
            return Err(ArtVaultError::WeakParameters(format!(
                "configured floor may not go below {} KiB / {} iteration(s) / {} lane(s)",
                KdfFloor::BUILTIN.memory_kib,
                KdfFloor::BUILTIN.iterations,
                KdfFloor::BUILTIN.parallelism
            )));
        }

        let kdf = self.kdf_params();
        kdf.check(&floor)?;

        if self.session_timeout_secs == 0 {
            return Err(ArtVaultError::ConfigError(
                "session_timeout_secs must be positive".into(),
            ));
        }
        if self.erase_passes == 0 {
            return Err(ArtVaultError::ConfigError(
                "erase_passes must be at least 1".into(),
            ));
        }

        let data_dir = project_dir.join(&self.data_dir);
        let secret_dir = match &self.session_secret_dir {
            Some(dir) => project_dir.join(dir),
            None => default_secret_dir(),
        };

        let config = VaultConfig {
            data_dir,
            secret_dir,
            kdf,
            kdf_floor: floor,
            session: SessionConfig {
                timeout: Duration::from_secs(self.session_timeout_secs),
                mode: self.session_expiry,
                persist: self.persist_sessions,
            },
            erase_passes: self.erase_passes,
            retry: RetryPolicy::default(),
        };

        let secret = normalize(&config.secret_dir);
        let data = normalize(&config.data_dir);
        if secret.starts_with(&data) || data.starts_with(&secret) {
            return Err(ArtVaultError::ConfigError(format!(
                "session_secret_dir {} must live outside the data directory {}",
                config.secret_dir.display(),
                config.data_dir.display()
            )));
        }

        Ok(config)
    }
}

/// Resolve `.` and `..` lexically, without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}

/// `$ARTVAULT_SECRET_DIR`, else `$XDG_RUNTIME_DIR/artvault`, else a temp dir.
fn default_secret_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os("ARTVAULT_SECRET_DIR").filter(|d| !d.is_empty()) {
        return PathBuf::from(dir);
    }
    if let Some(dir) = std::env::var_os("XDG_RUNTIME_DIR").filter(|d| !d.is_empty()) {
        return PathBuf::from(dir).join("artvault");
    }
    std::env::temp_dir().join("artvault-secrets")
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn with_secret_dir(tmp: &TempDir) -> Settings {
        Settings {
            session_secret_dir: Some(tmp.path().join("secrets").display().to_string()),
            ..Settings::default()
        }
    }

    #[test]
    fn default_settings_are_sensible() {
        let s = Settings::default();
        assert_eq!(s.data_dir, ".artvault");
        assert_eq!(s.kdf_memory_kib, 65_536);
        assert_eq!(s.kdf_iterations, 3);
        assert_eq!(s.kdf_parallelism, 4);
        assert_eq!(s.session_timeout_secs, 3_600);
        assert_eq!(s.session_expiry, ExpiryMode::Sliding);
        assert_eq!(s.erase_passes, 3);
    }

    #[test]
    fn load_returns_defaults_when_no_config_file() {
        let tmp = TempDir::new().unwrap();
        let settings = Settings::load(tmp.path()).unwrap();
        assert_eq!(settings.data_dir, ".artvault");
    }

    #[test]
    fn load_parses_toml_file() {
        let tmp = TempDir::new().unwrap();
        let config = r#"
data_dir = "vaultdata"
kdf_memory_kib = 131072
kdf_iterations = 5
session_timeout_secs = 600
session_expiry = "absolute"
erase_passes = 7
"#;
        fs::write(tmp.path().join(".artvault.toml"), config).unwrap();

        let settings = Settings::load(tmp.path()).unwrap();
        assert_eq!(settings.data_dir, "vaultdata");
        assert_eq!(settings.kdf_memory_kib, 131_072);
        assert_eq!(settings.kdf_iterations, 5);
        assert_eq!(settings.kdf_parallelism, 4);
        assert_eq!(settings.session_expiry, ExpiryMode::Absolute);
        assert_eq!(settings.erase_passes, 7);
    }

    #[test]
    fn load_errors_on_invalid_toml() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(".artvault.toml"), "not valid {{toml").unwrap();
        assert!(Settings::load(tmp.path()).is_err());
    }

    #[test]
    fn validate_resolves_paths() {
        let tmp = TempDir::new().unwrap();
        let config = with_secret_dir(&tmp).validate(tmp.path()).unwrap();
        assert_eq!(config.data_dir, tmp.path().join(".artvault"));
        assert_eq!(config.sessions_dir(), tmp.path().join(".artvault/sessions"));
        assert_eq!(config.session.timeout, Duration::from_secs(3_600));
    }

    #[test]
    fn weak_kdf_params_are_rejected() {
        let tmp = TempDir::new().unwrap();
        let settings = Settings {
            kdf_memory_kib: 1_024,
            ..with_secret_dir(&tmp)
        };
        assert!(matches!(
            settings.validate(tmp.path()),
            Err(ArtVaultError::WeakParameters(_))
        ));
    }

    #[test]
    fn floor_cannot_be_lowered() {
        let tmp = TempDir::new().unwrap();
        let settings = Settings {
            min_kdf_memory_kib: 64,
            kdf_memory_kib: 64,
            ..with_secret_dir(&tmp)
        };
        assert!(matches!(
            settings.validate(tmp.path()),
            Err(ArtVaultError::WeakParameters(_))
        ));
    }

    #[test]
    fn raised_floor_applies() {
        let tmp = TempDir::new().unwrap();
        let settings = Settings {
            min_kdf_iterations: 4,
            ..with_secret_dir(&tmp)
        };
        assert!(matches!(
            settings.validate(tmp.path()),
            Err(ArtVaultError::WeakParameters(_))
        ));
    }

    #[test]
    fn zero_timeout_and_zero_passes_are_rejected() {
        let tmp = TempDir::new().unwrap();
        let no_timeout = Settings {
            session_timeout_secs: 0,
            ..with_secret_dir(&tmp)
        };
        let no_passes = Settings {
            erase_passes: 0,
            ..with_secret_dir(&tmp)
        };
        assert!(matches!(
            no_timeout.validate(tmp.path()),
            Err(ArtVaultError::ConfigError(_))
        ));
        assert!(matches!(
            no_passes.validate(tmp.path()),
            Err(ArtVaultError::ConfigError(_))
        ));
    }

    #[test]
    fn secret_dir_must_not_sit_beside_session_blobs() {
        let tmp = TempDir::new().unwrap();
        let settings = Settings {
            session_secret_dir: Some(".artvault/sessions".into()),
            ..Settings::default()
        };
        assert!(matches!(
            settings.validate(tmp.path()),
            Err(ArtVaultError::ConfigError(_))
        ));
    }

    #[test]
    fn secret_dir_must_live_outside_data_dir() {
        let tmp = TempDir::new().unwrap();
        for dir in [".artvault/secrets", "./.artvault/x/../keys", ".", "other/../.artvault"] {
            let settings = Settings {
                session_secret_dir: Some(dir.into()),
                ..Settings::default()
            };
            assert!(
                matches!(settings.validate(tmp.path()), Err(ArtVaultError::ConfigError(_))),
                "{dir} should be rejected"
            );
        }

        let sibling = Settings {
            session_secret_dir: Some("secrets".into()),
            ..Settings::default()
        };
        assert!(sibling.validate(tmp.path()).is_ok());
    }

    #[test]
    fn normalize_resolves_dot_components() {
        assert_eq!(normalize(Path::new("/a/./b/../c")), PathBuf::from("/a/c"));
        assert_eq!(normalize(Path::new("../x")), PathBuf::from("../x"));
    }
}
