use std::path::PathBuf;
use thiserror::Error;

/// All errors that can occur in ArtVault.
#[derive(Debug, Error)]
pub enum ArtVaultError {
    // --- Authentication errors ---
    /// Wrong username or wrong password. Deliberately does not say which.
    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("User '{0}' already exists")]
    UserAlreadyExists(String),

    // --- Crypto errors ---
    /// AEAD tag mismatch: the ciphertext was tampered with or corrupted.
    #[error("Integrity check failed — wrong key or corrupted data")]
    AuthenticationFailed,

    /// The record was sealed under a different vault key.
    #[error("Integrity check failed — wrong key or corrupted data")]
    KeyDerivationMismatch,

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivationFailed(String),

    #[error("Refusing to run with weak key-derivation parameters: {0}")]
    WeakParameters(String),

    // --- Session errors ---
    #[error("Session expired — please log in again")]
    SessionExpired,

    #[error("No active session — please log in")]
    SessionNotActive,

    // --- Vault errors ---
    #[error("'{0}' not found")]
    NotFound(String),

    #[error("Artifact '{0}' already exists (use replace to re-encrypt it)")]
    ArtifactAlreadyExists(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid record format: {0}")]
    InvalidRecordFormat(String),

    // --- Erasure errors ---
    #[error("Secure erase of {} could not be confirmed: {reason}", path.display())]
    SecureEraseIncomplete { path: PathBuf, reason: String },

    // --- Index errors ---
    #[error("Index error: {0}")]
    IndexError(String),

    // --- Config errors ---
    #[error("Config error: {0}")]
    ConfigError(String),

    // --- IO errors ---
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // --- Serialization errors ---
    #[error("Serialization error: {0}")]
    SerializationError(String),

    // --- CLI errors ---
    #[error("Command failed: {0}")]
    CommandFailed(String),
}

impl ArtVaultError {
    /// Whether retrying the failed operation could succeed.
    ///
    /// Only transient I/O errors qualify. Cryptographic failures are never
    /// retried: a forged ciphertext stays forged.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }
}

/// Convenience type alias for ArtVault results.
pub type Result<T> = std::result::Result<T, ArtVaultError>;
