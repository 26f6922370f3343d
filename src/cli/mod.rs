//! CLI module — Clap argument parser, output helpers, and command implementations.

pub mod commands;
pub mod output;

use std::path::PathBuf;

use clap::Parser;
use zeroize::Zeroizing;

use crate::config::{Settings, VaultConfig};
use crate::errors::{ArtVaultError, Result};
use crate::session::SessionHandle;
use crate::vault::Vault;

/// Minimum password length to prevent trivially weak passwords.
const MIN_PASSWORD_LEN: usize = 8;

/// Password for register, login and the current password on rotation.
pub const PASSWORD_ENV: &str = "ARTVAULT_PASSWORD";

/// New password on rotation.
pub const NEW_PASSWORD_ENV: &str = "ARTVAULT_NEW_PASSWORD";

/// ArtVault CLI: zero-knowledge encrypted vault for generated artifacts.
#[derive(Parser)]
#[command(
    name = "artvault",
    about = "Zero-knowledge encrypted vault for generated artifacts",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Data directory (overrides `data_dir` in .artvault.toml)
    #[arg(long, global = true)]
    pub data_dir: Option<String>,

    /// Show debug diagnostics on stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// All available subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Create a new account
    Register {
        /// Username (lowercase letters, digits, '_', '-', '.')
        #[arg(short, long)]
        user: String,
    },

    /// Unlock your vault and start a session
    Login {
        #[arg(short, long)]
        user: String,
    },

    /// End the current session and wipe its key
    Logout,

    /// Show the current session
    Whoami,

    /// Encrypt a file into the vault
    Add {
        /// File holding the artifact bytes (e.g. a PNG)
        file: PathBuf,

        /// Artifact id (default: the file name without extension)
        #[arg(long)]
        id: Option<String>,

        /// Re-encrypt an existing artifact id
        #[arg(long)]
        replace: bool,

        #[command(flatten)]
        metadata: MetadataArgs,
    },

    /// Decrypt an artifact to a file or stdout
    Export {
        /// Artifact id
        id: String,

        /// Output file path (writes raw bytes to stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Decrypt and print an artifact's generation metadata
    Show {
        /// Artifact id
        id: String,
    },

    /// List your artifacts
    List,

    /// Find artifacts whose prompt contains every word of KEYWORD
    Search {
        keyword: String,
    },

    /// Securely delete an artifact
    Delete {
        /// Artifact id
        id: String,
        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
    },

    /// Change your password (artifacts are not re-encrypted)
    RotatePassword,

    /// Show version information
    Version,

    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for (bash, zsh, fish, powershell)
        shell: String,
    },
}

/// Generation parameters recorded with an artifact.
#[derive(clap::Args, Debug, Default)]
pub struct MetadataArgs {
    /// Prompt the artifact was generated from
    #[arg(long)]
    pub prompt: Option<String>,

    #[arg(long)]
    pub negative_prompt: Option<String>,

    #[arg(long)]
    pub width: Option<u32>,

    #[arg(long)]
    pub height: Option<u32>,

    #[arg(long)]
    pub steps: Option<u32>,

    #[arg(long)]
    pub cfg_scale: Option<f64>,

    #[arg(long, allow_negative_numbers = true)]
    pub seed: Option<i64>,

    #[arg(long)]
    pub sampler: Option<String>,

    #[arg(long)]
    pub model: Option<String>,

    #[arg(long)]
    pub provider: Option<String>,

    /// JSON file with metadata; flags above override its fields
    #[arg(long)]
    pub metadata_file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Shared helpers used by multiple commands
// ---------------------------------------------------------------------------

/// Load `.artvault.toml` from the working directory and validate it.
pub fn load_config(cli: &Cli) -> Result<VaultConfig> {
    let cwd = std::env::current_dir()?;
    let mut settings = Settings::load(&cwd)?;
    if let Some(dir) = &cli.data_dir {
        settings.data_dir = dir.clone();
    }
    settings.validate(&cwd)
}

pub fn open_vault(cli: &Cli) -> Result<Vault> {
    Vault::open(load_config(cli)?)
}

/// Pick up the session started by an earlier `artvault login`.
pub fn resume_session(vault: &Vault) -> Result<SessionHandle> {
    vault.resume()
}

/// Get the password, trying in order:
/// 1. `ARTVAULT_PASSWORD` env var (scripts/CI)
/// 2. Interactive prompt
///
/// Returns `Zeroizing<String>` so the password is wiped from memory on drop.
pub fn prompt_password(prompt: &str) -> Result<Zeroizing<String>> {
    if let Some(pw) = password_from_env(PASSWORD_ENV) {
        return Ok(pw);
    }

    let pw = dialoguer::Password::new()
        .with_prompt(prompt)
        .interact()
        .map_err(|e| ArtVaultError::CommandFailed(format!("password prompt: {e}")))?;
    Ok(Zeroizing::new(pw))
}

/// Prompt for a new password with confirmation.
///
/// Respects `env_var` for scripted usage and enforces a minimum length.
pub fn prompt_new_password(env_var: &str) -> Result<Zeroizing<String>> {
    if let Some(pw) = password_from_env(env_var) {
        check_password_len(&pw)?;
        return Ok(pw);
    }

    loop {
        let password = Zeroizing::new(
            dialoguer::Password::new()
                .with_prompt("Choose password")
                .with_confirmation("Confirm password", "Passwords do not match, try again")
                .interact()
                .map_err(|e| ArtVaultError::CommandFailed(format!("password prompt: {e}")))?,
        );

        if let Err(e) = check_password_len(&password) {
            output::warning(&format!("{e}. Try again."));
            continue;
        }

        return Ok(password);
    }
}

fn password_from_env(var: &str) -> Option<Zeroizing<String>> {
    std::env::var(var)
        .ok()
        .filter(|pw| !pw.is_empty())
        .map(Zeroizing::new)
}

fn check_password_len(password: &str) -> Result<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ArtVaultError::InvalidInput(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}
