//! `artvault export` — decrypt an artifact's payload.
//!
//! Writes to `--output` (created with owner-only permissions) or raw
//! bytes to stdout.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use crate::cli::output;
use crate::cli::{open_vault, resume_session, Cli};
use crate::errors::{ArtVaultError, Result};

/// Execute the `export` command.
pub fn execute(cli: &Cli, id: &str, output_path: Option<&Path>) -> Result<()> {
    let vault = open_vault(cli)?;
    let handle = resume_session(&vault)?;

    let decrypted = vault.decrypt_artifact(&handle, id)?;

    match output_path {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            write_private(path, &decrypted.payload)?;
            output::success(&format!(
                "Exported '{id}' to {} ({} bytes)",
                path.display(),
                decrypted.payload.len()
            ));
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout
                .write_all(&decrypted.payload)
                .and_then(|()| stdout.flush())
                .map_err(|e| ArtVaultError::CommandFailed(format!("write to stdout: {e}")))?;
        }
    }

    Ok(())
}

fn write_private(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(())
}
