//! `artvault delete` — securely erase an artifact.

use dialoguer::Confirm;

use crate::cli::output;
use crate::cli::{open_vault, resume_session, Cli};
use crate::erase::EraseOutcome;
use crate::errors::{ArtVaultError, Result};

/// Execute the `delete` command.
pub fn execute(cli: &Cli, id: &str, force: bool) -> Result<()> {
    let vault = open_vault(cli)?;
    let handle = resume_session(&vault)?;

    // Unless --force is set, ask for confirmation before deleting.
    if !force {
        let confirmed = Confirm::new()
            .with_prompt(format!("Permanently erase artifact '{id}'?"))
            .default(false)
            .interact()
            .map_err(|e| ArtVaultError::CommandFailed(format!("confirm prompt: {e}")))?;

        if !confirmed {
            output::info("Cancelled.");
            return Ok(());
        }
    }

    match vault.delete_artifact(&handle, id)? {
        EraseOutcome::Complete => output::success(&format!("Erased artifact '{id}'")),
        EraseOutcome::Incomplete { reason } => {
            output::success(&format!("Deleted artifact '{id}'"));
            output::warning(&format!("secure erase could not be confirmed: {reason}"));
        }
    }

    Ok(())
}
