//! `artvault show` — print an artifact's decrypted generation metadata.

use crate::cli::output;
use crate::cli::{open_vault, resume_session, Cli};
use crate::errors::Result;

/// Execute the `show` command.
pub fn execute(cli: &Cli, id: &str) -> Result<()> {
    let vault = open_vault(cli)?;
    let handle = resume_session(&vault)?;

    let decrypted = vault.decrypt_artifact(&handle, id)?;
    output::print_metadata(id, &decrypted.metadata);
    output::info(&format!("{} byte payload", decrypted.payload.len()));

    Ok(())
}
