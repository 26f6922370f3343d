//! `artvault list` — display the session user's artifacts in a table.

use crate::cli::output;
use crate::cli::{open_vault, resume_session, Cli};
use crate::errors::Result;

/// Execute the `list` command.
pub fn execute(cli: &Cli) -> Result<()> {
    let vault = open_vault(cli)?;
    let handle = resume_session(&vault)?;

    let entries = vault.list_artifacts(&handle)?;
    let username = vault.session_info(&handle)?.username;

    output::info(&format!("{username} — {} artifact(s)", entries.len()));
    output::print_artifacts_table(&entries);

    Ok(())
}
