//! `artvault search` — find artifacts by prompt keywords.

use crate::cli::output;
use crate::cli::{open_vault, resume_session, Cli};
use crate::errors::{ArtVaultError, Result};
use crate::index::normalize_words;

/// Execute the `search` command.
pub fn execute(cli: &Cli, keyword: &str) -> Result<()> {
    if normalize_words(keyword).is_empty() {
        return Err(ArtVaultError::InvalidInput(
            "search needs at least one word".into(),
        ));
    }

    let vault = open_vault(cli)?;
    let handle = resume_session(&vault)?;

    let hits = vault.search(&handle, keyword)?;
    if hits.is_empty() {
        output::info(&format!("No artifacts match '{keyword}'."));
        return Ok(());
    }

    output::info(&format!("{} artifact(s) match '{keyword}'", hits.len()));
    output::print_artifacts_table(&hits);
    Ok(())
}
