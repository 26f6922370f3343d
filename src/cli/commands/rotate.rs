//! `artvault rotate-password` — change the login password.
//!
//! Only the wrapped vault key is rewritten. Artifacts stay sealed under
//! the same vault key, so nothing is re-encrypted.

use crate::cli::output;
use crate::cli::{
    open_vault, prompt_new_password, prompt_password, resume_session, Cli, NEW_PASSWORD_ENV,
};
use crate::errors::Result;

/// Execute the `rotate-password` command.
pub fn execute(cli: &Cli) -> Result<()> {
    let vault = open_vault(cli)?;
    let handle = resume_session(&vault)?;
    let username = vault.session_info(&handle)?.username;

    output::info("Enter your current password.");
    let old_password = prompt_password(&format!("Current password for {username}"))?;

    output::info("Choose your new password.");
    let new_password = prompt_new_password(NEW_PASSWORD_ENV)?;

    vault.rotate_password(&handle, old_password.as_bytes(), new_password.as_bytes())?;

    output::success(&format!("Password rotated for '{username}'"));
    Ok(())
}
