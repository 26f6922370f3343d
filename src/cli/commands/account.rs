//! `artvault register`, `login`, `logout` and `whoami`.

use crate::cli::output;
use crate::cli::{
    open_vault, prompt_new_password, prompt_password, resume_session, Cli, PASSWORD_ENV,
};
use crate::errors::{ArtVaultError, Result};

/// Execute the `register` command.
pub fn register(cli: &Cli, username: &str) -> Result<()> {
    let vault = open_vault(cli)?;
    let password = prompt_new_password(PASSWORD_ENV)?;

    let user = vault.register(username, password.as_bytes())?;

    output::success(&format!("Registered '{}'", user.username));
    output::tip(&format!("Run `artvault login --user {}` to unlock your vault.", user.username));
    Ok(())
}

/// Execute the `login` command.
pub fn login(cli: &Cli, username: &str) -> Result<()> {
    let vault = open_vault(cli)?;
    let password = prompt_password(&format!("Password for {username}"))?;

    let handle = vault.login(username, password.as_bytes())?;
    let info = vault.session_info(&handle)?;

    output::success(&format!("Logged in as '{}'", info.username));
    output::print_session(&info);
    if !vault.config().session.persist {
        output::warning("persist_sessions is off; this session ends when the process exits.");
    }
    Ok(())
}

/// Execute the `logout` command.
pub fn logout(cli: &Cli) -> Result<()> {
    let vault = open_vault(cli)?;

    match resume_session(&vault) {
        Ok(handle) => {
            let username = vault.session_info(&handle)?.username;
            vault.logout(&handle);
            output::success(&format!("Logged out '{username}'"));
            Ok(())
        }
        Err(ArtVaultError::SessionNotActive | ArtVaultError::SessionExpired) => {
            output::info("No active session.");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Execute the `whoami` command.
pub fn whoami(cli: &Cli) -> Result<()> {
    let vault = open_vault(cli)?;
    let handle = resume_session(&vault)?;
    let info = vault.session_info(&handle)?;
    output::print_session(&info);
    Ok(())
}
