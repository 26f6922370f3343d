//! `artvault add` — encrypt a file and its generation metadata.

use std::fs;
use std::path::Path;

use zeroize::Zeroizing;

use crate::cli::output;
use crate::cli::{open_vault, resume_session, Cli, MetadataArgs};
use crate::errors::{ArtVaultError, Result};
use crate::vault::GenerationMetadata;

/// Execute the `add` command.
pub fn execute(
    cli: &Cli,
    file: &Path,
    id: Option<&str>,
    replace: bool,
    args: &MetadataArgs,
) -> Result<()> {
    let artifact_id = match id {
        Some(id) => id.to_string(),
        None => default_id(file)?,
    };
    let metadata = build_metadata(args)?;

    let payload = Zeroizing::new(fs::read(file).map_err(|e| {
        ArtVaultError::CommandFailed(format!("cannot read {}: {e}", file.display()))
    })?);

    let vault = open_vault(cli)?;
    let handle = resume_session(&vault)?;

    let duplicates: Vec<_> = vault
        .find_duplicates(&handle, &payload)?
        .into_iter()
        .filter(|e| e.artifact_id.as_str() != artifact_id)
        .collect();

    if replace {
        vault.replace_artifact(&handle, &artifact_id, &payload, &metadata)?;
        output::success(&format!("Re-encrypted '{artifact_id}'"));
    } else {
        vault.encrypt_artifact(&handle, &artifact_id, &payload, &metadata)?;
        output::success(&format!("Encrypted '{artifact_id}' ({} bytes)", payload.len()));
    }

    for dup in &duplicates {
        output::warning(&format!("identical payload already stored as '{}'", dup.artifact_id));
    }
    Ok(())
}

/// File name without its extension.
fn default_id(file: &Path) -> Result<String> {
    file.file_stem()
        .and_then(|s| s.to_str())
        .map(str::to_string)
        .ok_or_else(|| {
            ArtVaultError::InvalidInput(format!(
                "cannot derive an artifact id from {}; pass --id",
                file.display()
            ))
        })
}

/// Metadata from `--metadata-file` (if any) with individual flags on top.
fn build_metadata(args: &MetadataArgs) -> Result<GenerationMetadata> {
    let mut m = match &args.metadata_file {
        Some(path) => {
            let content = fs::read_to_string(path).map_err(|e| {
                ArtVaultError::CommandFailed(format!("cannot read {}: {e}", path.display()))
            })?;
            serde_json::from_str(&content).map_err(|e| {
                ArtVaultError::InvalidInput(format!("{}: {e}", path.display()))
            })?
        }
        None => GenerationMetadata::default(),
    };

    if let Some(v) = &args.prompt {
        m.prompt = Some(v.clone());
    }
    if let Some(v) = &args.negative_prompt {
        m.negative_prompt = Some(v.clone());
    }
    m.width = args.width.or(m.width);
    m.height = args.height.or(m.height);
    m.steps = args.steps.or(m.steps);
    m.cfg_scale = args.cfg_scale.or(m.cfg_scale);
    m.seed = args.seed.or(m.seed);
    if let Some(v) = &args.sampler {
        m.sampler = Some(v.clone());
    }
    if let Some(v) = &args.model {
        m.model = Some(v.clone());
    }
    if let Some(v) = &args.provider {
        m.provider = Some(v.clone());
    }
    Ok(m)
}
