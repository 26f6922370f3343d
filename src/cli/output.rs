//! Colored terminal output helpers.
//!
//! All user-facing output goes through these functions so we get
//! consistent styling across every command.

use comfy_table::{ContentArrangement, Table};
use console::style;

use crate::config::ExpiryMode;
use crate::index::IndexEntry;
use crate::session::SessionInfo;
use crate::vault::GenerationMetadata;

/// Characters of the fingerprint shown in tables.
const FINGERPRINT_PREFIX: usize = 12;

/// Print a green success message: "check_mark {msg}"
pub fn success(msg: &str) {
    println!("{} {}", style("\u{2713}").green().bold(), msg);
}

/// Print a red error message: "x_mark {msg}"
pub fn error(msg: &str) {
    eprintln!("{} {}", style("\u{2717}").red().bold(), msg);
}

/// Print a yellow warning: "warning_sign {msg}"
pub fn warning(msg: &str) {
    eprintln!("{} {}", style("\u{26a0}").yellow().bold(), msg);
}

/// Print a blue info message: "info_sign {msg}"
pub fn info(msg: &str) {
    println!("{} {}", style("\u{2139}").blue().bold(), msg);
}

/// Print a dim tip/hint: "arrow {msg}"
pub fn tip(msg: &str) {
    println!("{} {}", style("\u{2192}").dim(), style(msg).dim());
}

/// Print a table of artifacts (Id, Created, Fingerprint).
pub fn print_artifacts_table(entries: &[IndexEntry]) {
    if entries.is_empty() {
        info("No artifacts in your vault yet.");
        tip("Run `artvault add <FILE>` to encrypt your first artifact.");
        return;
    }

    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Id", "Created", "Fingerprint"]);

    for e in entries {
        table.add_row(vec![
            e.artifact_id.to_string(),
            e.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            fingerprint_prefix(&e.fingerprint).to_string(),
        ]);
    }

    println!("{table}");
}

/// Print decrypted generation metadata as a two-column table.
pub fn print_metadata(id: &str, metadata: &GenerationMetadata) {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Field", "Value"]);

    for (field, value) in metadata_rows(metadata) {
        table.add_row(vec![field, value]);
    }

    println!("{}", style(id).bold());
    println!("{table}");
}

/// Print the session summary shown by `login` and `whoami`.
pub fn print_session(info: &SessionInfo) {
    let mode = match info.mode {
        ExpiryMode::Sliding => "sliding",
        ExpiryMode::Absolute => "absolute",
    };
    println!("{} {}", style("User:").bold(), info.username);
    println!("{} {}", style("Session:").bold(), info.session_id);
    println!(
        "{} {} ({mode})",
        style("Expires:").bold(),
        info.expires_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
}

fn fingerprint_prefix(fingerprint: &str) -> &str {
    fingerprint
        .char_indices()
        .nth(FINGERPRINT_PREFIX)
        .map_or(fingerprint, |(i, _)| &fingerprint[..i])
}

fn metadata_rows(m: &GenerationMetadata) -> Vec<(String, String)> {
    let mut rows = Vec::new();
    let mut push = |name: &str, value: Option<String>| {
        if let Some(v) = value {
            rows.push((name.to_string(), v));
        }
    };

    push("prompt", m.prompt.clone());
    push("negative_prompt", m.negative_prompt.clone());
    push("width", m.width.map(|v| v.to_string()));
    push("height", m.height.map(|v| v.to_string()));
    push("steps", m.steps.map(|v| v.to_string()));
    push("cfg_scale", m.cfg_scale.map(|v| v.to_string()));
    push("seed", m.seed.map(|v| v.to_string()));
    push("sampler", m.sampler.clone());
    push("model", m.model.clone());
    push("provider", m.provider.clone());

    for (key, value) in &m.extra {
        let rendered = match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        rows.push((key.clone(), rendered));
    }
    rows
}
