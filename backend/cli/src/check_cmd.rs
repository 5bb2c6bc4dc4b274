//! `canopy check`: load the config and print the validation report.

use std::path::Path;

use anyhow::{bail, Result};

use canopy_config::{collect_referenced_vars, load_and_validate, load_config_value};

use crate::terminal_output::{note_error, note_info, note_success, note_warn};

pub async fn run(path: &Path) -> Result<()> {
    note_info(&format!("Checking {}", path.display()));

    let raw = load_config_value(path).await?;
    let vars = collect_referenced_vars(&raw);
    if !vars.is_empty() {
        note_info(&format!("References env vars: {}", vars.join(", ")));
    }

    let (config, report) = load_and_validate(path).await?;
    for warning in &report.warnings {
        note_warn(&format!("{}: {}", warning.path, warning.message));
    }
    for error in &report.errors {
        note_error(&format!("{}: {}", error.path, error.message));
    }

    if !report.is_valid() {
        bail!("config has {} error(s)", report.errors.len());
    }
    note_success(&format!(
        "{} remote(s), {} application(s), {} shared dependenc{}",
        config.remotes.len(),
        config.applications.len(),
        config.shared.len(),
        if config.shared.len() == 1 { "y" } else { "ies" }
    ));
    Ok(())
}
