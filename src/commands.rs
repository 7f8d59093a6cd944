//! Implementations behind the `canvas` subcommands.
//!
//! Each command writes its report to the given writer so the binary can
//! point it at stdout and tests can capture it.

use anyhow::{Context, Result};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use canvas_runtime_core::diff::{compute_line_diff, diff_stats, render_unified};
use canvas_runtime_core::models::{DiffStats, Language};

use crate::dispatch::RunOutcome;
use crate::orchestrator::{MountTarget, Presentation, RenderOrchestrator, Workspace};
use crate::session::ConnectionBinding;
use crate::traits::{CapabilityKind, CapabilityRegistry, ConnectorRegistry};

fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

/// Language implied by a file's extension, `text` if unknown.
pub fn language_for_path(path: &Path) -> Language {
    path.extension()
        .and_then(|e| e.to_str())
        .map(Language::parse_lossy)
        .unwrap_or(Language::Text)
}

/// `canvas diff <old> <new>`
pub fn diff_files(old: &Path, new: &Path, out: &mut impl Write) -> Result<DiffStats> {
    let old_text = read_file(old)?;
    let new_text = read_file(new)?;
    let ops = compute_line_diff(&old_text, &new_text);
    let stats = diff_stats(&ops);

    writeln!(out, "--- {}", old.display())?;
    writeln!(out, "+++ {}", new.display())?;
    write!(out, "{}", render_unified(&ops))?;
    writeln!(
        out,
        "{} added, {} removed, {} unchanged",
        stats.added, stats.removed, stats.unchanged
    )?;
    Ok(stats)
}

/// Options for `canvas run`.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub language: Option<Language>,
    pub connector: Option<String>,
    pub connection: Option<String>,
    pub json: bool,
}

/// `canvas run <file>`: present the file, mount it, and execute it.
pub async fn run_file(
    workspace: Arc<Workspace>,
    path: &Path,
    options: &RunOptions,
    out: &mut impl Write,
) -> Result<RunOutcome> {
    let content = read_file(path)?;
    let language = options.language.unwrap_or_else(|| language_for_path(path));
    let title = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    let orchestrator = RenderOrchestrator::new(workspace.clone());
    let mut canvas = orchestrator
        .mount(
            Presentation::new(title, language, content),
            Some(MountTarget::new("cli")),
        )
        .await?;

    if options.connector.is_some() || options.connection.is_some() {
        let connector_id = match &options.connector {
            Some(id) => id.clone(),
            None => workspace
                .connectors
                .connector_for_language(language)
                .map(|c| c.id().to_string())
                .unwrap_or_default(),
        };
        let mut binding = ConnectionBinding::new(connector_id);
        if let Some(connection) = &options.connection {
            binding = binding.with_connection(connection.clone());
        }
        canvas.bind_connection(binding);
    }

    let outcome = canvas.run().await;
    canvas.unmount();

    match &outcome {
        RunOutcome::Cancelled => writeln!(out, "cancelled")?,
        RunOutcome::Finished(result) if options.json => {
            writeln!(out, "{}", serde_json::to_string_pretty(result)?)?;
        }
        RunOutcome::Finished(result) => {
            if let Some(output) = result.output() {
                write!(out, "{}", output)?;
                if !output.is_empty() && !output.ends_with('\n') {
                    writeln!(out)?;
                }
            }
            if let Some(error) = result.error() {
                writeln!(out, "error: {}", error)?;
            }
            writeln!(
                out,
                "({} units, {} ms)",
                result.stats.unit_count, result.stats.time_ms
            )?;
        }
    }
    Ok(outcome)
}

/// `canvas connectors`
pub fn list_connectors(registry: &ConnectorRegistry, out: &mut impl Write) -> Result<()> {
    writeln!(
        out,
        "{:<14} {:<18} {:<9} {:<8} NOTES",
        "CONNECTOR", "LANGUAGES", "EXTERNAL", "HEALTHY"
    )?;
    for status in registry.statuses() {
        writeln!(
            out,
            "{:<14} {:<18} {:<9} {:<8} {}",
            status.id,
            status.languages.to_string(),
            status.requires_external_backend,
            status.healthy,
            status.notes.unwrap_or_default()
        )?;
    }
    Ok(())
}

/// `canvas capabilities [--language <lang>]`
pub fn list_capabilities(
    registry: &CapabilityRegistry,
    language: Option<Language>,
    out: &mut impl Write,
) -> Result<()> {
    let capabilities = match language {
        Some(lang) => registry.active_for(lang),
        None => registry.capabilities().to_vec(),
    };
    writeln!(out, "{:<12} {:<10} {:<8} LANGUAGES", "CAPABILITY", "LABEL", "KIND")?;
    for capability in capabilities {
        let kind = match capability.kind() {
            CapabilityKind::Tab => "tab",
            CapabilityKind::Toolbar => "toolbar",
        };
        writeln!(
            out,
            "{:<12} {:<10} {:<8} {}",
            capability.id(),
            capability.label(),
            kind,
            capability.languages()
        )?;
    }
    Ok(())
}
