//! CLI handlers for the `synapse config` subcommand.

use anyhow::{Context, Result};
use synapse_config::{ResolvedConfig, ShowFormat};

use crate::theme::Theme;

/// Print the resolved configuration, optionally followed by the fields that
/// differ from the embedded defaults and where they came from.
pub(crate) fn show_config(resolved: &ResolvedConfig, format: &str, sources: bool) -> Result<()> {
    let show_format = match format {
        "json" => ShowFormat::Json,
        "toml" => ShowFormat::Toml,
        other => anyhow::bail!("unknown format '{other}' (expected toml or json)"),
    };

    let output = resolved
        .render(show_format)
        .context("failed to format config")?;
    println!("{output}");

    if sources {
        eprintln!("{}", Theme::header("Sources"));
        if resolved.loaded_files.is_empty() {
            eprintln!("  {}", Theme::dimmed("no config file loaded"));
        }
        for path in &resolved.loaded_files {
            eprintln!("  {}", Theme::info(&format!("file: {}", path.display())));
        }
        for (field, layer) in resolved.overridden_fields() {
            eprintln!("  {field:<36} {}", Theme::dimmed(&layer.to_string()));
        }
    }
    Ok(())
}
