//! CLI handlers for the `synapse plugins` subcommand.
//!
//! These operate on a runtime that is never started: discovery and
//! descriptor edits only, no components are activated.

use std::path::Path;

use anyhow::{Context, Result};
use synapse_config::Config;
use synapse_runtime::Runtime;
use tokio::sync::mpsc;

use crate::builtins;
use crate::theme::Theme;

async fn offline_runtime(config: &Config) -> Result<Runtime> {
    let (replies, _) = mpsc::unbounded_channel();
    let runtime = Runtime::from_config(config, builtins::factories(replies))
        .context("failed to build runtime")?;
    runtime.plugins().discover().await;
    Ok(runtime)
}

/// List discovered plugins.
pub(crate) async fn list_plugins(config: &Config) -> Result<()> {
    let runtime = offline_runtime(config).await?;
    let descriptors = runtime.plugins().descriptors().await;
    if descriptors.is_empty() {
        println!("{}", Theme::info("No plugins found"));
        return Ok(());
    }

    println!("{}", Theme::header("Plugins"));
    println!(
        "  {:<24} {:<10} {:<9} {:<8} PATH",
        "ID", "VERSION", "CATEGORY", "ENABLED"
    );
    println!("{}", Theme::separator());
    for d in &descriptors {
        let enabled = if d.enabled { "yes" } else { "no" };
        let path = d
            .path
            .as_ref()
            .map_or_else(|| "(built-in)".to_string(), |p| p.display().to_string());
        println!(
            "  {:<24} {:<10} {:<9} {:<8} {}",
            d.id,
            d.version.to_string(),
            d.category.as_str(),
            enabled,
            Theme::dimmed(&path)
        );
    }

    let stats = runtime.plugins().stats().await;
    for (id, missing) in &stats.unsatisfied {
        let missing: Vec<&str> = missing.iter().map(|m| m.as_str()).collect();
        println!(
            "{}",
            Theme::warning(&format!("{id} is missing {}", missing.join(", ")))
        );
    }
    println!(
        "\n{}",
        Theme::dimmed(&format!("{} plugin(s)", descriptors.len()))
    );
    Ok(())
}

/// Print the dependency-ordered load sequence.
pub(crate) async fn show_order(config: &Config) -> Result<()> {
    let runtime = offline_runtime(config).await?;
    let order = runtime.plugins().load_order().await;
    if order.is_empty() {
        println!("{}", Theme::info("No plugins found"));
        return Ok(());
    }
    println!("{}", Theme::header("Load order"));
    for (position, id) in order.iter().enumerate() {
        let deps = runtime
            .plugins()
            .descriptor(id.as_str())
            .await
            .map(|d| {
                d.dependencies
                    .iter()
                    .map(|(dep, constraint)| format!("{dep} {constraint}"))
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        let suffix = if deps.is_empty() {
            String::new()
        } else {
            Theme::dimmed(&format!(" (needs {})", deps.join(", ")))
        };
        println!("  {:>3}. {id}{suffix}", position.saturating_add(1));
    }
    Ok(())
}

/// Enable or disable a plugin.
pub(crate) async fn set_enabled(config: &Config, id: &str, enabled: bool) -> Result<()> {
    let runtime = offline_runtime(config).await?;
    let descriptor = runtime
        .plugins()
        .descriptor(id)
        .await
        .with_context(|| format!("plugin not found: {id}"))?;
    if enabled {
        runtime.plugins().enable_plugin(id).await?;
    } else {
        runtime.plugins().disable_plugin(id).await?;
    }

    let verb = if enabled { "Enabled" } else { "Disabled" };
    println!("{}", Theme::success(&format!("{verb} {id}")));
    if descriptor.path.is_none() {
        println!(
            "{}",
            Theme::warning("built-in plugins are not persisted; use [plugins] in the config file")
        );
    }
    Ok(())
}

/// Install a plugin directory into the first plugin directory.
pub(crate) async fn install_plugin(config: &Config, src: &Path) -> Result<()> {
    let runtime = offline_runtime(config).await?;
    let installed = runtime
        .plugins()
        .install(src)
        .await
        .with_context(|| format!("failed to install {}", src.display()))?;
    println!(
        "{}",
        Theme::success(&format!("Installed {} {}", installed.id, installed.version))
    );
    Ok(())
}

/// Remove an installed plugin.
pub(crate) async fn uninstall_plugin(config: &Config, id: &str) -> Result<()> {
    let runtime = offline_runtime(config).await?;
    if runtime.plugins().uninstall(id).await? {
        println!("{}", Theme::success(&format!("Uninstalled {id}")));
    } else {
        println!(
            "{}",
            Theme::warning(&format!("{id} is not installed in a plugin directory"))
        );
    }
    Ok(())
}
