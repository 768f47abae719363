//! Synapse CLI - component runtime.
//!
//! Loads the layered configuration, sets up logging, discovers plugins and
//! runs the built-in console pipeline, or manages plugins and config offline.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use synapse_config::Config;
use synapse_runtime::config_bridge;

mod builtins;
mod commands;
mod theme;

use commands::{config, plugins, run};

/// Synapse - event-driven component runtime
#[derive(Parser)]
#[command(name = "synapse")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a configuration file (must exist)
    #[arg(short, long, global = true, env = "SYNAPSE_CONFIG")]
    config: Option<PathBuf>,

    /// Override the configured log level
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the runtime and echo stdin lines back as subtitles
    Run,

    /// Manage plugins
    Plugins {
        #[command(subcommand)]
        command: PluginCommands,
    },

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum PluginCommands {
    /// List discovered plugins
    List,
    /// Show the dependency-ordered load sequence
    Order,
    /// Enable a plugin
    Enable {
        /// Plugin id
        id: String,
    },
    /// Disable a plugin
    Disable {
        /// Plugin id
        id: String,
    },
    /// Install a plugin from a directory
    Install {
        /// Directory containing plugin.toml or plugin.json
        path: PathBuf,
    },
    /// Remove an installed plugin
    Uninstall {
        /// Plugin id
        id: String,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show the resolved configuration
    Show {
        /// Output format: toml or json
        #[arg(short, long, default_value = "toml")]
        format: String,

        /// List which layer set each overridden field
        #[arg(long)]
        sources: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut resolved = Config::load(cli.config.as_deref()).context("failed to load configuration")?;
    if let Some(level) = &cli.log_level {
        resolved.config.logging.level.clone_from(level);
    }

    let log_config = config_bridge::to_log_config(&resolved.config);
    if let Err(e) = synapse_telemetry::setup_logging(&log_config) {
        eprintln!("Failed to initialize logging: {e}");
    }

    match cli.command {
        Commands::Run => run::run(&resolved.config).await?,
        Commands::Plugins { command } => handle_plugins(&resolved.config, command).await?,
        Commands::Config {
            command: ConfigCommands::Show { format, sources },
        } => config::show_config(&resolved, &format, sources)?,
    }

    Ok(())
}

async fn handle_plugins(cfg: &Config, command: PluginCommands) -> Result<()> {
    match command {
        PluginCommands::List => plugins::list_plugins(cfg).await,
        PluginCommands::Order => plugins::show_order(cfg).await,
        PluginCommands::Enable { id } => plugins::set_enabled(cfg, &id, true).await,
        PluginCommands::Disable { id } => plugins::set_enabled(cfg, &id, false).await,
        PluginCommands::Install { path } => plugins::install_plugin(cfg, &path).await,
        PluginCommands::Uninstall { id } => plugins::uninstall_plugin(cfg, &id).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_plugin_commands() {
        let cli = Cli::parse_from(["synapse", "plugins", "enable", "camera"]);
        assert!(matches!(
            cli.command,
            Commands::Plugins {
                command: PluginCommands::Enable { ref id }
            } if id == "camera"
        ));

        let cli = Cli::parse_from(["synapse", "--log-level", "debug", "config", "show", "-f", "json", "--sources"]);
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        assert!(matches!(
            cli.command,
            Commands::Config {
                command: ConfigCommands::Show { ref format, sources: true }
            } if format == "json"
        ));
    }
}
