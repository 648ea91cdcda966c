//! Configuration view and validation commands: `sprintboard config`.

use anyhow::{Context, Result};
use std::path::Path;

use super::super::ConfigCommands;
use sprintboard::board_config::{BoardConfig, config_path};

pub fn cmd_config(
    config: &BoardConfig,
    explicit_path: Option<&Path>,
    command: Option<ConfigCommands>,
) -> Result<()> {
    let config_path = config_path(explicit_path);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Sprintboard Configuration");
            println!("=========================");
            println!();
            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No board.toml found. Showing defaults.");
            }
            println!("(environment overrides applied)");
            println!();

            let rendered =
                toml::to_string_pretty(config).context("Failed to serialize configuration")?;
            println!("{}", rendered);
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            let warnings = config.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => cmd_config_init(explicit_path)?,
    }

    Ok(())
}

/// Write a default config file at the explicit path or the default location.
/// Needs no existing configuration, so it runs before any is resolved.
pub fn cmd_config_init(explicit_path: Option<&Path>) -> Result<()> {
    let config_path = config_path(explicit_path);
    if config_path.exists() {
        println!("board.toml already exists at {}", config_path.display());
        println!("Delete it first if you want to recreate it.");
        return Ok(());
    }
    if let Some(parent) = config_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    BoardConfig::default().save(&config_path)?;
    println!("Created {}", config_path.display());
    Ok(())
}
