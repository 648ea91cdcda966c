//! Project setup command: `sprintboard init`.

use anyhow::{Context, Result};
use std::path::Path;

use sprintboard::board::server::open_database;
use sprintboard::board_config::{BoardConfig, config_path};

/// Write a default config file (unless one exists) and create the database.
/// `explicit_config` is the global `--config` path, if given.
pub fn cmd_init(config: &BoardConfig, explicit_config: Option<&Path>) -> Result<()> {
    let path = config_path(explicit_config);
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    if path.exists() {
        println!("{} already exists, leaving it untouched.", path.display());
    } else {
        BoardConfig::default().save(&path)?;
        println!("Created {}", path.display());
    }

    open_database(&config.server.db_path)?;
    println!(
        "Board database initialized at {}",
        config.server.db_path.display()
    );
    Ok(())
}
