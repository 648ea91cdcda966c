use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use sprintboard::board_config::{BoardConfig, CliOverrides};

mod cmd;

#[derive(Parser)]
#[command(name = "sprintboard")]
#[command(version, about = "Sprint planning board: projects, sprints, backlog and tasks")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to board.toml (defaults to .sprintboard/board.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP API and WebSocket change feed
    Serve {
        /// Port to serve on
        #[arg(short, long)]
        port: Option<u16>,

        /// Address to bind
        #[arg(long)]
        host: Option<String>,

        /// Database path
        #[arg(long)]
        db_path: Option<PathBuf>,

        /// Enable dev mode (CORS permissive for a separately served front-end)
        #[arg(long)]
        dev: bool,
    },
    /// Create the config directory, a default board.toml and the database
    Init {
        /// Database path
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default board.toml file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let explicit_config = cli.config.as_deref();

    // These commands create the config file, so it may not exist yet.
    let mut config = match &cli.command {
        Commands::Config {
            command: Some(ConfigCommands::Init),
        } => return cmd::cmd_config_init(explicit_config),
        Commands::Init { .. } => BoardConfig::resolve_or_default(explicit_config)?,
        _ => BoardConfig::resolve(explicit_config)?,
    };

    match &cli.command {
        Commands::Serve {
            port,
            host,
            db_path,
            dev,
        } => {
            config.apply_cli(&CliOverrides {
                host: host.clone(),
                port: *port,
                db_path: db_path.clone(),
                dev_mode: *dev,
                verbose: cli.verbose,
            });
            cmd::cmd_serve(config).await?;
        }
        Commands::Init { db_path } => {
            config.apply_cli(&CliOverrides {
                db_path: db_path.clone(),
                verbose: cli.verbose,
                ..Default::default()
            });
            cmd::cmd_init(&config, explicit_config)?;
        }
        Commands::Config { command } => {
            cmd::cmd_config(&config, explicit_config, command.clone())?
        }
    }

    Ok(())
}
