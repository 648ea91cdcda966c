//! Configuration for the sprint board, read from `.sprintboard/board.toml`.
//!
//! Values are layered: built-in defaults, then the file, then environment
//! variables, then command-line flags.
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 5000
//! db_path = ".sprintboard/board.db"
//! dev_mode = false
//!
//! [logging]
//! level = "info"
//! format = "pretty"
//! dir = ".sprintboard/logs"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Directory holding the config file and, by default, the database.
pub const CONFIG_DIR: &str = ".sprintboard";
pub const CONFIG_FILE: &str = "board.toml";

pub const ENV_HOST: &str = "SPRINTBOARD_HOST";
pub const ENV_PORT: &str = "SPRINTBOARD_PORT";
pub const ENV_DB_PATH: &str = "SPRINTBOARD_DB_PATH";
pub const ENV_LOG: &str = "SPRINTBOARD_LOG";
pub const ENV_LOG_FORMAT: &str = "SPRINTBOARD_LOG_FORMAT";

/// Console log output style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Pretty => write!(f, "pretty"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => anyhow::bail!("Invalid log format '{}'. Valid values: pretty, json", s),
        }
    }
}

/// `[server]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    /// Permissive CORS for a separately served front-end.
    pub dev_mode: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
            db_path: PathBuf::from(CONFIG_DIR).join("board.db"),
            dev_mode: false,
        }
    }
}

/// `[logging]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,
    pub format: LogFormat,
    /// When set, logs are also written to a daily rolling file here.
    pub dir: Option<PathBuf>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            dir: None,
        }
    }
}

/// The complete board.toml configuration structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct BoardConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

/// The config file in use: the explicit `--config` path, or
/// `.sprintboard/board.toml`.
pub fn config_path(explicit: Option<&Path>) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join(CONFIG_FILE))
}

/// Command-line values that take precedence over everything else.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub db_path: Option<PathBuf>,
    pub dev_mode: bool,
    pub verbose: bool,
}

impl BoardConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse board.toml")
    }

    /// Load `board.toml` from `config_dir`, or defaults if it doesn't exist.
    pub fn load_or_default(config_dir: &Path) -> Result<Self> {
        Self::load_file_or_default(&config_dir.join(CONFIG_FILE))
    }

    /// Load `path`, or defaults if it doesn't exist.
    pub fn load_file_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize board.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Resolve the full configuration: an explicit file (which must exist)
    /// or the default location, then the process environment.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::load(path)?,
            None => Self::load_or_default(Path::new(CONFIG_DIR))?,
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Like [`resolve`](Self::resolve), but a missing explicit file yields
    /// defaults. For commands that create the file.
    pub fn resolve_or_default(explicit: Option<&Path>) -> Result<Self> {
        let mut config = Self::load_file_or_default(&config_path(explicit))?;
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply environment overrides using `lookup` to read variables.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup(ENV_HOST) {
            self.server.host = host;
        }
        if let Some(port) = lookup(ENV_PORT) {
            self.server.port = port
                .trim()
                .parse()
                .with_context(|| format!("Invalid {} value '{}'", ENV_PORT, port))?;
        }
        if let Some(path) = lookup(ENV_DB_PATH) {
            self.server.db_path = PathBuf::from(path);
        }
        if let Some(level) = lookup(ENV_LOG) {
            self.logging.level = level;
        }
        if let Some(format) = lookup(ENV_LOG_FORMAT) {
            self.logging.format = format.parse()?;
        }
        Ok(())
    }

    /// Apply command-line overrides.
    pub fn apply_cli(&mut self, cli: &CliOverrides) {
        if let Some(ref host) = cli.host {
            self.server.host = host.clone();
        }
        if let Some(port) = cli.port {
            self.server.port = port;
        }
        if let Some(ref path) = cli.db_path {
            self.server.db_path = path.clone();
        }
        if cli.dev_mode {
            self.server.dev_mode = true;
        }
        if cli.verbose {
            self.logging.level = "debug".to_string();
        }
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.server.host.trim().is_empty() {
            warnings.push("server.host is empty; binding will fail".to_string());
        }
        if self.server.port == 0 {
            warnings.push("server.port is 0; an ephemeral port will be chosen".to_string());
        }
        if self.server.db_path.as_os_str().is_empty() {
            warnings.push("server.db_path is empty".to_string());
        }
        if self.server.dev_mode && self.server.host != "127.0.0.1" && self.server.host != "localhost"
        {
            warnings.push(format!(
                "dev_mode enables permissive CORS while listening on '{}'",
                self.server.host
            ));
        }
        if tracing_subscriber::EnvFilter::try_new(&self.logging.level).is_err() {
            warnings.push(format!(
                "Invalid logging.level '{}': expected a filter such as 'info' or 'sprintboard=debug'",
                self.logging.level
            ));
        }

        warnings
    }
}
