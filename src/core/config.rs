//! Configuration management

use clap::{Parser, Subcommand};
use config::{Config as ConfigBuilder, ConfigError as BuilderError, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Name of the declaration file expected in every addon directory
pub const DEFAULT_DECLARATION_FILE: &str = "addon.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid registry configuration: {0}")]
    InvalidRegistry(String),

    #[error("Invalid status configuration: {0}")]
    InvalidStatus(String),

    #[error("Invalid database configuration: {0}")]
    InvalidDatabase(String),

    #[error("Invalid logging configuration: {0}")]
    InvalidLogging(String),

    #[error("Failed to load configuration: {0}")]
    LoadError(String),

    #[error("Configuration file not found: {0}")]
    FileNotFound(String),
}

impl From<BuilderError> for ConfigError {
    fn from(err: BuilderError) -> Self {
        ConfigError::LoadError(err.to_string())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub registry: RegistryConfig,
    pub status: StatusConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration with precedence: CLI args > Environment variables > Config file > Defaults
    pub fn load(cli_args: &CliArgs) -> Result<Self, ConfigError> {
        let mut builder = Self::defaults(ConfigBuilder::builder())?;

        if let Some(config_path) = &cli_args.config {
            if !config_path.exists() {
                return Err(ConfigError::FileNotFound(
                    config_path.display().to_string(),
                ));
            }
            builder = builder.add_source(File::from(config_path.as_path()));
        }

        // Example: ADDON_REGISTRY__ROOT=/srv/addons
        builder = builder.add_source(
            Environment::with_prefix("ADDON")
                .separator("__")
                .try_parsing(true),
        );

        if let Some(root) = &cli_args.root {
            builder = builder.set_override("registry.root", root.display().to_string())?;
        }
        if let Some(backend) = &cli_args.status_backend {
            builder = builder.set_override("status.backend", backend.clone())?;
        }
        if let Some(status_path) = &cli_args.status_path {
            builder = builder.set_override("status.path", status_path.display().to_string())?;
        }
        if let Some(log_level) = &cli_args.log_level {
            builder = builder.set_override("logging.level", log_level.clone())?;
        }

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a specific file path
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let config: Config = Self::defaults(ConfigBuilder::builder())?
            .add_source(File::from(path))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    fn defaults(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        Ok(builder
            .set_default("registry.root", "./addons")?
            .set_default("registry.declaration_file", DEFAULT_DECLARATION_FILE)?
            .set_default("status.backend", "json")?
            .set_default("database.connection_pool_size", 4)?
            .set_default("database.busy_timeout", 5000)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "text")?
            .set_default("logging.output", "stdout")?
            .set_default("logging.rotation", "daily")?
            .set_default("logging.max_log_files", 5)?)
    }

    /// Validate all configuration parameters
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.registry.validate()?;
        self.status.validate()?;
        self.database.validate()?;
        self.logging.validate()?;
        Ok(())
    }

    /// Resolve where the status store lives
    ///
    /// Defaults to a hidden file inside the registry root, named after the backend.
    pub fn status_path(&self) -> PathBuf {
        match &self.status.path {
            Some(path) => path.clone(),
            None => match self.status.backend {
                StatusBackend::Json => self.registry.root.join(".addon-status.json"),
                StatusBackend::Sqlite => self.registry.root.join(".addon-status.db"),
            },
        }
    }
}

/// Command-line arguments for configuration override
#[derive(Debug, Parser)]
#[command(name = "addonctl")]
#[command(about = "Inspect and manage addons in a registry root", long_about = None)]
pub struct CliArgs {
    /// Path to configuration file (TOML format)
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Addon root directory
    #[arg(short, long, value_name = "DIR", global = true)]
    pub root: Option<PathBuf>,

    /// Status store backend (json, sqlite)
    #[arg(long, value_name = "BACKEND", global = true)]
    pub status_backend: Option<String>,

    /// Status store path
    #[arg(long, value_name = "PATH", global = true)]
    pub status_path: Option<PathBuf>,

    /// Log level (debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List every discovered addon
    List,
    /// Filter addons; all supplied filters must match
    Query {
        #[arg(long)]
        author: Option<String>,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        enabled: Option<bool>,
        #[arg(short = 'i', long)]
        ignore_case: bool,
    },
    /// Show the declaration and status of one addon
    Show { id: String },
    /// Mark an addon as enabled
    Enable { id: String },
    /// Mark an addon as disabled
    Disable { id: String },
    /// Print the persisted dependency verdict of an addon
    Verdict { id: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    pub root: PathBuf,
    pub declaration_file: String,
}

impl RegistryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.root.as_os_str().is_empty() {
            return Err(ConfigError::InvalidRegistry("root cannot be empty".to_string()));
        }

        if self.declaration_file.trim().is_empty() || self.declaration_file.contains('/') {
            return Err(ConfigError::InvalidRegistry(
                "declaration_file must be a plain file name".to_string(),
            ));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusBackend {
    Json,
    Sqlite,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusConfig {
    pub backend: StatusBackend,
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl StatusConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(path) = &self.path {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::InvalidStatus("path cannot be empty".to_string()));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub connection_pool_size: u32,
    pub busy_timeout: u64, // milliseconds
}

impl DatabaseConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.connection_pool_size == 0 {
            return Err(ConfigError::InvalidDatabase(
                "connection_pool_size must be greater than 0".to_string(),
            ));
        }

        if self.busy_timeout == 0 {
            return Err(ConfigError::InvalidDatabase(
                "busy_timeout must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub output: String,
    pub log_file: Option<PathBuf>,
    /// How often the log file rolls: minutely, hourly, daily or never
    pub rotation: String,
    /// Rolled files kept next to the current one
    pub max_log_files: usize,
}

impl LoggingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.level.as_str()) {
            return Err(ConfigError::InvalidLogging(format!(
                "level must be one of: {:?}",
                valid_levels
            )));
        }

        let valid_formats = ["json", "text"];
        if !valid_formats.contains(&self.format.as_str()) {
            return Err(ConfigError::InvalidLogging(format!(
                "format must be one of: {:?}",
                valid_formats
            )));
        }

        let valid_outputs = ["stdout", "stderr", "file"];
        if !valid_outputs.contains(&self.output.as_str()) {
            return Err(ConfigError::InvalidLogging(format!(
                "output must be one of: {:?}",
                valid_outputs
            )));
        }

        if self.output == "file" && self.log_file.is_none() {
            return Err(ConfigError::InvalidLogging(
                "log_file must be specified when output is 'file'".to_string(),
            ));
        }

        let valid_rotations = ["minutely", "hourly", "daily", "never"];
        if !valid_rotations.contains(&self.rotation.as_str()) {
            return Err(ConfigError::InvalidLogging(format!(
                "rotation must be one of: {:?}",
                valid_rotations
            )));
        }

        if self.max_log_files == 0 {
            return Err(ConfigError::InvalidLogging(
                "max_log_files must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
