//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "binary"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Operator CLI for schemas, messages, config files and generators."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use r_gmsec_common::{init_tracing, LogFormat, RuntimeSettings};
use tracing::debug;

mod heartbeat;
mod inspect;
mod listen;
mod resource;

const DEFAULT_SETTINGS_PATH: &str = "configs/r-gmsec.toml";

#[derive(Debug, Parser)]
#[command(author, version, about = "R-GMSEC operator utility", long_about = None)]
struct Cli {
    /// Runtime settings file (TOML); `R_GMSEC_CONFIG` takes precedence.
    #[arg(long, global = true, value_name = "FILE")]
    settings: Option<PathBuf>,

    /// Override the stdout log format from the settings file.
    #[arg(long = "log-format", global = true, value_enum)]
    log_format: Option<LogFormatArg>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List the schema IDs of a specification.
    Schemas(inspect::SchemasCommand),
    /// Parse a message file and report its compliance.
    Validate(inspect::ValidateCommand),
    /// List the configs, messages and subscriptions of a config file.
    #[command(name = "config-file")]
    ConfigFile(inspect::ConfigFileCommand),
    /// Run a heartbeat generator and print the heartbeats it publishes.
    Heartbeat(heartbeat::HeartbeatCommand),
    /// Run a resource generator and print the samples it publishes.
    Resource(resource::ResourceCommand),
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormatArg {
    #[value(alias = "structured_json")]
    Json,
    Pretty,
}

impl From<LogFormatArg> for LogFormat {
    fn from(value: LogFormatArg) -> Self {
        match value {
            LogFormatArg::Json => LogFormat::StructuredJson,
            LogFormatArg::Pretty => LogFormat::Pretty,
        }
    }
}

fn load_settings(explicit: Option<&Path>) -> Result<RuntimeSettings> {
    let default_path = Path::new(DEFAULT_SETTINGS_PATH);
    let env_override = std::env::var_os(RuntimeSettings::ENV_CONFIG_PATH).is_some();
    if explicit.is_none() && !env_override && !default_path.exists() {
        return Ok(RuntimeSettings::default());
    }
    let mut candidates = Vec::new();
    if let Some(path) = explicit {
        candidates.push(path.to_path_buf());
    }
    candidates.push(default_path.to_path_buf());
    let loaded = RuntimeSettings::load_with_source(&candidates)?;
    debug!(source = %loaded.source.display(), "runtime settings loaded");
    Ok(loaded.settings)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut settings = load_settings(cli.settings.as_deref())?;
    if let Some(format) = cli.log_format {
        settings.logging.format = format.into();
    }
    init_tracing("r-gmsecctl", &settings.logging)?;

    match cli.command {
        Commands::Schemas(cmd) => inspect::schemas(cmd, &settings)?,
        Commands::Validate(cmd) => inspect::validate(cmd, &settings)?,
        Commands::ConfigFile(cmd) => inspect::config_file(cmd, &settings)?,
        Commands::Heartbeat(cmd) => heartbeat::run(cmd, &settings)?,
        Commands::Resource(cmd) => resource::run(cmd, &settings)?,
    }
    Ok(())
}
