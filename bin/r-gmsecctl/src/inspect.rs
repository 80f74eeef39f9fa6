//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "binary"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Schema listing, message validation and config file inspection commands."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, ValueEnum};
use r_gmsec_common::{Config, DataFormat, RuntimeSettings};
use r_gmsec_msg::{ConfigFile, MessageFactory, Specification};
use tracing::info;

#[derive(Debug, Args)]
pub struct SchemasCommand {
    /// Specification version, e.g. 201900.
    #[arg(long, value_name = "VERSION")]
    version: Option<u32>,
    /// Schema level (0-6).
    #[arg(long, value_name = "LEVEL")]
    level: Option<u8>,
}

#[derive(Debug, Args)]
pub struct ValidateCommand {
    /// Message file to check.
    #[arg(value_name = "FILE")]
    file: PathBuf,
    /// Encoding of the file; guessed from its content when omitted.
    #[arg(long, value_enum)]
    format: Option<FormatArg>,
    /// Schema level (0-6).
    #[arg(long, value_name = "LEVEL")]
    level: Option<u8>,
}

#[derive(Debug, Args)]
pub struct ConfigFileCommand {
    /// Config file to inspect.
    #[arg(value_name = "FILE")]
    file: PathBuf,
    /// Print only the named config, as key=value lines.
    #[arg(long, value_name = "NAME")]
    config: Option<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum FormatArg {
    Xml,
    Json,
}

impl From<FormatArg> for DataFormat {
    fn from(value: FormatArg) -> Self {
        match value {
            FormatArg::Xml => DataFormat::Xml,
            FormatArg::Json => DataFormat::Json,
        }
    }
}

fn specification_config(settings: &RuntimeSettings, version: Option<u32>, level: Option<u8>) -> Config {
    let mut config = settings.middleware_config();
    if let Some(version) = version {
        config.add_value("gmsec-specification-version", version.to_string());
    }
    if let Some(level) = level {
        config.add_value("gmsec-schema-level", level.to_string());
    }
    config
}

fn guess_format(data: &str) -> DataFormat {
    if data.trim_start().starts_with('{') {
        DataFormat::Json
    } else {
        DataFormat::Xml
    }
}

fn read(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("unable to read {}", path.display()))
}

pub fn schemas(command: SchemasCommand, settings: &RuntimeSettings) -> Result<()> {
    let config = specification_config(settings, command.version, command.level);
    let specification = Specification::from_config(&config).context("unable to load specification")?;
    let mut count = 0usize;
    for schema_id in specification.get_schema_id_iterator() {
        println!("{schema_id}");
        count += 1;
    }
    info!(
        version = specification.get_version(),
        level = %specification.get_schema_level(),
        count,
        "schemas listed"
    );
    Ok(())
}

pub fn validate(command: ValidateCommand, settings: &RuntimeSettings) -> Result<()> {
    let data = read(&command.file)?;
    let format = command.format.map(DataFormat::from).unwrap_or_else(|| guess_format(&data));
    let factory = MessageFactory::from_config(&specification_config(settings, None, command.level))
        .context("unable to create message factory")?;
    let message = factory
        .from_data(&data, format)
        .with_context(|| format!("unable to parse {}", command.file.display()))?;

    println!("subject:   {}", message.get_subject());
    println!("kind:      {}", message.get_kind());
    println!("schema-id: {}", message.get_schema_id());
    println!("fields:    {}", message.get_field_count());
    let status = message.is_compliant();
    if status.has_error() {
        println!("{}", status.reason());
        bail!("{} is not compliant", command.file.display());
    }
    println!("compliant");
    Ok(())
}

pub fn config_file(command: ConfigFileCommand, settings: &RuntimeSettings) -> Result<()> {
    let mut file = ConfigFile::with_config(&settings.middleware_config())?;
    file.load(&command.file)
        .with_context(|| format!("unable to load {}", command.file.display()))?;

    if let Some(name) = command.config {
        let config = file.lookup_config(&name)?;
        for (key, value) in config.iter() {
            println!("{key}={value}");
        }
        return Ok(());
    }

    println!("configs:");
    for (name, config) in file.configs() {
        println!("  {name} ({} parameters)", config.len());
    }
    println!("messages:");
    for (name, message) in file.messages() {
        println!("  {name}: {}", message.get_subject());
    }
    println!("subscriptions:");
    for entry in file.subscription_entries() {
        if entry.excluded_patterns().is_empty() {
            println!("  {}: {}", entry.get_name(), entry.get_pattern());
        } else {
            println!(
                "  {}: {} (excluding {})",
                entry.get_name(),
                entry.get_pattern(),
                entry.excluded_patterns().join(", ")
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_guess_follows_first_character() {
        assert_eq!(guess_format("  {\"MESSAGE\":{}}"), DataFormat::Json);
        assert_eq!(guess_format("<MESSAGE/>"), DataFormat::Xml);
    }

    #[test]
    fn command_line_overrides_reach_the_specification_config() {
        let config = specification_config(&RuntimeSettings::default(), Some(201900), Some(1));
        assert_eq!(config.get_value("gmsec-specification-version"), Some("201900"));
        assert_eq!(config.get_value("gmsec-schema-level"), Some("1"));
        assert_eq!(config.get_value("mw-id"), Some("loopback"));
    }

    #[test]
    fn validate_reports_non_compliant_messages() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("msg.xml");
        fs::write(
            &path,
            r#"<MESSAGE SUBJECT="GMSEC.TEST" KIND="PUBLISH"><FIELD NAME="A" TYPE="STRING">x</FIELD></MESSAGE>"#,
        )
        .expect("write message");
        let result = validate(
            ValidateCommand {
                file: path,
                format: None,
                level: None,
            },
            &RuntimeSettings::default(),
        );
        assert!(result.is_err());
    }
}
