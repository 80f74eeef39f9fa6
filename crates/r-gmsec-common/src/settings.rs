//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Process-level TOML runtime settings for tools and services."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use tracing::debug;

use crate::config::Config;
use crate::logging::LogFormat;

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_log_level() -> String {
    "info".to_owned()
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_report_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_mw_id() -> String {
    "loopback".to_owned()
}

/// Runtime settings consumed by the CLI and long-running services.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeSettings {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub generator: GeneratorSettings,
    /// Raw middleware keys handed to every connection.
    #[serde(default)]
    pub middleware: IndexMap<String, String>,
}

/// Metadata describing where a [`RuntimeSettings`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedRuntimeSettings {
    pub settings: RuntimeSettings,
    pub source: PathBuf,
}

impl RuntimeSettings {
    pub const ENV_CONFIG_PATH: &'static str = "R_GMSEC_CONFIG";

    /// Load settings from disk together with the effective source path,
    /// respecting the `R_GMSEC_CONFIG` override.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedRuntimeSettings> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let settings = Self::from_path(&path)?;
                return Ok(LoadedRuntimeSettings {
                    settings,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let settings = Self::from_path(&path)?;
                return Ok(LoadedRuntimeSettings {
                    settings,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no settings files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    fn from_path(path: &Path) -> Result<Self> {
        debug!(settings_path = %path.display(), "loading runtime settings");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read settings file {}", path.display()))?;
        let settings = toml::from_str::<RuntimeSettings>(&contents)
            .with_context(|| format!("failed to parse settings file {}", path.display()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.generator.validate()?;
        if let Some(level) = self.middleware.get("gmsec-schema-level") {
            let level: u8 = level
                .parse()
                .map_err(|_| anyhow!("gmsec-schema-level must be an integer, got '{}'", level))?;
            if level > 6 {
                return Err(anyhow!("gmsec-schema-level must be between 0 and 6"));
            }
        }
        Ok(())
    }

    /// Convert the `[middleware]` table into a connection [`Config`],
    /// defaulting `mw-id` to the loopback backend.
    pub fn middleware_config(&self) -> Config {
        let mut config: Config = self.middleware.iter().collect();
        if !config.contains("mw-id") {
            config.add_value("mw-id", default_mw_id());
        }
        config
    }
}

impl std::str::FromStr for RuntimeSettings {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let settings: RuntimeSettings =
            toml::from_str(content).with_context(|| "failed to parse runtime settings")?;
        settings.validate()?;
        Ok(settings)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
    /// Filter used when neither `R_GMSEC_LOG` nor `RUST_LOG` is set.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Write per-message traffic to its own rolling file.
    #[serde(default)]
    pub traffic_file: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
            level: default_log_level(),
            traffic_file: false,
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_report_interval")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub report_interval: Duration,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            report_interval: default_report_interval(),
        }
    }
}

/// Defaults for the periodic heartbeat and resource generators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratorSettings {
    #[serde(default = "GeneratorSettings::default_pub_rate")]
    pub pub_rate: u16,
    #[serde(default = "GeneratorSettings::default_sample_interval")]
    pub sample_interval: u16,
    #[serde(default = "GeneratorSettings::default_average_interval")]
    pub average_interval: u16,
}

impl GeneratorSettings {
    const fn default_pub_rate() -> u16 {
        30
    }

    const fn default_sample_interval() -> u16 {
        1
    }

    const fn default_average_interval() -> u16 {
        10
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_interval == 0 {
            return Err(anyhow!("generator.sample_interval must be at least 1"));
        }
        if self.average_interval < self.sample_interval {
            return Err(anyhow!(
                "generator.average_interval ({}) must not be less than sample_interval ({})",
                self.average_interval,
                self.sample_interval
            ));
        }
        Ok(())
    }
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        Self {
            pub_rate: Self::default_pub_rate(),
            sample_interval: Self::default_sample_interval(),
            average_interval: Self::default_average_interval(),
        }
    }
}
