//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Tracing initialisation: diagnostics to stdout and file, message traffic to its own file."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use anyhow::Result;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::daily;
use tracing_subscriber::filter::{filter_fn, EnvFilter, FilterExt, LevelFilter, Targets};
use tracing_subscriber::fmt;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Registry;

use crate::settings::LoggingConfig;

const LOG_ENV: &str = "R_GMSEC_LOG";

/// Target of per-message traffic events (publish, receive, request, reply).
/// They stay out of the diagnostic outputs and go to the traffic file when
/// [`LoggingConfig::traffic_file`] is set.
pub const TRAFFIC_TARGET: &str = "r_gmsec::traffic";

static GUARDS: OnceCell<Vec<WorkerGuard>> = OnceCell::new();

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Available log formats for stdout.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    #[default]
    StructuredJson,
    Pretty,
}

/// Filter directive in force: `R_GMSEC_LOG`, then `RUST_LOG`, then the
/// configured level.
fn directive(config: &LoggingConfig) -> String {
    [LOG_ENV, EnvFilter::DEFAULT_ENV]
        .iter()
        .find_map(|name| std::env::var(name).ok().filter(|value| !value.trim().is_empty()))
        .unwrap_or_else(|| config.level.clone())
}

fn diagnostics_filter(directive: &str) -> EnvFilter {
    EnvFilter::try_new(directive).unwrap_or_else(|err| {
        eprintln!("invalid log directive '{directive}' ({err}); defaulting to info logging");
        EnvFilter::new("info")
    })
}

fn is_traffic(target: &str) -> bool {
    target == TRAFFIC_TARGET
}

fn writer(appender: impl std::io::Write + Send + 'static, guards: &mut Vec<WorkerGuard>) -> NonBlocking {
    let (writer, guard) = tracing_appender::non_blocking(appender);
    guards.push(guard);
    writer
}

/// Install the process-wide subscriber. Later calls only log that tracing is
/// already set up.
///
/// Diagnostics go to stdout (JSON or pretty per [`LogFormat`]) and to a daily
/// `<prefix>-<service>.log` JSON file. With `traffic_file` on, events on
/// [`TRAFFIC_TARGET`] are written at debug level to `<prefix>-traffic.log`
/// whatever the diagnostic filter says.
pub fn init_tracing(service_name: &str, config: &LoggingConfig) -> Result<()> {
    std::fs::create_dir_all(&config.directory)?;
    let prefix = config.file_prefix.as_deref().unwrap_or(service_name);
    let directive = directive(config);
    let mut guards = Vec::new();
    let mut layers: Vec<BoxedLayer> = Vec::new();

    let stdout_writer = writer(std::io::stdout(), &mut guards);
    let stdout_filter = diagnostics_filter(&directive).and(filter_fn(|meta| !is_traffic(meta.target())));
    layers.push(match config.format {
        LogFormat::StructuredJson => fmt::layer()
            .with_target(false)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .json()
            .with_writer(stdout_writer)
            .with_filter(stdout_filter)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_target(true)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_writer(stdout_writer)
            .with_filter(stdout_filter)
            .boxed(),
    });

    let file_writer = writer(daily(&config.directory, format!("{prefix}-{service_name}.log")), &mut guards);
    layers.push(
        fmt::layer()
            .with_target(true)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .json()
            .with_writer(file_writer)
            .with_filter(diagnostics_filter(&directive).and(filter_fn(|meta| !is_traffic(meta.target()))))
            .boxed(),
    );

    if config.traffic_file {
        let traffic_writer = writer(daily(&config.directory, format!("{prefix}-traffic.log")), &mut guards);
        layers.push(
            fmt::layer()
                .with_target(false)
                .with_timer(fmt::time::UtcTime::rfc_3339())
                .json()
                .with_writer(traffic_writer)
                .with_filter(Targets::new().with_target(TRAFFIC_TARGET, LevelFilter::DEBUG))
                .boxed(),
        );
    }

    if tracing_subscriber::registry().with(layers).try_init().is_err() {
        info!(service = %service_name, "tracing already initialised");
        return Ok(());
    }
    let _ = GUARDS.set(guards);

    info!(
        service = %service_name,
        log_dir = %config.directory.display(),
        format = ?config.format,
        filter = %directive,
        traffic_file = config.traffic_file,
        "tracing initialised"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_creates_log_directory() {
        let dir = tempfile::tempdir().expect("temp dir");
        let config = LoggingConfig {
            directory: dir.path().join("logs"),
            format: LogFormat::Pretty,
            file_prefix: Some("unit".to_owned()),
            level: "debug".to_owned(),
            traffic_file: true,
        };
        init_tracing("r-gmsec-test", &config).expect("init tracing");
        assert!(config.directory.is_dir());
        init_tracing("r-gmsec-test", &config).expect("re-init tracing");
    }

    #[test]
    fn traffic_target_is_separated() {
        assert!(is_traffic(TRAFFIC_TARGET));
        assert!(!is_traffic("r_gmsec_connection::connection"));
    }

    #[test]
    fn configured_level_applies_without_environment() {
        let config = LoggingConfig {
            level: "warn,r_gmsec_connection=debug".to_owned(),
            ..LoggingConfig::default()
        };
        if std::env::var_os(LOG_ENV).is_none() && std::env::var_os(EnvFilter::DEFAULT_ENV).is_none() {
            assert_eq!(directive(&config), "warn,r_gmsec_connection=debug");
        }
        assert_eq!(diagnostics_filter("warn").to_string(), "warn");
        assert_eq!(diagnostics_filter("r_gmsec=loudest").to_string(), "info");
    }

    #[test]
    fn log_format_uses_kebab_case() {
        let format: LogFormat = serde_json::from_str("\"structured-json\"").expect("parse format");
        assert_eq!(format, LogFormat::StructuredJson);
    }
}
