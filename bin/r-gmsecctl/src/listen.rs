//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "binary"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Loopback listener shared by the generator commands, with periodic metrics reports."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use prometheus::{Encoder, Registry, TextEncoder};
use r_gmsec_common::{Config, RuntimeSettings};
use r_gmsec_connection::{Connection, ConnectionMetricsExporter};
use r_gmsec_msg::Message;
use tracing::info;

/// Middleware config for the generator commands; without an explicit
/// `loopback-bus` each invocation gets a private bus.
pub fn connection_config(settings: &RuntimeSettings) -> Config {
    let mut config = settings.middleware_config();
    if !config.contains("loopback-bus") {
        config.add_value("loopback-bus", format!("r-gmsecctl-{}", std::process::id()));
    }
    config
}

pub struct Listener {
    connection: Connection,
    registry: Registry,
    report: Option<Reporter>,
}

struct Reporter {
    interval: Duration,
    last: Instant,
}

impl Reporter {
    fn due(&mut self, now: Instant) -> bool {
        if now.duration_since(self.last) < self.interval {
            return false;
        }
        self.last = now;
        true
    }
}

impl Listener {
    pub fn open(config: &Config, settings: &RuntimeSettings, pattern: &str) -> Result<Self> {
        let connection = Connection::new(config).context("unable to create listener connection")?;
        let registry = Registry::new();
        let report = if settings.metrics.enabled {
            let exporter = ConnectionMetricsExporter::register(&registry)
                .map_err(|err| anyhow!("unable to register metrics: {err}"))?;
            connection.attach_metrics(Arc::new(exporter));
            Some(Reporter {
                interval: settings.metrics.report_interval,
                last: Instant::now(),
            })
        } else {
            None
        };
        connection.connect()?;
        connection.subscribe(pattern)?;
        Ok(Self {
            connection,
            registry,
            report,
        })
    }

    /// Next message, logging a metrics snapshot whenever the report interval
    /// has elapsed.
    pub fn next(&mut self, timeout_ms: i32) -> Result<Option<Message>> {
        let message = self.connection.receive(timeout_ms)?;
        if let Some(report) = self.report.as_mut() {
            if report.due(Instant::now()) {
                let metrics = self.connection.metrics();
                info!(
                    received = metrics.received,
                    dropped = metrics.dropped,
                    "listener metrics"
                );
            }
        }
        Ok(message)
    }

    /// Disconnect and print the Prometheus exposition when metrics are on.
    pub fn finish(self) -> Result<()> {
        self.connection.disconnect()?;
        let metrics = self.connection.metrics();
        info!(received = metrics.received, dropped = metrics.dropped, "listener finished");
        if self.report.is_some() {
            let mut buffer = Vec::new();
            TextEncoder::new()
                .encode(&self.registry.gather(), &mut buffer)
                .context("unable to encode metrics")?;
            print!("{}", String::from_utf8_lossy(&buffer));
        }
        Ok(())
    }
}
