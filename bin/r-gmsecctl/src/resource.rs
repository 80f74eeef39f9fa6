//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "binary"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Resource command: sample this host and echo the RSRC messages a listener receives."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use anyhow::{anyhow, Context, Result};
use clap::Args;
use r_gmsec_common::{GeneratorSettings, RuntimeSettings};
use r_gmsec_generator::ResourceGenerator;
use r_gmsec_msg::{Field, Message};
use tracing::{info, warn};

use crate::listen::{connection_config, Listener};

#[derive(Debug, Args)]
pub struct ResourceCommand {
    /// Seconds between resource messages; defaults to the settings file.
    #[arg(long, value_name = "SECONDS")]
    rate: Option<u16>,
    /// Seconds between system samples.
    #[arg(long, value_name = "SECONDS")]
    sample: Option<u16>,
    /// Seconds of samples averaged into each message.
    #[arg(long, value_name = "SECONDS")]
    average: Option<u16>,
    /// Resource messages to receive before stopping.
    #[arg(long, default_value_t = 2)]
    count: usize,
    /// COMPONENT of the resource messages.
    #[arg(long, default_value = "R-GMSECCTL")]
    component: String,
    /// MISSION-ID of the resource messages.
    #[arg(long, default_value = "R-GMSEC")]
    mission: String,
}

impl ResourceCommand {
    /// Command-line intervals over the `[generator]` settings.
    fn intervals(&self, defaults: &GeneratorSettings) -> (u16, u16, u16) {
        let sample = self.sample.unwrap_or(defaults.sample_interval);
        let average = self.average.unwrap_or(defaults.average_interval.max(sample));
        (self.rate.unwrap_or(defaults.pub_rate).max(1), sample, average)
    }
}

fn summary(message: &Message) -> String {
    format!(
        "{} COUNTER={} CPU.TOTAL.UTIL={:.1} MEM.UTIL={:.1} DISKS={} NET-PORTS={}",
        message.get_subject(),
        message.get_u16_value("COUNTER").unwrap_or_default(),
        message.get_f64_value("CPU.TOTAL.UTIL").unwrap_or_default(),
        message.get_f64_value("MEM.UTIL").unwrap_or_default(),
        message.get_u16_value("NUM-OF-DISKS").unwrap_or_default(),
        message.get_u16_value("NUM-OF-NET-PORTS").unwrap_or_default(),
    )
}

pub fn run(command: ResourceCommand, settings: &RuntimeSettings) -> Result<()> {
    let (rate, sample, average) = command.intervals(&settings.generator);
    let config = connection_config(settings);
    let mut listener = Listener::open(&config, settings, "C2MS.*.*.*.*.*.MSG.RSRC.+")?;

    let generator = ResourceGenerator::with_fields(
        &config,
        rate,
        sample,
        average,
        vec![
            Field::new("MISSION-ID", command.mission.as_str())?,
            Field::new("COMPONENT", command.component.as_str())?,
        ],
    )
    .context("unable to create resource generator")?;
    generator.start()?;
    info!(rate, sample, average, count = command.count, "resource generator running");

    let timeout_ms = (i32::from(rate) + 2) * 1000;
    let mut received = 0;
    while received < command.count {
        let Some(message) = listener.next(timeout_ms)? else {
            warn!(timeout_ms, "no resource message received in time");
            break;
        };
        received += 1;
        println!("{}", summary(&message));
    }
    generator.stop();
    listener.finish()?;

    if received < command.count {
        return Err(anyhow!("received {received} of {} resource messages", command.count));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command() -> ResourceCommand {
        ResourceCommand {
            rate: None,
            sample: None,
            average: None,
            count: 1,
            component: "CTL-TEST".to_owned(),
            mission: "CTL".to_owned(),
        }
    }

    #[test]
    fn intervals_fall_back_to_generator_settings() {
        let defaults = GeneratorSettings {
            pub_rate: 7,
            sample_interval: 2,
            average_interval: 8,
        };
        assert_eq!(command().intervals(&defaults), (7, 2, 8));

        let mut overridden = command();
        overridden.rate = Some(1);
        overridden.sample = Some(3);
        assert_eq!(overridden.intervals(&defaults), (1, 3, 8));

        overridden.sample = Some(20);
        assert_eq!(overridden.intervals(&defaults), (1, 20, 20));
    }

    #[test]
    fn bad_intervals_are_rejected_before_publishing() {
        let mut settings = RuntimeSettings::default();
        settings.metrics.enabled = false;
        settings.middleware.insert("loopback-bus".to_owned(), "ctl-resource-bad".to_owned());
        let mut bad = command();
        bad.sample = Some(0);
        let err = run(bad, &settings).expect_err("zero sample interval");
        assert!(format!("{err:#}").contains("A sample rate of zero was specified"));
    }

    #[test]
    fn receives_resource_messages() {
        let mut settings = RuntimeSettings::default();
        settings.metrics.enabled = false;
        settings.middleware.insert("loopback-bus".to_owned(), "ctl-resource-run".to_owned());
        let mut quick = command();
        quick.rate = Some(1);
        quick.sample = Some(1);
        quick.average = Some(1);
        run(quick, &settings).expect("resource run");
    }
}
