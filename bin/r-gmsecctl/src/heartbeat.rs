//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "binary"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Heartbeat command: run a generator and echo what a listener receives."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use anyhow::{anyhow, Context, Result};
use clap::Args;
use r_gmsec_common::RuntimeSettings;
use r_gmsec_generator::HeartbeatGenerator;
use r_gmsec_msg::Field;
use tracing::{info, warn};

use crate::listen::{connection_config, Listener};

#[derive(Debug, Args)]
pub struct HeartbeatCommand {
    /// Seconds between heartbeats; defaults to the settings file.
    #[arg(long, value_name = "SECONDS")]
    rate: Option<u16>,
    /// Heartbeats to receive before stopping.
    #[arg(long, default_value_t = 3)]
    count: usize,
    /// COMPONENT of the heartbeat.
    #[arg(long, default_value = "R-GMSECCTL")]
    component: String,
    /// MISSION-ID of the heartbeat.
    #[arg(long, default_value = "R-GMSEC")]
    mission: String,
}

pub fn run(command: HeartbeatCommand, settings: &RuntimeSettings) -> Result<()> {
    let rate = command.rate.unwrap_or(settings.generator.pub_rate).max(1);
    let config = connection_config(settings);
    let mut listener = Listener::open(&config, settings, "C2MS.*.*.*.*.*.MSG.HB.+")?;

    let generator = HeartbeatGenerator::with_fields(
        &config,
        rate,
        vec![
            Field::new("MISSION-ID", command.mission.as_str())?,
            Field::new("COMPONENT", command.component.as_str())?,
        ],
    )
    .context("unable to create heartbeat generator")?;
    generator.start()?;
    info!(rate, count = command.count, "heartbeat generator running");

    let timeout_ms = (i32::from(rate) + 2) * 1000;
    let mut received = 0;
    while received < command.count {
        let Some(heartbeat) = listener.next(timeout_ms)? else {
            warn!(timeout_ms, "no heartbeat received in time");
            break;
        };
        received += 1;
        println!(
            "{} COUNTER={} PUB-RATE={} PUBLISH-TIME={}",
            heartbeat.get_subject(),
            heartbeat.get_u16_value("COUNTER").unwrap_or_default(),
            heartbeat.get_u16_value("PUB-RATE").unwrap_or_default(),
            heartbeat.get_string_value("PUBLISH-TIME").unwrap_or_default(),
        );
    }

    generator.change_publish_rate(0)?;
    if let Some(last) = listener.next(timeout_ms)? {
        println!("{} final heartbeat (PUB-RATE=0)", last.get_subject());
    }
    generator.stop();
    listener.finish()?;

    if received < command.count {
        return Err(anyhow!("received {received} of {} heartbeats", command.count));
    }
    Ok(())
}
