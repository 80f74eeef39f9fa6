//! ---
//! ems_section: "07-resilience-fault-tolerance"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Resource generator sampling host utilisation into RSRC messages."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use r_gmsec_common::{host, Config, GmsecError, Result};
use r_gmsec_connection::Connection;
use r_gmsec_msg::{Field, FieldValue, Message, MessageFactory};
use sysinfo::{Disks, Networks, System};
use tracing::trace;

use crate::periodic::{PayloadSource, PeriodicGenerator, PUB_RATE};

const RESOURCE_SCHEMA: &str = "RSRC";
const MEBIBYTE: u64 = 1024 * 1024;
const SAMPLED_PREFIXES: [&str; 3] = ["CPU.", "DISK.", "NET-PORT."];

fn check_intervals(sample_interval: u16, average_interval: u16) -> Result<()> {
    if sample_interval < 1 {
        return Err(GmsecError::Generator("A sample rate of zero was specified".to_owned()));
    }
    if average_interval < sample_interval {
        return Err(GmsecError::Generator(
            "A moving average interval less than sampling interval was specified".to_owned(),
        ));
    }
    Ok(())
}

fn percent(part: u64, whole: u64) -> f32 {
    if whole == 0 {
        0.0
    } else {
        (part as f64 / whole as f64 * 100.0) as f32
    }
}

#[derive(Debug, Clone)]
struct Sample {
    cpus: Vec<f32>,
    cpu_total: f32,
    memory: f32,
}

struct HostState {
    system: System,
    disks: Disks,
    networks: Networks,
    samples: VecDeque<Sample>,
    last: Option<Instant>,
}

/// Rolling host utilisation over `average / sample` samples.
pub(crate) struct ResourceSampler {
    sample_interval: Duration,
    window: usize,
    host: Mutex<HostState>,
}

impl ResourceSampler {
    pub(crate) fn new(sample_interval: u16, average_interval: u16) -> Result<Self> {
        check_intervals(sample_interval, average_interval)?;
        let mut system = System::new();
        system.refresh_cpu();
        system.refresh_memory();
        Ok(Self {
            sample_interval: Duration::from_secs(u64::from(sample_interval)),
            window: usize::from(average_interval / sample_interval).max(1),
            host: Mutex::new(HostState {
                system,
                disks: Disks::new_with_refreshed_list(),
                networks: Networks::new_with_refreshed_list(),
                samples: VecDeque::new(),
                last: None,
            }),
        })
    }

    fn take_sample(&self, host: &mut HostState, now: Instant) {
        host.system.refresh_cpu();
        host.system.refresh_memory();
        let sample = Sample {
            cpus: host.system.cpus().iter().map(|cpu| cpu.cpu_usage()).collect(),
            cpu_total: host.system.global_cpu_info().cpu_usage(),
            memory: percent(
                host.system.total_memory().saturating_sub(host.system.available_memory()),
                host.system.total_memory(),
            ),
        };
        trace!(cpu_total = sample.cpu_total, memory = sample.memory, "resource sample");
        host.samples.push_back(sample);
        while host.samples.len() > self.window {
            host.samples.pop_front();
        }
        host.last = Some(now);
    }

    fn average(samples: &VecDeque<Sample>) -> Sample {
        let count = samples.len().max(1) as f32;
        let cpu_count = samples.iter().map(|sample| sample.cpus.len()).max().unwrap_or(0);
        let mut cpus = vec![0.0_f32; cpu_count];
        let mut cpu_total = 0.0;
        let mut memory = 0.0;
        for sample in samples {
            for (slot, value) in cpus.iter_mut().zip(&sample.cpus) {
                *slot += value;
            }
            cpu_total += sample.cpu_total;
            memory += sample.memory;
        }
        Sample {
            cpus: cpus.into_iter().map(|total| total / count).collect(),
            cpu_total: cpu_total / count,
            memory: memory / count,
        }
    }

    /// Write the averaged utilisation and current capacities into `message`,
    /// replacing any CPU, disk and network entries from a previous write.
    pub(crate) fn collect_into(&self, message: &mut Message) -> Result<()> {
        let mut host = self.host.lock();
        if host.samples.is_empty() {
            self.take_sample(&mut host, Instant::now());
        }
        let averaged = Self::average(&host.samples);
        host.disks.refresh_list();
        host.networks.refresh_list();

        let stale: Vec<String> = message
            .fields()
            .map(|field| field.name().to_owned())
            .filter(|name| SAMPLED_PREFIXES.iter().any(|prefix| name.starts_with(prefix)))
            .collect();
        for name in stale {
            message.clear_field(&name);
        }

        message.add_value("NUM-OF-CPUS", averaged.cpus.len() as u16)?;
        for (index, usage) in averaged.cpus.iter().enumerate() {
            message.add_value(&format!("CPU.{}.UTIL", index + 1), *usage)?;
        }
        message.add_value("CPU.TOTAL.UTIL", averaged.cpu_total)?;

        let system = &host.system;
        message.add_value("MEM.UTIL", averaged.memory)?;
        message.add_value("MEM.PHYSICAL.TOTAL", system.total_memory())?;
        message.add_value("MEM.PHYSICAL.AVAIL", system.available_memory())?;
        message.add_value("MEM.VIRTUAL.TOTAL", system.total_memory() + system.total_swap())?;
        message.add_value("MEM.VIRTUAL.AVAIL", system.available_memory() + system.free_swap())?;

        let disks = host.disks.list();
        message.add_value("NUM-OF-DISKS", disks.len() as u16)?;
        for (index, disk) in disks.iter().enumerate() {
            let prefix = format!("DISK.{}", index + 1);
            let total = disk.total_space();
            message.add_value(&format!("{prefix}.NAME"), disk.name().to_string_lossy().as_ref())?;
            message.add_value(
                &format!("{prefix}.SIZE"),
                u32::try_from(total / MEBIBYTE).unwrap_or(u32::MAX),
            )?;
            message.add_value(
                &format!("{prefix}.UTIL"),
                percent(total.saturating_sub(disk.available_space()), total),
            )?;
        }

        let mut ports: Vec<_> = host.networks.iter().collect();
        ports.sort_by(|(left, _), (right, _)| left.cmp(right));
        message.add_value("NUM-OF-NET-PORTS", ports.len() as u16)?;
        for (index, (name, data)) in ports.into_iter().enumerate() {
            let prefix = format!("NET-PORT.{}", index + 1);
            message.add_value(&format!("{prefix}.NAME"), name.as_str())?;
            message.add_value(&format!("{prefix}.TOTAL-BYTES-RECEIVED"), data.total_received())?;
            message.add_value(&format!("{prefix}.TOTAL-BYTES-SENT"), data.total_transmitted())?;
        }
        Ok(())
    }
}

impl PayloadSource for ResourceSampler {
    fn tick(&self, now: Instant) {
        let mut host = self.host.lock();
        let due = host
            .last
            .map_or(true, |last| now.duration_since(last) >= self.sample_interval);
        if due {
            self.take_sample(&mut host, now);
        }
    }

    fn refresh(&self, message: &mut Message) -> Result<()> {
        self.collect_into(message)
    }
}

/// Publishes RSRC messages describing host utilisation on its own
/// connection.
///
/// Utilisation is sampled every `sample_interval` seconds and reported as a
/// moving average over `average_interval` seconds. Capacities (memory,
/// disks, network counters) are read fresh for every publish.
pub struct ResourceGenerator {
    generator: PeriodicGenerator<ResourceSampler>,
}

impl ResourceGenerator {
    /// Generator for the middleware named by `config`.
    pub fn new(config: &Config, pub_rate: u16, sample_interval: u16, average_interval: u16) -> Result<Self> {
        Self::with_fields(config, pub_rate, sample_interval, average_interval, Vec::new())
    }

    /// Generator whose messages also carry `fields`.
    pub fn with_fields<I>(
        config: &Config,
        pub_rate: u16,
        sample_interval: u16,
        average_interval: u16,
        fields: I,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = Field>,
    {
        let sampler = ResourceSampler::new(sample_interval, average_interval)?;
        let connection = Connection::new(config)?;
        let mut message = connection.get_message_factory().create_message(RESOURCE_SCHEMA)?;
        message.add_value("OPER-SYS", host::os_description())?;
        message.add_fields(fields);
        let generator = PeriodicGenerator::new(
            "Resource Generator",
            connection,
            config,
            message,
            pub_rate,
            sampler,
        )?;
        Ok(Self { generator })
    }

    /// One-shot resource message built by `factory` from a single sample.
    pub fn create_resource_message(
        factory: &MessageFactory,
        sample_interval: u16,
        average_interval: u16,
    ) -> Result<Message> {
        let sampler = ResourceSampler::new(sample_interval, average_interval)?;
        let mut message = factory.create_message(RESOURCE_SCHEMA)?;
        sampler.collect_into(&mut message)?;
        message.add_value("OPER-SYS", host::os_description())?;
        Ok(message)
    }

    /// Connect and start publishing; `false` if already running.
    pub fn start(&self) -> Result<bool> {
        self.generator.start()
    }

    /// Stop publishing; `false` if never started or already stopped.
    pub fn stop(&self) -> bool {
        self.generator.stop()
    }

    /// Whether the publishing thread is active.
    pub fn is_running(&self) -> bool {
        self.generator.is_running()
    }

    /// Change the period; 0 publishes once more and then goes quiet.
    pub fn change_publish_rate(&self, pub_rate: u16) -> Result<()> {
        self.generator.change_publish_rate(pub_rate)
    }

    /// Add or replace a field; `PUB-RATE` and `COUNTER` must be non-negative.
    pub fn set_field(&self, field: Field) -> Result<bool> {
        self.generator.set_field(field)
    }

    /// Set a field by name and value.
    pub fn set_field_value(&self, name: &str, value: impl Into<FieldValue>) -> Result<bool> {
        self.generator.set_field_value(name, value)
    }

    /// Current publish rate in seconds.
    pub fn publish_rate(&self) -> u16 {
        self.generator.template().get_u16_value(PUB_RATE).unwrap_or(0)
    }

    /// Connection the resource messages are published on.
    pub fn connection(&self) -> &Connection {
        self.generator.connection()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use r_gmsec_common::ErrorCode;

    #[test]
    fn intervals_are_checked() {
        let err = ResourceSampler::new(0, 10).err().expect("zero sample");
        assert_eq!(err.code(), ErrorCode::Generator);
        assert_eq!(err.to_string(), "A sample rate of zero was specified");

        let err = ResourceSampler::new(5, 2).err().expect("short average");
        assert_eq!(
            err.to_string(),
            "A moving average interval less than sampling interval was specified"
        );
        assert_eq!(ResourceSampler::new(2, 10).expect("sampler").window, 5);
    }

    #[test]
    fn averages_per_cpu_and_total() {
        let samples: VecDeque<Sample> = [
            Sample { cpus: vec![10.0, 20.0], cpu_total: 15.0, memory: 40.0 },
            Sample { cpus: vec![30.0, 40.0], cpu_total: 35.0, memory: 60.0 },
        ]
        .into_iter()
        .collect();
        let averaged = ResourceSampler::average(&samples);
        assert_eq!(averaged.cpus, vec![20.0, 30.0]);
        assert_eq!(averaged.cpu_total, 25.0);
        assert_eq!(averaged.memory, 50.0);
    }

    #[test]
    fn resource_message_counts_match_arrays() {
        let factory = MessageFactory::new().expect("factory");
        let message = ResourceGenerator::create_resource_message(&factory, 1, 10).expect("resource");
        let cpus = message.get_u16_value("NUM-OF-CPUS").expect("cpus");
        assert!(cpus >= 1);
        assert!(message.has_field(&format!("CPU.{cpus}.UTIL")));
        assert!(!message.has_field(&format!("CPU.{}.UTIL", cpus + 1)));
        assert!(message.has_field("CPU.TOTAL.UTIL"));
        assert!(message.has_field("MEM.PHYSICAL.TOTAL"));
        let disks = message.get_u16_value("NUM-OF-DISKS").expect("disks");
        if disks > 0 {
            assert!(message.has_field("DISK.1.NAME"));
        }
        assert!(message.has_field("NUM-OF-NET-PORTS"));
        assert!(!message.get_string_value("OPER-SYS").expect("os").is_empty());
    }

    #[test]
    fn stale_array_entries_are_replaced() {
        let factory = MessageFactory::new().expect("factory");
        let mut message = factory.create_message("RSRC").expect("rsrc");
        message.add_value("CPU.999.UTIL", 1.0_f32).expect("stale cpu");
        message.add_value("NET-PORT.999.NAME", "gone").expect("stale port");
        ResourceSampler::new(1, 1)
            .expect("sampler")
            .collect_into(&mut message)
            .expect("collect");
        assert!(!message.has_field("CPU.999.UTIL"));
        assert!(!message.has_field("NET-PORT.999.NAME"));
    }
}
