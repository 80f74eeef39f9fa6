//! ---
//! ems_section: "07-resilience-fault-tolerance"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Heartbeat generator publishing HB messages at a fixed rate."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use r_gmsec_common::{Config, Result};
use r_gmsec_connection::Connection;
use r_gmsec_msg::{Field, FieldValue, Message, MessageFactory};

use crate::periodic::{PeriodicGenerator, StaticPayload, PUB_RATE};

const HEARTBEAT_SCHEMA: &str = "HB";

/// Publishes a heartbeat every `PUB-RATE` seconds on its own connection.
///
/// The first heartbeat goes out as soon as [`HeartbeatGenerator::start`]
/// returns. Each one carries a `COUNTER` that starts at 1 and skips 0 on
/// wrap. Setting the rate to 0 publishes one last heartbeat advertising
/// `PUB-RATE` 0 and then goes quiet while the generator keeps running.
pub struct HeartbeatGenerator {
    generator: PeriodicGenerator<StaticPayload>,
}

impl HeartbeatGenerator {
    /// Generator for the middleware named by `config`; fails if the
    /// backend cannot be loaded.
    pub fn new(config: &Config, pub_rate: u16) -> Result<Self> {
        Self::with_fields(config, pub_rate, Vec::new())
    }

    /// Generator whose heartbeat also carries `fields`.
    pub fn with_fields<I>(config: &Config, pub_rate: u16, fields: I) -> Result<Self>
    where
        I: IntoIterator<Item = Field>,
    {
        let connection = Connection::new(config)?;
        let mut message = connection.get_message_factory().create_message(HEARTBEAT_SCHEMA)?;
        message.add_fields(fields);
        let generator = PeriodicGenerator::new(
            "Heartbeat Generator",
            connection,
            config,
            message,
            pub_rate,
            StaticPayload,
        )?;
        Ok(Self { generator })
    }

    /// Heartbeat built by `factory` with `PUB-RATE` set, without starting
    /// anything.
    pub fn create_heartbeat_message(factory: &MessageFactory, pub_rate: u16) -> Result<Message> {
        let mut message = factory.create_message(HEARTBEAT_SCHEMA)?;
        message.set_field_value(PUB_RATE, pub_rate)?;
        Ok(message)
    }

    /// Connect and start publishing. Returns `false` if already running;
    /// fails if outbound validation is on and the heartbeat is not compliant.
    pub fn start(&self) -> Result<bool> {
        self.generator.start()
    }

    /// Stop publishing. Returns `false` if the generator was never started
    /// or is already stopped.
    pub fn stop(&self) -> bool {
        self.generator.stop()
    }

    /// Whether the publishing thread is active.
    pub fn is_running(&self) -> bool {
        self.generator.is_running()
    }

    /// Change the period; 0 means publish once more and then stop
    /// publishing.
    pub fn change_publish_rate(&self, pub_rate: u16) -> Result<()> {
        self.generator.change_publish_rate(pub_rate)
    }

    /// Add or replace a heartbeat field; returns whether it replaced one.
    pub fn set_field(&self, field: Field) -> Result<bool> {
        self.generator.set_field(field)
    }

    /// Set a heartbeat field by name and value.
    pub fn set_field_value(&self, name: &str, value: impl Into<FieldValue>) -> Result<bool> {
        self.generator.set_field_value(name, value)
    }

    /// Heartbeat as it will next be published, minus `COUNTER` updates.
    pub fn heartbeat(&self) -> Message {
        self.generator.template()
    }

    /// Connection the heartbeats are published on.
    pub fn connection(&self) -> &Connection {
        self.generator.connection()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use r_gmsec_common::ErrorCode;

    fn config(bus: &str) -> Config {
        Config::from_args(["mw-id=loopback".to_owned(), format!("loopback-bus={bus}")])
    }

    #[test]
    fn heartbeat_template_carries_rate_and_fields() {
        let generator = HeartbeatGenerator::with_fields(
            &config("hb-unit-template"),
            5,
            vec![Field::new("COMPONENT", "HB-GEN").expect("component")],
        )
        .expect("generator");
        let heartbeat = generator.heartbeat();
        assert_eq!(heartbeat.get_u16_value("PUB-RATE").expect("rate"), 5);
        assert_eq!(heartbeat.get_string_value("COMPONENT").expect("component"), "HB-GEN");
        assert!(heartbeat.get_schema_id().ends_with("HB"));
    }

    #[test]
    fn missing_backend_fails_construction() {
        let err = HeartbeatGenerator::new(&Config::from_args(["mw-id=no-such-middleware"]), 1)
            .err()
            .expect("unknown backend");
        assert_eq!(err.code(), ErrorCode::Middleware);
    }

    #[test]
    fn stop_before_start_is_refused() {
        let generator = HeartbeatGenerator::new(&config("hb-unit-stop"), 1).expect("generator");
        assert!(!generator.is_running());
        assert!(!generator.stop());
    }

    #[test]
    fn special_fields_reject_negative_values() {
        let generator = HeartbeatGenerator::new(&config("hb-unit-negative"), 1).expect("generator");
        for name in ["PUB-RATE", "COUNTER"] {
            let err = generator.set_field_value(name, -1_i64).expect_err("negative");
            assert_eq!(err.code(), ErrorCode::Generator);
            assert_eq!(
                err.to_string(),
                format!("Setting {name} to less than zero is not permitted")
            );
        }
        assert!(generator.set_field_value("PUB-RATE", 2_i64).expect("rate"));
        assert_eq!(generator.heartbeat().get_u16_value("PUB-RATE").expect("rate"), 2);
        assert!(!generator.set_field_value("COMPONENT-STATUS", 1_i64).expect("status"));
    }

    #[test]
    fn standalone_heartbeat_message() {
        let factory = MessageFactory::new().expect("factory");
        let message = HeartbeatGenerator::create_heartbeat_message(&factory, 30).expect("heartbeat");
        assert_eq!(message.get_u16_value("PUB-RATE").expect("rate"), 30);
    }
}
