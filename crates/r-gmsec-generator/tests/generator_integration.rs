//! ---
//! ems_section: "07-resilience-fault-tolerance"
//! ems_subsection: "integration-tests"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Generators publishing onto the loopback bus."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::time::{Duration, Instant};

use r_gmsec_common::{Config, ErrorCode};
use r_gmsec_connection::Connection;
use r_gmsec_generator::{HeartbeatGenerator, ResourceGenerator};
use r_gmsec_msg::{Field, Message};

fn config(bus: &str, extra: &[&str]) -> Config {
    let mut config = Config::from_args(["mw-id=loopback".to_owned(), format!("loopback-bus={bus}")]);
    config.merge(&Config::from_args(extra.iter().copied()), true);
    config
}

fn listener(bus: &str, pattern: &str) -> Connection {
    let connection = Connection::new(&config(bus, &[])).expect("listener");
    connection.connect().expect("connect");
    connection.subscribe(pattern).expect("subscribe");
    connection
}

fn standard_fields() -> Vec<Field> {
    vec![
        Field::new("MISSION-ID", "MY-MISSION").expect("mission"),
        Field::new("COMPONENT", "HB-GEN").expect("component"),
    ]
}

fn next(connection: &Connection, timeout_ms: i32) -> Option<Message> {
    connection.receive(timeout_ms).expect("receive")
}

#[test]
fn heartbeats_arrive_at_the_publish_rate() {
    let listener = listener("gen-cadence", "C2MS.>");
    let generator =
        HeartbeatGenerator::with_fields(&config("gen-cadence", &[]), 1, standard_fields()).expect("generator");
    assert!(generator.start().expect("start"));
    assert!(generator.is_running());
    assert!(!generator.start().expect("second start"));

    let mut arrivals = Vec::new();
    let mut counters = Vec::new();
    while arrivals.len() < 4 {
        let heartbeat = next(&listener, 3000).expect("heartbeat");
        arrivals.push(Instant::now());
        counters.push(heartbeat.get_u16_value("COUNTER").expect("counter"));
        assert_eq!(heartbeat.get_u16_value("PUB-RATE").expect("rate"), 1);
    }
    assert_eq!(counters, vec![1, 2, 3, 4]);
    for pair in arrivals.windows(2) {
        let delta = pair[1].duration_since(pair[0]);
        assert!(delta >= Duration::from_millis(500), "{delta:?}");
        assert!(delta <= Duration::from_millis(1500), "{delta:?}");
    }

    assert!(generator.stop());
    assert!(!generator.is_running());
    assert!(!generator.stop());
}

#[test]
fn zero_rate_sends_a_final_heartbeat() {
    let listener = listener("gen-final", "C2MS.>");
    let generator = HeartbeatGenerator::new(&config("gen-final", &[]), 30).expect("generator");
    generator.start().expect("start");
    let first = next(&listener, 2000).expect("first heartbeat");
    assert_eq!(first.get_u16_value("PUB-RATE").expect("rate"), 30);

    generator.change_publish_rate(0).expect("rate zero");
    let last = next(&listener, 2000).expect("final heartbeat");
    assert_eq!(last.get_u16_value("PUB-RATE").expect("rate"), 0);
    assert_eq!(last.get_u16_value("COUNTER").expect("counter"), 2);

    assert!(next(&listener, 1200).is_none());
    assert!(generator.is_running());
    assert!(generator.stop());
}

#[test]
fn counter_can_be_reset_between_publishes() {
    let listener = listener("gen-counter", "C2MS.>");
    let generator = HeartbeatGenerator::new(&config("gen-counter", &[]), 1).expect("generator");
    generator.set_field_value("COUNTER", 500_i64).expect("counter");
    generator.start().expect("start");
    let heartbeat = next(&listener, 2000).expect("heartbeat");
    assert_eq!(heartbeat.get_u16_value("COUNTER").expect("counter"), 500);
    generator.stop();
}

#[test]
fn validation_happens_on_start() {
    let generator =
        HeartbeatGenerator::new(&config("gen-validate", &["gmsec-msg-content-validate-send=true"]), 1)
            .expect("generator");
    let err = generator.start().expect_err("incomplete heartbeat");
    assert_eq!(err.code(), ErrorCode::Validation);
    assert!(err.to_string().contains("Message Validation Failed"));
    assert!(err.to_string().contains("MISSION-ID"));
    assert!(!generator.is_running());

    for field in standard_fields() {
        generator.set_field(field).expect("standard field");
    }
    assert!(generator.start().expect("compliant heartbeat"));
    assert!(generator.stop());
}

#[test]
fn resource_generator_publishes_samples() {
    let listener = listener("gen-resource", "C2MS.>");
    let generator = ResourceGenerator::with_fields(
        &config("gen-resource", &[]),
        1,
        1,
        2,
        standard_fields(),
    )
    .expect("generator");
    assert_eq!(generator.publish_rate(), 1);
    assert!(generator.start().expect("start"));

    let message = next(&listener, 3000).expect("resource message");
    assert!(message.get_schema_id().ends_with("RSRC"));
    assert_eq!(message.get_u16_value("COUNTER").expect("counter"), 1);
    let cpus = message.get_u16_value("NUM-OF-CPUS").expect("cpus");
    assert!(message.has_field(&format!("CPU.{cpus}.UTIL")));
    assert!(message.has_field("MEM.UTIL"));
    assert!(!message.get_string_value("OPER-SYS").expect("os").is_empty());
    assert!(generator.stop());
}

#[test]
fn resource_generator_rejects_bad_intervals() {
    let err = ResourceGenerator::new(&config("gen-resource-bad", &[]), 1, 0, 1)
        .err()
        .expect("zero sample interval");
    assert_eq!(err.code(), ErrorCode::Generator);
    let err = ResourceGenerator::new(&config("gen-resource-bad", &[]), 1, 4, 2)
        .err()
        .expect("short average");
    assert!(err.to_string().contains("moving average interval"));
}
