//! ---
//! ems_section: "07-resilience-fault-tolerance"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Periodic heartbeat and resource message generators."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Background publishers that keep a liveness (HB) or resource (RSRC)
//! message flowing on a dedicated connection.
#![warn(missing_docs)]

pub mod heartbeat;
mod periodic;
pub mod resource;

pub use heartbeat::HeartbeatGenerator;
pub use periodic::{COUNTER, PUB_RATE};
pub use resource::ResourceGenerator;
