//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared primitives and utilities for the messaging runtime."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Core shared primitives for the R-GMSEC workspace.
//! This crate exposes the key/value `Config` store, the error taxonomy,
//! XML parsing, host identity, runtime settings and logging utilities
//! consumed across the workspace.

pub mod config;
pub mod error;
pub mod host;
pub mod logging;
pub mod settings;
pub mod time;
pub mod xml;

pub use config::{Config, DataFormat};
pub use error::{ErrorCode, GmsecError, Result, Status};
pub use logging::{init_tracing, LogFormat, TRAFFIC_TARGET};
pub use settings::{GeneratorSettings, LoggingConfig, MetricsConfig, RuntimeSettings};
pub use xml::{Element, XmlError};
