//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Connection layer over pluggable middleware backends."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Publish/subscribe and request/reply over a middleware backend selected
//! by `mw-id`. The built-in `loopback` backend is an in-process bus.
#![warn(missing_docs)]

pub mod backend;
pub mod connection;
mod dispatcher;
pub mod event;
pub mod logging;
pub mod loopback;
pub mod metrics;
mod publisher;
pub mod request;
pub mod subscription;
mod tracking;

pub use backend::{load_backend, register_backend, registered_backends, BackendFactory, MiddlewareBackend};
pub use connection::{Connection, ConnectionState, DEFAULT_INBOX_DEPTH};
pub use event::{Callback, ConnectionEvent, EventCallback, ReplyCallback};
pub use logging::{log_message, MessageDirection};
pub use loopback::LoopbackBackend;
pub use metrics::{ConnectionMetrics, ConnectionMetricsExporter};
pub use publisher::{DEFAULT_QUEUE_DEPTH, DEFAULT_TEARDOWN_WAIT_MS};
pub use request::{ResponseStatus, REQUEST_REPUBLISH_NEVER, WAIT_FOREVER};
pub use subscription::SubscriptionInfo;
pub use tracking::REPLY_UNIQUE_ID_FIELD;
