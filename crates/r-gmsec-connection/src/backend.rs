//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Middleware backend abstraction and the mw-id registry."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::time::Duration;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use r_gmsec_common::{Config, GmsecError, Result};
use r_gmsec_msg::{Message, SubjectPattern};
use tracing::debug;

use crate::loopback::LoopbackBackend;

/// Config key naming the backend a connection loads.
pub const MW_ID: &str = "mw-id";

/// Transport a [`crate::Connection`] drives.
///
/// Backends deliver only messages that match their own subscriptions, plus
/// replies addressed to them through [`MiddlewareBackend::reply`].
pub trait MiddlewareBackend: Send + Sync {
    /// Short backend identifier, e.g. `loopback`.
    fn name(&self) -> &str;

    /// Human-readable backend description reported as MW-INFO.
    fn info(&self) -> String;

    /// Endpoint the backend is attached to.
    fn endpoint(&self) -> String;

    /// Open the session; `connection_id` addresses replies to this backend.
    fn connect(&self, connection_id: &str) -> Result<()>;

    /// Close the session and drop anything still queued.
    fn disconnect(&self) -> Result<()>;

    /// Start receiving messages whose subjects match `pattern`.
    fn subscribe(&self, pattern: &SubjectPattern) -> Result<()>;

    /// Stop receiving for one earlier `subscribe` of `pattern`.
    fn unsubscribe(&self, pattern: &SubjectPattern) -> Result<()>;

    /// Deliver to every matching subscriber, requests included.
    fn publish(&self, message: &Message) -> Result<()>;

    /// Deliver a reply to the connection that issued the request identified
    /// by `reply_id`.
    fn reply(&self, message: &Message, reply_id: &str) -> Result<()>;

    /// Next inbound message; `None` waits forever.
    fn receive(&self, timeout: Option<Duration>) -> Result<Option<Message>>;
}

/// Builds a backend from connection configuration.
pub type BackendFactory = fn(&Config) -> Result<Box<dyn MiddlewareBackend>>;

static REGISTRY: Lazy<RwLock<HashMap<String, BackendFactory>>> = Lazy::new(|| {
    let mut factories: HashMap<String, BackendFactory> = HashMap::new();
    factories.insert(LoopbackBackend::MW_ID.to_owned(), LoopbackBackend::create);
    RwLock::new(factories)
});

/// Make `mw_id` loadable by every connection created afterwards.
pub fn register_backend(mw_id: &str, factory: BackendFactory) {
    debug!(mw_id, "middleware backend registered");
    REGISTRY.write().insert(mw_id.to_ascii_lowercase(), factory);
}

/// Identifiers currently loadable, sorted.
pub fn registered_backends() -> Vec<String> {
    let mut ids: Vec<String> = REGISTRY.read().keys().cloned().collect();
    ids.sort();
    ids
}

/// Load the backend `config` names.
pub fn load_backend(config: &Config) -> Result<Box<dyn MiddlewareBackend>> {
    let mw_id = config
        .get_value(MW_ID)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| GmsecError::Config("mw-id in Config is not specified".to_owned()))?;
    let factory = REGISTRY
        .read()
        .get(&mw_id.to_ascii_lowercase())
        .copied()
        .ok_or_else(|| GmsecError::middleware(0, format!("Unable to load {mw_id}")))?;
    factory(config)
}
