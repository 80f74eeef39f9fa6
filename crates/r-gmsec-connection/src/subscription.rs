//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Subscription registry and subject exclusions."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fmt;
use std::sync::Arc;

use r_gmsec_common::{Config, GmsecError, Result};
use r_gmsec_msg::SubjectPattern;

use crate::event::Callback;

/// Handle returned by a subscribe call; give it back to unsubscribe.
pub struct SubscriptionInfo {
    id: u64,
    connection_id: String,
    pattern: SubjectPattern,
    config: Config,
    callback: Option<Arc<dyn Callback>>,
}

impl SubscriptionInfo {
    /// Pattern the subscription was made with.
    pub fn get_subject_pattern(&self) -> &str {
        self.pattern.as_str()
    }

    /// Configuration supplied with the subscription.
    pub fn get_config(&self) -> &Config {
        &self.config
    }

    /// Callback receiving auto-dispatched messages, if any.
    pub fn get_callback(&self) -> Option<&Arc<dyn Callback>> {
        self.callback.as_ref()
    }

    /// Identifier of the owning connection.
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }
}

impl fmt::Debug for SubscriptionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionInfo")
            .field("id", &self.id)
            .field("connection_id", &self.connection_id)
            .field("pattern", &self.pattern.as_str())
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

fn same_callback(a: &Option<Arc<dyn Callback>>, b: &Option<Arc<dyn Callback>>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ()),
        _ => false,
    }
}

struct Registration {
    id: u64,
    pattern: SubjectPattern,
    callback: Option<Arc<dyn Callback>>,
}

/// Subscriptions of one connection, in registration order.
#[derive(Default)]
pub(crate) struct SubscriptionTable {
    entries: Vec<Registration>,
    next_id: u64,
}

impl SubscriptionTable {
    /// Register `pattern`; the flag reports whether the backend still has to
    /// be told about the pattern.
    pub(crate) fn insert(
        &mut self,
        connection_id: &str,
        pattern: SubjectPattern,
        config: Config,
        callback: Option<Arc<dyn Callback>>,
    ) -> Result<(SubscriptionInfo, bool)> {
        if self
            .entries
            .iter()
            .any(|entry| entry.pattern == pattern && same_callback(&entry.callback, &callback))
        {
            return Err(GmsecError::DuplicateSubscription(format!(
                "Duplicate subscription to {}",
                pattern.as_str()
            )));
        }
        let first = !self.entries.iter().any(|entry| entry.pattern == pattern);
        self.next_id += 1;
        self.entries.push(Registration {
            id: self.next_id,
            pattern: pattern.clone(),
            callback: callback.clone(),
        });
        let info = SubscriptionInfo {
            id: self.next_id,
            connection_id: connection_id.to_owned(),
            pattern,
            config,
            callback,
        };
        Ok((info, first))
    }

    /// Drop a registration; the flag reports whether it was the last one for
    /// its pattern.
    pub(crate) fn remove(&mut self, id: u64) -> Option<(SubjectPattern, bool)> {
        let index = self.entries.iter().position(|entry| entry.id == id)?;
        let removed = self.entries.remove(index);
        let last = !self.entries.iter().any(|entry| entry.pattern == removed.pattern);
        Some((removed.pattern, last))
    }

    pub(crate) fn matches(&self, subject: &str) -> bool {
        self.entries.iter().any(|entry| entry.pattern.matches(subject))
    }

    /// Callbacks of every matching subscription, in registration order.
    pub(crate) fn callbacks_for(&self, subject: &str) -> Vec<Arc<dyn Callback>> {
        self.entries
            .iter()
            .filter(|entry| entry.pattern.matches(subject))
            .filter_map(|entry| entry.callback.clone())
            .collect()
    }

    /// Distinct patterns in registration order.
    pub(crate) fn patterns(&self) -> Vec<String> {
        let mut patterns: Vec<String> = Vec::new();
        for entry in &self.entries {
            if !patterns.iter().any(|known| known == entry.pattern.as_str()) {
                patterns.push(entry.pattern.as_str().to_owned());
            }
        }
        patterns
    }

    /// Distinct patterns, consuming every registration.
    pub(crate) fn drain_patterns(&mut self) -> Vec<SubjectPattern> {
        let mut patterns: Vec<SubjectPattern> = Vec::new();
        for entry in self.entries.drain(..) {
            if !patterns.contains(&entry.pattern) {
                patterns.push(entry.pattern);
            }
        }
        patterns
    }
}

/// Subject patterns whose messages are dropped even when subscribed to.
#[derive(Debug, Default)]
pub(crate) struct ExclusionFilter {
    patterns: Vec<SubjectPattern>,
}

impl ExclusionFilter {
    pub(crate) fn add(&mut self, pattern: SubjectPattern) {
        if !self.patterns.contains(&pattern) {
            self.patterns.push(pattern);
        }
    }

    pub(crate) fn remove(&mut self, pattern: &SubjectPattern) -> bool {
        let before = self.patterns.len();
        self.patterns.retain(|existing| existing != pattern);
        before != self.patterns.len()
    }

    pub(crate) fn excludes(&self, subject: &str) -> bool {
        self.patterns.iter().any(|pattern| pattern.matches(subject))
    }
}
