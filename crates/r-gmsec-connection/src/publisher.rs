//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Bounded queue behind asynchronous publishing."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use r_gmsec_common::{Config, GmsecError, Result};
use r_gmsec_msg::Message;

/// Default bound on queued asynchronous publishes.
pub const DEFAULT_QUEUE_DEPTH: usize = 1000;
/// Default wait for the queue to drain on disconnect.
pub const DEFAULT_TEARDOWN_WAIT_MS: u64 = 1000;

/// Asynchronous publish settings read from connection config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct AsyncPublishSettings {
    pub(crate) depth: usize,
    pub(crate) teardown_wait: Duration,
}

impl AsyncPublishSettings {
    /// `None` unless `gmsec-async-publish` is on.
    pub(crate) fn from_config(config: &Config) -> Option<Self> {
        if !config.get_boolean_value_or("gmsec-async-publish", false) {
            return None;
        }
        let depth = config
            .get_integer_value_or("gmsec-async-publish-queue-depth", DEFAULT_QUEUE_DEPTH as i64)
            .max(1) as usize;
        let wait = config
            .get_integer_value_or("gmsec-async-publish-teardown-wait", DEFAULT_TEARDOWN_WAIT_MS as i64)
            .max(0) as u64;
        Some(Self {
            depth,
            teardown_wait: Duration::from_millis(wait),
        })
    }
}

struct State {
    messages: VecDeque<Message>,
    in_flight: bool,
    closed: bool,
}

/// Messages waiting for the publisher thread.
pub(crate) struct PublishQueue {
    depth: usize,
    state: Mutex<State>,
    changed: Condvar,
}

impl PublishQueue {
    pub(crate) fn new(depth: usize) -> Self {
        Self {
            depth: depth.max(1),
            state: Mutex::new(State {
                messages: VecDeque::new(),
                in_flight: false,
                closed: false,
            }),
            changed: Condvar::new(),
        }
    }

    /// Reopen after a disconnect.
    pub(crate) fn open(&self) {
        let mut state = self.state.lock();
        state.closed = false;
        state.messages.clear();
    }

    /// Enqueue, blocking while the queue is full.
    pub(crate) fn push(&self, message: Message) -> Result<()> {
        let mut state = self.state.lock();
        while state.messages.len() >= self.depth && !state.closed {
            self.changed.wait(&mut state);
        }
        if state.closed {
            return Err(GmsecError::NotInitialized(
                "Asynchronous publish queue is closed".to_owned(),
            ));
        }
        state.messages.push_back(message);
        self.changed.notify_all();
        Ok(())
    }

    /// Next message for the publisher thread; marks it in flight until
    /// [`PublishQueue::finish`].
    pub(crate) fn pop(&self, timeout: Duration) -> Option<Message> {
        let mut state = self.state.lock();
        if state.messages.is_empty() && !state.closed {
            self.changed.wait_for(&mut state, timeout);
        }
        let message = state.messages.pop_front();
        state.in_flight = message.is_some();
        self.changed.notify_all();
        message
    }

    pub(crate) fn finish(&self) {
        self.state.lock().in_flight = false;
        self.changed.notify_all();
    }

    pub(crate) fn len(&self) -> usize {
        let state = self.state.lock();
        state.messages.len() + usize::from(state.in_flight)
    }

    /// Wait up to `wait` for every queued message to be published.
    pub(crate) fn drain(&self, wait: Duration) -> bool {
        let until = Instant::now() + wait;
        let mut state = self.state.lock();
        while !state.messages.is_empty() || state.in_flight {
            if self.changed.wait_until(&mut state, until).timed_out() {
                return state.messages.is_empty() && !state.in_flight;
            }
        }
        true
    }

    /// Refuse further messages and drop whatever is left; returns the
    /// number dropped.
    pub(crate) fn close(&self) -> usize {
        let mut state = self.state.lock();
        state.closed = true;
        let dropped = state.messages.len();
        state.messages.clear();
        self.changed.notify_all();
        dropped
    }
}
