//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Pending request bookkeeping for request/reply."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use r_gmsec_common::Config;
use r_gmsec_msg::Message;

use crate::event::ReplyCallback;

/// Timeout meaning "wait until a reply arrives".
pub const WAIT_FOREVER: i32 = -1;
/// Republish period meaning "never resend".
pub const REQUEST_REPUBLISH_NEVER: i32 = -1;

/// Shortest request timeout honoured.
pub const MIN_TIMEOUT_MS: i32 = 10;
/// Shortest republish period honoured.
pub const MIN_REPUBLISH_MS: i32 = 100;

/// Field carrying a reply's place in a multi-response exchange.
pub const RESPONSE_STATUS_FIELD: &str = "RESPONSE-STATUS";

/// Progress a reply reports in a multi-response exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStatus {
    /// Request received.
    Acknowledgement = 1,
    /// Still working.
    WorkingKeepAlive = 2,
    /// Finished successfully.
    SuccessfulCompletion = 3,
    /// Finished with a failure.
    FailedCompletion = 4,
    /// Request rejected.
    InvalidRequest = 5,
    /// Last reply of the exchange.
    FinalMessage = 6,
}

impl ResponseStatus {
    /// Status for a RESPONSE-STATUS value.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Self::Acknowledgement),
            2 => Some(Self::WorkingKeepAlive),
            3 => Some(Self::SuccessfulCompletion),
            4 => Some(Self::FailedCompletion),
            5 => Some(Self::InvalidRequest),
            6 => Some(Self::FinalMessage),
            _ => None,
        }
    }

    /// Status carried by `reply`, if it has a recognisable one.
    pub fn of_message(reply: &Message) -> Option<Self> {
        reply
            .get_integer_value(RESPONSE_STATUS_FIELD)
            .ok()
            .and_then(Self::from_code)
    }

    /// Whether no further replies follow.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Acknowledgement | Self::WorkingKeepAlive)
    }
}

/// Effective wait: `None` waits forever, short timeouts clamp up.
pub(crate) fn effective_timeout(timeout_ms: i32) -> Option<Duration> {
    if timeout_ms < 0 {
        None
    } else {
        Some(Duration::from_millis(timeout_ms.max(MIN_TIMEOUT_MS) as u64))
    }
}

/// Effective republish period; 0 falls back to `mw-republish-ms`.
pub(crate) fn effective_republish(republish_ms: i32, config: &Config) -> Option<Duration> {
    let requested = if republish_ms == 0 {
        config
            .get_integer_value_or("mw-republish-ms", i64::from(REQUEST_REPUBLISH_NEVER))
            .clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
    } else {
        republish_ms
    };
    if requested <= 0 {
        None
    } else {
        Some(Duration::from_millis(requested.max(MIN_REPUBLISH_MS) as u64))
    }
}

enum Waiter {
    Sync {
        reply: Option<Message>,
    },
    Async {
        callback: Arc<dyn ReplyCallback>,
        timeout: Option<Duration>,
        republish: Option<Duration>,
        deadline: Option<Instant>,
    },
}

struct PendingRequest {
    request: Message,
    sent_at: Instant,
    waiter: Waiter,
}

/// What became of a routed reply.
pub(crate) enum Routed {
    /// No request waits for it.
    Unknown,
    /// Handed to a blocked synchronous caller.
    Sync { latency: Duration },
    /// Owed to an asynchronous callback.
    Async {
        callback: Arc<dyn ReplyCallback>,
        request: Message,
        latency: Duration,
    },
}

/// Asynchronous request whose deadline passed.
pub(crate) struct Expired {
    pub(crate) callback: Arc<dyn ReplyCallback>,
    pub(crate) request: Message,
    pub(crate) republish: bool,
}

/// Requests awaiting replies, keyed by reply correlation ID.
#[derive(Default)]
pub(crate) struct RequestTable {
    pending: Mutex<HashMap<String, PendingRequest>>,
    replied: Condvar,
}

impl RequestTable {
    pub(crate) fn insert_sync(&self, id: &str, request: Message) {
        self.pending.lock().insert(
            id.to_owned(),
            PendingRequest {
                request,
                sent_at: Instant::now(),
                waiter: Waiter::Sync { reply: None },
            },
        );
    }

    pub(crate) fn insert_async(
        &self,
        id: &str,
        request: Message,
        callback: Arc<dyn ReplyCallback>,
        timeout: Option<Duration>,
        republish: Option<Duration>,
    ) {
        let now = Instant::now();
        self.pending.lock().insert(
            id.to_owned(),
            PendingRequest {
                request,
                sent_at: now,
                waiter: Waiter::Async {
                    callback,
                    timeout,
                    republish,
                    deadline: timeout.map(|timeout| now + timeout),
                },
            },
        );
    }

    pub(crate) fn remove(&self, id: &str) {
        self.pending.lock().remove(id);
    }

    pub(crate) fn has_async(&self) -> bool {
        self.pending
            .lock()
            .values()
            .any(|pending| matches!(pending.waiter, Waiter::Async { .. }))
    }

    /// Wait until a reply for `id` is routed or `until` passes; the entry is
    /// removed once a reply is taken.
    pub(crate) fn wait_for_reply(&self, id: &str, until: Instant) -> Option<Message> {
        let mut pending = self.pending.lock();
        loop {
            let ready = matches!(
                pending.get(id).map(|entry| &entry.waiter),
                Some(Waiter::Sync { reply: Some(_) })
            );
            if ready {
                return match pending.remove(id).map(|entry| entry.waiter) {
                    Some(Waiter::Sync { reply }) => reply,
                    _ => None,
                };
            }
            if !pending.contains_key(id) || Instant::now() >= until {
                return None;
            }
            self.replied.wait_until(&mut pending, until);
        }
    }

    /// Attach a reply to its request. An asynchronous request stays pending
    /// while `multi_response` is on and the reply's status is not terminal.
    pub(crate) fn route(&self, id: &str, reply: Message, multi_response: bool) -> Routed {
        let mut pending = self.pending.lock();
        let Some(entry) = pending.get_mut(id) else {
            return Routed::Unknown;
        };
        let latency = entry.sent_at.elapsed();
        match &mut entry.waiter {
            Waiter::Sync { reply: slot } => {
                if slot.is_none() {
                    *slot = Some(reply);
                }
                self.replied.notify_all();
                Routed::Sync { latency }
            }
            Waiter::Async {
                callback,
                timeout,
                deadline,
                ..
            } => {
                let callback = Arc::clone(callback);
                let finished = !multi_response
                    || ResponseStatus::of_message(&reply)
                        .map(ResponseStatus::is_terminal)
                        .unwrap_or(true);
                let request = entry.request.clone();
                if finished {
                    pending.remove(id);
                } else {
                    *deadline = timeout.map(|timeout| Instant::now() + timeout);
                }
                Routed::Async {
                    callback,
                    request,
                    latency,
                }
            }
        }
    }

    /// Asynchronous requests past their deadline. Those with a republish
    /// period get a fresh deadline; the rest are removed.
    pub(crate) fn expired(&self, now: Instant) -> Vec<Expired> {
        let mut pending = self.pending.lock();
        let mut expired = Vec::new();
        let mut finished = Vec::new();
        for (id, entry) in pending.iter_mut() {
            if let Waiter::Async {
                callback,
                republish,
                deadline: Some(deadline),
                ..
            } = &mut entry.waiter
            {
                if *deadline > now {
                    continue;
                }
                match republish {
                    Some(period) => *deadline = now + *period,
                    None => finished.push(id.clone()),
                }
                expired.push(Expired {
                    callback: Arc::clone(callback),
                    request: entry.request.clone(),
                    republish: republish.is_some(),
                });
            }
        }
        for id in finished {
            pending.remove(&id);
        }
        expired
    }

    /// Forget every request and wake blocked callers.
    pub(crate) fn clear(&self) {
        self.pending.lock().clear();
        self.replied.notify_all();
    }
}
