//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Connection counters and their Prometheus exporter."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use prometheus::{Histogram, HistogramOpts, IntCounter, Opts, Registry};

/// Snapshot of one connection's traffic counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionMetrics {
    /// Messages handed to the backend, requests and replies included.
    pub published: u64,
    /// Messages accepted from the backend.
    pub received: u64,
    /// Messages delivered to subscription callbacks.
    pub dispatched: u64,
    /// Messages dropped by exclusions, validation or lack of a subscription.
    pub dropped: u64,
    /// Requests issued.
    pub requests: u64,
    /// Replies routed to pending requests.
    pub replies: u64,
    /// Requests that timed out.
    pub timeouts: u64,
}

#[derive(Default)]
pub(crate) struct Counters {
    published: AtomicU64,
    received: AtomicU64,
    dispatched: AtomicU64,
    dropped: AtomicU64,
    requests: AtomicU64,
    replies: AtomicU64,
    timeouts: AtomicU64,
}

/// Counter a connection bumps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Counter {
    Published,
    Received,
    Dispatched,
    Dropped,
    Requests,
    Replies,
    Timeouts,
}

impl Counters {
    pub(crate) fn bump(&self, counter: Counter, exporter: Option<&ConnectionMetricsExporter>) {
        let slot = match counter {
            Counter::Published => &self.published,
            Counter::Received => &self.received,
            Counter::Dispatched => &self.dispatched,
            Counter::Dropped => &self.dropped,
            Counter::Requests => &self.requests,
            Counter::Replies => &self.replies,
            Counter::Timeouts => &self.timeouts,
        };
        slot.fetch_add(1, Ordering::Relaxed);
        if let Some(exporter) = exporter {
            exporter.observe(counter);
        }
    }

    pub(crate) fn snapshot(&self) -> ConnectionMetrics {
        ConnectionMetrics {
            published: self.published.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            requests: self.requests.load(Ordering::Relaxed),
            replies: self.replies.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
        }
    }
}

/// Prometheus metric handles for connection activity.
pub struct ConnectionMetricsExporter {
    published: IntCounter,
    received: IntCounter,
    dispatched: IntCounter,
    dropped: IntCounter,
    requests: IntCounter,
    replies: IntCounter,
    timeouts: IntCounter,
    latency: Histogram,
}

impl ConnectionMetricsExporter {
    /// Register connection metrics with the provided registry.
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let counter = |name: &str, help: &str| -> Result<IntCounter, prometheus::Error> {
            let counter = IntCounter::with_opts(Opts::new(name, help))?;
            registry.register(Box::new(counter.clone()))?;
            Ok(counter)
        };
        let published = counter("gmsec_messages_published_total", "Messages handed to the middleware")?;
        let received = counter("gmsec_messages_received_total", "Messages accepted from the middleware")?;
        let dispatched = counter("gmsec_messages_dispatched_total", "Messages delivered to callbacks")?;
        let dropped = counter("gmsec_messages_dropped_total", "Messages filtered out before delivery")?;
        let requests = counter("gmsec_requests_total", "Requests issued")?;
        let replies = counter("gmsec_replies_total", "Replies routed to pending requests")?;
        let timeouts = counter("gmsec_request_timeouts_total", "Requests that saw no reply in time")?;
        let latency = Histogram::with_opts(HistogramOpts::new(
            "gmsec_request_roundtrip_latency_seconds",
            "Observed latency between a request and its reply",
        ))?;
        registry.register(Box::new(latency.clone()))?;

        Ok(Self {
            published,
            received,
            dispatched,
            dropped,
            requests,
            replies,
            timeouts,
            latency,
        })
    }

    fn observe(&self, counter: Counter) {
        match counter {
            Counter::Published => self.published.inc(),
            Counter::Received => self.received.inc(),
            Counter::Dispatched => self.dispatched.inc(),
            Counter::Dropped => self.dropped.inc(),
            Counter::Requests => self.requests.inc(),
            Counter::Replies => self.replies.inc(),
            Counter::Timeouts => self.timeouts.inc(),
        }
    }

    /// Record a request round trip.
    pub fn observe_latency(&self, duration: Duration) {
        self.latency.observe(duration.as_secs_f64());
    }
}
