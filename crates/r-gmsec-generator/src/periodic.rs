//! ---
//! ems_section: "07-resilience-fault-tolerance"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared publish schedule and worker thread behind the generators."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use r_gmsec_common::{Config, GmsecError, Result};
use r_gmsec_connection::Connection;
use r_gmsec_msg::{Field, FieldValue, Message};
use tracing::{debug, error, info, warn};

/// Field carrying the publish period in seconds.
pub const PUB_RATE: &str = "PUB-RATE";
/// Field carrying the message sequence number.
pub const COUNTER: &str = "COUNTER";

/// Upper bound on how long the worker sleeps between checks.
const TICK: Duration = Duration::from_millis(100);

/// Hooks a generator runs on its publishing thread.
pub(crate) trait PayloadSource: Send + Sync + 'static {
    /// Called on every wake-up of the worker, published or not.
    fn tick(&self, _now: Instant) {}

    /// Update the template right before it is published.
    fn refresh(&self, _message: &mut Message) -> Result<()> {
        Ok(())
    }
}

/// Payload for generators that publish their template unchanged.
pub(crate) struct StaticPayload;

impl PayloadSource for StaticPayload {}

/// Whether the connection config asks for outbound validation.
pub(crate) fn validation_requested(config: &Config) -> bool {
    [
        "gmsec-msg-content-validate",
        "gmsec-msg-content-validate-all",
        "gmsec-msg-content-validate-send",
    ]
    .iter()
    .any(|key| config.get_boolean_value_or(key, false))
}

#[derive(Debug)]
struct Schedule {
    rate: u16,
    last: Option<Instant>,
    publish_now: bool,
}

impl Schedule {
    fn new(rate: u16) -> Self {
        Self {
            rate,
            last: None,
            publish_now: false,
        }
    }

    fn restart(&mut self) {
        self.last = None;
        self.publish_now = true;
    }

    /// A rate of zero asks for one final publish, after which the
    /// schedule stays idle until the rate is raised again.
    fn set_rate(&mut self, rate: u16) {
        self.rate = rate;
        if rate == 0 {
            self.publish_now = true;
        }
    }

    fn take_due(&mut self, now: Instant) -> bool {
        let due = self.publish_now
            || match (self.rate, self.last) {
                (0, _) => false,
                (_, None) => true,
                (rate, Some(last)) => now.duration_since(last) >= Duration::from_secs(u64::from(rate)),
            };
        if due {
            self.publish_now = false;
            self.last = Some(now);
        }
        due
    }

    fn until_due(&self, now: Instant) -> Duration {
        if self.publish_now {
            return Duration::ZERO;
        }
        match (self.rate, self.last) {
            (0, _) => TICK,
            (_, None) => Duration::ZERO,
            (rate, Some(last)) => (last + Duration::from_secs(u64::from(rate))).saturating_duration_since(now),
        }
    }
}

struct Template {
    message: Message,
    counter: u16,
}

struct Inner<P> {
    label: &'static str,
    connection: Connection,
    validate: bool,
    template: Mutex<Template>,
    schedule: Mutex<Schedule>,
    wake: Condvar,
    running: AtomicBool,
    payload: P,
}

impl<P: PayloadSource> Inner<P> {
    fn publish_once(&self) {
        let mut template = self.template.lock();
        if let Err(err) = self.payload.refresh(&mut template.message) {
            warn!(generator = self.label, error = %err, "unable to refresh generator payload");
        }
        if template.counter == 0 {
            template.counter = 1;
        }
        let counter = template.counter;
        template.counter = counter.wrapping_add(1);
        match Field::new(COUNTER, counter) {
            Ok(field) => {
                template.message.add_field(field);
            }
            Err(err) => warn!(generator = self.label, error = %err, "unable to stamp counter"),
        }
        match self.connection.publish(&template.message) {
            Ok(()) => debug!(generator = self.label, counter, subject = %template.message.get_subject(), "published"),
            Err(err) => error!(generator = self.label, error = %err, "error publishing message"),
        }
    }
}

fn run<P: PayloadSource>(inner: Arc<Inner<P>>) {
    while inner.running.load(Ordering::SeqCst) {
        let now = Instant::now();
        inner.payload.tick(now);
        let due = inner.schedule.lock().take_due(now);
        if due {
            inner.publish_once();
        }

        let mut schedule = inner.schedule.lock();
        if inner.running.load(Ordering::SeqCst) {
            let wait = schedule.until_due(Instant::now()).min(TICK);
            if !wait.is_zero() {
                inner.wake.wait_for(&mut schedule, wait);
            }
        }
    }
    debug!(generator = inner.label, "publishing thread stopped");
}

#[derive(Default)]
struct Service {
    handle: Option<JoinHandle<()>>,
    started: bool,
}

/// Template message republished on a schedule by a background thread.
pub(crate) struct PeriodicGenerator<P: PayloadSource> {
    inner: Arc<Inner<P>>,
    service: Mutex<Service>,
}

impl<P: PayloadSource> PeriodicGenerator<P> {
    pub(crate) fn new(
        label: &'static str,
        connection: Connection,
        config: &Config,
        mut message: Message,
        pub_rate: u16,
        payload: P,
    ) -> Result<Self> {
        message.set_field_value(PUB_RATE, pub_rate)?;
        Ok(Self {
            inner: Arc::new(Inner {
                label,
                connection,
                validate: validation_requested(config),
                template: Mutex::new(Template { message, counter: 1 }),
                schedule: Mutex::new(Schedule::new(pub_rate)),
                wake: Condvar::new(),
                running: AtomicBool::new(false),
                payload,
            }),
            service: Mutex::new(Service::default()),
        })
    }

    pub(crate) fn connection(&self) -> &Connection {
        &self.inner.connection
    }

    pub(crate) fn start(&self) -> Result<bool> {
        let mut service = self.service.lock();
        if self.inner.running.load(Ordering::SeqCst) {
            warn!(generator = self.inner.label, "already running");
            return Ok(false);
        }
        if self.inner.validate {
            self.inner.template.lock().message.is_compliant().into_result()?;
        }
        self.inner.connection.connect()?;
        if let Some(previous) = service.handle.take() {
            let _ = previous.join();
        }

        self.inner.schedule.lock().restart();
        self.inner.running.store(true, Ordering::SeqCst);
        let inner = Arc::clone(&self.inner);
        let handle = thread::Builder::new()
            .name(format!("gmsec-{}", self.inner.label.to_ascii_lowercase().replace(' ', "-")))
            .spawn(move || run(inner))
            .map_err(|err| {
                self.inner.running.store(false, Ordering::SeqCst);
                GmsecError::Io(format!("unable to start {} thread: {err}", self.inner.label))
            })?;
        service.handle = Some(handle);
        service.started = true;
        info!(generator = self.inner.label, connection = %self.inner.connection.get_id(), "started");
        Ok(true)
    }

    pub(crate) fn stop(&self) -> bool {
        let mut service = self.service.lock();
        if !service.started {
            warn!(generator = self.inner.label, "was never started");
            return false;
        }
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            warn!(generator = self.inner.label, "is no longer running");
            return false;
        }
        {
            let _schedule = self.inner.schedule.lock();
            self.inner.wake.notify_all();
        }
        if let Some(handle) = service.handle.take() {
            if handle.join().is_err() {
                warn!(generator = self.inner.label, "publishing thread panicked");
            }
        }
        info!(generator = self.inner.label, "stopped");
        true
    }

    pub(crate) fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Add or replace a template field. PUB-RATE reschedules the worker and
    /// COUNTER resets the sequence; both must be non-negative.
    pub(crate) fn set_field(&self, field: Field) -> Result<bool> {
        let mut template = self.inner.template.lock();
        let existed = template.message.has_field(field.name());
        let special = [PUB_RATE, COUNTER]
            .into_iter()
            .find(|name| field.name().eq_ignore_ascii_case(name));
        let Some(name) = special else {
            template.message.add_field(field);
            return Ok(existed);
        };

        let value = field.get_i64_value()?;
        if value < 0 {
            return Err(GmsecError::Generator(format!(
                "Setting {} to less than zero is not permitted",
                field.name()
            )));
        }
        let value = u16::try_from(value).map_err(|_| {
            GmsecError::Generator(format!("Setting {} above {} is not permitted", field.name(), u16::MAX))
        })?;
        template.message.add_field(Field::new(name, value)?);
        if name == PUB_RATE {
            drop(template);
            self.inner.schedule.lock().set_rate(value);
            self.inner.wake.notify_all();
            debug!(generator = self.inner.label, rate = value, "publish rate changed");
        } else {
            template.counter = value;
        }
        Ok(existed)
    }

    /// Like [`PeriodicGenerator::set_field`] but converting the value to
    /// the type the template expects.
    pub(crate) fn set_field_value(&self, name: &str, value: impl Into<FieldValue>) -> Result<bool> {
        if name.eq_ignore_ascii_case(PUB_RATE) || name.eq_ignore_ascii_case(COUNTER) {
            return self.set_field(Field::new(name, value)?);
        }
        self.inner.template.lock().message.set_field_value(name, value)
    }

    pub(crate) fn change_publish_rate(&self, rate: u16) -> Result<()> {
        self.set_field(Field::new(PUB_RATE, rate)?).map(|_| ())
    }

    /// Snapshot of the template as it will next be published.
    pub(crate) fn template(&self) -> Message {
        self.inner.template.lock().message.clone()
    }
}

impl<P: PayloadSource> Drop for PeriodicGenerator<P> {
    fn drop(&mut self) {
        if self.inner.running.load(Ordering::SeqCst) {
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_publish_is_immediate_then_periodic() {
        let start = Instant::now();
        let mut schedule = Schedule::new(2);
        schedule.restart();
        assert!(schedule.take_due(start));
        assert!(!schedule.take_due(start + Duration::from_secs(1)));
        assert_eq!(schedule.until_due(start + Duration::from_secs(1)), Duration::from_secs(1));
        assert!(schedule.take_due(start + Duration::from_secs(2)));
    }

    #[test]
    fn zero_rate_publishes_once_more_then_idles() {
        let start = Instant::now();
        let mut schedule = Schedule::new(1);
        assert!(schedule.take_due(start));
        schedule.set_rate(0);
        assert!(schedule.take_due(start));
        assert!(!schedule.take_due(start + Duration::from_secs(10)));
        assert_eq!(schedule.until_due(start), TICK);

        schedule.set_rate(1);
        assert!(schedule.take_due(start + Duration::from_secs(11)));
    }

    #[test]
    fn validation_keys_are_recognised() {
        assert!(!validation_requested(&Config::new()));
        assert!(validation_requested(&Config::from_args(["gmsec-msg-content-validate-send=true"])));
        assert!(validation_requested(&Config::from_args(["GMSEC-MSG-CONTENT-VALIDATE-ALL=yes"])));
        assert!(!validation_requested(&Config::from_args(["gmsec-msg-content-validate-recv=true"])));
    }
}
