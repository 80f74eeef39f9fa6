//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "In-process loopback bus backend."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Every loopback connection naming the same `loopback-bus` joins one shared
//! in-process bus. Each member keeps its own subscriptions and inbound queue.
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use parking_lot::{Condvar, Mutex};
use r_gmsec_common::config::parse_bool;
use r_gmsec_common::{Config, GmsecError, Result};
use r_gmsec_msg::{Message, MessageKind, SubjectPattern};
use tracing::{debug, trace};

use crate::backend::MiddlewareBackend;

/// Config key naming the bus a loopback connection joins.
pub const LOOPBACK_BUS: &str = "loopback-bus";
const DEFAULT_BUS: &str = "default";

static BUSES: Lazy<Mutex<HashMap<String, Weak<Bus>>>> = Lazy::new(|| Mutex::new(HashMap::new()));

struct Member {
    patterns: Mutex<Vec<SubjectPattern>>,
    queue: Mutex<VecDeque<Message>>,
    ready: Condvar,
}

impl Member {
    fn new() -> Self {
        Self {
            patterns: Mutex::new(Vec::new()),
            queue: Mutex::new(VecDeque::new()),
            ready: Condvar::new(),
        }
    }

    fn deliver(&self, message: Message) {
        self.queue.lock().push_back(message);
        self.ready.notify_one();
    }

    fn wants(&self, subject: &str) -> bool {
        self.patterns.lock().iter().any(|pattern| pattern.matches(subject))
    }
}

struct Bus {
    name: String,
    members: Mutex<HashMap<String, Arc<Member>>>,
}

impl Bus {
    fn join(name: &str) -> Arc<Bus> {
        let mut buses = BUSES.lock();
        if let Some(bus) = buses.get(name).and_then(Weak::upgrade) {
            return bus;
        }
        let bus = Arc::new(Bus {
            name: name.to_owned(),
            members: Mutex::new(HashMap::new()),
        });
        buses.retain(|_, existing| existing.strong_count() > 0);
        buses.insert(name.to_owned(), Arc::downgrade(&bus));
        bus
    }

    fn broadcast(&self, message: &Message) -> usize {
        let subject = message.get_subject();
        let targets: Vec<Arc<Member>> = self
            .members
            .lock()
            .values()
            .filter(|member| member.wants(&subject))
            .cloned()
            .collect();
        for member in &targets {
            member.deliver(message.clone());
        }
        targets.len()
    }
}

/// Which operations fail on purpose, with the custom code they report.
#[derive(Debug, Default, Clone, Copy)]
struct SimulatedFailures {
    connect: Option<i32>,
    subscribe: Option<i32>,
    unsubscribe: Option<i32>,
    publish: Option<i32>,
    request: Option<i32>,
    reply: Option<i32>,
    receive: Option<i32>,
}

impl SimulatedFailures {
    fn from_config(config: &Config) -> Self {
        let read = |operation: &str| {
            let value = config.get_value(&format!("mw-sim-{operation}-failure"))?;
            match value.trim().parse::<i32>() {
                Ok(0) => None,
                Ok(code) => Some(code),
                Err(_) => parse_bool(value).filter(|enabled| *enabled).map(|_| 1),
            }
        };
        Self {
            connect: read("connect"),
            subscribe: read("subscribe"),
            unsubscribe: read("unsubscribe"),
            publish: read("publish"),
            request: read("request"),
            reply: read("reply"),
            receive: read("receive"),
        }
    }
}

fn check(failure: Option<i32>, operation: &str) -> Result<()> {
    match failure {
        Some(custom_code) => Err(GmsecError::middleware(
            custom_code,
            format!("Simulated {operation} failure"),
        )),
        None => Ok(()),
    }
}

/// Backend registered as `mw-id=loopback`.
pub struct LoopbackBackend {
    bus: Arc<Bus>,
    session: Mutex<Option<(String, Arc<Member>)>>,
    failures: SimulatedFailures,
    publish_delay: Duration,
}

impl LoopbackBackend {
    /// Registry identifier.
    pub const MW_ID: &'static str = "loopback";

    /// Backend factory used by the registry.
    pub fn create(config: &Config) -> Result<Box<dyn MiddlewareBackend>> {
        Ok(Box::new(Self::new(config)))
    }

    /// Backend on the bus `config` names.
    pub fn new(config: &Config) -> Self {
        let bus_name = config.get_value_or(LOOPBACK_BUS, DEFAULT_BUS);
        let delay_ms = config.get_integer_value_or("mw-sim-publish-delay-ms", 0).max(0) as u64;
        Self {
            bus: Bus::join(bus_name),
            session: Mutex::new(None),
            failures: SimulatedFailures::from_config(config),
            publish_delay: Duration::from_millis(delay_ms),
        }
    }

    fn member(&self) -> Result<Arc<Member>> {
        self.session
            .lock()
            .as_ref()
            .map(|(_, member)| Arc::clone(member))
            .ok_or_else(|| GmsecError::middleware(0, "Loopback session is not open"))
    }
}

impl MiddlewareBackend for LoopbackBackend {
    fn name(&self) -> &str {
        Self::MW_ID
    }

    fn info(&self) -> String {
        format!("loopback {} (in-process bus {})", env!("CARGO_PKG_VERSION"), self.bus.name)
    }

    fn endpoint(&self) -> String {
        format!("loopback://{}", self.bus.name)
    }

    fn connect(&self, connection_id: &str) -> Result<()> {
        check(self.failures.connect, "connect")?;
        let member = Arc::new(Member::new());
        self.bus
            .members
            .lock()
            .insert(connection_id.to_owned(), Arc::clone(&member));
        *self.session.lock() = Some((connection_id.to_owned(), member));
        debug!(bus = %self.bus.name, connection = connection_id, "joined loopback bus");
        Ok(())
    }

    fn disconnect(&self) -> Result<()> {
        let session = self.session.lock().take();
        if let Some((connection_id, member)) = session {
            self.bus.members.lock().remove(&connection_id);
            member.queue.lock().clear();
            member.ready.notify_all();
            debug!(bus = %self.bus.name, connection = %connection_id, "left loopback bus");
        }
        Ok(())
    }

    fn subscribe(&self, pattern: &SubjectPattern) -> Result<()> {
        check(self.failures.subscribe, "subscribe")?;
        self.member()?.patterns.lock().push(pattern.clone());
        Ok(())
    }

    fn unsubscribe(&self, pattern: &SubjectPattern) -> Result<()> {
        check(self.failures.unsubscribe, "unsubscribe")?;
        let member = self.member()?;
        let mut patterns = member.patterns.lock();
        if let Some(index) = patterns.iter().position(|existing| existing == pattern) {
            patterns.remove(index);
        }
        Ok(())
    }

    fn publish(&self, message: &Message) -> Result<()> {
        self.member()?;
        let failure = match message.get_kind() {
            MessageKind::Request => self.failures.request,
            _ => self.failures.publish,
        };
        check(failure, "publish")?;
        if !self.publish_delay.is_zero() {
            thread::sleep(self.publish_delay);
        }
        let delivered = self.bus.broadcast(message);
        trace!(bus = %self.bus.name, subject = %message.get_subject(), delivered, "loopback publish");
        Ok(())
    }

    fn reply(&self, message: &Message, reply_id: &str) -> Result<()> {
        self.member()?;
        check(self.failures.reply, "reply")?;
        let requester = reply_id.split(':').next().unwrap_or_default();
        let target = self.bus.members.lock().get(requester).cloned();
        match target {
            Some(member) => member.deliver(message.clone()),
            None => debug!(bus = %self.bus.name, requester, "reply target has left the bus"),
        }
        Ok(())
    }

    fn receive(&self, timeout: Option<Duration>) -> Result<Option<Message>> {
        check(self.failures.receive, "receive")?;
        let member = self.member()?;
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut queue = member.queue.lock();
        loop {
            if let Some(message) = queue.pop_front() {
                return Ok(Some(message));
            }
            if self.session.lock().is_none() {
                return Ok(None);
            }
            match deadline {
                Some(deadline) => {
                    if Instant::now() >= deadline
                        || member.ready.wait_until(&mut queue, deadline).timed_out()
                    {
                        return Ok(queue.pop_front());
                    }
                }
                None => member.ready.wait(&mut queue),
            }
        }
    }
}

impl Drop for LoopbackBackend {
    fn drop(&mut self) {
        let _ = self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use r_gmsec_common::ErrorCode;

    fn backend(bus: &str, extra: &[&str]) -> LoopbackBackend {
        let mut config = Config::from_args([format!("loopback-bus={bus}")]);
        config.merge(&Config::from_args(extra.iter().copied()), true);
        LoopbackBackend::new(&config)
    }

    fn message(subject: &str) -> Message {
        Message::with_subject(subject).expect("message")
    }

    #[test]
    fn only_matching_members_receive() {
        let publisher = backend("lb-unit-match", &[]);
        let wants_foo = backend("lb-unit-match", &[]);
        let wants_bar = backend("lb-unit-match", &[]);
        publisher.connect("P").expect("connect");
        wants_foo.connect("A").expect("connect");
        wants_bar.connect("B").expect("connect");
        wants_foo.subscribe(&SubjectPattern::parse("FOO.>").expect("pattern")).expect("subscribe");
        wants_bar.subscribe(&SubjectPattern::parse("BAR.>").expect("pattern")).expect("subscribe");

        publisher.publish(&message("FOO.ONE")).expect("publish");

        let received = wants_foo
            .receive(Some(Duration::from_millis(100)))
            .expect("receive")
            .expect("delivered");
        assert_eq!(received.get_subject(), "FOO.ONE");
        assert!(wants_bar.receive(Some(Duration::ZERO)).expect("receive").is_none());
    }

    #[test]
    fn replies_reach_only_the_requester() {
        let requester = backend("lb-unit-reply", &[]);
        let responder = backend("lb-unit-reply", &[]);
        requester.connect("REQ").expect("connect");
        responder.connect("RSP").expect("connect");

        responder.reply(&message("ANSWER"), "REQ:1234").expect("reply");
        let reply = requester.receive(Some(Duration::from_millis(100))).expect("receive");
        assert_eq!(reply.expect("reply").get_subject(), "ANSWER");
        assert!(responder.receive(Some(Duration::ZERO)).expect("receive").is_none());
    }

    #[test]
    fn simulated_failures_carry_custom_codes() {
        let failing = backend("lb-unit-fail", &["mw-sim-connect-failure=42"]);
        let err = failing.connect("X").expect_err("simulated");
        assert_eq!(err.code(), ErrorCode::Middleware);
        assert_eq!(err.custom_code(), 42);

        let publish_fails = backend("lb-unit-fail", &["mw-sim-publish-failure=true"]);
        publish_fails.connect("Y").expect("connect");
        assert_eq!(publish_fails.publish(&message("A.B")).expect_err("publish").custom_code(), 1);
    }

    #[test]
    fn unsubscribe_removes_one_registration() {
        let member = backend("lb-unit-unsub", &[]);
        member.connect("M").expect("connect");
        let pattern = SubjectPattern::parse("A.*").expect("pattern");
        member.subscribe(&pattern).expect("first");
        member.subscribe(&pattern).expect("second");
        member.unsubscribe(&pattern).expect("unsubscribe");
        member.publish(&message("A.B")).expect("publish");
        assert!(member.receive(Some(Duration::from_millis(50))).expect("receive").is_some());
    }
}
