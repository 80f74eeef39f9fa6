//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Connection: publish/subscribe, request/reply and dispatch over a backend."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use r_gmsec_common::{host, Config, GmsecError, Result, Status};
use r_gmsec_msg::{
    validate_subject, validation_failure, Field, Message, MessageFactory, MessageKind, SubjectPattern,
};
use strum::Display;
use tracing::{debug, info, trace, warn};

use crate::backend::{load_backend, MiddlewareBackend};
use crate::dispatcher::{self, Worker};
use crate::event::{Callback, ConnectionEvent, EventCallback, ReplyCallback};
use crate::logging::{log_message, MessageDirection};
use crate::metrics::{ConnectionMetrics, ConnectionMetricsExporter, Counter, Counters};
use crate::publisher::{AsyncPublishSettings, PublishQueue};
use crate::request::{effective_republish, effective_timeout, RequestTable, Routed};
use crate::subscription::{ExclusionFilter, SubscriptionInfo, SubscriptionTable};
use crate::tracking::{strip_tracking_fields, TrackingContext, TrackingSettings, REPLY_UNIQUE_ID_FIELD};

static CONNECTION_COUNTER: AtomicU32 = AtomicU32::new(0);

// Longest a blocked caller waits on the backend before rechecking local state.
const POLL_SLICE: Duration = Duration::from_millis(50);

/// Default bound on messages held for `receive` while a background
/// request worker pulls from the backend.
pub const DEFAULT_INBOX_DEPTH: usize = 1000;

/// Lifecycle of a [`Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    /// Created, never connected.
    Uninitialized,
    /// Backend session open.
    Connected,
    /// Backend session closed; `connect` may reopen it.
    Disconnected,
}

#[derive(Debug, Clone, Copy)]
struct Options {
    validate_send: bool,
    validate_recv: bool,
    remove_tracking: bool,
    multi_response: bool,
    inbox_depth: usize,
}

impl Options {
    fn from_config(config: &Config) -> Self {
        let all = config.get_boolean_value_or("gmsec-msg-content-validate-all", false);
        Self {
            validate_send: all
                || config.get_boolean_value_or("gmsec-msg-content-validate", false)
                || config.get_boolean_value_or("gmsec-msg-content-validate-send", false),
            validate_recv: all || config.get_boolean_value_or("gmsec-msg-content-validate-recv", false),
            remove_tracking: config.get_boolean_value_or("gmsec-remove-tracking-fields", false),
            multi_response: config.get_boolean_value_or("mw-multi-resp", false),
            inbox_depth: config
                .get_integer_value_or("gmsec-receive-queue-depth", DEFAULT_INBOX_DEPTH as i64)
                .max(1) as usize,
        }
    }
}

fn connection_id(number: u32) -> String {
    let node: String = host::node_name()
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() { ch.to_ascii_uppercase() } else { '-' })
        .collect();
    format!(
        "GMSEC_{}_{:X}_{}_{}",
        node,
        chrono::Utc::now().timestamp(),
        host::process_id(),
        number
    )
}

fn not_connected() -> GmsecError {
    GmsecError::NotInitialized("Connection has not been initialized".to_owned())
}

/// State shared by a connection and its background threads.
pub(crate) struct Shared {
    id: String,
    number: u32,
    name: RwLock<String>,
    config: Config,
    factory: MessageFactory,
    backend: Box<dyn MiddlewareBackend>,
    state: Mutex<ConnectionState>,
    options: Options,
    tracking: TrackingSettings,
    subscriptions: Mutex<SubscriptionTable>,
    exclusions: Mutex<ExclusionFilter>,
    event_callbacks: Mutex<Vec<(ConnectionEvent, Arc<dyn EventCallback>)>>,
    inbox: Mutex<VecDeque<Message>>,
    requests: RequestTable,
    dispatching: AtomicBool,
    dispatcher: Mutex<Option<Worker>>,
    request_worker: Mutex<Option<Worker>>,
    async_publish: Option<(AsyncPublishSettings, Arc<PublishQueue>)>,
    publisher: Mutex<Option<Worker>>,
    counters: Counters,
    exporter: RwLock<Option<Arc<ConnectionMetricsExporter>>>,
    unique_counter: AtomicU64,
}

impl Shared {
    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn requests(&self) -> &RequestTable {
        &self.requests
    }

    pub(crate) fn is_dispatching(&self) -> bool {
        self.dispatching.load(Ordering::SeqCst)
    }

    fn is_connected(&self) -> bool {
        *self.state.lock() == ConnectionState::Connected
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(not_connected())
        }
    }

    pub(crate) fn count(&self, counter: Counter) {
        let exporter = self.exporter.read();
        self.counters.bump(counter, exporter.as_deref());
    }

    fn observe_latency(&self, latency: Duration) {
        if let Some(exporter) = self.exporter.read().as_ref() {
            exporter.observe_latency(latency);
        }
    }

    /// Oldest held message that still passes the subscription and exclusion
    /// filters; anything unsubscribed or excluded since it was held is dropped.
    pub(crate) fn take_inbox(&self) -> Option<Message> {
        loop {
            let message = self.inbox.lock().pop_front()?;
            let subject = message.get_subject();
            let excluded = self.exclusions.lock().excludes(&subject);
            if excluded || !self.subscriptions.lock().matches(&subject) {
                trace!(connection = %self.id, subject = %subject, "held message no longer wanted");
                self.count(Counter::Dropped);
                continue;
            }
            return Some(message);
        }
    }

    pub(crate) fn stash_inbox(&self, message: Message) {
        let evicted = {
            let mut inbox = self.inbox.lock();
            let evicted = if inbox.len() >= self.options.inbox_depth {
                inbox.pop_front()
            } else {
                None
            };
            inbox.push_back(message);
            evicted
        };
        if let Some(evicted) = evicted {
            warn!(
                connection = %self.id,
                subject = %evicted.get_subject(),
                depth = self.options.inbox_depth,
                "receive queue full, oldest message dropped"
            );
            self.count(Counter::Dropped);
        }
    }

    /// Invoke every event callback registered for `event`.
    pub(crate) fn fire_event(self: &Arc<Self>, event: ConnectionEvent, status: &Status) {
        let callbacks: Vec<Arc<dyn EventCallback>> = self
            .event_callbacks
            .lock()
            .iter()
            .filter(|(registered, _)| registered.covers(event))
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        if status.has_error() {
            warn!(connection = %self.id, event = %event, reason = status.reason(), "connection event");
        } else {
            debug!(connection = %self.id, event = %event, "connection event");
        }
        if callbacks.is_empty() {
            return;
        }
        let connection = Connection::handle(Arc::clone(self));
        for callback in callbacks {
            callback.on_event(&connection, status, event);
        }
    }

    fn next_unique_id(&self) -> String {
        let sequence = self.unique_counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{}_{}", self.id, sequence)
    }

    /// Validate, then copy and stamp tracking fields.
    fn prepare_outbound(&self, message: &Message) -> Result<Message> {
        let subject = message.get_subject();
        validate_subject(&subject)?;
        if self.options.validate_send {
            let reasons = self.tracking.reserved_field_reasons(message);
            if !reasons.is_empty() {
                return Err(GmsecError::Validation(validation_failure(&subject, &reasons)));
            }
            message.is_compliant().into_result()?;
        }
        let mut outbound = message.clone();
        let subscriptions = self.subscriptions.lock().patterns();
        let mw_info = self.backend.info();
        let endpoint = self.backend.endpoint();
        self.tracking.apply(
            &mut outbound,
            &TrackingContext {
                connection_number: self.number,
                unique_id: self.next_unique_id(),
                mw_info: &mw_info,
                endpoint: &endpoint,
                subscriptions: &subscriptions,
            },
        )?;
        Ok(outbound)
    }

    /// Hand a message to the backend and count it.
    pub(crate) fn backend_publish(&self, message: &Message) -> Result<()> {
        self.backend.publish(message)?;
        self.count(Counter::Published);
        Ok(())
    }

    /// Publish now, reporting backend failures as events too.
    pub(crate) fn send_now(self: &Arc<Self>, message: &Message, direction: MessageDirection) -> Result<()> {
        log_message(&self.id, direction, message);
        if let Err(err) = self.backend_publish(message) {
            self.fire_event(ConnectionEvent::MsgPublishFailureEvent, &Status::from(err.clone()));
            return Err(err);
        }
        Ok(())
    }

    /// Pull one message from the backend. Replies to pending requests are
    /// consumed here; everything else comes back only if it survives the
    /// subscription, exclusion and validation filters.
    pub(crate) fn pump_once(self: &Arc<Self>, timeout: Option<Duration>) -> Result<Option<Message>> {
        match self.backend.receive(timeout)? {
            Some(message) => Ok(self.route_inbound(message)),
            None => Ok(None),
        }
    }

    fn route_inbound(self: &Arc<Self>, mut message: Message) -> Option<Message> {
        if self.options.remove_tracking {
            strip_tracking_fields(&mut message);
        }
        if message.get_kind() == MessageKind::Reply {
            if let Ok(reply_id) = message.get_string_value(REPLY_UNIQUE_ID_FIELD) {
                self.route_reply(&reply_id, message);
                return None;
            }
        }

        self.count(Counter::Received);
        let subject = message.get_subject();
        if self.exclusions.lock().excludes(&subject) {
            trace!(connection = %self.id, subject = %subject, "excluded message dropped");
            self.count(Counter::Dropped);
            return None;
        }
        if !self.subscriptions.lock().matches(&subject) {
            trace!(connection = %self.id, subject = %subject, "unsubscribed message dropped");
            self.count(Counter::Dropped);
            return None;
        }
        if self.options.validate_recv {
            let status = message.is_compliant();
            if status.has_error() {
                self.count(Counter::Dropped);
                self.fire_event(ConnectionEvent::InvalidMessageEvent, &status);
                return None;
            }
        }
        log_message(&self.id, MessageDirection::Inbound, &message);
        Some(message)
    }

    fn route_reply(self: &Arc<Self>, reply_id: &str, mut reply: Message) {
        reply.clear_field(REPLY_UNIQUE_ID_FIELD);
        log_message(&self.id, MessageDirection::Reply, &reply);
        match self.requests.route(reply_id, reply.clone(), self.options.multi_response) {
            Routed::Unknown => {
                debug!(connection = %self.id, reply_id, "reply for unknown request dropped");
                self.count(Counter::Dropped);
            }
            Routed::Sync { latency } => {
                self.count(Counter::Replies);
                self.observe_latency(latency);
            }
            Routed::Async {
                callback,
                request,
                latency,
            } => {
                self.count(Counter::Replies);
                self.observe_latency(latency);
                let connection = Connection::handle(Arc::clone(self));
                callback.on_reply(&connection, &request, &reply);
            }
        }
    }

    /// Deliver to the callbacks of every matching subscription.
    pub(crate) fn dispatch_to_callbacks(&self, connection: &Connection, message: &Message) {
        let callbacks = self.subscriptions.lock().callbacks_for(&message.get_subject());
        for callback in callbacks {
            callback.on_message(connection, message);
            self.count(Counter::Dispatched);
        }
    }

    /// Whether some other thread is pulling from the backend.
    fn background_pump_active(&self) -> bool {
        self.is_dispatching()
            || self
                .request_worker
                .lock()
                .as_ref()
                .map(|worker| !worker.is_finished())
                .unwrap_or(false)
    }

    fn stamp_request(&self, message: &Message) -> Result<(String, Message)> {
        let mut outbound = self.prepare_outbound(message)?;
        let reply_id = format!("{}:{}", self.id, uuid::Uuid::new_v4().simple());
        outbound.add_field(Field::new(REPLY_UNIQUE_ID_FIELD, reply_id.as_str())?.with_tracking(true));
        Ok((reply_id, outbound))
    }

    fn ensure_request_worker(self: &Arc<Self>) -> Result<()> {
        let mut slot = self.request_worker.lock();
        if slot.as_ref().map(|worker| !worker.is_finished()).unwrap_or(false) {
            return Ok(());
        }
        let weak = Arc::downgrade(self);
        *slot = Some(Worker::spawn(format!("gmsec-request-{}", self.number), move |stop| {
            dispatcher::request_loop(weak, stop)
        })?);
        Ok(())
    }

    fn disconnect(self: &Arc<Self>) -> Result<()> {
        {
            let mut state = self.state.lock();
            if *state != ConnectionState::Connected {
                return Ok(());
            }
            *state = ConnectionState::Disconnected;
        }
        self.dispatching.store(false, Ordering::SeqCst);
        let dispatcher = self.dispatcher.lock().take();
        if let Some(worker) = dispatcher {
            worker.stop();
        }
        if let Some((settings, queue)) = &self.async_publish {
            if !queue.drain(settings.teardown_wait) {
                warn!(connection = %self.id, pending = queue.len(), "asynchronous publish queue did not drain");
            }
            let dropped = queue.close();
            if dropped > 0 {
                warn!(connection = %self.id, dropped, "queued publishes discarded at disconnect");
            }
        }
        let publisher = self.publisher.lock().take();
        if let Some(worker) = publisher {
            worker.stop();
        }
        let request_worker = self.request_worker.lock().take();
        if let Some(worker) = request_worker {
            worker.stop();
        }
        self.requests.clear();
        let patterns = self.subscriptions.lock().drain_patterns();
        for pattern in patterns {
            if let Err(err) = self.backend.unsubscribe(&pattern) {
                debug!(connection = %self.id, pattern = %pattern, error = %err, "unsubscribe during disconnect failed");
            }
        }
        self.inbox.lock().clear();
        self.backend.disconnect()?;
        info!(connection = %self.id, "connection disconnected");
        Ok(())
    }
}

/// A session with a middleware backend.
///
/// Messages are consumed either with [`Connection::receive`] or by the
/// auto-dispatcher, never both at once. Callbacks run on background threads
/// and are handed a `&Connection` they may publish through.
pub struct Connection {
    shared: Arc<Shared>,
    owner: bool,
}

impl Connection {
    /// Connection on the backend `config` names with `mw-id`.
    pub fn new(config: &Config) -> Result<Self> {
        let factory = MessageFactory::from_config(config)?;
        Self::with_factory(config, factory)
    }

    /// Connection creating its messages with `factory`.
    pub fn with_factory(config: &Config, factory: MessageFactory) -> Result<Self> {
        let backend = load_backend(config)?;
        let number = CONNECTION_COUNTER.fetch_add(1, Ordering::SeqCst) + 1;
        let id = connection_id(number);
        let name = config
            .get_value("gmsec-connection-name")
            .map(str::to_owned)
            .unwrap_or_else(|| format!("Connection {number}"));
        let async_publish = AsyncPublishSettings::from_config(config)
            .map(|settings| (settings, Arc::new(PublishQueue::new(settings.depth))));
        info!(connection = %id, mw_id = backend.name(), name = %name, "connection created");

        Ok(Self {
            shared: Arc::new(Shared {
                id,
                number,
                name: RwLock::new(name),
                config: config.clone(),
                factory,
                backend,
                state: Mutex::new(ConnectionState::Uninitialized),
                options: Options::from_config(config),
                tracking: TrackingSettings::from_config(config),
                subscriptions: Mutex::new(SubscriptionTable::default()),
                exclusions: Mutex::new(ExclusionFilter::default()),
                event_callbacks: Mutex::new(Vec::new()),
                inbox: Mutex::new(VecDeque::new()),
                requests: RequestTable::default(),
                dispatching: AtomicBool::new(false),
                dispatcher: Mutex::new(None),
                request_worker: Mutex::new(None),
                async_publish,
                publisher: Mutex::new(None),
                counters: Counters::default(),
                exporter: RwLock::new(None),
                unique_counter: AtomicU64::new(0),
            }),
            owner: true,
        })
    }

    /// Borrowed view handed to callbacks; dropping it leaves the session open.
    pub(crate) fn handle(shared: Arc<Shared>) -> Self {
        Self { shared, owner: false }
    }

    /// Version string of this library.
    pub fn get_library_version() -> String {
        format!("R-GMSEC API v{}", env!("CARGO_PKG_VERSION"))
    }

    /// Open the backend session.
    pub fn connect(&self) -> Result<()> {
        let shared = &self.shared;
        let previous = *shared.state.lock();
        if previous == ConnectionState::Connected {
            return Ok(());
        }
        if let Err(err) = shared.backend.connect(&shared.id) {
            shared.fire_event(ConnectionEvent::ConnectionExceptionEvent, &Status::from(err.clone()));
            return Err(err);
        }
        if let Some((_, queue)) = &shared.async_publish {
            queue.open();
            let weak = Arc::downgrade(shared);
            let queue = Arc::clone(queue);
            *shared.publisher.lock() = Some(Worker::spawn(
                format!("gmsec-publish-{}", shared.number),
                move |stop| dispatcher::publish_loop(weak, queue, stop),
            )?);
        }
        *shared.state.lock() = ConnectionState::Connected;
        info!(connection = %shared.id, endpoint = %shared.backend.endpoint(), "connection established");
        let event = if previous == ConnectionState::Disconnected {
            ConnectionEvent::ConnectionReconnectEvent
        } else {
            ConnectionEvent::ConnectionSuccessfulEvent
        };
        shared.fire_event(event, &Status::ok());
        Ok(())
    }

    /// Close the backend session, stopping every background thread and
    /// dropping subscriptions and pending requests.
    pub fn disconnect(&self) -> Result<()> {
        self.shared.disconnect()
    }

    /// Current lifecycle state.
    pub fn get_state(&self) -> ConnectionState {
        *self.shared.state.lock()
    }

    /// Process-unique identifier, `GMSEC_<HOST>_<hex-time>_<pid>_<n>`.
    pub fn get_id(&self) -> &str {
        &self.shared.id
    }

    /// Display name.
    pub fn get_name(&self) -> String {
        self.shared.name.read().clone()
    }

    /// Rename the connection.
    pub fn set_name(&self, name: &str) {
        *self.shared.name.write() = name.to_owned();
    }

    /// Backend description.
    pub fn get_mw_info(&self) -> String {
        self.shared.backend.info()
    }

    /// Endpoint the backend is attached to.
    pub fn get_connection_endpoint(&self) -> String {
        self.shared.backend.endpoint()
    }

    /// Messages waiting in the asynchronous publish queue.
    pub fn get_publish_queue_message_count(&self) -> usize {
        self.shared
            .async_publish
            .as_ref()
            .map(|(_, queue)| queue.len())
            .unwrap_or(0)
    }

    /// Factory this connection was built with.
    pub fn get_message_factory(&self) -> &MessageFactory {
        &self.shared.factory
    }

    /// Configuration this connection was built with.
    pub fn get_config(&self) -> &Config {
        &self.shared.config
    }

    /// Traffic counters.
    pub fn metrics(&self) -> ConnectionMetrics {
        self.shared.counters.snapshot()
    }

    /// Mirror counters into Prometheus from now on.
    pub fn attach_metrics(&self, exporter: Arc<ConnectionMetricsExporter>) {
        *self.shared.exporter.write() = Some(exporter);
    }

    /// Hear `event`, or every event for [`ConnectionEvent::AllEvents`].
    pub fn register_event_callback(&self, event: ConnectionEvent, callback: Arc<dyn EventCallback>) {
        self.shared.event_callbacks.lock().push((event, callback));
    }

    /// Subscribe without a callback; messages arrive through `receive`.
    pub fn subscribe(&self, pattern: &str) -> Result<SubscriptionInfo> {
        self.subscribe_with_config(pattern, &Config::new(), None)
    }

    /// Subscribe with a callback used by the auto-dispatcher.
    pub fn subscribe_with_callback(&self, pattern: &str, callback: Arc<dyn Callback>) -> Result<SubscriptionInfo> {
        self.subscribe_with_config(pattern, &Config::new(), Some(callback))
    }

    /// Subscribe with per-subscription configuration.
    pub fn subscribe_with_config(
        &self,
        pattern: &str,
        config: &Config,
        callback: Option<Arc<dyn Callback>>,
    ) -> Result<SubscriptionInfo> {
        let shared = &self.shared;
        shared.ensure_connected()?;
        let pattern = SubjectPattern::parse(pattern)?;
        let mut subscriptions = shared.subscriptions.lock();
        let (info, first) = subscriptions.insert(&shared.id, pattern.clone(), config.clone(), callback)?;
        if first {
            if let Err(err) = shared.backend.subscribe(&pattern) {
                subscriptions.remove(info.id());
                return Err(err);
            }
        }
        info!(connection = %shared.id, pattern = %pattern, "subscribed");
        Ok(info)
    }

    /// Drop a subscription made on this connection.
    pub fn unsubscribe(&self, info: SubscriptionInfo) -> Result<()> {
        let shared = &self.shared;
        shared.ensure_connected()?;
        if info.connection_id() != shared.id {
            return Err(GmsecError::InvalidArgument(
                "SubscriptionInfo object is not associated with this Connection".to_owned(),
            ));
        }
        let mut subscriptions = shared.subscriptions.lock();
        let (pattern, last) = subscriptions.remove(info.id()).ok_or_else(|| {
            GmsecError::InvalidArgument(format!(
                "No subscription to {} is registered",
                info.get_subject_pattern()
            ))
        })?;
        if last {
            shared.backend.unsubscribe(&pattern)?;
        }
        info!(connection = %shared.id, pattern = %pattern, "unsubscribed");
        Ok(())
    }

    /// Drop received messages whose subjects match `pattern`.
    pub fn exclude_subject(&self, pattern: &str) -> Result<()> {
        self.shared.ensure_connected()?;
        let pattern = SubjectPattern::parse(pattern)?;
        debug!(connection = %self.shared.id, pattern = %pattern, "subject excluded");
        self.shared.exclusions.lock().add(pattern);
        Ok(())
    }

    /// Lift an earlier exclusion.
    pub fn remove_excluded_subject(&self, pattern: &str) -> Result<()> {
        self.shared.ensure_connected()?;
        let pattern = SubjectPattern::parse(pattern)?;
        if !self.shared.exclusions.lock().remove(&pattern) {
            debug!(connection = %self.shared.id, pattern = %pattern, "no such exclusion");
        }
        Ok(())
    }

    /// Publish a PUBLISH-kind message.
    pub fn publish(&self, message: &Message) -> Result<()> {
        self.publish_with_config(message, &Config::new())
    }

    /// Publish with backend-specific settings for this one message.
    pub fn publish_with_config(&self, message: &Message, mw_config: &Config) -> Result<()> {
        let shared = &self.shared;
        shared.ensure_connected()?;
        if message.get_kind() != MessageKind::Publish {
            return Err(GmsecError::WrongKind(
                "Cannot publish message with non-PUBLISH message kind.".to_owned(),
            ));
        }
        let outbound = shared.prepare_outbound(message)?;
        if !mw_config.is_empty() {
            trace!(connection = %shared.id, settings = mw_config.len(), "per-message middleware config");
        }
        match &shared.async_publish {
            Some((_, queue)) => {
                log_message(&shared.id, MessageDirection::Outbound, &outbound);
                queue.push(outbound)
            }
            None => shared.send_now(&outbound, MessageDirection::Outbound),
        }
    }

    /// Send a request and block for its first reply; `Ok(None)` on timeout.
    ///
    /// `timeout_ms` of [`crate::WAIT_FOREVER`] waits indefinitely. A positive
    /// `republish_ms` resends the request on that period while waiting.
    pub fn request(&self, message: &Message, timeout_ms: i32, republish_ms: i32) -> Result<Option<Message>> {
        let shared = &self.shared;
        shared.ensure_connected()?;
        if message.get_kind() != MessageKind::Request {
            return Err(GmsecError::WrongKind(
                "Cannot issue request with non-REQUEST kind message.".to_owned(),
            ));
        }
        let (reply_id, outbound) = shared.stamp_request(message)?;
        shared.requests.insert_sync(&reply_id, outbound.clone());
        shared.count(Counter::Requests);
        if let Err(err) = shared.send_now(&outbound, MessageDirection::Request) {
            shared.requests.remove(&reply_id);
            return Err(err);
        }

        let started = Instant::now();
        let deadline = effective_timeout(timeout_ms).map(|timeout| started + timeout);
        let republish = effective_republish(republish_ms, &shared.config);
        let mut next_republish = republish.map(|period| started + period);
        loop {
            let now = Instant::now();
            if deadline.map(|deadline| now >= deadline).unwrap_or(false) || !shared.is_connected() {
                shared.requests.remove(&reply_id);
                shared.count(Counter::Timeouts);
                debug!(connection = %shared.id, subject = %outbound.get_subject(), "request timed out");
                return Ok(None);
            }
            if let (Some(at), Some(period)) = (next_republish, republish) {
                if now >= at {
                    shared.send_now(&outbound, MessageDirection::Request)?;
                    next_republish = Some(now + period);
                }
            }
            let mut slice_end = now + POLL_SLICE;
            for bound in [deadline, next_republish].into_iter().flatten() {
                slice_end = slice_end.min(bound);
            }
            let wait_until = if shared.background_pump_active() {
                slice_end
            } else {
                if let Some(message) = shared.pump_once(Some(slice_end.saturating_duration_since(now)))? {
                    shared.stash_inbox(message);
                }
                Instant::now()
            };
            if let Some(reply) = shared.requests.wait_for_reply(&reply_id, wait_until) {
                return Ok(Some(reply));
            }
        }
    }

    /// Send a request whose replies and timeout go to `callback` on a
    /// background thread.
    pub fn request_async(
        &self,
        message: &Message,
        timeout_ms: i32,
        callback: Arc<dyn ReplyCallback>,
        republish_ms: i32,
    ) -> Result<()> {
        let shared = &self.shared;
        shared.ensure_connected()?;
        if message.get_kind() != MessageKind::Request {
            return Err(GmsecError::WrongKind(
                "Cannot issue request with non-REQUEST kind message.".to_owned(),
            ));
        }
        let (reply_id, outbound) = shared.stamp_request(message)?;
        shared.requests.insert_async(
            &reply_id,
            outbound.clone(),
            callback,
            effective_timeout(timeout_ms),
            effective_republish(republish_ms, &shared.config),
        );
        shared.count(Counter::Requests);
        if let Err(err) = shared.send_now(&outbound, MessageDirection::Request) {
            shared.requests.remove(&reply_id);
            return Err(err);
        }
        shared.ensure_request_worker()
    }

    /// Answer `request` with a REPLY-kind message.
    pub fn reply(&self, request: &Message, reply: &Message) -> Result<()> {
        let shared = &self.shared;
        shared.ensure_connected()?;
        if reply.get_kind() != MessageKind::Reply {
            return Err(GmsecError::WrongKind(
                "Cannot issue reply with non-REPLY kind message.".to_owned(),
            ));
        }
        let reply_id = request.get_string_value(REPLY_UNIQUE_ID_FIELD).map_err(|_| {
            GmsecError::InvalidArgument("Request message is missing reply correlation information".to_owned())
        })?;
        let mut outbound = shared.prepare_outbound(reply)?;
        outbound.add_field(Field::new(REPLY_UNIQUE_ID_FIELD, reply_id.as_str())?.with_tracking(true));
        log_message(&shared.id, MessageDirection::Reply, &outbound);
        shared.backend.reply(&outbound, &reply_id)?;
        shared.count(Counter::Published);
        Ok(())
    }

    /// Next subscribed message; `timeout_ms` 0 polls once and
    /// [`crate::WAIT_FOREVER`] blocks until one arrives.
    pub fn receive(&self, timeout_ms: i32) -> Result<Option<Message>> {
        let shared = &self.shared;
        shared.ensure_connected()?;
        if shared.is_dispatching() {
            return Err(GmsecError::ModeConflict(
                "This method cannot be called when the Auto-Dispatcher is in use".to_owned(),
            ));
        }
        let deadline = u64::try_from(timeout_ms)
            .ok()
            .map(|ms| Instant::now() + Duration::from_millis(ms));
        loop {
            if let Some(message) = shared.take_inbox() {
                return Ok(Some(message));
            }
            let now = Instant::now();
            let slice = match deadline {
                Some(deadline) => deadline.saturating_duration_since(now).min(POLL_SLICE),
                None => POLL_SLICE,
            };
            if let Some(message) = shared.pump_once(Some(slice))? {
                return Ok(Some(message));
            }
            if deadline.map(|deadline| Instant::now() >= deadline).unwrap_or(false) {
                return Ok(shared.take_inbox());
            }
            if !shared.is_connected() {
                return Ok(None);
            }
        }
    }

    /// Route `message` to the callbacks of every matching subscription.
    pub fn dispatch(&self, message: &Message) {
        self.shared.dispatch_to_callbacks(self, message);
    }

    /// Start the auto-dispatcher; `false` if it is already running.
    pub fn start_auto_dispatch(&self) -> Result<bool> {
        let shared = &self.shared;
        shared.ensure_connected()?;
        let mut slot = shared.dispatcher.lock();
        if shared.is_dispatching() {
            return Ok(false);
        }
        shared.dispatching.store(true, Ordering::SeqCst);
        let weak = Arc::downgrade(shared);
        match Worker::spawn(format!("gmsec-dispatch-{}", shared.number), move |stop| {
            dispatcher::dispatch_loop(weak, stop)
        }) {
            Ok(worker) => *slot = Some(worker),
            Err(err) => {
                shared.dispatching.store(false, Ordering::SeqCst);
                return Err(err);
            }
        }
        info!(connection = %shared.id, "auto-dispatcher started");
        Ok(true)
    }

    /// Stop the auto-dispatcher and wait for it to finish its current
    /// message; `false` if it was not running.
    pub fn stop_auto_dispatch(&self) -> Result<bool> {
        let shared = &self.shared;
        shared.ensure_connected()?;
        let worker = shared.dispatcher.lock().take();
        let Some(worker) = worker else {
            return Ok(false);
        };
        shared.dispatching.store(false, Ordering::SeqCst);
        worker.stop();
        info!(connection = %shared.id, "auto-dispatcher stopped");
        Ok(true)
    }

    /// Acknowledge a received message; the loopback backend needs none.
    pub fn acknowledge(&self, message: &Message) {
        trace!(connection = %self.shared.id, subject = %message.get_subject(), "message acknowledged");
    }

    /// Give a received message back.
    pub fn release(&self, message: Message) {
        drop(message);
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.shared.id)
            .field("name", &*self.shared.name.read())
            .field("mw_id", &self.shared.backend.name())
            .field("state", &self.get_state())
            .finish()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if !self.owner {
            return;
        }
        if let Err(err) = self.shared.disconnect() {
            warn!(connection = %self.shared.id, error = %err, "disconnect on drop failed");
        }
    }
}
