//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Background threads: auto-dispatcher, request worker and async publisher."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Each loop holds only a weak reference to the connection state and checks
//! its stop flag on every iteration.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use r_gmsec_common::{ErrorCode, GmsecError, Result, Status};
use tracing::{debug, warn};

use crate::connection::{Connection, Shared};
use crate::event::ConnectionEvent;
use crate::logging::MessageDirection;
use crate::metrics::Counter;
use crate::publisher::PublishQueue;

/// Backend wait per auto-dispatcher iteration.
pub(crate) const DISPATCH_POLL: Duration = Duration::from_millis(250);
/// Request worker tick; bounds timeout-event lateness.
pub(crate) const REQUEST_TICK: Duration = Duration::from_millis(10);
const PUBLISH_POLL: Duration = Duration::from_millis(50);
const ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Owned background thread with a cancellation flag.
pub(crate) struct Worker {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    thread_id: ThreadId,
}

impl Worker {
    pub(crate) fn spawn<F>(name: String, body: F) -> Result<Self>
    where
        F: FnOnce(Arc<AtomicBool>) + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || body(flag))
            .map_err(|err| GmsecError::Io(format!("unable to start thread: {err}")))?;
        let thread_id = handle.thread().id();
        Ok(Self {
            stop,
            handle: Some(handle),
            thread_id,
        })
    }

    /// Whether the loop has returned on its own.
    pub(crate) fn is_finished(&self) -> bool {
        self.handle.as_ref().map(JoinHandle::is_finished).unwrap_or(true)
    }

    /// Signal the loop and wait for it, unless called from the loop itself.
    pub(crate) fn stop(mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if thread::current().id() == self.thread_id {
            return;
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("background thread panicked");
            }
        }
    }
}

fn status_of(err: &GmsecError) -> Status {
    Status::from(err.clone())
}

/// Pull messages and hand them to subscription callbacks.
pub(crate) fn dispatch_loop(shared: Weak<Shared>, stop: Arc<AtomicBool>) {
    while !stop.load(Ordering::SeqCst) {
        let Some(shared) = shared.upgrade() else {
            break;
        };
        let connection = Connection::handle(Arc::clone(&shared));
        let next = match shared.take_inbox() {
            Some(message) => Ok(Some(message)),
            None => shared.pump_once(Some(DISPATCH_POLL)),
        };
        match next {
            Ok(Some(message)) => shared.dispatch_to_callbacks(&connection, &message),
            Ok(None) => {}
            Err(err) => {
                warn!(connection = %shared.id(), error = %err, "auto-dispatcher failed to receive");
                shared.fire_event(ConnectionEvent::DispatcherErrorEvent, &status_of(&err));
                if err.code() == ErrorCode::Middleware {
                    shared.fire_event(ConnectionEvent::ConnectionBrokenEvent, &status_of(&err));
                }
                drop(connection);
                drop(shared);
                thread::sleep(ERROR_BACKOFF);
            }
        }
    }
    debug!("auto-dispatcher stopped");
}

/// Route replies for asynchronous requests and enforce their timeouts.
pub(crate) fn request_loop(shared: Weak<Shared>, stop: Arc<AtomicBool>) {
    while !stop.load(Ordering::SeqCst) {
        let Some(shared) = shared.upgrade() else {
            break;
        };
        let connection = Connection::handle(Arc::clone(&shared));
        if shared.is_dispatching() {
            thread::sleep(REQUEST_TICK);
        } else {
            match shared.pump_once(Some(REQUEST_TICK)) {
                Ok(Some(message)) => shared.stash_inbox(message),
                Ok(None) => {}
                Err(err) => {
                    debug!(connection = %shared.id(), error = %err, "request worker failed to receive");
                    thread::sleep(REQUEST_TICK);
                }
            }
        }

        for expired in shared.requests().expired(Instant::now()) {
            shared.count(Counter::Timeouts);
            let status = Status::error(ErrorCode::Timeout, "Request timed out");
            expired
                .callback
                .on_event(&connection, &status, ConnectionEvent::RequestTimeoutEvent);
            shared.fire_event(ConnectionEvent::RequestTimeoutEvent, &status);
            if expired.republish {
                if let Err(err) = shared.send_now(&expired.request, MessageDirection::Request) {
                    warn!(connection = %shared.id(), error = %err, "request republish failed");
                }
            }
        }
    }
    debug!("request worker stopped");
}

/// Drain the asynchronous publish queue into the backend.
pub(crate) fn publish_loop(shared: Weak<Shared>, queue: Arc<PublishQueue>, stop: Arc<AtomicBool>) {
    loop {
        if stop.load(Ordering::SeqCst) && queue.len() == 0 {
            break;
        }
        let Some(message) = queue.pop(PUBLISH_POLL) else {
            continue;
        };
        let Some(shared) = shared.upgrade() else {
            queue.finish();
            break;
        };
        if let Err(err) = shared.backend_publish(&message) {
            warn!(connection = %shared.id(), error = %err, subject = %message.get_subject(), "asynchronous publish failed");
            shared.fire_event(ConnectionEvent::AsyncPublishFailureEvent, &status_of(&err));
        }
        queue.finish();
    }
    debug!("asynchronous publisher stopped");
}
