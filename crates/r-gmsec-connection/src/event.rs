//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Connection events and the callback capability traits."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use r_gmsec_common::Status;
use r_gmsec_msg::Message;
use strum::{Display, EnumString};

use crate::connection::Connection;

/// Conditions reported to [`EventCallback`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum ConnectionEvent {
    /// The backend session opened.
    ConnectionSuccessfulEvent,
    /// The backend session was lost.
    ConnectionBrokenEvent,
    /// The backend session was re-established.
    ConnectionReconnectEvent,
    /// The backend reported a failure outside a caller's operation.
    ConnectionExceptionEvent,
    /// The auto-dispatcher failed to pull a message.
    DispatcherErrorEvent,
    /// A request saw no reply before its timeout.
    RequestTimeoutEvent,
    /// A received message failed validation and was dropped.
    InvalidMessageEvent,
    /// A queued asynchronous publish failed.
    AsyncPublishFailureEvent,
    /// A synchronous publish failed in the backend.
    MsgPublishFailureEvent,
    /// Registration sentinel matching every event.
    AllEvents,
}

impl ConnectionEvent {
    /// Whether a callback registered for `self` hears `event`.
    pub fn covers(self, event: ConnectionEvent) -> bool {
        self == ConnectionEvent::AllEvents || self == event
    }
}

/// Receives messages for a subscription.
pub trait Callback: Send + Sync {
    /// Called on the dispatching thread for each matching message.
    fn on_message(&self, connection: &Connection, message: &Message);
}

impl<F> Callback for F
where
    F: Fn(&Connection, &Message) + Send + Sync,
{
    fn on_message(&self, connection: &Connection, message: &Message) {
        self(connection, message)
    }
}

/// Receives connection events.
pub trait EventCallback: Send + Sync {
    /// Called with the status describing `event`.
    fn on_event(&self, connection: &Connection, status: &Status, event: ConnectionEvent);
}

impl<F> EventCallback for F
where
    F: Fn(&Connection, &Status, ConnectionEvent) + Send + Sync,
{
    fn on_event(&self, connection: &Connection, status: &Status, event: ConnectionEvent) {
        self(connection, status, event)
    }
}

/// Receives the replies and timeouts of an asynchronous request.
pub trait ReplyCallback: Send + Sync {
    /// Called for every reply routed to the request.
    fn on_reply(&self, connection: &Connection, request: &Message, reply: &Message);

    /// Called for request events, chiefly [`ConnectionEvent::RequestTimeoutEvent`].
    fn on_event(&self, connection: &Connection, status: &Status, event: ConnectionEvent);
}
