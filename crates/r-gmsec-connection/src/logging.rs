//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Structured logging of message traffic."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use r_gmsec_common::logging::TRAFFIC_TARGET;
use r_gmsec_msg::Message;
use tracing::debug;

/// Direction of the message movement, used for consistent logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageDirection {
    /// Message handed to the backend for publication.
    Outbound,
    /// Message pulled from the backend.
    Inbound,
    /// Request sent or republished.
    Request,
    /// Reply sent or routed to a pending request.
    Reply,
}

/// Emit a structured log entry for message activity on the traffic target.
pub fn log_message(connection: &str, direction: MessageDirection, message: &Message) {
    debug!(
        target: TRAFFIC_TARGET,
        connection,
        subject = %message.get_subject(),
        kind = %message.get_kind(),
        schema_id = message.get_schema_id(),
        fields = message.get_field_count(),
        direction = ?direction,
        "messaging activity"
    );
}
