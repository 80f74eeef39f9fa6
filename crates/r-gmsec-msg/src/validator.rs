//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Template compliance checks and pluggable message validators."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use r_gmsec_common::{ErrorCode, Status};

use crate::message::Message;
use crate::subject::is_valid_subject;
use crate::template::{FieldMode, MessageTemplate, TemplateEntry};

// Upper bound on array elements inspected per array.
const MAX_ARRAY_ELEMENTS: u64 = 10_000;

/// Custom check run before the built-in template compliance check.
pub trait MessageValidator: Send + Sync {
    /// Inspect a message; a failed status stops validation.
    fn validate_message(&self, message: &Message) -> Status;
}

impl<F> MessageValidator for F
where
    F: Fn(&Message) -> Status + Send + Sync,
{
    fn validate_message(&self, message: &Message) -> Status {
        self(message)
    }
}

/// Render accumulated reasons the way every compliance failure is reported.
pub fn validation_failure(subject: &str, reasons: &[String]) -> String {
    format!("{subject}: Message Validation Failed.\n   {}", reasons.join("\n   "))
}

/// Custom validator first, then template fields, then the subject.
pub(crate) fn check_compliance(message: &Message) -> Status {
    if let Some(validator) = message.validator() {
        let status = validator.validate_message(message);
        if status.has_error() {
            return status;
        }
    }

    let subject = message.get_subject();
    let Some(template) = message.template() else {
        let shown = if subject.is_empty() {
            "no message subject available"
        } else {
            subject.as_str()
        };
        return Status::error(
            ErrorCode::Validation,
            format!("No template available; unable to validate message [{shown}]"),
        );
    };

    let mut reasons = Vec::new();
    check_entries(template.entries(), "", message, &mut reasons);
    for field in message.fields() {
        if !field.is_tracking() && template.find_field(field.name()).is_none() {
            reasons.push(format!("Message contains user-defined field {}", field.name()));
        }
    }
    if !reasons.is_empty() {
        return Status::error(ErrorCode::Validation, validation_failure(&subject, &reasons));
    }

    match check_subject(&subject, message, template) {
        Some(reason) => Status::error(
            ErrorCode::Validation,
            format!("{subject}: Invalid Message Subject: {reason}"),
        ),
        None => Status::ok(),
    }
}

fn check_entries(entries: &[TemplateEntry], prefix: &str, message: &Message, reasons: &mut Vec<String>) {
    for entry in entries {
        match entry {
            TemplateEntry::Field(template) => {
                let name = format!("{prefix}{}", template.name());
                match message.field(&name) {
                    None if template.mode() == FieldMode::Required => {
                        reasons.push(format!("{name} is a required field, but is missing from message"));
                    }
                    None => {}
                    Some(field) if !template.accepts_type(field.field_type()) => {
                        reasons.push(format!(
                            "{name} has incorrect field type of {}.  Valid type(s): {}",
                            field.field_type(),
                            template.type_names()
                        ));
                    }
                    Some(field) if !template.accepts_value(field) => {
                        reasons.push(format!(
                            "{name} has incorrect value of {}, acceptable values: {}",
                            field.get_string_value(),
                            template.values().join(", ")
                        ));
                    }
                    Some(_) => {}
                }
            }
            TemplateEntry::Array(array) => {
                let count_name = format!("{prefix}{}", array.count());
                let element_prefix = format!("{prefix}{}.", array.name());
                match message.field(&count_name) {
                    Some(count) => {
                        let count = count.get_u64_value().unwrap_or(0).min(MAX_ARRAY_ELEMENTS);
                        for index in 1..=count {
                            check_entries(
                                array.entries(),
                                &format!("{element_prefix}{index}."),
                                message,
                                reasons,
                            );
                        }
                    }
                    None => {
                        if message.fields().any(|field| field.name().starts_with(&element_prefix)) {
                            reasons.push(format!(
                                "Message contains array of objects whose size is undefined: {count_name} cannot be found."
                            ));
                        }
                    }
                }
            }
        }
    }
}

fn check_subject(subject: &str, message: &Message, template: &MessageTemplate) -> Option<String> {
    let tokens: Vec<&str> = subject.split('.').collect();
    let elements = template.subject_elements();

    if let Some(extra) = tokens.get(elements.len()) {
        return Some(format!("User-defined subject element value \"{extra}\" is not allowed"));
    }

    for (index, element) in elements.iter().enumerate() {
        let Some(token) = tokens.get(index) else {
            if element.is_optional() {
                continue;
            }
            return Some(format!("{} element is required, but missing", element.name()));
        };
        if !is_valid_subject(token) {
            return Some(format!("{} element contains illegal character(s)", element.name()));
        }
        let expected = element
            .fields()
            .iter()
            .find_map(|name| message.field(name))
            .map(|field| field.get_string_value().to_ascii_uppercase());
        if let Some(expected) = expected {
            if *token != expected {
                return Some(format!(
                    "{} element contains unexpected value \"{token}\". Expected value: {expected}",
                    element.name()
                ));
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::MessageFactory;

    fn heartbeat() -> Message {
        let factory = MessageFactory::new().expect("factory");
        let mut msg = factory.create_message("HB").expect("heartbeat");
        msg.add_value("MISSION-ID", "MY-MISSION").expect("mission");
        msg.add_value("COMPONENT", "MY-COMPONENT").expect("component");
        msg
    }

    #[test]
    fn complete_heartbeat_is_compliant() {
        let status = heartbeat().is_compliant();
        assert!(!status.has_error(), "{}", status.reason());
    }

    #[test]
    fn reports_every_problem() {
        let mut msg = heartbeat();
        msg.clear_field("MISSION-ID");
        msg.add_value("PUB-RATE", "fast").expect("pub-rate");
        msg.add_value("COMPONENT-STATUS", 9_i16).expect("status");
        msg.add_value("EXTRA", 1_i32).expect("extra");

        let status = msg.is_compliant();
        assert_eq!(status.code(), Some(ErrorCode::Validation));
        let reason = status.reason();
        assert!(reason.contains("Message Validation Failed."));
        assert!(reason.contains("MISSION-ID is a required field, but is missing from message"));
        assert!(reason.contains("PUB-RATE has incorrect field type of STRING.  Valid type(s): U16"));
        assert!(reason.contains("COMPONENT-STATUS has incorrect value of 9, acceptable values: 0..4"));
        assert!(reason.contains("Message contains user-defined field EXTRA"));
    }

    #[test]
    fn arrays_need_their_count() {
        let mut msg = heartbeat();
        msg.add_value("SUBSCRIPTION.1.SUBJECT-PATTERN", "GMSEC.>").expect("pattern");
        let status = msg.is_compliant();
        assert!(status
            .reason()
            .contains("Message contains array of objects whose size is undefined: NUM-OF-SUBSCRIPTIONS cannot be found."));

        msg.add_value("NUM-OF-SUBSCRIPTIONS", 2_u16).expect("count");
        let status = msg.is_compliant();
        assert!(status
            .reason()
            .contains("SUBSCRIPTION.2.SUBJECT-PATTERN is a required field, but is missing from message"));
    }

    #[test]
    fn explicit_subject_must_match_fields() {
        let mut msg = heartbeat();
        msg.set_subject("C2MS.FILL.FILL.OTHER.FILL.FILL.MSG.HB.MY-COMPONENT")
            .expect("subject");
        let status = msg.is_compliant();
        assert!(status.reason().contains("Invalid Message Subject"));
        assert!(status.reason().contains("Expected value: MY-MISSION"));

        msg.set_subject("C2MS.FILL.FILL.MY-MISSION.FILL.FILL.MSG.HB.MY-COMPONENT.EXTRA")
            .expect("subject");
        assert!(msg
            .is_compliant()
            .reason()
            .contains("User-defined subject element value \"EXTRA\" is not allowed"));
    }

    #[test]
    fn custom_validator_runs_first() {
        let mut msg = heartbeat();
        msg.register_message_validator(std::sync::Arc::new(|message: &Message| {
            if message.has_field("CONSTELLATION-ID") {
                Status::ok()
            } else {
                Status::error(ErrorCode::Validation, "CONSTELLATION-ID is mandatory here")
            }
        }));
        assert_eq!(msg.is_compliant().reason(), "CONSTELLATION-ID is mandatory here");

        msg.add_value("CONSTELLATION-ID", "C1").expect("constellation");
        assert!(!msg.is_compliant().has_error());
    }

    #[test]
    fn messages_without_templates_cannot_be_validated() {
        let msg = Message::with_subject("GMSEC.FOO.BAR").expect("message");
        assert_eq!(
            msg.is_compliant().reason(),
            "No template available; unable to validate message [GMSEC.FOO.BAR]"
        );
    }
}
