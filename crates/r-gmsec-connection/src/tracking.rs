//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Tracking fields stamped on outbound messages."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use r_gmsec_common::{host, time, Config, Result};
use r_gmsec_msg::{Field, FieldSelector, FieldValue, Message};

/// Correlates replies with requests; travels as a tracking field.
pub const REPLY_UNIQUE_ID_FIELD: &str = "__GMSEC-REPLY-UNIQUE-ID__";

const NODE: &str = "NODE";
const PROCESS_ID: &str = "PROCESS-ID";
const USER_NAME: &str = "USER-NAME";
const CONNECTION_ID: &str = "CONNECTION-ID";
const PUBLISH_TIME: &str = "PUBLISH-TIME";
const UNIQUE_ID: &str = "UNIQUE-ID";
const MW_INFO: &str = "MW-INFO";
const NUM_OF_SUBSCRIPTIONS: &str = "NUM-OF-SUBSCRIPTIONS";
const MW_CONNECTION_ENDPOINT: &str = "MW-CONNECTION-ENDPOINT";

/// Which tracking fields a connection adds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TrackingSettings {
    node: bool,
    process_id: bool,
    user_name: bool,
    connection_id: bool,
    publish_time: bool,
    unique_id: bool,
    mw_info: bool,
    active_subscriptions: bool,
    connection_endpoint: bool,
}

/// Connection facts the tracking fields report.
pub(crate) struct TrackingContext<'a> {
    pub(crate) connection_number: u32,
    pub(crate) unique_id: String,
    pub(crate) mw_info: &'a str,
    pub(crate) endpoint: &'a str,
    pub(crate) subscriptions: &'a [String],
}

fn is_heartbeat(message: &Message) -> bool {
    message.get_schema_id().ends_with(".HB")
        || message
            .get_string_value("MESSAGE-SUBTYPE")
            .map(|subtype| subtype == "HB")
            .unwrap_or(false)
}

fn is_subscription_field(name: &str) -> bool {
    name.starts_with("SUBSCRIPTION.") && name.ends_with(".SUBJECT-PATTERN")
}

impl TrackingSettings {
    /// `tracking` sets the default for every `tracking-*` switch.
    pub(crate) fn from_config(config: &Config) -> Self {
        let all = config.get_boolean_value_or("tracking", true);
        let switch = |key: &str| config.get_boolean_value_or(key, all);
        Self {
            node: switch("tracking-node"),
            process_id: switch("tracking-process-id"),
            user_name: switch("tracking-user-name"),
            connection_id: switch("tracking-connection-id"),
            publish_time: switch("tracking-publish-time"),
            unique_id: switch("tracking-unique-id"),
            mw_info: switch("tracking-mw-info"),
            active_subscriptions: switch("tracking-active-subscriptions"),
            connection_endpoint: switch("tracking-connection-endpoint"),
        }
    }

    /// Fields this connection would stamp on every outbound message.
    fn base_names(&self) -> Vec<&'static str> {
        [
            (self.connection_id, CONNECTION_ID),
            (self.mw_info, MW_INFO),
            (self.node, NODE),
            (self.process_id, PROCESS_ID),
            (self.publish_time, PUBLISH_TIME),
            (self.unique_id, UNIQUE_ID),
            (self.user_name, USER_NAME),
        ]
        .into_iter()
        .filter_map(|(enabled, name)| enabled.then_some(name))
        .collect()
    }

    /// User fields occupying enabled tracking names, one reason each.
    pub(crate) fn reserved_field_reasons(&self, message: &Message) -> Vec<String> {
        let user_field = |name: &str| {
            message
                .get_field(name)
                .ok()
                .flatten()
                .map(|field| !field.is_tracking())
                .unwrap_or(false)
        };
        let mut names: Vec<String> = self
            .base_names()
            .into_iter()
            .filter(|name| user_field(name))
            .map(str::to_owned)
            .collect();
        if self.connection_endpoint && user_field(MW_CONNECTION_ENDPOINT) {
            names.push(MW_CONNECTION_ENDPOINT.to_owned());
        }
        if self.active_subscriptions {
            if user_field(NUM_OF_SUBSCRIPTIONS) {
                names.push(NUM_OF_SUBSCRIPTIONS.to_owned());
            }
            names.extend(
                message
                    .fields()
                    .filter(|field| !field.is_tracking() && is_subscription_field(field.name()))
                    .map(|field| field.name().to_owned()),
            );
        }
        names
            .into_iter()
            .map(|name| format!("{name} is a reserved tracking field for the GMSEC API"))
            .collect()
    }

    /// Stamp the enabled tracking fields, replacing stale ones.
    pub(crate) fn apply(&self, message: &mut Message, context: &TrackingContext<'_>) -> Result<()> {
        if self.node {
            stamp(message, NODE, host::node_name().into())?;
        }
        if self.process_id {
            stamp(message, PROCESS_ID, FieldValue::U32(host::process_id()))?;
        }
        if self.user_name {
            stamp(message, USER_NAME, host::user_name().into())?;
        }
        if self.connection_id {
            stamp(message, CONNECTION_ID, FieldValue::U32(context.connection_number))?;
        }
        if self.publish_time {
            stamp(message, PUBLISH_TIME, time::gmsec_time_now().into())?;
        }
        if self.unique_id {
            stamp(message, UNIQUE_ID, context.unique_id.clone().into())?;
        }
        if self.mw_info {
            stamp(message, MW_INFO, context.mw_info.into())?;
        }
        if !is_heartbeat(message) {
            return Ok(());
        }
        if self.active_subscriptions {
            let count = u16::try_from(context.subscriptions.len()).unwrap_or(u16::MAX);
            stamp(message, NUM_OF_SUBSCRIPTIONS, FieldValue::U16(count))?;
            for (index, pattern) in context.subscriptions.iter().enumerate() {
                let name = format!("SUBSCRIPTION.{}.SUBJECT-PATTERN", index + 1);
                stamp(message, &name, pattern.as_str().into())?;
            }
        }
        if self.connection_endpoint {
            stamp(message, MW_CONNECTION_ENDPOINT, context.endpoint.into())?;
        }
        Ok(())
    }
}

fn stamp(message: &mut Message, name: &str, value: FieldValue) -> Result<()> {
    message.add_field(Field::new(name, value)?.with_tracking(true));
    Ok(())
}

/// Drop tracking fields from a received message, keeping reply routing.
pub(crate) fn strip_tracking_fields(message: &mut Message) {
    let names: Vec<String> = message
        .get_field_iterator(FieldSelector::Tracking)
        .map(|field| field.name().to_owned())
        .filter(|name| name != REPLY_UNIQUE_ID_FIELD)
        .collect();
    for name in names {
        message.clear_field(&name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use r_gmsec_msg::MessageFactory;

    fn context(subscriptions: &[String]) -> TrackingContext<'_> {
        TrackingContext {
            connection_number: 3,
            unique_id: "GMSEC_TEST_1".to_owned(),
            mw_info: "loopback",
            endpoint: "loopback://default",
            subscriptions,
        }
    }

    fn tracking_count(message: &Message) -> usize {
        message.get_field_iterator(FieldSelector::Tracking).count()
    }

    #[test]
    fn every_message_gets_the_base_fields() {
        let settings = TrackingSettings::from_config(&Config::new());
        let mut message = Message::with_subject("FOO.BAR").expect("message");
        settings.apply(&mut message, &context(&[])).expect("apply");
        assert_eq!(tracking_count(&message), 7);
        assert_eq!(message.get_u32_value("CONNECTION-ID").expect("id"), 3);
        assert_eq!(message.get_string_value("MW-INFO").expect("info"), "loopback");
    }

    #[test]
    fn heartbeats_also_report_subscriptions_and_endpoint() {
        let settings = TrackingSettings::from_config(&Config::new());
        let mut heartbeat = MessageFactory::new()
            .expect("factory")
            .create_message("HB")
            .expect("heartbeat");
        let subscriptions = vec!["GMSEC.>".to_owned()];
        settings.apply(&mut heartbeat, &context(&subscriptions)).expect("apply");
        assert_eq!(tracking_count(&heartbeat), 10);
        assert_eq!(heartbeat.get_u16_value("NUM-OF-SUBSCRIPTIONS").expect("count"), 1);
        assert_eq!(
            heartbeat.get_string_value("SUBSCRIPTION.1.SUBJECT-PATTERN").expect("pattern"),
            "GMSEC.>"
        );
    }

    #[test]
    fn switches_turn_fields_off() {
        let settings = TrackingSettings::from_config(&Config::from_args([
            "tracking=false",
            "tracking-node=true",
        ]));
        let mut message = Message::with_subject("FOO.BAR").expect("message");
        settings.apply(&mut message, &context(&[])).expect("apply");
        assert_eq!(tracking_count(&message), 1);
        assert!(message.has_field("NODE"));
    }

    #[test]
    fn user_fields_with_tracking_names_are_reported() {
        let settings = TrackingSettings::from_config(&Config::new());
        let mut message = Message::with_subject("FOO.BAR").expect("message");
        message.add_value("NODE", "mine").expect("node");
        message.add_value("SUBSCRIPTION.1.SUBJECT-PATTERN", "A.B").expect("pattern");
        let reasons = settings.reserved_field_reasons(&message);
        assert_eq!(
            reasons,
            vec![
                "NODE is a reserved tracking field for the GMSEC API".to_owned(),
                "SUBSCRIPTION.1.SUBJECT-PATTERN is a reserved tracking field for the GMSEC API"
                    .to_owned(),
            ]
        );

        let mut stamped = Message::with_subject("FOO.BAR").expect("message");
        settings.apply(&mut stamped, &context(&[])).expect("apply");
        assert!(settings.reserved_field_reasons(&stamped).is_empty());
    }

    #[test]
    fn stripping_keeps_reply_routing() {
        let settings = TrackingSettings::from_config(&Config::new());
        let mut message = Message::with_subject("FOO.BAR").expect("message");
        settings.apply(&mut message, &context(&[])).expect("apply");
        message.add_field(
            Field::new(REPLY_UNIQUE_ID_FIELD, "C:1").expect("reply id").with_tracking(true),
        );
        message.add_value("USER", 1_i32).expect("user");
        strip_tracking_fields(&mut message);
        assert_eq!(message.get_field_count(), 2);
        assert!(message.has_field(REPLY_UNIQUE_ID_FIELD));
    }
}
