//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Ordered field container with subject, kind and template binding."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use r_gmsec_common::{Config, GmsecError, Result, Status};
use strum::{Display, EnumString};

use crate::codec;
use crate::field::{Field, FieldType, FieldValue};
use crate::iterator::{FieldSelector, MessageFieldIterator};
use crate::specification::{SchemaLevel, GMSEC_MSG_SPEC_CURRENT};
use crate::subject::validate_subject;
use crate::template::MessageTemplate;
use crate::validator::{self, MessageValidator};

/// Message config key enabling `HEAD="T"` markers on serialized header fields.
pub const IDENTIFY_HEADER_FIELDS: &str = "gmsec-identify-header-fields";

/// Value used for subject elements with no backing field.
pub const FILL: &str = "FILL";

/// Role of a message on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, EnumString)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum MessageKind {
    /// Fire-and-forget publication.
    #[default]
    Publish,
    /// Request expecting one or more replies.
    Request,
    /// Reply to a request.
    Reply,
}

/// Ordered collection of fields with a subject and kind.
#[derive(Clone, Default)]
pub struct Message {
    subject: Option<String>,
    kind: Option<MessageKind>,
    fields: IndexMap<String, Field>,
    config: Config,
    template: Option<Arc<MessageTemplate>>,
    element_values: IndexMap<String, String>,
    validator: Option<Arc<dyn MessageValidator>>,
}

macro_rules! typed_field_getters {
    ($($(#[$doc:meta])* $method:ident => $field_type:ident),* $(,)?) => {
        $(
            $(#[$doc])*
            pub fn $method(&self, name: &str) -> Result<&Field> {
                self.typed_field(name, FieldType::$field_type)
            }
        )*
    };
}

impl Message {
    /// Empty PUBLISH message with no subject and no template.
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty PUBLISH message with an explicit subject.
    pub fn with_subject(subject: &str) -> Result<Self> {
        let mut message = Self::new();
        message.set_subject(subject)?;
        Ok(message)
    }

    pub(crate) fn from_template(template: Arc<MessageTemplate>) -> Self {
        let mut message = Self::new();
        for field in template.entries().iter().filter_map(|entry| match entry {
            crate::template::TemplateEntry::Field(field) => field.default_field(),
            crate::template::TemplateEntry::Array(_) => None,
        }) {
            message.fields.insert(field.name().to_owned(), field);
        }
        message.template = Some(template);
        message
    }

    /// Subject as set, or as derived from the template.
    pub fn get_subject(&self) -> String {
        match (&self.subject, &self.template) {
            (Some(subject), _) => subject.clone(),
            (None, Some(template)) => self.build_subject(template, false),
            (None, None) => String::new(),
        }
    }

    /// Set an explicit subject.
    pub fn set_subject(&mut self, subject: &str) -> Result<()> {
        validate_subject(subject)?;
        self.subject = Some(subject.to_owned());
        Ok(())
    }

    /// Set the value of a template subject element that has no backing field.
    pub fn set_subject_element(&mut self, name: &str, value: &str) -> Result<()> {
        if name.is_empty() {
            return Err(GmsecError::InvalidArgument(
                "Subject element name cannot be NULL or empty string".to_owned(),
            ));
        }
        let template = self.template.as_ref().ok_or_else(|| {
            GmsecError::InvalidArgument("Message does not have a message template".to_owned())
        })?;
        if !template.subject_elements().iter().any(|element| element.name() == name) {
            return Err(GmsecError::InvalidArgument(format!(
                "Message does not have a subject element named {name}"
            )));
        }
        self.element_values.insert(name.to_owned(), value.to_owned());
        self.subject = None;
        Ok(())
    }

    fn build_subject(&self, template: &MessageTemplate, response: bool) -> String {
        let mut parts: Vec<(String, bool)> = Vec::new();
        for element in template.subject_elements() {
            if response && element.is_optional() {
                continue;
            }
            let mapped = if response && element.fields().iter().any(|name| name == "DESTINATION-COMPONENT") {
                self.field("COMPONENT").map(Field::get_string_value)
            } else {
                element
                    .fields()
                    .iter()
                    .find_map(|name| self.field(name))
                    .map(Field::get_string_value)
            };
            let value = mapped.or_else(|| self.element_values.get(element.name()).cloned());
            let unset = value.is_none() && element.is_optional();
            parts.push((value.unwrap_or_else(|| FILL.to_owned()), unset));
        }
        while matches!(parts.last(), Some((_, true))) {
            parts.pop();
        }
        parts
            .into_iter()
            .map(|(value, _)| value)
            .collect::<Vec<_>>()
            .join(".")
            .to_ascii_uppercase()
    }

    /// Subject a responder publishes replies on, followed by `.+`.
    pub fn get_response_topic(&self) -> Result<String> {
        if self.get_kind() != MessageKind::Request {
            return Err(GmsecError::WrongKind("Cannot use non-REQUEST kind message".to_owned()));
        }
        let subject = match &self.template {
            Some(template) => self.build_subject(template, true),
            None => self.get_subject(),
        };
        Ok(format!("{}.+", subject.replacen(".REQ.", ".RESP.", 1)))
    }

    /// Kind as set, or deduced from MESSAGE-TYPE.
    pub fn get_kind(&self) -> MessageKind {
        if let Some(kind) = self.kind {
            return kind;
        }
        match self.field("MESSAGE-TYPE").map(Field::get_string_value).as_deref() {
            Some("REQ") => MessageKind::Request,
            Some("RESP") => MessageKind::Reply,
            _ => MessageKind::Publish,
        }
    }

    /// Fix the kind.
    pub fn set_kind(&mut self, kind: MessageKind) {
        self.kind = Some(kind);
    }

    /// Short schema ID (`MSG.HB`), empty when the message has no template.
    pub fn get_schema_id(&self) -> &str {
        self.template
            .as_ref()
            .map_or("", |template| template.short_id())
    }

    /// Specification version of the template.
    pub fn get_version(&self) -> u32 {
        self.template
            .as_ref()
            .map_or(GMSEC_MSG_SPEC_CURRENT, |template| template.version())
    }

    /// Schema level of the template.
    pub fn get_schema_level(&self) -> SchemaLevel {
        self.template
            .as_ref()
            .map_or(SchemaLevel::Level0, |template| template.level())
    }

    /// Per-message transport configuration.
    pub fn get_config(&self) -> &Config {
        &self.config
    }

    /// Replace the per-message configuration.
    pub fn set_config(&mut self, config: Config) {
        self.config = config;
    }

    /// Add or replace a field; true when a field of that name existed.
    pub fn add_field(&mut self, mut field: Field) -> bool {
        if let Some(template) = &self.template {
            if template.is_header(field.name()) {
                field.set_header(true);
            }
        }
        self.fields.insert(field.name().to_owned(), field).is_some()
    }

    /// Build a field from a raw value and add it.
    pub fn add_value(&mut self, name: &str, value: impl Into<FieldValue>) -> Result<bool> {
        Ok(self.add_field(Field::new(name, value)?))
    }

    /// Add several fields; true only when every one replaced an existing field.
    pub fn add_fields<I>(&mut self, fields: I) -> bool
    where
        I: IntoIterator<Item = Field>,
    {
        let mut all_replaced = true;
        for field in fields {
            all_replaced &= self.add_field(field);
        }
        all_replaced
    }

    /// Remove a field; true when it existed.
    pub fn clear_field(&mut self, name: &str) -> bool {
        self.fields.shift_remove(name).is_some()
    }

    /// Remove every field.
    pub fn clear_fields(&mut self) {
        self.fields.clear();
    }

    /// Whether a field exists.
    pub fn has_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Number of fields.
    pub fn get_field_count(&self) -> usize {
        self.fields.len()
    }

    /// Look up a field by name.
    pub fn get_field(&self, name: &str) -> Result<Option<&Field>> {
        if name.is_empty() {
            return Err(GmsecError::InvalidArgument(
                "Field name cannot be NULL, nor an empty string".to_owned(),
            ));
        }
        Ok(self.fields.get(name))
    }

    pub(crate) fn field(&self, name: &str) -> Option<&Field> {
        self.fields.get(name)
    }

    /// Fields in insertion order.
    pub fn fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.values()
    }

    fn require(&self, name: &str) -> Result<&Field> {
        self.get_field(name)?.ok_or_else(|| {
            GmsecError::FieldNotFound(format!("Message does not contain field with name: {name}"))
        })
    }

    fn typed_field(&self, name: &str, field_type: FieldType) -> Result<&Field> {
        let field = self.require(name)?;
        if field.field_type() != field_type {
            return Err(GmsecError::FieldType(format!(
                "Message does not contain {} with name: {name}",
                field_type.class_name()
            )));
        }
        Ok(field)
    }

    /// Wire type of a field.
    pub fn get_field_type(&self, name: &str) -> Result<FieldType> {
        Ok(self.require(name)?.field_type())
    }

    typed_field_getters!(
        /// BOOL field by name.
        get_boolean_field => Bool,
        /// BIN field by name.
        get_binary_field => Bin,
        /// CHAR field by name.
        get_char_field => Char,
        /// I8 field by name.
        get_i8_field => I8,
        /// I16 field by name.
        get_i16_field => I16,
        /// I32 field by name.
        get_i32_field => I32,
        /// I64 field by name.
        get_i64_field => I64,
        /// U8 field by name.
        get_u8_field => U8,
        /// U16 field by name.
        get_u16_field => U16,
        /// U32 field by name.
        get_u32_field => U32,
        /// U64 field by name.
        get_u64_field => U64,
        /// F32 field by name.
        get_f32_field => F32,
        /// F64 field by name.
        get_f64_field => F64,
        /// STRING field by name.
        get_string_field => String,
    );

    /// Field value rendered as text.
    pub fn get_string_value(&self, name: &str) -> Result<String> {
        Ok(self.require(name)?.get_string_value())
    }

    /// Field value as a boolean.
    pub fn get_boolean_value(&self, name: &str) -> Result<bool> {
        self.require(name)?.get_boolean_value()
    }

    /// Field value converted to `i16`.
    pub fn get_i16_value(&self, name: &str) -> Result<i16> {
        self.require(name)?.get_i16_value()
    }

    /// Field value converted to `i32`.
    pub fn get_i32_value(&self, name: &str) -> Result<i32> {
        self.require(name)?.get_i32_value()
    }

    /// Field value converted to `i64`.
    pub fn get_i64_value(&self, name: &str) -> Result<i64> {
        self.require(name)?.get_i64_value()
    }

    /// Field value converted to `u16`.
    pub fn get_u16_value(&self, name: &str) -> Result<u16> {
        self.require(name)?.get_u16_value()
    }

    /// Field value converted to `u32`.
    pub fn get_u32_value(&self, name: &str) -> Result<u32> {
        self.require(name)?.get_u32_value()
    }

    /// Field value converted to `u64`.
    pub fn get_u64_value(&self, name: &str) -> Result<u64> {
        self.require(name)?.get_u64_value()
    }

    /// Field value converted to `f64`.
    pub fn get_f64_value(&self, name: &str) -> Result<f64> {
        self.require(name)?.get_f64_value()
    }

    /// Alias of [`Message::get_i64_value`].
    pub fn get_integer_value(&self, name: &str) -> Result<i64> {
        self.get_i64_value(name)
    }

    /// Alias of [`Message::get_f64_value`].
    pub fn get_double_value(&self, name: &str) -> Result<f64> {
        self.get_f64_value(name)
    }

    /// Set a field, converting the value to the type of the existing field
    /// or, failing that, to the first type the template allows. Returns
    /// whether a field of that name existed.
    pub fn set_field_value(&mut self, name: &str, value: impl Into<FieldValue>) -> Result<bool> {
        if name.is_empty() {
            return Err(GmsecError::InvalidArgument(
                "Field name cannot be NULL or empty string".to_owned(),
            ));
        }
        let value = value.into();
        let target = self
            .fields
            .get(name)
            .map(Field::field_type)
            .or_else(|| {
                self.template
                    .as_ref()
                    .and_then(|template| template.find_field(name))
                    .and_then(|template| template.types().first().copied())
            })
            .unwrap_or_else(|| value.field_type());
        let converted = coerce(name, target, value)?;
        Ok(self.add_field(Field::new(name, converted)?))
    }

    /// Copy every field into `dest`, replacing same-named fields there.
    pub fn copy_fields(&self, dest: &mut Message) {
        for field in self.fields.values() {
            dest.add_field(field.clone());
        }
    }

    /// Restartable cursor over the selected fields.
    pub fn get_field_iterator(&self, selector: FieldSelector) -> MessageFieldIterator<'_> {
        MessageFieldIterator::new(self.fields.values(), selector)
    }

    /// Check the message against its template and any registered validator.
    pub fn is_compliant(&self) -> Status {
        validator::check_compliance(self)
    }

    /// Run `validator` ahead of the template check in [`Message::is_compliant`].
    pub fn register_message_validator(&mut self, validator: Arc<dyn MessageValidator>) {
        self.validator = Some(validator);
    }

    pub(crate) fn validator(&self) -> Option<&Arc<dyn MessageValidator>> {
        self.validator.as_ref()
    }

    pub(crate) fn template(&self) -> Option<&Arc<MessageTemplate>> {
        self.template.as_ref()
    }

    pub(crate) fn set_template(&mut self, template: Arc<MessageTemplate>) {
        for field in self.fields.values_mut() {
            if template.is_header(field.name()) {
                field.set_header(true);
            }
        }
        self.template = Some(template);
    }

    pub(crate) fn identify_header_fields(&self) -> bool {
        self.config.get_boolean_value_or(IDENTIFY_HEADER_FIELDS, false)
    }

    /// Canonical XML form.
    pub fn to_xml(&self) -> String {
        codec::to_xml(self)
    }

    /// Canonical JSON form.
    pub fn to_json(&self) -> String {
        codec::to_json(self)
    }
}

fn coerce(name: &str, target: FieldType, value: FieldValue) -> Result<FieldValue> {
    if value.field_type() == target {
        return Ok(value);
    }
    let shown = match &value {
        FieldValue::String(text) => format!("\"{text}\""),
        other => other.to_string(),
    };
    let failure = |problem: &str| {
        GmsecError::Conversion(format!(
            "Field template \"{name}\" calls for field type {}, but value {shown} {problem}",
            target.api_name()
        ))
    };
    if let FieldValue::String(text) = &value {
        if let Some(parsed) = FieldValue::parse(target, text, None) {
            return Ok(parsed);
        }
    }
    match target {
        FieldType::String => Ok(FieldValue::String(value.to_string())),
        FieldType::F32 => value
            .as_f64()
            .map(|number| FieldValue::F32(number as f32))
            .ok_or_else(|| failure("cannot be converted")),
        FieldType::F64 => value
            .as_f64()
            .map(FieldValue::F64)
            .ok_or_else(|| failure("cannot be converted")),
        FieldType::Bool => match value.integral(8) {
            Some(0) => Ok(FieldValue::Bool(false)),
            Some(1) => Ok(FieldValue::Bool(true)),
            _ => Err(failure("cannot be converted")),
        },
        FieldType::Bin => Err(failure("cannot be converted")),
        _ => {
            let number = value.integral(16).ok_or_else(|| failure("cannot be converted"))?;
            FieldValue::from_i128(target, number).ok_or_else(|| failure("is outside limits"))
        }
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("subject", &self.get_subject())
            .field("kind", &self.get_kind())
            .field("schema_id", &self.get_schema_id())
            .field("fields", &self.fields.len())
            .field("validator", &self.validator.is_some())
            .finish()
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_xml())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::MessageFactory;
    use r_gmsec_common::ErrorCode;

    #[test]
    fn add_reports_replacement() {
        let mut msg = Message::with_subject("GMSEC.TEST").expect("message");
        assert!(!msg.add_value("A", 1_i32).expect("add"));
        assert!(msg.add_value("A", 2_i32).expect("replace"));
        assert_eq!(msg.get_i32_value("A").expect("value"), 2);

        assert!(!msg.add_fields(vec![
            Field::new("A", 3_i32).expect("field"),
            Field::new("B", 4_i32).expect("field"),
        ]));
        assert!(msg.add_fields(vec![Field::new("B", 5_i32).expect("field")]));

        assert!(msg.clear_field("A"));
        assert!(!msg.clear_field("A"));
        msg.clear_fields();
        assert_eq!(msg.get_field_count(), 0);
    }

    #[test]
    fn typed_getters_distinguish_missing_and_mistyped() {
        let mut msg = Message::new();
        msg.add_value("COUNT", 5_u16).expect("add");

        let err = msg.get_i16_field("COUNT").expect_err("wrong type");
        assert_eq!(err.code(), ErrorCode::FieldType);
        assert_eq!(err.to_string(), "Message does not contain I16Field with name: COUNT");

        let err = msg.get_string_value("NOPE").expect_err("missing");
        assert_eq!(err.code(), ErrorCode::FieldNotFound);
        assert_eq!(err.to_string(), "Message does not contain field with name: NOPE");

        assert_eq!(msg.get_field("").expect_err("empty").code(), ErrorCode::InvalidArgument);
        assert!(msg.get_field("NOPE").expect("lookup").is_none());
        assert_eq!(msg.get_u16_field("COUNT").expect("u16").get_u16_value().expect("value"), 5);
    }

    #[test]
    fn set_field_value_keeps_the_existing_type() {
        let mut msg = Message::new();
        msg.add_value("PUB-RATE", 10_u16).expect("add");

        assert!(msg.set_field_value("PUB-RATE", "5").expect("from text"));
        assert_eq!(msg.get_u16_field("PUB-RATE").expect("u16").get_u16_value().expect("v"), 5);

        msg.set_field_value("PUB-RATE", 5.9_f64).expect("from float");
        assert_eq!(msg.get_u16_value("PUB-RATE").expect("value"), 5);

        let err = msg.set_field_value("PUB-RATE", -1_i64).expect_err("negative");
        assert_eq!(
            err.to_string(),
            "Field template \"PUB-RATE\" calls for field type GMSEC_U16, but value -1 is outside limits"
        );
        let err = msg.set_field_value("PUB-RATE", "fast").expect_err("text");
        assert_eq!(
            err.to_string(),
            "Field template \"PUB-RATE\" calls for field type GMSEC_U16, but value \"fast\" cannot be converted"
        );

        assert!(!msg.set_field_value("NEW-TEXT", "hello").expect("new string"));
        assert_eq!(msg.get_field_type("NEW-TEXT").expect("type"), FieldType::String);
        msg.set_field_value("NEW-NUMBER", 7_i64).expect("new number");
        assert_eq!(msg.get_field_type("NEW-NUMBER").expect("type"), FieldType::I64);
    }

    #[test]
    fn set_field_value_follows_the_template_type() {
        let factory = MessageFactory::new().expect("factory");
        let mut msg = factory.create_message("MSG.HB").expect("heartbeat");
        msg.set_field_value("PUB-RATE", 30_i64).expect("pub-rate");
        assert_eq!(msg.get_field_type("PUB-RATE").expect("type"), FieldType::U16);
        msg.set_field_value("COMPONENT-STATUS", "2").expect("status");
        assert_eq!(msg.get_field_type("COMPONENT-STATUS").expect("type"), FieldType::I16);
    }

    #[test]
    fn subjects_are_validated() {
        let err = Message::with_subject("lower.case").expect_err("invalid");
        assert_eq!(err.code(), ErrorCode::InvalidSubject);
        assert_eq!(Message::with_subject("").expect_err("empty").code(), ErrorCode::InvalidArgument);
    }

    #[test]
    fn subject_is_derived_from_the_template() {
        let factory = MessageFactory::new().expect("factory");
        let mut msg = factory.create_message("MSG.TLMPROC").expect("tlmproc");
        msg.add_value("MISSION-ID", "mission").expect("mission");
        msg.add_value("COMPONENT", "GEN").expect("component");
        assert_eq!(msg.get_subject(), "C2MS.FILL.FILL.MISSION.FILL.FILL.MSG.TLMPROC.GEN");

        msg.set_subject_element("ME3", "x").expect("element");
        assert_eq!(msg.get_subject(), "C2MS.FILL.FILL.MISSION.FILL.FILL.MSG.TLMPROC.GEN.FILL.X");

        let err = msg.set_subject_element("BOGUS", "x").expect_err("unknown element");
        assert_eq!(err.to_string(), "Message does not have a subject element named BOGUS");
        let err = Message::new().set_subject_element("ME2", "x").expect_err("no template");
        assert_eq!(err.to_string(), "Message does not have a message template");
    }

    #[test]
    fn kind_is_deduced_from_message_type() {
        let factory = MessageFactory::new().expect("factory");
        let request = factory.create_message("REQ.DIR").expect("request");
        assert_eq!(request.get_kind(), MessageKind::Request);
        assert_eq!(factory.create_message("RESP.DIR").expect("reply").get_kind(), MessageKind::Reply);
        assert_eq!(Message::new().get_kind(), MessageKind::Publish);
    }

    #[test]
    fn response_topic_swaps_req_for_resp() {
        let factory = MessageFactory::new().expect("factory");
        let mut request = factory.create_message("REQ.DIR").expect("request");
        request.add_value("MISSION-ID", "M").expect("mission");
        request.add_value("COMPONENT", "ME").expect("component");
        request.add_value("DESTINATION-COMPONENT", "YOU").expect("destination");
        assert_eq!(request.get_subject(), "C2MS.FILL.FILL.M.FILL.FILL.REQ.DIR.YOU");
        assert_eq!(
            request.get_response_topic().expect("topic"),
            "C2MS.FILL.FILL.M.FILL.FILL.RESP.DIR.ME.+"
        );

        let publish = Message::with_subject("GMSEC.FOO").expect("message");
        assert_eq!(publish.get_response_topic().expect_err("publish").code(), ErrorCode::WrongKind);
    }

    #[test]
    fn copy_fields_overlays() {
        let mut source = Message::new();
        source.add_value("A", 1_i32).expect("a");
        let mut dest = Message::new();
        dest.add_value("A", 0_i32).expect("a");
        dest.add_value("B", 2_i32).expect("b");
        source.copy_fields(&mut dest);
        assert_eq!(dest.get_i32_value("A").expect("a"), 1);
        assert_eq!(dest.get_field_count(), 2);
    }

    #[test]
    fn template_header_fields_are_flagged() {
        let factory = MessageFactory::new().expect("factory");
        let mut msg = factory.create_message("MSG.LOG").expect("log");
        msg.add_value("MISSION-ID", "M").expect("mission");
        msg.add_value("MSG-TEXT", "hello").expect("text");
        let header: Vec<&str> = msg
            .get_field_iterator(FieldSelector::Header)
            .map(Field::name)
            .collect();
        assert!(header.contains(&"MISSION-ID"));
        assert!(!header.contains(&"MSG-TEXT"));
    }
}
