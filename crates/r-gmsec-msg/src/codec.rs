//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "XML and JSON wire forms of messages."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use r_gmsec_common::config::lookup_ci;
use r_gmsec_common::xml::escape_attr;
use r_gmsec_common::{Config, DataFormat, Element, GmsecError, Result, XmlError};
use serde::Serialize;
use serde_json::{json, Value as JsonValue};

use crate::field::{Field, FieldType, JsonField};
use crate::message::{Message, MessageKind};
use crate::subject::is_valid_subject;

pub(crate) fn to_xml(message: &Message) -> String {
    let identify = message.identify_header_fields();
    let subject = message.get_subject();

    let mut out = String::from("<MESSAGE");
    if !subject.is_empty() {
        out.push_str(&format!(" SUBJECT=\"{}\"", escape_attr(&subject)));
    }
    out.push_str(&format!(" KIND=\"{}\">", message.get_kind()));
    if !message.get_config().is_empty() {
        out.push('\n');
        out.push_str(&message.get_config().to_xml_named(None, "\t", "\t"));
    }
    for field in message.fields() {
        out.push_str("\n\t");
        out.push_str(&field.render_xml(identify));
    }
    out.push_str("\n</MESSAGE>");
    out
}

#[derive(Serialize)]
struct JsonDocument<'a> {
    #[serde(rename = "MESSAGE")]
    message: JsonMessage<'a>,
}

#[derive(Serialize)]
struct JsonMessage<'a> {
    #[serde(rename = "SUBJECT", skip_serializing_if = "String::is_empty")]
    subject: String,
    #[serde(rename = "KIND")]
    kind: String,
    #[serde(rename = "CONFIG", skip_serializing_if = "Option::is_none")]
    config: Option<JsonValue>,
    #[serde(rename = "FIELD")]
    fields: Vec<JsonField<'a>>,
}

pub(crate) fn to_json(message: &Message) -> String {
    let identify = message.identify_header_fields();
    let config = if message.get_config().is_empty() {
        None
    } else {
        serde_json::from_str::<JsonValue>(&message.get_config().to_json())
            .ok()
            .and_then(|mut value| value.get_mut("CONFIG").map(JsonValue::take))
    };
    let document = JsonDocument {
        message: JsonMessage {
            subject: message.get_subject(),
            kind: message.get_kind().to_string(),
            config,
            fields: message.fields().map(|field| field.json_repr(identify)).collect(),
        },
    };
    serde_json::to_string(&document).unwrap_or_default()
}

/// Parse a serialized message without resolving its template.
pub(crate) fn from_data(data: &str, format: DataFormat) -> Result<Message> {
    if data.trim().is_empty() {
        return Err(GmsecError::InvalidArgument(
            "Data string cannot be NULL, nor empty".to_owned(),
        ));
    }
    match format {
        DataFormat::Xml => from_xml(data),
        DataFormat::Json => from_json(data),
        DataFormat::KeyValue => Err(GmsecError::Parse(
            "Cannot generate Message from key=value pair(s)".to_owned(),
        )),
    }
}

fn parse_error(message: impl Into<String>) -> GmsecError {
    GmsecError::Parse(message.into())
}

fn apply_header(message: &mut Message, subject: Option<&str>, kind: Option<&str>) -> Result<()> {
    if let Some(subject) = subject.filter(|subject| !subject.is_empty()) {
        if !is_valid_subject(subject) {
            return Err(parse_error("Invalid message subject"));
        }
        message.set_subject(subject)?;
    }
    if let Some(kind) = kind {
        let kind = kind
            .trim()
            .parse::<MessageKind>()
            .map_err(|_| parse_error(format!("Invalid message kind [{kind}]")))?;
        message.set_kind(kind);
    }
    Ok(())
}

fn build_field(
    name: Option<&str>,
    type_name: Option<&str>,
    value: &str,
    bits: Option<&str>,
    head: Option<&str>,
) -> Result<Field> {
    let name = name
        .filter(|name| !name.is_empty())
        .ok_or_else(|| parse_error("Field name was not specified"))?;
    let type_name = type_name
        .filter(|type_name| !type_name.is_empty())
        .ok_or_else(|| parse_error("Field type was not specified"))?;
    let field_type = type_name
        .parse::<FieldType>()
        .map_err(|_| parse_error(format!("Field {name} has illegal type ['{type_name}']")))?;
    let field = Field::from_text(name, field_type, value, bits)?;
    let header = head.is_some_and(|head| {
        head.eq_ignore_ascii_case("T") || head.eq_ignore_ascii_case("TRUE")
    });
    Ok(field.with_header(header))
}

fn from_xml(data: &str) -> Result<Message> {
    let root = Element::parse(data).map_err(|err| match err {
        XmlError::Mismatched => parse_error("Mismatched element"),
        other => parse_error(format!("Invalid XML message format -- {other}")),
    })?;
    if !root.is("MESSAGE") {
        return Err(parse_error("Invalid XML message format -- missing MESSAGE element"));
    }

    let mut message = Message::new();
    apply_header(&mut message, root.attr("SUBJECT"), root.attr("KIND"))?;
    for child in &root.children {
        if child.is("CONFIG") {
            message.set_config(Config::from_element(child)?);
        } else if child.is("FIELD") {
            message.add_field(build_field(
                child.attr("NAME"),
                child.attr("TYPE"),
                &child.text,
                child.attr("BITS"),
                child.attr("HEAD"),
            )?);
        }
    }
    Ok(message)
}

fn json_text(value: Option<&JsonValue>) -> Option<String> {
    match value? {
        JsonValue::String(text) => Some(text.clone()),
        JsonValue::Null => None,
        other => Some(other.to_string()),
    }
}

fn from_json(data: &str) -> Result<Message> {
    let invalid = || parse_error("Invalid JSON message format -- invalid JSON string data");
    let root: JsonValue = serde_json::from_str(data).map_err(|_| invalid())?;
    let body = lookup_ci(&root, "MESSAGE").ok_or_else(invalid)?;

    let mut message = Message::new();
    let subject = json_text(lookup_ci(body, "SUBJECT"));
    let kind = json_text(lookup_ci(body, "KIND"));
    apply_header(&mut message, subject.as_deref(), kind.as_deref())?;

    if let Some(config) = lookup_ci(body, "CONFIG") {
        let wrapped = json!({ "CONFIG": config }).to_string();
        message.set_config(Config::from_data(&wrapped, DataFormat::Json)?);
    }

    let fields = match lookup_ci(body, "FIELD") {
        Some(JsonValue::Array(items)) => items.iter().collect::<Vec<_>>(),
        Some(item @ JsonValue::Object(_)) => vec![item],
        Some(_) => return Err(invalid()),
        None => Vec::new(),
    };
    for entry in fields {
        let value = json_text(lookup_ci(entry, "VALUE")).unwrap_or_default();
        message.add_field(build_field(
            json_text(lookup_ci(entry, "NAME")).as_deref(),
            json_text(lookup_ci(entry, "TYPE")).as_deref(),
            &value,
            json_text(lookup_ci(entry, "BITS")).as_deref(),
            json_text(lookup_ci(entry, "HEAD")).as_deref(),
        )?);
    }
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use r_gmsec_common::ErrorCode;

    fn sample() -> Message {
        let mut msg = Message::with_subject("GMSEC.TEST.PUBLISH").expect("message");
        msg.add_value("U8-FIELD", 200_u8).expect("u8");
        msg.add_value("BOOL-FIELD", true).expect("bool");
        msg.add_value("I16-FIELD", -123_i16).expect("i16");
        msg.add_value("F32-FIELD", 3.14_f32).expect("f32");
        msg.add_value("BIN-FIELD", &[0xde_u8, 0xad, 0xbe, 0xef][..]).expect("bin");
        msg.add_value("STRING-FIELD", "This is a <test>").expect("string");
        msg
    }

    #[test]
    fn xml_has_the_canonical_layout() {
        let xml = sample().to_xml();
        assert!(xml.starts_with("<MESSAGE SUBJECT=\"GMSEC.TEST.PUBLISH\" KIND=\"PUBLISH\">\n\t<FIELD"));
        assert!(xml.contains("<FIELD NAME=\"BOOL-FIELD\" TYPE=\"BOOL\">TRUE</FIELD>"));
        assert!(xml.contains("<FIELD NAME=\"BIN-FIELD\" TYPE=\"BIN\">DEADBEEF</FIELD>"));
        assert!(xml.contains("TYPE=\"F32\" BITS=\"4048F5C3\""));
        assert!(xml.contains("This is a &lt;test&gt;"));
        assert!(xml.ends_with("\n</MESSAGE>"));
    }

    #[test]
    fn xml_and_json_reparse_identically() {
        let msg = sample();
        let xml = msg.to_xml();
        let parsed = from_data(&xml, DataFormat::Xml).expect("xml");
        assert_eq!(parsed.to_xml(), xml);

        let json = msg.to_json();
        let parsed = from_data(&json, DataFormat::Json).expect("json");
        assert_eq!(parsed.to_json(), json);
        assert_eq!(parsed.get_string_value("STRING-FIELD").expect("string"), "This is a <test>");
    }

    #[test]
    fn string_whitespace_survives_xml() {
        let mut msg = Message::with_subject("GMSEC.TEST.SPACES").expect("message");
        msg.add_value("PADDED", " padded ").expect("padded");
        msg.add_value("BLANK", "   ").expect("blank");
        msg.add_value("COUNT", 7_u16).expect("count");

        let xml = msg.to_xml();
        let parsed = from_data(&xml, DataFormat::Xml).expect("xml");
        assert_eq!(parsed.to_xml(), xml);
        assert_eq!(parsed.get_string_value("PADDED").expect("padded"), " padded ");
        assert_eq!(parsed.get_string_value("BLANK").expect("blank"), "   ");
        assert_eq!(parsed.get_u16_value("COUNT").expect("count"), 7);
    }

    #[test]
    fn lowercase_input_parses_to_canonical_output() {
        let xml = "<message subject=\"GMSEC.LOWER\" kind=\"publish\">\
                   <field name=\"COUNT\" type=\"i32\">5</field></message>";
        let parsed = from_data(xml, DataFormat::Xml).expect("lowercase xml");
        assert_eq!(
            parsed.to_xml(),
            "<MESSAGE SUBJECT=\"GMSEC.LOWER\" KIND=\"PUBLISH\">\n\t<FIELD NAME=\"COUNT\" TYPE=\"I32\">5</FIELD>\n</MESSAGE>"
        );

        let json = r#"{"message":{"subject":"GMSEC.LOWER","kind":"PUBLISH","field":[{"name":"COUNT","type":"I32","value":5}]}}"#;
        let parsed = from_data(json, DataFormat::Json).expect("lowercase json");
        assert_eq!(parsed.get_i32_value("COUNT").expect("count"), 5);
    }

    #[test]
    fn config_travels_with_the_message() {
        let mut msg = sample();
        let mut config = Config::new();
        config.add_value("gmsec-identify-header-fields", "true");
        msg.set_config(config);
        let xml = msg.to_xml();
        assert!(xml.contains("\t<CONFIG>\n\t\t<PARAMETER NAME=\"gmsec-identify-header-fields\">true</PARAMETER>\n\t</CONFIG>"));
        let parsed = from_data(&xml, DataFormat::Xml).expect("xml");
        assert_eq!(parsed.get_config().get_value("gmsec-identify-header-fields"), Some("true"));

        let parsed = from_data(&msg.to_json(), DataFormat::Json).expect("json");
        assert_eq!(parsed.get_config().len(), 1);
    }

    #[test]
    fn malformed_input_is_rejected() {
        let cases: [(&str, DataFormat, &str); 8] = [
            ("   ", DataFormat::Xml, "Data string cannot be NULL, nor empty"),
            ("<MESSAGE SUBJECT=\"GMSEC.X\"><FIELD></MESSAGE>", DataFormat::Xml, "Mismatched element"),
            ("<MESSAGE SUBJECT=\"bad subject\"/>", DataFormat::Xml, "Invalid message subject"),
            ("<MESSAGE><FIELD TYPE=\"I32\">1</FIELD></MESSAGE>", DataFormat::Xml, "Field name was not specified"),
            ("<MESSAGE><FIELD NAME=\"A\">1</FIELD></MESSAGE>", DataFormat::Xml, "Field type was not specified"),
            ("<MESSAGE><FIELD NAME=\"A\" TYPE=\"NOPE\">1</FIELD></MESSAGE>", DataFormat::Xml, "Field A has illegal type ['NOPE']"),
            ("{not json", DataFormat::Json, "Invalid JSON message format -- invalid JSON string data"),
            ("A=B", DataFormat::KeyValue, "Cannot generate Message from key=value pair(s)"),
        ];
        for (data, format, expected) in cases {
            let err = from_data(data, format).expect_err(expected);
            assert_eq!(err.to_string(), expected);
        }

        let err = from_data("<MESSAGE><FIELD NAME=\"A\" TYPE=\"I16\">big</FIELD></MESSAGE>", DataFormat::Xml)
            .expect_err("illegal value");
        assert_eq!(err.code(), ErrorCode::Parse);
        assert_eq!(err.to_string(), "Field A has illegal value ['big']");
    }

    #[test]
    fn header_markers_follow_the_message_config() {
        let xml = "<MESSAGE SUBJECT=\"GMSEC.X\" KIND=\"PUBLISH\">\
                   <FIELD NAME=\"MISSION-ID\" TYPE=\"STRING\" HEAD=\"T\">M</FIELD></MESSAGE>";
        let mut parsed = from_data(xml, DataFormat::Xml).expect("xml");
        let field = parsed.get_field("MISSION-ID").expect("lookup").expect("present");
        assert!(field.is_header());
        assert!(!parsed.to_xml().contains("HEAD"));

        let mut config = Config::new();
        config.add_value("gmsec-identify-header-fields", "true");
        parsed.set_config(config);
        assert!(parsed.to_xml().contains("HEAD=\"T\""));
        assert!(parsed.to_json().contains("\"HEAD\":\"T\""));
    }
}
