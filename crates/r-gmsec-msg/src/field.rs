//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Typed message fields with conversions and canonical XML/JSON forms."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fmt;

use r_gmsec_common::xml::{escape_attr, escape_text};
use r_gmsec_common::{GmsecError, Result};
use serde::Serialize;
use strum::{Display, EnumIter, EnumString};

/// Wire type of a [`Field`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum FieldType {
    /// Boolean.
    Bool,
    /// Opaque byte blob, rendered as upper-case hex.
    #[strum(to_string = "BIN", serialize = "BINARY")]
    Bin,
    /// Single byte character.
    Char,
    /// Signed 8-bit integer.
    I8,
    /// Signed 16-bit integer.
    I16,
    /// Signed 32-bit integer.
    I32,
    /// Signed 64-bit integer.
    I64,
    /// Unsigned 8-bit integer.
    U8,
    /// Unsigned 16-bit integer.
    U16,
    /// Unsigned 32-bit integer.
    U32,
    /// Unsigned 64-bit integer.
    U64,
    /// 32-bit float.
    F32,
    /// 64-bit float.
    F64,
    /// UTF-8 text.
    String,
}

impl FieldType {
    /// Name used in conversion diagnostics, e.g. `GMSEC_I16`.
    pub fn api_name(self) -> String {
        format!("GMSEC_{self}")
    }

    /// Class name used by typed getter diagnostics, e.g. `I16Field`.
    pub fn class_name(self) -> &'static str {
        match self {
            FieldType::Bool => "BooleanField",
            FieldType::Bin => "BinaryField",
            FieldType::Char => "CharField",
            FieldType::I8 => "I8Field",
            FieldType::I16 => "I16Field",
            FieldType::I32 => "I32Field",
            FieldType::I64 => "I64Field",
            FieldType::U8 => "U8Field",
            FieldType::U16 => "U16Field",
            FieldType::U32 => "U32Field",
            FieldType::U64 => "U64Field",
            FieldType::F32 => "F32Field",
            FieldType::F64 => "F64Field",
            FieldType::String => "StringField",
        }
    }

    /// Whether values of this type are integral.
    pub fn is_integral(self) -> bool {
        matches!(
            self,
            FieldType::I8
                | FieldType::I16
                | FieldType::I32
                | FieldType::I64
                | FieldType::U8
                | FieldType::U16
                | FieldType::U32
                | FieldType::U64
        )
    }

    /// Whether values of this type are floating point.
    pub fn is_float(self) -> bool {
        matches!(self, FieldType::F32 | FieldType::F64)
    }
}

/// Value carried by a [`Field`].
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Boolean value.
    Bool(bool),
    /// Binary blob.
    Bin(Vec<u8>),
    /// Single byte character.
    Char(u8),
    /// Signed 8-bit value.
    I8(i8),
    /// Signed 16-bit value.
    I16(i16),
    /// Signed 32-bit value.
    I32(i32),
    /// Signed 64-bit value.
    I64(i64),
    /// Unsigned 8-bit value.
    U8(u8),
    /// Unsigned 16-bit value.
    U16(u16),
    /// Unsigned 32-bit value.
    U32(u32),
    /// Unsigned 64-bit value.
    U64(u64),
    /// 32-bit float.
    F32(f32),
    /// 64-bit float.
    F64(f64),
    /// Text.
    String(String),
}

impl FieldValue {
    /// Wire type of this value.
    pub fn field_type(&self) -> FieldType {
        match self {
            FieldValue::Bool(_) => FieldType::Bool,
            FieldValue::Bin(_) => FieldType::Bin,
            FieldValue::Char(_) => FieldType::Char,
            FieldValue::I8(_) => FieldType::I8,
            FieldValue::I16(_) => FieldType::I16,
            FieldValue::I32(_) => FieldType::I32,
            FieldValue::I64(_) => FieldType::I64,
            FieldValue::U8(_) => FieldType::U8,
            FieldValue::U16(_) => FieldType::U16,
            FieldValue::U32(_) => FieldType::U32,
            FieldValue::U64(_) => FieldType::U64,
            FieldValue::F32(_) => FieldType::F32,
            FieldValue::F64(_) => FieldType::F64,
            FieldValue::String(_) => FieldType::String,
        }
    }

    /// Parse the textual form of a value of the given type. For float types
    /// a `BITS` hex pattern, when supplied, takes precedence over the text.
    pub fn parse(field_type: FieldType, text: &str, bits: Option<&str>) -> Option<FieldValue> {
        let trimmed = text.trim();
        let bits = bits.map(str::trim).filter(|bits| !bits.is_empty());
        let value = match field_type {
            FieldType::Bool => match trimmed.to_ascii_lowercase().as_str() {
                "true" | "1" => FieldValue::Bool(true),
                "false" | "0" => FieldValue::Bool(false),
                _ => return None,
            },
            FieldType::Bin => FieldValue::Bin(hex::decode(trimmed).ok()?),
            FieldType::Char => {
                let mut bytes = text.bytes();
                let first = bytes.next()?;
                if bytes.next().is_some() {
                    return None;
                }
                FieldValue::Char(first)
            }
            FieldType::I8 => FieldValue::I8(trimmed.parse().ok()?),
            FieldType::I16 => FieldValue::I16(trimmed.parse().ok()?),
            FieldType::I32 => FieldValue::I32(trimmed.parse().ok()?),
            FieldType::I64 => FieldValue::I64(trimmed.parse().ok()?),
            FieldType::U8 => FieldValue::U8(trimmed.parse().ok()?),
            FieldType::U16 => FieldValue::U16(trimmed.parse().ok()?),
            FieldType::U32 => FieldValue::U32(trimmed.parse().ok()?),
            FieldType::U64 => FieldValue::U64(trimmed.parse().ok()?),
            FieldType::F32 => match bits {
                Some(bits) => FieldValue::F32(f32::from_bits(u32::from_str_radix(bits, 16).ok()?)),
                None => FieldValue::F32(trimmed.parse().ok()?),
            },
            FieldType::F64 => match bits {
                Some(bits) => FieldValue::F64(f64::from_bits(u64::from_str_radix(bits, 16).ok()?)),
                None => FieldValue::F64(trimmed.parse().ok()?),
            },
            FieldType::String => FieldValue::String(text.to_owned()),
        };
        Some(value)
    }

    /// Exact IEEE-754 bit pattern for float values.
    pub fn bits(&self) -> Option<String> {
        match self {
            FieldValue::F32(value) => Some(format!("{:08X}", value.to_bits())),
            FieldValue::F64(value) => Some(format!("{:016X}", value.to_bits())),
            _ => None,
        }
    }

    pub(crate) fn integral(&self, width: usize) -> Option<i128> {
        match self {
            FieldValue::Bool(value) => Some(i128::from(*value)),
            FieldValue::Char(value) => Some(i128::from(*value)),
            FieldValue::I8(value) => Some(i128::from(*value)),
            FieldValue::I16(value) => Some(i128::from(*value)),
            FieldValue::I32(value) => Some(i128::from(*value)),
            FieldValue::I64(value) => Some(i128::from(*value)),
            FieldValue::U8(value) => Some(i128::from(*value)),
            FieldValue::U16(value) => Some(i128::from(*value)),
            FieldValue::U32(value) => Some(i128::from(*value)),
            FieldValue::U64(value) => Some(i128::from(*value)),
            FieldValue::F32(_) | FieldValue::F64(_) => truncate(self.as_f64()?),
            FieldValue::String(text) => {
                let text = text.trim();
                text.parse::<i128>()
                    .ok()
                    .or_else(|| text.parse::<f64>().ok().and_then(truncate))
            }
            FieldValue::Bin(bytes) => {
                if bytes.len() > width {
                    return None;
                }
                Some(
                    bytes
                        .iter()
                        .fold(0_i128, |acc, byte| (acc << 8) | i128::from(*byte)),
                )
            }
        }
    }

    pub(crate) fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Bool(value) => Some(if *value { 1.0 } else { 0.0 }),
            FieldValue::Char(value) => Some(f64::from(*value)),
            FieldValue::I8(value) => Some(f64::from(*value)),
            FieldValue::I16(value) => Some(f64::from(*value)),
            FieldValue::I32(value) => Some(f64::from(*value)),
            FieldValue::I64(value) => Some(*value as f64),
            FieldValue::U8(value) => Some(f64::from(*value)),
            FieldValue::U16(value) => Some(f64::from(*value)),
            FieldValue::U32(value) => Some(f64::from(*value)),
            FieldValue::U64(value) => Some(*value as f64),
            // Going through the display form keeps 3.14f32 as 3.14.
            FieldValue::F32(value) => value.to_string().parse().ok(),
            FieldValue::F64(value) => Some(*value),
            FieldValue::String(text) => text.trim().parse().ok(),
            FieldValue::Bin(_) => None,
        }
    }

    /// Integral or character value of `field_type`, if `value` fits.
    pub(crate) fn from_i128(field_type: FieldType, value: i128) -> Option<FieldValue> {
        let converted = match field_type {
            FieldType::Char => FieldValue::Char(u8::try_from(value).ok()?),
            FieldType::I8 => FieldValue::I8(i8::try_from(value).ok()?),
            FieldType::I16 => FieldValue::I16(i16::try_from(value).ok()?),
            FieldType::I32 => FieldValue::I32(i32::try_from(value).ok()?),
            FieldType::I64 => FieldValue::I64(i64::try_from(value).ok()?),
            FieldType::U8 => FieldValue::U8(u8::try_from(value).ok()?),
            FieldType::U16 => FieldValue::U16(u16::try_from(value).ok()?),
            FieldType::U32 => FieldValue::U32(u32::try_from(value).ok()?),
            FieldType::U64 => FieldValue::U64(u64::try_from(value).ok()?),
            _ => return None,
        };
        Some(converted)
    }
}

fn truncate(value: f64) -> Option<i128> {
    value.is_finite().then(|| value.trunc() as i128)
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Bool(value) => write!(f, "{value}"),
            FieldValue::Bin(bytes) => f.write_str(&hex::encode_upper(bytes)),
            FieldValue::Char(value) => write!(f, "{}", char::from(*value)),
            FieldValue::I8(value) => write!(f, "{value}"),
            FieldValue::I16(value) => write!(f, "{value}"),
            FieldValue::I32(value) => write!(f, "{value}"),
            FieldValue::I64(value) => write!(f, "{value}"),
            FieldValue::U8(value) => write!(f, "{value}"),
            FieldValue::U16(value) => write!(f, "{value}"),
            FieldValue::U32(value) => write!(f, "{value}"),
            FieldValue::U64(value) => write!(f, "{value}"),
            FieldValue::F32(value) => write!(f, "{value}"),
            FieldValue::F64(value) => write!(f, "{value}"),
            FieldValue::String(value) => f.write_str(value),
        }
    }
}

macro_rules! impl_from_value {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for FieldValue {
                fn from(value: $ty) -> Self {
                    FieldValue::$variant(value)
                }
            }
        )*
    };
}

impl_from_value!(
    bool => Bool,
    Vec<u8> => Bin,
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    f32 => F32,
    f64 => F64,
    String => String,
);

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::String(value.to_owned())
    }
}

impl From<&[u8]> for FieldValue {
    fn from(value: &[u8]) -> Self {
        FieldValue::Bin(value.to_vec())
    }
}

/// Check the field naming grammar: upper-case letters, digits, `-`, `.` and `_`.
pub fn validate_field_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(GmsecError::InvalidArgument(
            "Field name cannot be NULL, nor an empty string".to_owned(),
        ));
    }
    let compliant = name
        .bytes()
        .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit() || matches!(b, b'-' | b'.' | b'_'));
    if !compliant {
        return Err(GmsecError::InvalidFieldName(format!(
            "Field name is not compliant [{name}]"
        )));
    }
    Ok(())
}

/// Named, typed value held by a message.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    name: String,
    value: FieldValue,
    header: bool,
    tracking: bool,
}

impl Field {
    /// Create a field, enforcing the naming grammar.
    pub fn new(name: impl Into<String>, value: impl Into<FieldValue>) -> Result<Self> {
        let name = name.into();
        validate_field_name(&name)?;
        Ok(Self {
            name,
            value: value.into(),
            header: false,
            tracking: false,
        })
    }

    /// Create a field from its textual form, as found in XML or JSON.
    pub fn from_text(name: &str, field_type: FieldType, text: &str, bits: Option<&str>) -> Result<Self> {
        let value = FieldValue::parse(field_type, text, bits).ok_or_else(|| {
            GmsecError::Parse(format!("Field {name} has illegal value ['{text}']"))
        })?;
        Field::new(name, value)
    }

    /// Mark the field as a header field.
    pub fn with_header(mut self, header: bool) -> Self {
        self.header = header;
        self
    }

    /// Mark the field as an injected tracking field.
    pub fn with_tracking(mut self, tracking: bool) -> Self {
        self.tracking = tracking;
        self
    }

    /// Field name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wire type.
    pub fn field_type(&self) -> FieldType {
        self.value.field_type()
    }

    /// Underlying value.
    pub fn value(&self) -> &FieldValue {
        &self.value
    }

    /// Whether the field belongs to the message header.
    pub fn is_header(&self) -> bool {
        self.header
    }

    /// Whether the field was injected as a tracking field.
    pub fn is_tracking(&self) -> bool {
        self.tracking
    }

    pub(crate) fn set_header(&mut self, header: bool) {
        self.header = header;
    }

    /// Value rendered as text. Booleans render as `true`/`false`, binary
    /// blobs as upper-case hex.
    pub fn get_string_value(&self) -> String {
        self.value.to_string()
    }

    /// Value interpreted as a boolean.
    pub fn get_boolean_value(&self) -> Result<bool> {
        match &self.value {
            FieldValue::Bool(value) => return Ok(*value),
            FieldValue::String(text) if text.trim().eq_ignore_ascii_case("true") => return Ok(true),
            FieldValue::String(text) if text.trim().eq_ignore_ascii_case("false") => return Ok(false),
            _ => {}
        }
        self.value
            .integral(8)
            .map(|value| value != 0)
            .ok_or_else(|| GmsecError::Conversion("Field cannot be represented as a boolean".to_owned()))
    }

    fn convert<T: TryFrom<i128>>(&self, target: FieldType) -> Result<T> {
        let width = std::mem::size_of::<T>();
        self.value
            .integral(width)
            .and_then(|value| T::try_from(value).ok())
            .ok_or_else(|| conversion_error(target))
    }

    /// Value converted to `i16`.
    pub fn get_i16_value(&self) -> Result<i16> {
        self.convert(FieldType::I16)
    }

    /// Value converted to `i32`.
    pub fn get_i32_value(&self) -> Result<i32> {
        self.convert(FieldType::I32)
    }

    /// Value converted to `i64`.
    pub fn get_i64_value(&self) -> Result<i64> {
        self.convert(FieldType::I64)
    }

    /// Value converted to `u16`.
    pub fn get_u16_value(&self) -> Result<u16> {
        self.convert(FieldType::U16)
    }

    /// Value converted to `u32`.
    pub fn get_u32_value(&self) -> Result<u32> {
        self.convert(FieldType::U32)
    }

    /// Value converted to `u64`.
    pub fn get_u64_value(&self) -> Result<u64> {
        self.convert(FieldType::U64)
    }

    /// Value converted to `f64`.
    pub fn get_f64_value(&self) -> Result<f64> {
        self.value
            .as_f64()
            .ok_or_else(|| conversion_error(FieldType::F64))
    }

    /// Alias of [`Field::get_i64_value`].
    pub fn get_integer_value(&self) -> Result<i64> {
        self.get_i64_value()
    }

    /// Alias of [`Field::get_f64_value`].
    pub fn get_double_value(&self) -> Result<f64> {
        self.get_f64_value()
    }

    /// Canonical XML form.
    pub fn to_xml(&self) -> String {
        self.render_xml(false)
    }

    pub(crate) fn render_xml(&self, identify_header: bool) -> String {
        let mut out = format!(
            "<FIELD NAME=\"{}\" TYPE=\"{}\"",
            escape_attr(&self.name),
            self.field_type()
        );
        if let Some(bits) = self.value.bits() {
            out.push_str(&format!(" BITS=\"{bits}\""));
        }
        if identify_header && self.header {
            out.push_str(" HEAD=\"T\"");
        }
        out.push('>');
        out.push_str(&escape_text(&self.xml_text()));
        out.push_str("</FIELD>");
        out
    }

    fn xml_text(&self) -> String {
        match &self.value {
            FieldValue::Bool(true) => "TRUE".to_owned(),
            FieldValue::Bool(false) => "FALSE".to_owned(),
            other => other.to_string(),
        }
    }

    /// Canonical JSON form.
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.json_repr(false)).unwrap_or_default()
    }

    pub(crate) fn json_repr(&self, identify_header: bool) -> JsonField<'_> {
        JsonField {
            name: &self.name,
            field_type: self.field_type().to_string(),
            head: (identify_header && self.header).then_some("T"),
            bits: self.value.bits(),
            value: self.xml_text(),
        }
    }
}

/// Serde projection used by the JSON codec.
#[derive(Debug, Serialize)]
pub(crate) struct JsonField<'a> {
    #[serde(rename = "NAME")]
    name: &'a str,
    #[serde(rename = "TYPE")]
    field_type: String,
    #[serde(rename = "HEAD", skip_serializing_if = "Option::is_none")]
    head: Option<&'static str>,
    #[serde(rename = "BITS", skip_serializing_if = "Option::is_none")]
    bits: Option<String>,
    #[serde(rename = "VALUE")]
    value: String,
}

fn conversion_error(target: FieldType) -> GmsecError {
    GmsecError::Conversion(format!("Field cannot be converted to a {}", target.api_name()))
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_xml())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use r_gmsec_common::ErrorCode;

    #[test]
    fn names_follow_the_grammar() {
        assert!(Field::new("MISSION-ID", "M").is_ok());
        assert!(Field::new("SUBSCRIPTION.1.SUBJECT_PATTERN", "X").is_ok());

        let empty = Field::new("", 1_i16).expect_err("empty name");
        assert_eq!(empty.to_string(), "Field name cannot be NULL, nor an empty string");

        let lower = Field::new("lower", 1_i16).expect_err("lowercase name");
        assert_eq!(lower.code(), ErrorCode::InvalidFieldName);
        assert!(lower.to_string().contains("Field name is not compliant"));
        assert!(Field::new("HAS SPACE", 1_i16).is_err());
    }

    #[test]
    fn type_names_parse_case_insensitively() {
        assert_eq!("f32".parse::<FieldType>().expect("f32"), FieldType::F32);
        assert_eq!("BINARY".parse::<FieldType>().expect("binary"), FieldType::Bin);
        assert_eq!(FieldType::Bin.to_string(), "BIN");
        assert_eq!(FieldType::String.to_string(), "STRING");
        assert!("BAZ".parse::<FieldType>().is_err());
    }

    #[test]
    fn float_xml_carries_bit_pattern() {
        let field = Field::new("F", 3.14_f32).expect("f32 field");
        assert_eq!(field.to_xml(), r#"<FIELD NAME="F" TYPE="F32" BITS="4048F5C3">3.14</FIELD>"#);

        let double = Field::new("D", 3.14_f64).expect("f64 field");
        assert!(double.to_xml().contains(r#"BITS="40091EB851EB851F""#));
    }

    #[test]
    fn bits_win_over_display_value() {
        let field = Field::from_text("F", FieldType::F32, "0", Some("4048F5C3")).expect("parse");
        assert_eq!(field.value(), &FieldValue::F32(3.14));
    }

    #[test]
    fn binary_and_boolean_render_canonically() {
        let bin = Field::new("B", vec![0x00_u8, 0x02, 0x04, 0x08, 0xFF]).expect("bin");
        assert_eq!(bin.to_xml(), r#"<FIELD NAME="B" TYPE="BIN">00020408FF</FIELD>"#);
        assert_eq!(bin.get_string_value(), "00020408FF");

        let flag = Field::new("FLAG", true).expect("bool");
        assert_eq!(flag.to_xml(), r#"<FIELD NAME="FLAG" TYPE="BOOL">TRUE</FIELD>"#);
        assert_eq!(flag.get_string_value(), "true");
    }

    #[test]
    fn json_preserves_member_order() {
        let field = Field::new("F", 3.14_f32).expect("f32 field");
        assert_eq!(
            field.to_json(),
            r#"{"NAME":"F","TYPE":"F32","BITS":"4048F5C3","VALUE":"3.14"}"#
        );
    }

    #[test]
    fn header_flag_only_rendered_on_request() {
        let field = Field::new("MISSION-ID", "M").expect("field").with_header(true);
        assert!(!field.to_xml().contains("HEAD"));
        assert!(field.render_xml(true).contains(r#"HEAD="T""#));
    }

    #[test]
    fn numeric_conversions_check_range() {
        let big = Field::new("BIG", 70_000_i32).expect("field");
        assert_eq!(big.get_i64_value().expect("i64"), 70_000);
        let err = big.get_i16_value().expect_err("out of range");
        assert_eq!(err.to_string(), "Field cannot be converted to a GMSEC_I16");

        let negative = Field::new("NEG", -1_i32).expect("field");
        assert!(negative.get_u16_value().is_err());

        let text = Field::new("TEXT", "42").expect("field");
        assert_eq!(text.get_u32_value().expect("u32"), 42);
        assert_eq!(text.get_f64_value().expect("f64"), 42.0);

        let float = Field::new("FL", 5.9_f64).expect("field");
        assert_eq!(float.get_i32_value().expect("truncate"), 5);
    }

    #[test]
    fn non_numeric_strings_fail_conversion() {
        let field = Field::new("GREETING", "Hello World").expect("field");
        assert_eq!(
            field.get_boolean_value().expect_err("bool").to_string(),
            "Field cannot be represented as a boolean"
        );
        assert_eq!(
            field.get_i64_value().expect_err("i64").to_string(),
            "Field cannot be converted to a GMSEC_I64"
        );
        assert!(field.get_f64_value().is_err());
    }

    #[test]
    fn booleans_from_text_and_numbers() {
        assert!(Field::new("A", "TRUE").expect("f").get_boolean_value().expect("bool"));
        assert!(!Field::new("B", 0_u8).expect("f").get_boolean_value().expect("bool"));
        assert!(Field::new("C", 2_i64).expect("f").get_boolean_value().expect("bool"));
    }

    #[test]
    fn illegal_values_are_reported_with_the_text() {
        let err = Field::from_text("BAZ", FieldType::I16, "BAZ", None).expect_err("illegal");
        assert_eq!(err.to_string(), "Field BAZ has illegal value ['BAZ']");
    }
}
