//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "In-memory message templates parsed from schema XML."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! A level file looks like:
//!
//! ```xml
//! <TEMPLATES LEVEL="0" NAME="C2MS">
//!     <HEADER>
//!         <SUBJECT><ELEMENT NAME="MISSION-ID" FIELD="MISSION-ID"/></SUBJECT>
//!         <FIELD NAME="MISSION-ID" TYPE="STRING" MODE="REQUIRED" CLASSIFICATION="HEADER"/>
//!     </HEADER>
//!     <SCHEMA ID="MSG.HB" DESCRIPTION="Heartbeat">
//!         <FIELD NAME="PUB-RATE" TYPE="U16" MODE="OPTIONAL"/>
//!         <ARRAY NAME="SUBSCRIPTION" COUNT="NUM-OF-SUBSCRIPTIONS">...</ARRAY>
//!     </SCHEMA>
//! </TEMPLATES>
//! ```
//!
//! Header fields may carry `ID-TOKEN="n"` to take their value from the n-th
//! token of the schema ID (`MESSAGE-TYPE` and `MESSAGE-SUBTYPE`).

use r_gmsec_common::config::parse_bool;
use r_gmsec_common::{Element, GmsecError, Result};
use strum::{Display, EnumString};

use crate::field::{Field, FieldType, FieldValue};
use crate::specification::SchemaLevel;

/// Presence requirement of a template field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum FieldMode {
    /// Field must be present.
    Required,
    /// Field may be present.
    Optional,
    /// Field sizes an array of sub-fields.
    Control,
}

/// Definition of one field within a template.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldTemplate {
    name: String,
    types: Vec<FieldType>,
    mode: FieldMode,
    classification: String,
    values: Vec<String>,
    description: String,
    header: bool,
    id_token: Option<usize>,
}

impl FieldTemplate {
    fn from_element(element: &Element, header: bool) -> Result<Self> {
        let name = required_attr(element, "NAME")?.to_owned();
        let types = match element.attr("TYPE").map(str::trim) {
            None | Some("") | Some("VARIABLE") | Some("UNSET") => Vec::new(),
            Some(list) => list
                .split(',')
                .map(|item| {
                    item.trim().parse::<FieldType>().map_err(|_| {
                        load_error(format!("Field template {name} has unknown type {item}"))
                    })
                })
                .collect::<Result<Vec<_>>>()?,
        };
        let mode = match element.attr("MODE") {
            Some(mode) => mode
                .parse::<FieldMode>()
                .map_err(|_| load_error(format!("Field template {name} has unknown mode {mode}")))?,
            None => FieldMode::Optional,
        };
        let values = element
            .attr("VALUE")
            .map(|list| {
                list.split(',')
                    .map(|value| value.trim().to_owned())
                    .filter(|value| !value.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        let id_token = match element.attr("ID-TOKEN") {
            Some(token) => Some(token.trim().parse::<usize>().map_err(|_| {
                load_error(format!("Field template {name} has invalid ID-TOKEN {token}"))
            })?),
            None => None,
        };
        Ok(Self {
            name,
            types,
            mode,
            classification: element
                .attr("CLASSIFICATION")
                .unwrap_or(if header { "HEADER" } else { "STANDARD" })
                .to_owned(),
            values,
            description: element.attr("DESCRIPTION").unwrap_or_default().to_owned(),
            header,
            id_token,
        })
    }

    /// Field name, relative to its array when nested.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Accepted wire types; empty when any type is accepted.
    pub fn types(&self) -> &[FieldType] {
        &self.types
    }

    /// Accepted types rendered as a comma separated list.
    pub fn type_names(&self) -> String {
        self.types
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Presence requirement.
    pub fn mode(&self) -> FieldMode {
        self.mode
    }

    /// Classification label, such as `HEADER` or `TRACKING`.
    pub fn classification(&self) -> &str {
        &self.classification
    }

    /// Acceptable values, ranges (`a..b`), lower (`n+`) or upper (`n-`) bounds.
    pub fn values(&self) -> &[String] {
        &self.values
    }

    /// Human-readable description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Whether the field belongs to the message header.
    pub fn is_header(&self) -> bool {
        self.header
    }

    /// Whether the field is reserved for tracking data.
    pub fn is_tracking(&self) -> bool {
        self.classification.eq_ignore_ascii_case("TRACKING")
    }

    /// Value used when a message is created from the template: the single
    /// concrete acceptable value, if any.
    pub fn default_value(&self) -> Option<&str> {
        match self.values.as_slice() {
            [only] if !is_range(only) => Some(only.as_str()),
            _ => None,
        }
    }

    /// Build the default field for this template, if it has a default.
    pub fn default_field(&self) -> Option<Field> {
        let value = self.default_value()?;
        let field_type = self.types.first().copied().unwrap_or(FieldType::String);
        Field::from_text(&self.name, field_type, value, None)
            .ok()
            .map(|field| field.with_header(self.header))
    }

    /// Whether the field's type is acceptable.
    pub fn accepts_type(&self, field_type: FieldType) -> bool {
        self.types.is_empty() || self.types.contains(&field_type)
    }

    /// Whether the field's value is acceptable.
    pub fn accepts_value(&self, field: &Field) -> bool {
        if self.values.is_empty() {
            return true;
        }
        match field.value() {
            FieldValue::Bin(_) => true,
            FieldValue::Char(_) | FieldValue::String(_) => {
                let text = field.get_string_value();
                self.values.iter().any(|value| *value == text)
            }
            FieldValue::Bool(flag) => self
                .values
                .iter()
                .any(|value| parse_bool(value) == Some(*flag)),
            FieldValue::I8(_) | FieldValue::I16(_) | FieldValue::I32(_) | FieldValue::I64(_) => {
                match field.get_i64_value() {
                    Ok(actual) => self
                        .values
                        .iter()
                        .any(|value| within(actual, value, |a, b| a == b)),
                    Err(_) => false,
                }
            }
            FieldValue::U8(_) | FieldValue::U16(_) | FieldValue::U32(_) | FieldValue::U64(_) => {
                match field.get_u64_value() {
                    Ok(actual) => self
                        .values
                        .iter()
                        .any(|value| within(actual, value, |a, b| a == b)),
                    Err(_) => false,
                }
            }
            FieldValue::F32(_) | FieldValue::F64(_) => match field.get_f64_value() {
                Ok(actual) => self
                    .values
                    .iter()
                    .any(|value| within(actual, value, approx_eq)),
                Err(_) => false,
            },
        }
    }
}

fn is_range(value: &str) -> bool {
    value.contains("..") || (value.len() > 1 && (value.ends_with('+') || value.ends_with('-')))
}

fn within<T, F>(actual: T, spec: &str, eq: F) -> bool
where
    T: PartialOrd + std::str::FromStr,
    F: Fn(&T, &T) -> bool,
{
    let parse = |text: &str| text.trim().parse::<T>().ok();
    if let Some((low, high)) = spec.split_once("..") {
        return match (parse(low), parse(high)) {
            (Some(low), Some(high)) => actual >= low && actual <= high,
            _ => false,
        };
    }
    if spec.len() > 1 {
        if let Some(low) = spec.strip_suffix('+') {
            return parse(low).map_or(false, |low| actual >= low);
        }
        if let Some(high) = spec.strip_suffix('-') {
            return parse(high).map_or(false, |high| actual <= high);
        }
    }
    parse(spec).map_or(false, |expected| eq(&actual, &expected))
}

fn approx_eq(a: &f64, b: &f64) -> bool {
    (a - b).abs() <= 1e-6 * a.abs().max(b.abs()).max(1.0)
}

/// Repeating group of fields sized by a count field.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayTemplate {
    name: String,
    count: String,
    entries: Vec<TemplateEntry>,
}

impl ArrayTemplate {
    /// Array prefix, e.g. `SUBSCRIPTION` for `SUBSCRIPTION.1.SUBJECT-PATTERN`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the field holding the element count.
    pub fn count(&self) -> &str {
        &self.count
    }

    /// Per-element field definitions.
    pub fn entries(&self) -> &[TemplateEntry] {
        &self.entries
    }
}

/// Node of a template's field tree.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateEntry {
    /// Plain field.
    Field(FieldTemplate),
    /// Repeating group.
    Array(ArrayTemplate),
}

impl TemplateEntry {
    fn name(&self) -> &str {
        match self {
            TemplateEntry::Field(field) => field.name(),
            TemplateEntry::Array(array) => array.name(),
        }
    }
}

fn parse_entries(element: &Element, header: bool) -> Result<Vec<TemplateEntry>> {
    let mut entries = Vec::new();
    for child in &element.children {
        if child.is("FIELD") {
            entries.push(TemplateEntry::Field(FieldTemplate::from_element(child, header)?));
        } else if child.is("ARRAY") {
            entries.push(TemplateEntry::Array(ArrayTemplate {
                name: required_attr(child, "NAME")?.to_owned(),
                count: required_attr(child, "COUNT")?.to_owned(),
                entries: parse_entries(child, header)?,
            }));
        }
    }
    Ok(entries)
}

fn merge_entries(base: &mut Vec<TemplateEntry>, additions: Vec<TemplateEntry>) {
    for entry in additions {
        match base.iter_mut().find(|existing| existing.name() == entry.name()) {
            Some(existing) => {
                let header = matches!(existing, TemplateEntry::Field(field) if field.header);
                *existing = entry;
                if let TemplateEntry::Field(field) = existing {
                    field.header |= header;
                }
            }
            None => base.push(entry),
        }
    }
}

/// One element of a template subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectElement {
    name: String,
    fields: Vec<String>,
    optional: bool,
}

impl SubjectElement {
    fn from_element(element: &Element) -> Result<Self> {
        Ok(Self {
            name: required_attr(element, "NAME")?.to_owned(),
            fields: element
                .attr("FIELD")
                .map(|list| {
                    list.split(',')
                        .map(|name| name.trim().to_owned())
                        .filter(|name| !name.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            optional: element.attr("OPTIONAL").and_then(parse_bool).unwrap_or(false),
        })
    }

    /// Element name, as used by `set_subject_element`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fields consulted, in order, for the element value.
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Optional elements are omitted from response topics and dropped when
    /// unset at the end of a subject.
    pub fn is_optional(&self) -> bool {
        self.optional
    }
}

fn merge_subject(base: &mut Vec<SubjectElement>, additions: Vec<SubjectElement>) {
    for element in additions {
        match base.iter_mut().find(|existing| existing.name == element.name) {
            Some(existing) => *existing = element,
            None => base.push(element),
        }
    }
}

/// Header definition accumulated across schema levels.
#[derive(Debug, Clone, Default)]
pub(crate) struct HeaderTemplate {
    subject: Vec<SubjectElement>,
    entries: Vec<TemplateEntry>,
}

impl HeaderTemplate {
    /// Layer a level's `<HEADER>` on top of the lower levels' header.
    pub(crate) fn extend(&self, element: &Element) -> Result<HeaderTemplate> {
        let mut header = self.clone();
        if let Some(subject) = element.child("SUBJECT") {
            header.subject = subject
                .children_named("ELEMENT")
                .map(SubjectElement::from_element)
                .collect::<Result<_>>()?;
        }
        merge_entries(&mut header.entries, parse_entries(element, true)?);
        Ok(header)
    }

    pub(crate) fn field_names(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter_map(|entry| match entry {
                TemplateEntry::Field(field) => Some(field.name.clone()),
                TemplateEntry::Array(_) => None,
            })
            .collect()
    }
}

/// Where a template sits within a loaded specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TemplateOrigin<'a> {
    pub(crate) version: u32,
    pub(crate) version_label: &'a str,
    pub(crate) level: SchemaLevel,
    pub(crate) level_name: &'a str,
}

/// Fully resolved template for one schema ID.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageTemplate {
    schema_id: String,
    short_id: String,
    version: u32,
    level: SchemaLevel,
    level_name: String,
    description: String,
    subject: Vec<SubjectElement>,
    entries: Vec<TemplateEntry>,
    source: String,
}

impl MessageTemplate {
    pub(crate) fn build(origin: TemplateOrigin<'_>, header: &HeaderTemplate, element: &Element) -> Result<Self> {
        let short_id = required_attr(element, "ID")?.to_ascii_uppercase();
        let tokens: Vec<&str> = short_id.split('.').collect();

        let mut subject = header.subject.clone();
        if let Some(extra) = element.child("SUBJECT") {
            merge_subject(
                &mut subject,
                extra
                    .children_named("ELEMENT")
                    .map(SubjectElement::from_element)
                    .collect::<Result<_>>()?,
            );
        }

        let mut entries = header.entries.clone();
        merge_entries(&mut entries, parse_entries(element, false)?);
        for entry in &mut entries {
            if let TemplateEntry::Field(field) = entry {
                if let Some(index) = field.id_token {
                    let token = tokens.get(index.saturating_sub(1)).ok_or_else(|| {
                        load_error(format!(
                            "Schema {short_id} has no token {index} for field {}",
                            field.name
                        ))
                    })?;
                    field.values = vec![(*token).to_owned()];
                }
            }
        }

        Ok(Self {
            schema_id: format!("{}.{}.{}", origin.version_label, origin.level_name, short_id),
            short_id,
            version: origin.version,
            level: origin.level,
            level_name: origin.level_name.to_owned(),
            description: element.attr("DESCRIPTION").unwrap_or_default().to_owned(),
            subject,
            entries,
            source: element.to_xml(),
        })
    }

    /// Fully-qualified schema ID, e.g. `2019.00.C2MS.MSG.HB`.
    pub fn schema_id(&self) -> &str {
        &self.schema_id
    }

    /// Schema ID without version and level, e.g. `MSG.HB`.
    pub fn short_id(&self) -> &str {
        &self.short_id
    }

    /// Specification version the template belongs to.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Level that defines the template.
    pub fn level(&self) -> SchemaLevel {
        self.level
    }

    /// Name of the defining level, e.g. `C2MS`.
    pub fn level_name(&self) -> &str {
        &self.level_name
    }

    /// Human-readable description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Subject elements in order.
    pub fn subject_elements(&self) -> &[SubjectElement] {
        &self.subject
    }

    /// Subject layout rendered with element names, e.g. `SPECIFICATION.DOMAIN1...`.
    pub fn subject_template(&self) -> String {
        self.subject
            .iter()
            .map(|element| element.name.as_str())
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Field tree, header first.
    pub fn entries(&self) -> &[TemplateEntry] {
        &self.entries
    }

    /// XML source of the schema definition.
    pub fn to_xml(&self) -> &str {
        &self.source
    }

    /// Look up the template for a concrete field name, resolving array
    /// element names such as `SUBSCRIPTION.2.SUBJECT-PATTERN`.
    pub fn find_field(&self, name: &str) -> Option<&FieldTemplate> {
        find_in(&self.entries, name)
    }

    /// Whether a concrete field name is declared as a header field.
    pub fn is_header(&self, name: &str) -> bool {
        self.find_field(name).map_or(false, FieldTemplate::is_header)
    }

    /// Flattened field specifications; array members are reported as
    /// `NAME.n.MEMBER`.
    pub fn field_specifications(&self) -> Vec<FieldSpecification> {
        let mut specs = Vec::new();
        flatten(&self.entries, "", &mut specs);
        specs
    }
}

fn find_in<'a>(entries: &'a [TemplateEntry], name: &str) -> Option<&'a FieldTemplate> {
    for entry in entries {
        match entry {
            TemplateEntry::Field(field) if field.name == name => return Some(field),
            TemplateEntry::Array(array) => {
                let nested = name
                    .strip_prefix(array.name.as_str())
                    .and_then(|rest| rest.strip_prefix('.'))
                    .and_then(|rest| rest.split_once('.'))
                    .filter(|(index, _)| index.parse::<u32>().is_ok())
                    .and_then(|(_, member)| find_in(&array.entries, member));
                if nested.is_some() {
                    return nested;
                }
            }
            TemplateEntry::Field(_) => {}
        }
    }
    None
}

fn flatten(entries: &[TemplateEntry], prefix: &str, out: &mut Vec<FieldSpecification>) {
    for entry in entries {
        match entry {
            TemplateEntry::Field(field) => out.push(FieldSpecification {
                name: format!("{prefix}{}", field.name),
                field_type: field.type_names(),
                mode: field.mode.to_string(),
                classification: field.classification.clone(),
                value: field.values.join(", "),
                description: field.description.clone(),
            }),
            TemplateEntry::Array(array) => {
                out.push(FieldSpecification {
                    name: format!("{prefix}{}", array.name),
                    field_type: String::new(),
                    mode: FieldMode::Control.to_string(),
                    classification: "ARRAY".to_owned(),
                    value: array.count.clone(),
                    description: String::new(),
                });
                flatten(&array.entries, &format!("{prefix}{}.n.", array.name), out);
            }
        }
    }
}

/// Descriptive view of one template field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpecification {
    name: String,
    field_type: String,
    mode: String,
    classification: String,
    value: String,
    description: String,
}

impl FieldSpecification {
    /// Field name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Accepted types, comma separated; empty when any type is accepted.
    pub fn field_type(&self) -> &str {
        &self.field_type
    }

    /// `REQUIRED`, `OPTIONAL` or `CONTROL`.
    pub fn mode(&self) -> &str {
        &self.mode
    }

    /// Classification label.
    pub fn classification(&self) -> &str {
        &self.classification
    }

    /// Acceptable or default values.
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Description text.
    pub fn description(&self) -> &str {
        &self.description
    }
}

fn required_attr<'a>(element: &'a Element, name: &str) -> Result<&'a str> {
    element
        .attr(name)
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| load_error(format!("{} element is missing the {name} attribute", element.name)))
}

pub(crate) fn load_error(message: impl Into<String>) -> GmsecError {
    GmsecError::SpecificationLoad(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEVEL: &str = r#"
        <TEMPLATES LEVEL="0" NAME="TEST">
            <HEADER>
                <SUBJECT>
                    <ELEMENT NAME="MISSION-ID" FIELD="MISSION-ID"/>
                    <ELEMENT NAME="MESSAGE-TYPE" FIELD="MESSAGE-TYPE"/>
                    <ELEMENT NAME="MESSAGE-SUBTYPE" FIELD="MESSAGE-SUBTYPE"/>
                </SUBJECT>
                <FIELD NAME="MESSAGE-TYPE" TYPE="STRING" MODE="REQUIRED" ID-TOKEN="1"/>
                <FIELD NAME="MESSAGE-SUBTYPE" TYPE="STRING" MODE="REQUIRED" ID-TOKEN="2"/>
                <FIELD NAME="MISSION-ID" TYPE="STRING" MODE="REQUIRED"/>
                <FIELD NAME="VERSION" TYPE="F32" MODE="REQUIRED" VALUE="2019"/>
            </HEADER>
            <SCHEMA ID="MSG.HB" DESCRIPTION="Heartbeat">
                <SUBJECT><ELEMENT NAME="ME2" OPTIONAL="true"/></SUBJECT>
                <FIELD NAME="STATUS" TYPE="I16" MODE="OPTIONAL" VALUE="0..4"/>
                <FIELD NAME="NUM-OF-SUBSCRIPTIONS" TYPE="U16" MODE="OPTIONAL"/>
                <ARRAY NAME="SUBSCRIPTION" COUNT="NUM-OF-SUBSCRIPTIONS">
                    <FIELD NAME="SUBJECT-PATTERN" TYPE="STRING" MODE="REQUIRED"/>
                </ARRAY>
            </SCHEMA>
        </TEMPLATES>"#;

    fn heartbeat() -> MessageTemplate {
        let root = Element::parse(LEVEL).expect("parse level");
        let header = HeaderTemplate::default()
            .extend(root.child("HEADER").expect("header"))
            .expect("header template");
        let origin = TemplateOrigin {
            version: 201900,
            version_label: "2019.00",
            level: SchemaLevel::Level0,
            level_name: "TEST",
        };
        MessageTemplate::build(origin, &header, root.child("SCHEMA").expect("schema"))
            .expect("template")
    }

    #[test]
    fn builds_ids_and_subject_layout() {
        let template = heartbeat();
        assert_eq!(template.schema_id(), "2019.00.TEST.MSG.HB");
        assert_eq!(template.short_id(), "MSG.HB");
        assert_eq!(template.subject_template(), "MISSION-ID.MESSAGE-TYPE.MESSAGE-SUBTYPE.ME2");
        assert!(template.subject_elements()[3].is_optional());
    }

    #[test]
    fn id_tokens_become_default_values() {
        let template = heartbeat();
        let subtype = template.find_field("MESSAGE-SUBTYPE").expect("subtype");
        assert_eq!(subtype.default_value(), Some("HB"));
        assert!(subtype.is_header());
        let version = template
            .find_field("VERSION")
            .and_then(FieldTemplate::default_field)
            .expect("version default");
        assert_eq!(version.value(), &FieldValue::F32(2019.0));
    }

    #[test]
    fn resolves_array_members() {
        let template = heartbeat();
        let member = template
            .find_field("SUBSCRIPTION.3.SUBJECT-PATTERN")
            .expect("array member");
        assert_eq!(member.mode(), FieldMode::Required);
        assert!(template.find_field("SUBSCRIPTION.X.SUBJECT-PATTERN").is_none());
        assert!(template.find_field("BOGUS").is_none());
    }

    #[test]
    fn ranges_and_bounds() {
        let template = heartbeat();
        let status = template.find_field("STATUS").expect("status");
        assert_eq!(status.default_value(), None);
        assert!(status.accepts_value(&Field::new("STATUS", 3_i16).expect("field")));
        assert!(!status.accepts_value(&Field::new("STATUS", 5_i16).expect("field")));
        assert!(within(10_i64, "5+", |a, b| a == b));
        assert!(!within(10_i64, "5-", |a, b| a == b));
        assert!(within(2019.0_f64, "2019", approx_eq));
    }

    #[test]
    fn flattened_specifications_include_arrays() {
        let names: Vec<String> = heartbeat()
            .field_specifications()
            .iter()
            .map(|spec| spec.name().to_owned())
            .collect();
        assert!(names.contains(&"SUBSCRIPTION".to_owned()));
        assert!(names.contains(&"SUBSCRIPTION.n.SUBJECT-PATTERN".to_owned()));
    }
}
