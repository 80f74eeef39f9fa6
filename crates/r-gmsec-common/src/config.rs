//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Case-insensitive key/value configuration store."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::error::{GmsecError, Result};
use crate::xml::{escape_attr, escape_text, Element};

/// Encoding of serialized data handed to a `from_data` constructor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DataFormat {
    /// XML document.
    Xml,
    /// JSON document.
    Json,
    /// Whitespace separated `key=value` pairs.
    KeyValue,
}

/// Ordered, case-insensitive key/value store used to configure connections,
/// factories, generators and individual messages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    // lowercased key -> (key as supplied, value)
    entries: IndexMap<String, (String, String)>,
}

impl Config {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from `key=value` arguments, ignoring entries without `=`.
    pub fn from_args<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut config = Self::new();
        for arg in args {
            if let Some((key, value)) = arg.as_ref().split_once('=') {
                if !key.trim().is_empty() {
                    config.add_value(key.trim(), value.trim());
                }
            }
        }
        config
    }

    /// Build a store from serialized data.
    pub fn from_data(data: &str, format: DataFormat) -> Result<Self> {
        if data.trim().is_empty() {
            return Err(GmsecError::InvalidArgument(
                "Config data string cannot be NULL, nor empty".to_owned(),
            ));
        }
        match format {
            DataFormat::KeyValue => Ok(Self::from_args(data.split_whitespace())),
            DataFormat::Xml => {
                let root = Element::parse(data)
                    .map_err(|_| GmsecError::Parse("Invalid XML format -- parse error".to_owned()))?;
                Self::from_element(&root)
            }
            DataFormat::Json => Self::from_json(data),
        }
    }

    /// Read a `<CONFIG>` document from disk. When the file holds a
    /// `<DEFINITIONS>` document, `name` selects the named `<CONFIG>` block.
    pub fn from_file(path: impl AsRef<Path>, name: Option<&str>) -> Result<Self> {
        let path = path.as_ref();
        debug!(config_path = %path.display(), "loading config file");
        let contents = fs::read_to_string(path).map_err(|_| {
            GmsecError::Io("Configuration file could not be found or opened".to_owned())
        })?;
        let root = Element::parse(&contents)
            .map_err(|_| GmsecError::Parse("Invalid XML format -- parse error".to_owned()))?;

        if root.is("CONFIG") && name.map_or(true, |n| root.attr("NAME") == Some(n)) {
            return Self::from_element(&root);
        }
        let found = root
            .children_named("CONFIG")
            .find(|element| name.map_or(true, |n| element.attr("NAME") == Some(n)));
        match found {
            Some(element) => Self::from_element(element),
            None => Err(GmsecError::Config(format!(
                "Configuration does not exist for the name {}",
                name.unwrap_or_default()
            ))),
        }
    }

    /// Build a store from a parsed `<CONFIG>` element.
    pub fn from_element(element: &Element) -> Result<Self> {
        if !element.is("CONFIG") {
            return Err(GmsecError::Parse("Invalid XML format -- parse error".to_owned()));
        }
        let mut config = Self::new();
        for parameter in element.children_named("PARAMETER") {
            let key = parameter.attr("NAME").unwrap_or_default();
            if key.is_empty() {
                return Err(GmsecError::Parse(
                    "Invalid XML format -- PARAMETER is missing NAME".to_owned(),
                ));
            }
            config.add_value(key, parameter.text.trim());
        }
        Ok(config)
    }

    fn from_json(data: &str) -> Result<Self> {
        let invalid = || GmsecError::Parse("Invalid JSON Configuration format".to_owned());
        let root: JsonValue = serde_json::from_str(data).map_err(|_| invalid())?;
        let config = lookup_ci(&root, "CONFIG").ok_or_else(invalid)?;
        let mut store = Self::new();
        let parameters = match lookup_ci(config, "PARAMETER") {
            Some(JsonValue::Array(items)) => items.iter().collect::<Vec<_>>(),
            Some(item @ JsonValue::Object(_)) => vec![item],
            Some(_) => return Err(invalid()),
            None => Vec::new(),
        };
        for parameter in parameters {
            let key = lookup_ci(parameter, "NAME")
                .and_then(JsonValue::as_str)
                .ok_or_else(invalid)?;
            let value = match lookup_ci(parameter, "VALUE") {
                Some(JsonValue::String(text)) => text.clone(),
                Some(other) => other.to_string(),
                None => String::new(),
            };
            store.add_value(key, value);
        }
        Ok(store)
    }

    /// Add or replace a value.
    pub fn add_value(&mut self, key: impl AsRef<str>, value: impl Into<String>) {
        let key = key.as_ref();
        self.entries
            .insert(key.to_ascii_lowercase(), (key.to_owned(), value.into()));
    }

    /// Remove a value, reporting whether it existed.
    pub fn clear_value(&mut self, key: &str) -> bool {
        self.entries
            .shift_remove(&key.to_ascii_lowercase())
            .is_some()
    }

    /// Look up a value.
    pub fn get_value(&self, key: &str) -> Option<&str> {
        self.entries
            .get(&key.to_ascii_lowercase())
            .map(|(_, value)| value.as_str())
    }

    /// Look up a value, falling back to `default` when absent.
    pub fn get_value_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get_value(key).unwrap_or(default)
    }

    /// Whether the key is present.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(&key.to_ascii_lowercase())
    }

    /// Interpret a value as a boolean (`true`/`false`, `yes`/`no`, `on`/`off`, `1`/`0`).
    pub fn get_boolean_value(&self, key: &str) -> Result<bool> {
        let value = self.require(key)?;
        parse_bool(value).ok_or_else(|| {
            GmsecError::Config(format!(
                "Config value for {key} cannot be represented as a boolean"
            ))
        })
    }

    /// Boolean lookup with fallback for absent or unparsable values.
    pub fn get_boolean_value_or(&self, key: &str, default: bool) -> bool {
        self.get_value(key).and_then(parse_bool).unwrap_or(default)
    }

    /// Interpret a value as an integer.
    pub fn get_integer_value(&self, key: &str) -> Result<i64> {
        let value = self.require(key)?;
        value.trim().parse::<i64>().map_err(|_| {
            GmsecError::Config(format!(
                "Config value for {key} cannot be represented as an integer"
            ))
        })
    }

    /// Integer lookup with fallback for absent or unparsable values.
    pub fn get_integer_value_or(&self, key: &str, default: i64) -> i64 {
        self.get_value(key)
            .and_then(|value| value.trim().parse::<i64>().ok())
            .unwrap_or(default)
    }

    /// Interpret a value as a double.
    pub fn get_double_value(&self, key: &str) -> Result<f64> {
        let value = self.require(key)?;
        value.trim().parse::<f64>().map_err(|_| {
            GmsecError::Config(format!(
                "Config value for {key} cannot be represented as a double"
            ))
        })
    }

    /// Double lookup with fallback for absent or unparsable values.
    pub fn get_double_value_or(&self, key: &str, default: f64) -> f64 {
        self.get_value(key)
            .and_then(|value| value.trim().parse::<f64>().ok())
            .unwrap_or(default)
    }

    fn require(&self, key: &str) -> Result<&str> {
        self.get_value(key)
            .ok_or_else(|| GmsecError::Config(format!("Config does not contain a value for {key}")))
    }

    /// Merge another store into this one. Existing keys are only replaced when
    /// `overwrite` is set.
    pub fn merge(&mut self, other: &Config, overwrite: bool) {
        for (lower, (key, value)) in &other.entries {
            if overwrite || !self.entries.contains_key(lower) {
                self.entries.insert(lower.clone(), (key.clone(), value.clone()));
            }
        }
    }

    /// Remove every value.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of stored values.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate `(key, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .values()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    /// Canonical XML rendering.
    pub fn to_xml(&self) -> String {
        self.to_xml_named(None, "", "\t")
    }

    /// XML rendering with an optional `NAME` attribute, a line prefix and an
    /// indentation unit for the nested parameters.
    pub fn to_xml_named(&self, name: Option<&str>, prefix: &str, indent: &str) -> String {
        let mut out = String::new();
        match name {
            Some(name) => {
                let _ = write!(out, "{prefix}<CONFIG NAME=\"{}\">", escape_attr(name));
            }
            None => {
                let _ = write!(out, "{prefix}<CONFIG>");
            }
        }
        for (key, value) in self.iter() {
            let _ = write!(
                out,
                "\n{prefix}{indent}<PARAMETER NAME=\"{}\">{}</PARAMETER>",
                escape_attr(key),
                escape_text(value)
            );
        }
        let _ = write!(out, "\n{prefix}</CONFIG>");
        out
    }

    /// Compact JSON rendering.
    pub fn to_json(&self) -> String {
        #[derive(Serialize)]
        struct Parameter<'a> {
            #[serde(rename = "NAME")]
            name: &'a str,
            #[serde(rename = "VALUE")]
            value: &'a str,
        }
        #[derive(Serialize)]
        struct Body<'a> {
            #[serde(rename = "PARAMETER")]
            parameters: Vec<Parameter<'a>>,
        }
        #[derive(Serialize)]
        struct Document<'a> {
            #[serde(rename = "CONFIG")]
            config: Body<'a>,
        }

        let document = Document {
            config: Body {
                parameters: self
                    .iter()
                    .map(|(name, value)| Parameter { name, value })
                    .collect(),
            },
        };
        serde_json::to_string(&document).unwrap_or_default()
    }
}

/// Lenient boolean interpretation shared by config lookups.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

/// Case-insensitive member lookup on a JSON object.
pub fn lookup_ci<'a>(value: &'a JsonValue, key: &str) -> Option<&'a JsonValue> {
    value
        .as_object()?
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(key))
        .map(|(_, value)| value)
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for Config {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut config = Config::new();
        for (key, value) in iter {
            config.add_value(key, value);
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn keys_are_case_insensitive_and_ordered() {
        let mut config = Config::from_args(["mw-id=loopback", "GMSEC-SCHEMA-LEVEL=2", "bogus"]);
        config.add_value("Loopback-Bus", "alpha");

        assert_eq!(config.len(), 3);
        assert_eq!(config.get_value("MW-ID"), Some("loopback"));
        assert_eq!(config.get_integer_value("gmsec-schema-level").expect("level"), 2);
        let keys: Vec<_> = config.iter().map(|(key, _)| key).collect();
        assert_eq!(keys, vec!["mw-id", "GMSEC-SCHEMA-LEVEL", "Loopback-Bus"]);
    }

    #[test]
    fn typed_getters_fail_or_fall_back() {
        let config = Config::from_args(["validate=maybe", "rate=ten", "ratio=0.5"]);
        assert!(config.get_boolean_value("validate").is_err());
        assert!(!config.get_boolean_value_or("validate", false));
        assert!(config.get_integer_value("rate").is_err());
        assert_eq!(config.get_integer_value_or("rate", 10), 10);
        assert_eq!(config.get_double_value("ratio").expect("ratio"), 0.5);
        assert!(config.get_boolean_value("missing").is_err());
    }

    #[test]
    fn xml_round_trip() {
        let config = Config::from_args(["mw-id=loopback", "tracking=false"]);
        let xml = config.to_xml();
        assert_eq!(
            xml,
            "<CONFIG>\n\t<PARAMETER NAME=\"mw-id\">loopback</PARAMETER>\n\t<PARAMETER NAME=\"tracking\">false</PARAMETER>\n</CONFIG>"
        );
        let parsed = Config::from_data(&xml, DataFormat::Xml).expect("parse xml");
        assert_eq!(parsed, config);
    }

    #[test]
    fn json_round_trip_and_lowercase_keys() {
        let config = Config::from_args(["mw-id=loopback"]);
        let json = config.to_json();
        assert_eq!(json, r#"{"CONFIG":{"PARAMETER":[{"NAME":"mw-id","VALUE":"loopback"}]}}"#);
        assert_eq!(Config::from_data(&json, DataFormat::Json).expect("parse json"), config);

        let lower = r#"{"config":{"parameter":[{"name":"mw-id","value":"loopback"}]}}"#;
        assert_eq!(Config::from_data(lower, DataFormat::Json).expect("lowercase"), config);
    }

    #[test]
    fn key_value_data_and_bad_input() {
        let config =
            Config::from_data("mw-id=loopback gmsec-msg-content-validate=true", DataFormat::KeyValue)
                .expect("key value");
        assert!(config.get_boolean_value("gmsec-msg-content-validate").expect("bool"));
        assert!(Config::from_data("", DataFormat::KeyValue).is_err());
        let err = Config::from_data("<CONFIG>", DataFormat::Xml).expect_err("bad xml");
        assert_eq!(err.to_string(), "Invalid XML format -- parse error");
    }

    #[test]
    fn merge_respects_overwrite_flag() {
        let mut base = Config::from_args(["a=1", "b=2"]);
        let other = Config::from_args(["b=3", "c=4"]);
        base.merge(&other, false);
        assert_eq!(base.get_value("b"), Some("2"));
        assert_eq!(base.get_value("c"), Some("4"));
        base.merge(&other, true);
        assert_eq!(base.get_value("b"), Some("3"));
        assert!(base.clear_value("a"));
        assert!(!base.clear_value("a"));
    }

    #[test]
    fn from_file_reads_named_block() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(
            file,
            r#"<DEFINITIONS>
                <CONFIG NAME="first"><PARAMETER NAME="mw-id">loopback</PARAMETER></CONFIG>
                <CONFIG NAME="second"><PARAMETER NAME="mw-id">other</PARAMETER></CONFIG>
            </DEFINITIONS>"#
        )
        .expect("write config");

        let first = Config::from_file(file.path(), None).expect("load first");
        assert_eq!(first.get_value("mw-id"), Some("loopback"));
        let second = Config::from_file(file.path(), Some("second")).expect("load second");
        assert_eq!(second.get_value("mw-id"), Some("other"));
        assert!(Config::from_file(file.path(), Some("third")).is_err());

        let err = Config::from_file("/definitely/not/here.xml", None).expect_err("missing file");
        assert_eq!(err.to_string(), "Configuration file could not be found or opened");
    }

    #[test]
    fn from_file_accepts_a_bare_config_with_padded_values() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(
            file,
            "<CONFIG NAME=\"solo\">\n\t<PARAMETER NAME=\"mw-id\">\n\t\tloopback\n\t</PARAMETER>\n</CONFIG>"
        )
        .expect("write config");

        let config = Config::from_file(file.path(), Some("solo")).expect("load solo");
        assert_eq!(config.get_value("mw-id"), Some("loopback"));
        let err = Config::from_file(file.path(), Some("other")).expect_err("unknown name");
        assert_eq!(err.to_string(), "Configuration does not exist for the name other");
    }
}
