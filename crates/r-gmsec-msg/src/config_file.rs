//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Named configs, messages and subscriptions stored in a DEFINITIONS document."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use r_gmsec_common::xml::escape_attr;
use r_gmsec_common::{Config, DataFormat, Element, GmsecError, Result};
use tracing::{debug, info};

use crate::factory::MessageFactory;
use crate::message::Message;

/// Named subscription pattern with the patterns it excludes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionEntry {
    name: String,
    pattern: String,
    excluded: Vec<String>,
}

impl SubscriptionEntry {
    /// Entry with no exclusions.
    pub fn new(name: &str, pattern: &str) -> Result<Self> {
        require_name(name, "SubscriptionEntry name")?;
        require_name(pattern, "SubscriptionEntry pattern")?;
        Ok(Self {
            name: name.to_owned(),
            pattern: pattern.to_owned(),
            excluded: Vec::new(),
        })
    }

    /// Entry name.
    pub fn get_name(&self) -> &str {
        &self.name
    }

    /// Subscription pattern.
    pub fn get_pattern(&self) -> &str {
        &self.pattern
    }

    /// Add a pattern whose matches are dropped.
    pub fn add_excluded_pattern(&mut self, pattern: &str) -> Result<()> {
        require_name(pattern, "SubscriptionEntry excluded pattern")?;
        self.excluded.push(pattern.to_owned());
        Ok(())
    }

    /// Excluded patterns in insertion order.
    pub fn excluded_patterns(&self) -> &[String] {
        &self.excluded
    }
}

fn require_name(value: &str, what: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(GmsecError::InvalidArgument(format!(
            "{what} cannot be NULL, nor an empty string"
        )));
    }
    Ok(())
}

/// In-memory form of a `<DEFINITIONS>` document.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    factory: MessageFactory,
    path: Option<PathBuf>,
    loaded: bool,
    configs: IndexMap<String, Config>,
    messages: IndexMap<String, Message>,
    subscriptions: IndexMap<String, SubscriptionEntry>,
}

impl ConfigFile {
    /// Empty document; MESSAGE entries use the current specification.
    pub fn new() -> Result<Self> {
        Self::with_config(&Config::new())
    }

    /// Empty document whose MESSAGE entries use the specification `config` selects.
    pub fn with_config(config: &Config) -> Result<Self> {
        Ok(Self {
            factory: MessageFactory::from_config(config)?,
            path: None,
            loaded: false,
            configs: IndexMap::new(),
            messages: IndexMap::new(),
            subscriptions: IndexMap::new(),
        })
    }

    /// Read and parse a document from disk, replacing current contents.
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(GmsecError::InvalidArgument(
                "Invalid or missing config file path".to_owned(),
            ));
        }
        let contents =
            fs::read_to_string(path).map_err(|_| GmsecError::Io("Error: File not found".to_owned()))?;
        self.from_xml(&contents)?;
        self.path = Some(path.to_path_buf());
        info!(config_file = %path.display(), configs = self.configs.len(), messages = self.messages.len(), "config file loaded");
        Ok(())
    }

    /// Write the document to `path`, or to the path it was loaded from when
    /// `path` is `None`.
    pub fn save(&self, path: Option<&Path>) -> Result<()> {
        let path = path
            .or(self.path.as_deref())
            .filter(|path| !path.as_os_str().is_empty())
            .ok_or_else(|| {
                GmsecError::InvalidArgument("Invalid or missing config file path".to_owned())
            })?;
        fs::write(path, self.to_xml())
            .map_err(|err| GmsecError::Io(format!("Unable to write {}: {err}", path.display())))?;
        debug!(config_file = %path.display(), "config file saved");
        Ok(())
    }

    /// Parse a document, replacing current contents.
    pub fn from_xml(&mut self, xml: &str) -> Result<()> {
        if xml.trim().is_empty() {
            return Err(GmsecError::InvalidArgument(
                "XML string cannot be NULL, nor an empty string".to_owned(),
            ));
        }
        let root = Element::parse(xml)
            .map_err(|_| GmsecError::Parse("Unable to parse XML string".to_owned()))?;
        if !root.is("DEFINITIONS") {
            return Err(GmsecError::Parse(
                "Invalid XML document - missing DEFINITIONS".to_owned(),
            ));
        }

        let mut configs = IndexMap::new();
        let mut messages = IndexMap::new();
        let mut subscriptions = IndexMap::new();
        for child in &root.children {
            if child.is("CONFIG") {
                let name = child.attr("NAME").unwrap_or_default();
                require_name(name, "Configuration name")?;
                configs.insert(name.to_owned(), Config::from_element(child)?);
            } else if child.is("MESSAGE") {
                let name = child.attr("NAME").unwrap_or_default();
                require_name(name, "Message name")?;
                let mut element = child.clone();
                element.attributes.retain(|(key, _)| !key.eq_ignore_ascii_case("NAME"));
                let message = self.factory.from_data(&element.to_xml(), DataFormat::Xml)?;
                messages.insert(name.to_owned(), message);
            } else if child.is("SUBSCRIPTION") {
                let mut entry = SubscriptionEntry::new(
                    child.attr("NAME").unwrap_or_default(),
                    child.attr("PATTERN").unwrap_or_default(),
                )?;
                for exclude in child.children_named("EXCLUDE") {
                    entry.add_excluded_pattern(exclude.attr("PATTERN").unwrap_or_default())?;
                }
                subscriptions.insert(entry.name.clone(), entry);
            }
        }

        self.configs = configs;
        self.messages = messages;
        self.subscriptions = subscriptions;
        self.loaded = true;
        Ok(())
    }

    /// Render the document.
    pub fn to_xml(&self) -> String {
        let mut out = String::from("<DEFINITIONS>");
        for entry in self.subscriptions.values() {
            out.push_str(&format!(
                "\n\t<SUBSCRIPTION NAME=\"{}\" PATTERN=\"{}\"",
                escape_attr(&entry.name),
                escape_attr(&entry.pattern)
            ));
            if entry.excluded.is_empty() {
                out.push_str("/>");
                continue;
            }
            out.push('>');
            for pattern in &entry.excluded {
                out.push_str(&format!("\n\t\t<EXCLUDE PATTERN=\"{}\"/>", escape_attr(pattern)));
            }
            out.push_str("\n\t</SUBSCRIPTION>");
        }
        for (name, config) in &self.configs {
            out.push('\n');
            out.push_str(&config.to_xml_named(Some(name), "\t", "\t"));
        }
        for (name, message) in &self.messages {
            let xml = message.to_xml();
            let named = xml.replacen("<MESSAGE", &format!("<MESSAGE NAME=\"{}\"", escape_attr(name)), 1);
            for line in named.lines() {
                out.push_str("\n\t");
                out.push_str(line);
            }
        }
        out.push_str("\n</DEFINITIONS>");
        out
    }

    /// Whether a document has been loaded or parsed.
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Add or replace a named configuration.
    pub fn add_config(&mut self, name: &str, config: Config) -> Result<()> {
        require_name(name, "Configuration name")?;
        self.configs.insert(name.to_owned(), config);
        Ok(())
    }

    /// Named configuration.
    pub fn lookup_config(&self, name: &str) -> Result<Config> {
        require_name(name, "Configuration name")?;
        self.configs.get(name).cloned().ok_or_else(|| {
            GmsecError::Config(format!("Configuration does not exist for the name {name}"))
        })
    }

    /// Remove a named configuration; true when it existed.
    pub fn remove_config(&mut self, name: &str) -> bool {
        self.configs.shift_remove(name).is_some()
    }

    /// Add or replace a named message.
    pub fn add_message(&mut self, name: &str, message: Message) -> Result<()> {
        require_name(name, "Message name")?;
        self.messages.insert(name.to_owned(), message);
        Ok(())
    }

    /// Named message.
    pub fn lookup_message(&self, name: &str) -> Result<Message> {
        require_name(name, "Message name")?;
        self.messages.get(name).cloned().ok_or_else(|| {
            GmsecError::Config(format!("Message does not exist for the name {name}"))
        })
    }

    /// Remove a named message; true when it existed.
    pub fn remove_message(&mut self, name: &str) -> bool {
        self.messages.shift_remove(name).is_some()
    }

    /// Add or replace a subscription entry.
    pub fn add_subscription_entry(&mut self, entry: SubscriptionEntry) {
        self.subscriptions.insert(entry.name.clone(), entry);
    }

    /// Named subscription entry.
    pub fn lookup_subscription_entry(&self, name: &str) -> Result<SubscriptionEntry> {
        require_name(name, "Subscription name")?;
        self.subscriptions.get(name).cloned().ok_or_else(|| {
            GmsecError::Config(format!("Subscription entry does not exist for the name {name}"))
        })
    }

    /// Remove a subscription entry; true when it existed.
    pub fn remove_subscription_entry(&mut self, name: &str) -> bool {
        self.subscriptions.shift_remove(name).is_some()
    }

    /// Named configurations in document order.
    pub fn configs(&self) -> impl Iterator<Item = (&str, &Config)> {
        self.configs.iter().map(|(name, config)| (name.as_str(), config))
    }

    /// Named messages in document order.
    pub fn messages(&self) -> impl Iterator<Item = (&str, &Message)> {
        self.messages.iter().map(|(name, message)| (name.as_str(), message))
    }

    /// Subscription entries in document order.
    pub fn subscription_entries(&self) -> impl Iterator<Item = &SubscriptionEntry> {
        self.subscriptions.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use r_gmsec_common::ErrorCode;

    const DOCUMENT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<DEFINITIONS>
	<SUBSCRIPTION NAME="all-messages" PATTERN="C2MS.>">
		<EXCLUDE PATTERN="C2MS.*.*.*.*.*.MSG.HB.+"/>
	</SUBSCRIPTION>
	<SUBSCRIPTION NAME="logs" PATTERN="C2MS.*.*.*.*.*.MSG.LOG.+"/>
	<CONFIG NAME="loopback">
		<PARAMETER NAME="mw-id">loopback</PARAMETER>
		<PARAMETER NAME="loopback-bus">config-file-test</PARAMETER>
	</CONFIG>
	<MESSAGE NAME="heartbeat" SUBJECT="C2MS.FILL.FILL.M.FILL.FILL.MSG.HB.C" KIND="PUBLISH">
		<FIELD NAME="MESSAGE-TYPE" TYPE="STRING">MSG</FIELD>
		<FIELD NAME="MESSAGE-SUBTYPE" TYPE="STRING">HB</FIELD>
		<FIELD NAME="PUB-RATE" TYPE="U16">30</FIELD>
	</MESSAGE>
</DEFINITIONS>"#;

    #[test]
    fn parses_every_section_in_document_order() {
        let mut file = ConfigFile::new().expect("config file");
        assert!(!file.is_loaded());
        file.from_xml(DOCUMENT).expect("parse");
        assert!(file.is_loaded());

        let names: Vec<&str> = file.subscription_entries().map(SubscriptionEntry::get_name).collect();
        assert_eq!(names, vec!["all-messages", "logs"]);
        let entry = file.lookup_subscription_entry("all-messages").expect("entry");
        assert_eq!(entry.get_pattern(), "C2MS.>");
        assert_eq!(entry.excluded_patterns(), ["C2MS.*.*.*.*.*.MSG.HB.+"]);

        let config = file.lookup_config("loopback").expect("config");
        assert_eq!(config.get_value("mw-id"), Some("loopback"));

        let message = file.lookup_message("heartbeat").expect("message");
        assert_eq!(message.get_schema_id(), "MSG.HB");
        assert_eq!(message.get_u16_value("PUB-RATE").expect("pub-rate"), 30);
    }

    #[test]
    fn lookups_name_the_missing_entry() {
        let mut file = ConfigFile::new().expect("config file");
        file.from_xml(DOCUMENT).expect("parse");
        assert_eq!(
            file.lookup_config("nope").expect_err("config").to_string(),
            "Configuration does not exist for the name nope"
        );
        assert_eq!(
            file.lookup_message("nope").expect_err("message").to_string(),
            "Message does not exist for the name nope"
        );
        assert_eq!(
            file.lookup_subscription_entry("nope").expect_err("subscription").to_string(),
            "Subscription entry does not exist for the name nope"
        );
        assert_eq!(file.lookup_config("").expect_err("empty").code(), ErrorCode::InvalidArgument);
    }

    #[test]
    fn rejects_bad_documents() {
        let mut file = ConfigFile::new().expect("config file");
        assert_eq!(
            file.from_xml("<CONFIG/>").expect_err("root").to_string(),
            "Invalid XML document - missing DEFINITIONS"
        );
        assert_eq!(
            file.from_xml("<DEFINITIONS><CONFIG></DEFINITIONS>").expect_err("syntax").to_string(),
            "Unable to parse XML string"
        );
        assert_eq!(
            file.load("").expect_err("empty path").to_string(),
            "Invalid or missing config file path"
        );
        let missing = tempfile::tempdir().expect("tempdir").path().join("missing.xml");
        assert_eq!(file.load(&missing).expect_err("missing").to_string(), "Error: File not found");
    }

    #[test]
    fn save_and_reload_preserve_contents() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("defs.xml");

        let mut file = ConfigFile::new().expect("config file");
        file.from_xml(DOCUMENT).expect("parse");
        let mut extra = SubscriptionEntry::new("extra", "GMSEC.>").expect("entry");
        extra.add_excluded_pattern("GMSEC.SECRET.+").expect("exclude");
        file.add_subscription_entry(extra);
        assert!(file.remove_config("loopback"));
        file.add_config("other", Config::from_args(["mw-id=loopback"])).expect("config");
        file.save(Some(&path)).expect("save");

        let mut reloaded = ConfigFile::new().expect("config file");
        reloaded.load(&path).expect("load");
        assert_eq!(reloaded.to_xml(), file.to_xml());
        assert_eq!(reloaded.subscription_entries().count(), 3);
        assert!(reloaded.lookup_config("loopback").is_err());
        assert_eq!(
            reloaded.lookup_message("heartbeat").expect("message").get_subject(),
            "C2MS.FILL.FILL.M.FILL.FILL.MSG.HB.C"
        );
        reloaded.save(None).expect("save back to load path");
    }

    #[test]
    fn subscription_entries_need_names() {
        assert!(SubscriptionEntry::new("", "GMSEC.>").is_err());
        assert!(SubscriptionEntry::new("name", " ").is_err());
    }
}
