//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Versioned, layered message specification and template lookup."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use r_gmsec_common::{Config, Element, GmsecError, Result};
use strum::{Display, FromRepr};
use tracing::debug;

use crate::iterator::SchemaIdIterator;
use crate::message::Message;
use crate::template::{load_error, FieldSpecification, HeaderTemplate, MessageTemplate, TemplateOrigin};
use crate::validator;

/// Specification version 2014.00.
pub const GMSEC_MSG_SPEC_2014_00: u32 = 201400;
/// Specification version 2016.00.
pub const GMSEC_MSG_SPEC_2016_00: u32 = 201600;
/// Specification version 2018.00.
pub const GMSEC_MSG_SPEC_2018_00: u32 = 201800;
/// Specification version 2019.00.
pub const GMSEC_MSG_SPEC_2019_00: u32 = 201900;
/// Version used when none is configured.
pub const GMSEC_MSG_SPEC_CURRENT: u32 = GMSEC_MSG_SPEC_2019_00;

const KNOWN_VERSIONS: [u32; 4] = [
    GMSEC_MSG_SPEC_2014_00,
    GMSEC_MSG_SPEC_2016_00,
    GMSEC_MSG_SPEC_2018_00,
    GMSEC_MSG_SPEC_2019_00,
];

// Subset of the 2019.00 catalogue; see the crate docs for what it covers.
const BUNDLED_2019: &[(&str, &str)] = &[
    ("DIRECTORY.xml", include_str!("../templates/2019.00/DIRECTORY.xml")),
    ("C2MS.xml", include_str!("../templates/2019.00/C2MS.xml")),
    ("C2MS-PIPE.xml", include_str!("../templates/2019.00/C2MS-PIPE.xml")),
    ("GMSEC.xml", include_str!("../templates/2019.00/GMSEC.xml")),
];

static BUNDLED_CACHE: Lazy<Mutex<HashMap<(u32, SchemaLevel), Arc<Loaded>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Schema layer; each level adds templates on top of the lower ones.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Display, FromRepr,
)]
#[repr(u8)]
pub enum SchemaLevel {
    /// Base specification.
    #[default]
    #[strum(to_string = "0")]
    Level0 = 0,
    /// First extension layer.
    #[strum(to_string = "1")]
    Level1 = 1,
    /// Second extension layer.
    #[strum(to_string = "2")]
    Level2 = 2,
    /// Third extension layer.
    #[strum(to_string = "3")]
    Level3 = 3,
    /// Fourth extension layer.
    #[strum(to_string = "4")]
    Level4 = 4,
    /// Fifth extension layer.
    #[strum(to_string = "5")]
    Level5 = 5,
    /// Sixth extension layer.
    #[strum(to_string = "6")]
    Level6 = 6,
}

impl SchemaLevel {
    /// Numeric level.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Level for a number in `0..=6`.
    pub fn from_u8(level: u8) -> Option<Self> {
        Self::from_repr(level)
    }
}

/// Descriptive view of one schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSpecification {
    schema_id: String,
    subject_template: String,
    field_specifications: Vec<FieldSpecification>,
}

impl MessageSpecification {
    /// Fully-qualified schema ID.
    pub fn get_schema_id(&self) -> &str {
        &self.schema_id
    }

    /// Subject layout, element names joined by `.`.
    pub fn get_subject_template(&self) -> &str {
        &self.subject_template
    }

    /// Field definitions, header first.
    pub fn get_field_specifications(&self) -> &[FieldSpecification] {
        &self.field_specifications
    }
}

enum TemplateSource {
    Bundled(&'static [(&'static str, &'static str)]),
    Directory(PathBuf),
}

impl TemplateSource {
    fn read(&self, file: &str) -> Result<String> {
        match self {
            TemplateSource::Bundled(files) => files
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(file))
                .map(|(_, contents)| (*contents).to_owned())
                .ok_or_else(|| load_error(format!("Unable to locate template file {file}"))),
            TemplateSource::Directory(dir) => {
                let path = dir.join(file);
                fs::read_to_string(&path)
                    .map_err(|err| load_error(format!("Unable to read {}: {err}", path.display())))
            }
        }
    }
}

#[derive(Debug)]
struct Loaded {
    templates: IndexMap<String, Arc<MessageTemplate>>,
    // level name -> header field names accumulated up to that level
    headers: Vec<(String, Vec<String>)>,
}

/// Loaded template set for one version and schema level.
#[derive(Debug, Clone)]
pub struct Specification {
    version: u32,
    level: SchemaLevel,
    loaded: Arc<Loaded>,
}

impl Specification {
    /// Current version, level 0, bundled templates.
    pub fn new() -> Result<Self> {
        Self::from_config(&Config::new())
    }

    /// Load the template set selected by `gmsec-specification-version`,
    /// `gmsec-schema-level` and `gmsec-schema-path`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let version = match config.get_value("gmsec-specification-version") {
            None => GMSEC_MSG_SPEC_CURRENT,
            Some(value) => value.trim().parse::<u32>().map_err(|_| {
                load_error("\"GMSEC-SPECIFICATION-VERSION\" contains invalid value")
            })?,
        };
        if !KNOWN_VERSIONS.contains(&version) {
            return Err(load_error(format!("Invalid specification version: {version}")));
        }

        let level = match config.get_value("gmsec-schema-level") {
            None => SchemaLevel::Level0,
            Some(value) => {
                let number = value.trim().parse::<i64>().map_err(|_| {
                    load_error("\"GMSEC-SCHEMA-LEVEL\" contains invalid value")
                })?;
                u8::try_from(number)
                    .ok()
                    .and_then(SchemaLevel::from_u8)
                    .ok_or_else(|| {
                        load_error("\"GMSEC-SCHEMA-LEVEL\" contains out-of-range integer")
                    })?
            }
        };

        let loaded = match config.get_value("gmsec-schema-path").filter(|p| !p.trim().is_empty()) {
            Some(path) => {
                let dir = PathBuf::from(path.trim()).join(version_label(version));
                Arc::new(load(version, level, &TemplateSource::Directory(dir))?)
            }
            None => {
                if version != GMSEC_MSG_SPEC_2019_00 {
                    return Err(load_error(format!(
                        "No bundled templates for specification version {version}; set gmsec-schema-path"
                    )));
                }
                let mut cache = BUNDLED_CACHE.lock();
                match cache.get(&(version, level)) {
                    Some(loaded) => Arc::clone(loaded),
                    None => {
                        let loaded = Arc::new(load(version, level, &TemplateSource::Bundled(BUNDLED_2019))?);
                        cache.insert((version, level), Arc::clone(&loaded));
                        loaded
                    }
                }
            }
        };

        Ok(Self {
            version,
            level,
            loaded,
        })
    }

    /// Specification version, e.g. `201900`.
    pub fn get_version(&self) -> u32 {
        self.version
    }

    /// Loaded schema level.
    pub fn get_schema_level(&self) -> SchemaLevel {
        self.level
    }

    /// Restartable iterator over fully-qualified schema IDs.
    pub fn get_schema_id_iterator(&self) -> SchemaIdIterator {
        SchemaIdIterator::new(self.loaded.templates.keys().cloned().collect())
    }

    /// Descriptions of every loaded schema.
    pub fn get_message_specifications(&self) -> Vec<MessageSpecification> {
        self.loaded
            .templates
            .values()
            .map(|template| MessageSpecification {
                schema_id: template.schema_id().to_owned(),
                subject_template: template.subject_template(),
                field_specifications: template.field_specifications(),
            })
            .collect()
    }

    /// Header field names for a level name (`C2MS`, `C2MS-PIPE`, ...);
    /// an empty name or `DEFAULT` selects the loaded level.
    pub fn get_header_field_names(&self, schema_name: &str) -> Vec<String> {
        let headers = &self.loaded.headers;
        let selected = if schema_name.is_empty() || schema_name.eq_ignore_ascii_case("DEFAULT") {
            headers.last()
        } else {
            headers
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(schema_name))
        };
        selected.map(|(_, names)| names.clone()).unwrap_or_default()
    }

    /// Raise the compliance failure of `message`, if any.
    pub fn validate_message(&self, message: &Message) -> Result<()> {
        match message.template() {
            Some(_) => validator::check_compliance(message).into_result(),
            None => {
                let mut resolved = message.clone();
                if let Some(template) = self.template_for_message(message) {
                    resolved.set_template(template);
                }
                validator::check_compliance(&resolved).into_result()
            }
        }
    }

    /// XML source of a schema definition.
    pub fn get_template_xml(&self, schema_id: &str) -> Result<String> {
        Ok(self.find_template(schema_id)?.to_xml().to_owned())
    }

    /// Resolve a fully-qualified, short (`MSG.HB`) or bare (`HB`) schema ID
    /// to the highest level that defines it.
    pub fn find_template(&self, schema_id: &str) -> Result<Arc<MessageTemplate>> {
        let wanted = schema_id.trim().to_ascii_uppercase();
        if wanted.is_empty() {
            return Err(GmsecError::InvalidArgument(
                "SchemaID cannot be NULL, nor be an empty string".to_owned(),
            ));
        }
        if let Some(template) = self.loaded.templates.get(&wanted) {
            return Ok(Arc::clone(template));
        }
        self.loaded
            .templates
            .values()
            .filter(|template| {
                template.short_id() == wanted
                    || template.short_id().split_once('.').map(|(_, subtype)| subtype) == Some(wanted.as_str())
            })
            .max_by_key(|template| template.level())
            .cloned()
            .ok_or_else(|| {
                GmsecError::UnknownSchema(format!(
                    "SchemaID \"{schema_id}\" could not be found in list of available schema."
                ))
            })
    }

    /// Template named by a message's MESSAGE-TYPE and MESSAGE-SUBTYPE fields.
    pub(crate) fn template_for_message(&self, message: &Message) -> Option<Arc<MessageTemplate>> {
        let kind = message.field("MESSAGE-TYPE")?.get_string_value();
        let subtype = message.field("MESSAGE-SUBTYPE")?.get_string_value();
        self.find_template(&format!("{kind}.{subtype}")).ok()
    }
}

fn version_label(version: u32) -> String {
    format!("{}.{:02}", version / 100, version % 100)
}

fn parse_document(contents: &str, file: &str) -> Result<Element> {
    Element::parse(contents).map_err(|err| load_error(format!("Unable to parse {file}: {err}")))
}

fn load(version: u32, level: SchemaLevel, source: &TemplateSource) -> Result<Loaded> {
    let directory = parse_document(&source.read("DIRECTORY.xml")?, "DIRECTORY.xml")?;
    if !directory.is("DIRECTORY") {
        return Err(load_error("DIRECTORY.xml does not contain a DIRECTORY element"));
    }
    let label = directory
        .attr("VERSION")
        .map(str::to_owned)
        .unwrap_or_else(|| version_label(version));

    let mut header = HeaderTemplate::default();
    let mut headers = Vec::new();
    let mut levels = Vec::new();
    for number in 0..=level.as_u8() {
        let missing = || load_error(format!("DIRECTORY is missing definition for LEVEL-{number} HEADER"));
        let entry = directory
            .children_named("LEVEL")
            .find(|entry| entry.attr("NUMBER").and_then(|n| n.trim().parse::<u8>().ok()) == Some(number))
            .ok_or_else(missing)?;
        let file = entry.attr("FILE").ok_or_else(missing)?;
        let root = parse_document(&source.read(file)?, file)?;
        header = header.extend(root.child("HEADER").ok_or_else(missing)?)?;

        let name = entry
            .attr("NAME")
            .or_else(|| root.attr("NAME"))
            .unwrap_or_default()
            .to_owned();
        headers.push((name.clone(), header.field_names()));
        levels.push((number, name, root));
    }

    // Every schema sees the header accumulated up to the loaded level.
    let mut templates = IndexMap::new();
    for (number, name, root) in &levels {
        let origin = TemplateOrigin {
            version,
            version_label: &label,
            level: SchemaLevel::from_u8(*number).unwrap_or_default(),
            level_name: name,
        };
        for schema in root.children_named("SCHEMA") {
            let template = MessageTemplate::build(origin, &header, schema)?;
            templates.insert(template.schema_id().to_owned(), Arc::new(template));
        }
    }

    debug!(version, level = %level, schemas = templates.len(), "loaded message specification");
    Ok(Loaded { templates, headers })
}

#[cfg(test)]
mod tests {
    use super::*;
    use r_gmsec_common::ErrorCode;

    fn at_level(level: &str) -> Specification {
        Specification::from_config(&Config::from_args([format!("gmsec-schema-level={level}")]))
            .expect("load specification")
    }

    #[test]
    fn defaults_to_current_version_level_zero() {
        let spec = Specification::new().expect("default specification");
        assert_eq!(spec.get_version(), GMSEC_MSG_SPEC_CURRENT);
        assert_eq!(spec.get_schema_level(), SchemaLevel::Level0);
        assert_eq!(spec.get_schema_id_iterator().count(), 20);
    }

    #[test]
    fn levels_are_additive() {
        let counts: Vec<usize> = ["0", "1", "2"]
            .iter()
            .map(|level| at_level(level).get_schema_id_iterator().count())
            .collect();
        assert_eq!(counts, vec![20, 23, 25]);
    }

    #[test]
    fn rejects_bad_version_and_level() {
        let err = Specification::from_config(&Config::from_args(["gmsec-specification-version=abc"]))
            .expect_err("bad version");
        assert_eq!(err.code(), ErrorCode::SpecificationLoad);
        assert!(err.to_string().contains("\"GMSEC-SPECIFICATION-VERSION\" contains invalid value"));

        let err = Specification::from_config(&Config::from_args(["gmsec-schema-level=7"]))
            .expect_err("bad level");
        assert!(err.to_string().contains("out-of-range"));

        assert!(Specification::from_config(&Config::from_args(["gmsec-schema-level=3"])).is_err());
    }

    #[test]
    fn lookups_resolve_short_ids() {
        let spec = at_level("1");
        assert_eq!(spec.find_template("MSG.HB").expect("short").schema_id(), "2019.00.C2MS.MSG.HB");
        assert_eq!(spec.find_template("hb").expect("bare").short_id(), "MSG.HB");
        assert_eq!(
            spec.find_template("PIPE-STAT").expect("level 1").level(),
            SchemaLevel::Level1
        );
        let err = spec.find_template("MSG.C2CX").expect_err("unknown");
        assert_eq!(
            err.to_string(),
            "SchemaID \"MSG.C2CX\" could not be found in list of available schema."
        );
        assert_eq!(spec.find_template("").expect_err("empty").code(), ErrorCode::InvalidArgument);
    }

    #[test]
    fn header_names_follow_levels() {
        let spec = at_level("1");
        let base = spec.get_header_field_names("C2MS");
        let pipe = spec.get_header_field_names("");
        assert!(base.contains(&"MISSION-ID".to_owned()));
        assert!(!base.contains(&"PIPE-ID".to_owned()));
        assert!(pipe.contains(&"PIPE-ID".to_owned()));
        assert!(spec.get_header_field_names("NOPE").is_empty());
    }

    #[test]
    fn specifications_describe_fields() {
        let spec = Specification::new().expect("spec");
        let specs = spec.get_message_specifications();
        let heartbeat = specs
            .iter()
            .find(|s| s.get_schema_id().ends_with("MSG.HB"))
            .expect("heartbeat spec");
        assert!(heartbeat.get_subject_template().starts_with("SPECIFICATION.DOMAIN1"));
        assert!(heartbeat
            .get_field_specifications()
            .iter()
            .any(|f| f.name() == "PUB-RATE" && f.field_type() == "U16"));
        assert!(spec.get_template_xml("MSG.HB").expect("xml").starts_with("<SCHEMA ID=\"MSG.HB\""));
    }

    #[test]
    fn loads_from_schema_path() {
        let dir = tempfile::tempdir().expect("temp dir");
        let versioned = dir.path().join("2016.00");
        fs::create_dir_all(&versioned).expect("create version dir");
        fs::write(
            versioned.join("DIRECTORY.xml"),
            r#"<DIRECTORY VERSION="2016.00"><LEVEL NUMBER="0" NAME="BASE" FILE="BASE.xml"/></DIRECTORY>"#,
        )
        .expect("write directory");
        fs::write(
            versioned.join("BASE.xml"),
            r#"<TEMPLATES LEVEL="0" NAME="BASE">
                   <HEADER><FIELD NAME="MESSAGE-TYPE" TYPE="STRING" MODE="REQUIRED" ID-TOKEN="1"/></HEADER>
                   <SCHEMA ID="MSG.PING"/>
               </TEMPLATES>"#,
        )
        .expect("write level");

        let config = Config::from_args([
            "gmsec-specification-version=201600".to_owned(),
            format!("gmsec-schema-path={}", dir.path().display()),
        ]);
        let spec = Specification::from_config(&config).expect("on-disk specification");
        let ids: Vec<String> = spec.get_schema_id_iterator().collect();
        assert_eq!(ids, vec!["2016.00.BASE.MSG.PING".to_owned()]);

        let level_one = Config::from_args([
            "gmsec-specification-version=201600".to_owned(),
            "gmsec-schema-level=1".to_owned(),
            format!("gmsec-schema-path={}", dir.path().display()),
        ]);
        let err = Specification::from_config(&level_one).expect_err("missing level");
        assert!(err.to_string().contains("DIRECTORY is missing definition for LEVEL-1 HEADER"));
    }
}
