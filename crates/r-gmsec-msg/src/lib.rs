//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Message data model, specification engine and message factory."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Typed fields, messages and their wire forms, the layered template
//! specification used to validate them, and the factory that builds
//! messages from templates.
//!
//! The bundled 2019.00 template set is a working subset of the full C2MS
//! catalogue: 20 schemas at level 0 (C2MS), 23 at level 1 (adds the
//! C2MS-PIPE status and config exchanges) and 25 at level 2 (adds GMSEC
//! SYSLOG and BUS-STAT). It includes the HB and
//! RSRC schemas the generators use. Point `gmsec-schema-path` at an on-disk
//! directory with the same layout to validate against a complete set.
#![warn(missing_docs)]

mod codec;
pub mod config_file;
pub mod factory;
pub mod field;
pub mod iterator;
pub mod message;
pub mod specification;
pub mod subject;
pub mod template;
pub mod validator;

pub use config_file::{ConfigFile, SubscriptionEntry};
pub use factory::{MessageFactory, SharedStandardFields};
pub use field::{Field, FieldType, FieldValue};
pub use iterator::{FieldSelector, MessageFieldIterator, SchemaIdIterator};
pub use message::{Message, MessageKind};
pub use specification::{
    MessageSpecification, SchemaLevel, Specification, GMSEC_MSG_SPEC_2014_00, GMSEC_MSG_SPEC_2016_00,
    GMSEC_MSG_SPEC_2018_00, GMSEC_MSG_SPEC_2019_00, GMSEC_MSG_SPEC_CURRENT,
};
pub use subject::{is_valid_subject, validate_subject, SubjectPattern};
pub use template::{FieldMode, FieldSpecification, MessageTemplate};
pub use validator::{validation_failure, MessageValidator};
