//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Template-driven message creation with standard fields."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use r_gmsec_common::{Config, DataFormat, GmsecError, Result};
use tracing::debug;

use crate::codec;
use crate::field::Field;
use crate::message::{Message, IDENTIFY_HEADER_FIELDS};
use crate::specification::Specification;
use crate::validator::MessageValidator;

/// Standard fields held behind a handle that several factories may share.
///
/// A factory built with [`MessageFactory::new`] owns a private handle; hand
/// the same handle to [`MessageFactory::with_shared_fields`] to make
/// `set_standard_fields` apply to every factory holding it.
#[derive(Debug, Clone, Default)]
pub struct SharedStandardFields {
    fields: Arc<RwLock<Vec<Field>>>,
}

impl SharedStandardFields {
    /// Empty handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the held fields.
    pub fn set<I>(&self, fields: I)
    where
        I: IntoIterator<Item = Field>,
    {
        *self.fields.write() = fields.into_iter().collect();
    }

    /// Drop every held field.
    pub fn clear(&self) {
        self.fields.write().clear();
    }

    /// Snapshot of the held fields.
    pub fn fields(&self) -> Vec<Field> {
        self.fields.read().clone()
    }

    /// Whether no fields are held.
    pub fn is_empty(&self) -> bool {
        self.fields.read().is_empty()
    }
}

/// Creates messages from the templates of one [`Specification`].
#[derive(Clone)]
pub struct MessageFactory {
    specification: Specification,
    standard_fields: SharedStandardFields,
    message_config: Config,
    validator: Option<Arc<dyn MessageValidator>>,
}

impl MessageFactory {
    /// Factory for the current specification at level 0.
    pub fn new() -> Result<Self> {
        Self::from_config(&Config::new())
    }

    /// Factory for the specification selected by `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::with_shared_fields(config, SharedStandardFields::new())
    }

    /// Factory whose standard fields live in `shared`.
    pub fn with_shared_fields(config: &Config, shared: SharedStandardFields) -> Result<Self> {
        let specification = Specification::from_config(config)?;
        let mut message_config = Config::new();
        for (key, value) in config.iter() {
            let key_lower = key.to_ascii_lowercase();
            if key_lower.starts_with("gmsec-msg-content-validate") || key_lower == IDENTIFY_HEADER_FIELDS {
                message_config.add_value(key, value);
            }
        }
        debug!(
            version = specification.get_version(),
            level = %specification.get_schema_level(),
            "message factory created"
        );
        Ok(Self {
            specification,
            standard_fields: shared,
            message_config,
            validator: None,
        })
    }

    /// Fields merged into every templated message created from now on.
    pub fn set_standard_fields<I>(&self, fields: I)
    where
        I: IntoIterator<Item = Field>,
    {
        self.standard_fields.set(fields);
    }

    /// Stop merging standard fields.
    pub fn clear_standard_fields(&self) {
        self.standard_fields.clear();
    }

    /// Current standard fields.
    pub fn get_standard_fields(&self) -> Vec<Field> {
        self.standard_fields.fields()
    }

    /// Configuration attached to every message created from now on.
    pub fn set_message_config(&mut self, config: Config) {
        self.message_config = config;
    }

    /// Validator registered on every message created from now on.
    pub fn register_message_validator(&mut self, validator: Option<Arc<dyn MessageValidator>>) -> Result<()> {
        let validator = validator.ok_or_else(|| {
            GmsecError::InvalidArgument("MessageValidator cannot be NULL".to_owned())
        })?;
        self.validator = Some(validator);
        Ok(())
    }

    /// Loaded specification.
    pub fn get_specification(&self) -> &Specification {
        &self.specification
    }

    fn finish(&self, message: &mut Message) {
        if !self.message_config.is_empty() {
            let mut config = message.get_config().clone();
            config.merge(&self.message_config, false);
            message.set_config(config);
        }
        if let Some(validator) = &self.validator {
            message.register_message_validator(Arc::clone(validator));
        }
    }

    /// Empty message with no template and no standard fields.
    pub fn create_generic_message(&self) -> Message {
        let mut message = Message::new();
        self.finish(&mut message);
        message
    }

    /// Message for `schema_id` (`2019.00.C2MS.MSG.HB`, `MSG.HB` or `HB`),
    /// populated with template defaults and the standard fields.
    pub fn create_message(&self, schema_id: &str) -> Result<Message> {
        let template = self.specification.find_template(schema_id)?;
        let mut message = Message::from_template(template);
        message.add_fields(self.standard_fields.fields());
        self.finish(&mut message);
        Ok(message)
    }

    /// Parse a message and bind it to the template its MESSAGE-TYPE and
    /// MESSAGE-SUBTYPE name, when there is one.
    pub fn from_data(&self, data: &str, format: DataFormat) -> Result<Message> {
        let mut message = codec::from_data(data, format)?;
        if let Some(template) = self.specification.template_for_message(&message) {
            message.set_template(template);
        }
        self.finish(&mut message);
        Ok(message)
    }
}

impl fmt::Debug for MessageFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageFactory")
            .field("version", &self.specification.get_version())
            .field("level", &self.specification.get_schema_level())
            .field("standard_fields", &self.standard_fields.fields().len())
            .field("validator", &self.validator.is_some())
            .finish()
    }
}
