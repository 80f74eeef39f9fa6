//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Restartable iterators over message fields and schema IDs."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use strum::{Display, EnumString};

use crate::field::Field;

/// Which fields a [`MessageFieldIterator`] yields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum FieldSelector {
    /// Every field.
    #[default]
    All,
    /// Header fields only.
    Header,
    /// Fields that are not header fields.
    NonHeader,
    /// Tracking fields only.
    Tracking,
}

impl FieldSelector {
    fn accepts(self, field: &Field) -> bool {
        match self {
            FieldSelector::All => true,
            FieldSelector::Header => field.is_header(),
            FieldSelector::NonHeader => !field.is_header(),
            FieldSelector::Tracking => field.is_tracking(),
        }
    }
}

/// Cursor over a message's fields in insertion order.
#[derive(Debug, Clone)]
pub struct MessageFieldIterator<'a> {
    fields: Vec<&'a Field>,
    position: usize,
}

impl<'a> MessageFieldIterator<'a> {
    pub(crate) fn new(fields: impl Iterator<Item = &'a Field>, selector: FieldSelector) -> Self {
        Self {
            fields: fields.filter(|field| selector.accepts(field)).collect(),
            position: 0,
        }
    }

    /// Whether another field remains.
    pub fn has_next(&self) -> bool {
        self.position < self.fields.len()
    }

    /// Rewind to the first field.
    pub fn reset(&mut self) {
        self.position = 0;
    }
}

impl<'a> Iterator for MessageFieldIterator<'a> {
    type Item = &'a Field;

    fn next(&mut self) -> Option<Self::Item> {
        let field = self.fields.get(self.position).copied()?;
        self.position += 1;
        Some(field)
    }
}

/// Cursor over the schema IDs of a specification.
#[derive(Debug, Clone)]
pub struct SchemaIdIterator {
    ids: Vec<String>,
    position: usize,
}

impl SchemaIdIterator {
    pub(crate) fn new(ids: Vec<String>) -> Self {
        Self { ids, position: 0 }
    }

    /// Whether another ID remains.
    pub fn has_next(&self) -> bool {
        self.position < self.ids.len()
    }

    /// Rewind to the first ID.
    pub fn reset(&mut self) {
        self.position = 0;
    }
}

impl Iterator for SchemaIdIterator {
    type Item = String;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.ids.get(self.position).cloned()?;
        self.position += 1;
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields() -> Vec<Field> {
        vec![
            Field::new("MISSION-ID", "M").expect("field").with_header(true),
            Field::new("NODE", "host").expect("field").with_tracking(true),
            Field::new("PAYLOAD", 7_i32).expect("field"),
        ]
    }

    #[test]
    fn selectors_filter_and_reset_restarts() {
        let fields = fields();
        let mut iter = MessageFieldIterator::new(fields.iter(), FieldSelector::NonHeader);
        let names: Vec<&str> = iter.by_ref().map(Field::name).collect();
        assert_eq!(names, vec!["NODE", "PAYLOAD"]);
        assert!(!iter.has_next());

        iter.reset();
        assert!(iter.has_next());
        assert_eq!(iter.next().map(Field::name), Some("NODE"));

        let header = MessageFieldIterator::new(fields.iter(), FieldSelector::Header);
        assert_eq!(header.count(), 1);
        let tracking = MessageFieldIterator::new(fields.iter(), FieldSelector::Tracking);
        assert_eq!(tracking.map(Field::name).collect::<Vec<_>>(), vec!["NODE"]);
    }

    #[test]
    fn schema_ids_restart() {
        let mut iter = SchemaIdIterator::new(vec!["A".to_owned(), "B".to_owned()]);
        assert_eq!(iter.by_ref().count(), 2);
        assert!(!iter.has_next());
        iter.reset();
        assert_eq!(iter.next().as_deref(), Some("A"));
    }

    #[test]
    fn selector_names_parse() {
        assert_eq!("non_header".parse::<FieldSelector>().expect("parse"), FieldSelector::NonHeader);
        assert_eq!(FieldSelector::Tracking.to_string(), "TRACKING");
    }
}
