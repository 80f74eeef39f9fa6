//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Minimal XML element tree used by message, config and template codecs."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Documents handled by this workspace are small and attribute-heavy, so they
//! are parsed into an owned [`Element`] tree and matched case-insensitively.

use std::borrow::Cow;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

/// Errors surfaced while parsing an XML document.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum XmlError {
    /// An end tag did not match its start tag, or the document ended early.
    #[error("Mismatched element")]
    Mismatched,
    /// The document had no root element.
    #[error("empty XML document")]
    Empty,
    /// Any other syntax error reported by the reader.
    #[error("{0}")]
    Syntax(String),
}

/// Owned XML element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Element {
    /// Tag name as written in the document.
    pub name: String,
    /// Attributes in document order.
    pub attributes: Vec<(String, String)>,
    /// Child elements in document order.
    pub children: Vec<Element>,
    /// Concatenated, unescaped text content.
    pub text: String,
}

impl Element {
    /// Parse a document and return its root element.
    pub fn parse(input: &str) -> Result<Element, XmlError> {
        let mut reader = Reader::from_str(input);
        reader.check_end_names(false);

        let mut stack: Vec<Element> = Vec::new();
        let mut root: Option<Element> = None;

        loop {
            match reader.read_event() {
                Ok(Event::Start(start)) => stack.push(start_element(&start)?),
                Ok(Event::Empty(start)) => {
                    let element = start_element(&start)?;
                    attach(&mut stack, &mut root, element);
                }
                Ok(Event::End(end)) => {
                    let mut element = stack.pop().ok_or(XmlError::Mismatched)?;
                    if element.name.as_bytes() != end.name().as_ref() {
                        return Err(XmlError::Mismatched);
                    }
                    // Leaf text is kept verbatim; whitespace around child
                    // elements is only layout.
                    if !element.children.is_empty() && element.text.trim().is_empty() {
                        element.text.clear();
                    }
                    attach(&mut stack, &mut root, element);
                }
                Ok(Event::Text(text)) => {
                    if let Some(current) = stack.last_mut() {
                        let value = text
                            .unescape()
                            .map_err(|err| XmlError::Syntax(err.to_string()))?;
                        current.text.push_str(&value);
                    }
                }
                Ok(Event::CData(data)) => {
                    if let Some(current) = stack.last_mut() {
                        current.text.push_str(&String::from_utf8_lossy(&data));
                    }
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(err) => return Err(XmlError::Syntax(err.to_string())),
            }
        }

        if !stack.is_empty() {
            return Err(XmlError::Mismatched);
        }
        root.ok_or(XmlError::Empty)
    }

    /// Create an element with the given tag name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Case-insensitive tag comparison.
    pub fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    /// Case-insensitive attribute lookup.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// First child with the given tag name.
    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|child| child.is(name))
    }

    /// All children with the given tag name.
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |child| child.is(name))
    }

    /// Render the element and its descendants, one element per line,
    /// indenting each nesting level with a tab.
    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        self.write_xml(&mut out, 0);
        out
    }

    fn write_xml(&self, out: &mut String, depth: usize) {
        let indent = "\t".repeat(depth);
        out.push_str(&indent);
        out.push('<');
        out.push_str(&self.name);
        for (key, value) in &self.attributes {
            out.push_str(&format!(" {key}=\"{}\"", escape_attr(value)));
        }
        if self.children.is_empty() && self.text.is_empty() {
            out.push_str("/>");
            return;
        }
        out.push('>');
        out.push_str(&escape_text(&self.text));
        if !self.children.is_empty() {
            for child in &self.children {
                out.push('\n');
                child.write_xml(out, depth + 1);
            }
            out.push('\n');
            out.push_str(&indent);
        }
        out.push_str(&format!("</{}>", self.name));
    }
}

fn start_element(start: &BytesStart<'_>) -> Result<Element, XmlError> {
    let name = std::str::from_utf8(start.name().as_ref())
        .map_err(|err| XmlError::Syntax(err.to_string()))?
        .to_owned();
    let mut element = Element::new(name);
    for attribute in start.attributes() {
        let attribute = attribute.map_err(|err| XmlError::Syntax(err.to_string()))?;
        let key = std::str::from_utf8(attribute.key.as_ref())
            .map_err(|err| XmlError::Syntax(err.to_string()))?
            .to_owned();
        let value = attribute
            .unescape_value()
            .map_err(|err| XmlError::Syntax(err.to_string()))?
            .into_owned();
        element.attributes.push((key, value));
    }
    Ok(element)
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, element: Element) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None => {
            if root.is_none() {
                *root = Some(element);
            }
        }
    }
}

/// Escape text content (`&`, `<`, `>`).
pub fn escape_text(raw: &str) -> Cow<'_, str> {
    quick_xml::escape::partial_escape(raw)
}

/// Escape an attribute value (text escapes plus quotes).
pub fn escape_attr(raw: &str) -> Cow<'_, str> {
    quick_xml::escape::escape(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_elements_case_insensitively() {
        let root = Element::parse(
            r#"<message subject="GMSEC.FOO" kind="publish">
                   <field name="A" type="I16">5</field>
                   <field name="B" type="STRING">a &amp; b</field>
               </message>"#,
        )
        .expect("parse document");

        assert!(root.is("MESSAGE"));
        assert_eq!(root.attr("SUBJECT"), Some("GMSEC.FOO"));
        let fields: Vec<_> = root.children_named("FIELD").collect();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[1].text, "a & b");
    }

    #[test]
    fn empty_element_text_is_empty() {
        let root = Element::parse(r#"<FIELD NAME="S" TYPE="STRING"></FIELD>"#).expect("parse");
        assert_eq!(root.text, "");
    }

    #[test]
    fn leaf_text_keeps_surrounding_whitespace() {
        let root = Element::parse(
            "<MESSAGE>\n\t<FIELD NAME=\"P\"> padded </FIELD>\n\t<FIELD NAME=\"B\">   </FIELD>\n</MESSAGE>",
        )
        .expect("parse document");

        assert_eq!(root.text, "");
        assert_eq!(root.children[0].text, " padded ");
        assert_eq!(root.children[1].text, "   ");
        assert_eq!(
            root.to_xml(),
            "<MESSAGE>\n\t<FIELD NAME=\"P\"> padded </FIELD>\n\t<FIELD NAME=\"B\">   </FIELD>\n</MESSAGE>"
        );
    }

    #[test]
    fn unterminated_document_is_mismatched() {
        let err = Element::parse(r#"<MESSAGE SUBJECT="GMSEC.FOO.BAR">"#).expect_err("incomplete");
        assert_eq!(err, XmlError::Mismatched);
        assert_eq!(err.to_string(), "Mismatched element");
    }

    #[test]
    fn crossed_tags_are_mismatched() {
        let err = Element::parse("<A><B></A></B>").expect_err("crossed");
        assert_eq!(err, XmlError::Mismatched);
    }

    #[test]
    fn blank_input_is_empty() {
        assert_eq!(Element::parse("   ").expect_err("blank"), XmlError::Empty);
    }

    #[test]
    fn renders_nested_elements() {
        let root = Element::parse(r#"<A X="1"><B>t &amp; u</B><C/></A>"#).expect("parse");
        assert_eq!(root.to_xml(), "<A X=\"1\">\n\t<B>t &amp; u</B>\n\t<C/>\n</A>");
    }

    #[test]
    fn escaping_helpers() {
        assert_eq!(escape_text("a<b&c"), "a&lt;b&amp;c");
        assert_eq!(escape_attr("say \"hi\""), "say &quot;hi&quot;");
    }
}
