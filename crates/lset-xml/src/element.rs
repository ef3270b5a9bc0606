use std::io;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};

use crate::XmlError;

/// One XML element: name, ordered attributes, ordered child elements.
///
/// Text content is not modeled. The storage format carries all data in
/// attributes, and any text encountered while parsing is ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    name: String,
    attrs: Vec<(String, String)>,
    children: Vec<Element>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attrs: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Set an attribute, replacing an existing value for the same name.
    /// New attributes keep insertion order.
    pub fn set_attr(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        if let Some(slot) = self.attrs.iter_mut().find(|(key, _)| key == name) {
            slot.1 = value;
        } else {
            self.attrs.push((name.to_string(), value));
        }
    }

    pub fn attrs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attrs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Append a new empty child and return a mutable reference to it.
    pub fn add_child(&mut self, name: impl Into<String>) -> &mut Element {
        self.children.push(Element::new(name));
        self.children
            .last_mut()
            .expect("child was just pushed")
    }

    pub fn push_child(&mut self, child: Element) {
        self.children.push(child);
    }

    pub fn children(&self) -> &[Element] {
        &self.children
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> {
        self.children.iter().filter(move |child| child.name == name)
    }

    pub fn first_child<'a>(&'a self, name: &'a str) -> Option<&'a Element> {
        self.children_named(name).next()
    }

    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    /// Parse a document and return its root element.
    pub fn parse(text: &str) -> Result<Element, XmlError> {
        let mut reader = Reader::from_str(text);
        let mut stack: Vec<Element> = Vec::new();
        let mut root: Option<Element> = None;

        loop {
            match reader.read_event()? {
                Event::Start(start) => stack.push(Self::from_start(&start)?),
                Event::Empty(start) => {
                    let element = Self::from_start(&start)?;
                    Self::attach(&mut stack, &mut root, element);
                }
                Event::End(_) => {
                    // Mismatched end tags are rejected by the reader itself.
                    let element = stack.pop().ok_or(XmlError::NoRootElement)?;
                    Self::attach(&mut stack, &mut root, element);
                }
                Event::Eof => break,
                // Declarations, comments and (whitespace) text carry no data.
                _ => {}
            }
        }

        root.ok_or(XmlError::NoRootElement)
    }

    fn attach(stack: &mut [Element], root: &mut Option<Element>, element: Element) {
        if let Some(parent) = stack.last_mut() {
            parent.children.push(element);
        } else if root.is_none() {
            *root = Some(element);
        }
    }

    fn from_start(start: &BytesStart<'_>) -> Result<Element, XmlError> {
        let name = std::str::from_utf8(start.name().as_ref())?.to_string();
        let mut element = Element::new(name);
        for attr in start.attributes() {
            let attr = attr?;
            let key = std::str::from_utf8(attr.key.as_ref())?.to_string();
            let value = attr
                .unescape_value()
                .map_err(quick_xml::Error::from)?
                .into_owned();
            element.attrs.push((key, value));
        }
        Ok(element)
    }

    /// Render the element as a complete indented XML document.
    pub fn to_xml(&self) -> String {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .map_err(io::Error::other)
            .and_then(|()| self.write_into(&mut writer))
            .expect("writing XML to an in-memory buffer cannot fail");
        let bytes = writer.into_inner();
        String::from_utf8(bytes).expect("serialized XML is valid UTF-8")
    }

    fn write_into(&self, writer: &mut Writer<Vec<u8>>) -> io::Result<()> {
        let mut start = BytesStart::new(self.name.as_str());
        for (key, value) in &self.attrs {
            start.push_attribute((key.as_str(), value.as_str()));
        }
        if self.children.is_empty() {
            writer
                .write_event(Event::Empty(start))
                .map_err(io::Error::other)?;
        } else {
            writer
                .write_event(Event::Start(start))
                .map_err(io::Error::other)?;
            for child in &self.children {
                child.write_into(writer)?;
            }
            writer
                .write_event(Event::End(BytesEnd::new(self.name.as_str())))
                .map_err(io::Error::other)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tree() -> Element {
        let mut root = Element::new("provider");
        root.set_attr("id", "provider.id");
        root.set_attr("name", "Provider Name");
        let language = root.add_child("language");
        language.set_attr("id", "lang.id");
        let entry = language.add_child("entry");
        entry.set_attr("kind", "1");
        entry.set_attr("name", "/usr/include");
        root
    }

    #[test]
    fn test_attr_access() {
        let root = sample_tree();
        assert_eq!(root.attr("id"), Some("provider.id"));
        assert_eq!(root.attr("missing"), None);
    }

    #[test]
    fn test_set_attr_replaces_in_place() {
        let mut root = sample_tree();
        root.set_attr("id", "other.id");
        assert_eq!(root.attr("id"), Some("other.id"));
        // order is unchanged: id still serializes before name
        let keys: Vec<&str> = root.attrs().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["id", "name"]);
    }

    #[test]
    fn test_children_named() {
        let mut root = Element::new("configuration");
        root.add_child("provider").set_attr("id", "a");
        root.add_child("provider-reference").set_attr("id", "b");
        root.add_child("provider").set_attr("id", "c");

        let ids: Vec<&str> = root
            .children_named("provider")
            .filter_map(|child| child.attr("id"))
            .collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn test_round_trip_preserves_structure() {
        let root = sample_tree();
        let text = root.to_xml();
        let reparsed = Element::parse(&text).unwrap();
        assert_eq!(root, reparsed);
    }

    #[test]
    fn test_round_trip_escapes_attribute_values() {
        let mut root = Element::new("entry");
        root.set_attr("name", "A<B>&\"quoted\"");
        let text = root.to_xml();
        let reparsed = Element::parse(&text).unwrap();
        assert_eq!(reparsed.attr("name"), Some("A<B>&\"quoted\""));
    }

    #[test]
    fn test_empty_element_collapses_to_empty_tag() {
        let root = Element::new("workspace");
        let text = root.to_xml();
        assert!(text.contains("<workspace/>"));
    }

    #[test]
    fn test_parse_ignores_text_and_comments() {
        let text = "<project><!-- note -->\n  <configuration id=\"c\"/>\n</project>";
        let root = Element::parse(text).unwrap();
        assert_eq!(root.children().len(), 1);
        assert_eq!(root.children()[0].attr("id"), Some("c"));
    }

    #[test]
    fn test_parse_no_root_is_error() {
        assert!(Element::parse("  ").is_err());
        assert!(Element::parse("<!-- only a comment -->").is_err());
    }
}
