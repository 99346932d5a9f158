//! Owned XML element tree for events and envelopes.
//!
//! Parsing uses quick-xml, which never expands external entities. Documents
//! carrying a DOCTYPE are rejected. Whitespace-only text between child
//! elements is indentation and is dropped on parse, so a document reads back
//! the same way it is serialized and signed; whitespace that is the whole
//! content of a leaf element is kept.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::BTreeMap;
use thiserror::Error;

/// Namespace bound to the reserved `xml` prefix.
pub const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";

/// XML declaration prepended by [`XmlElement::to_document_string`].
pub const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;

/// In-scope namespace bindings, keyed by prefix (`""` is the default namespace).
pub type NamespaceScope = BTreeMap<String, String>;

/// Errors raised while reading a document.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum XmlError {
    #[error("invalid UTF-8: {0}")]
    Utf8(String),

    #[error("malformed XML: {0}")]
    Malformed(String),

    #[error("DOCTYPE and entity declarations are not allowed")]
    Doctype,

    #[error("document has no root element")]
    NoRoot,

    #[error("content found outside the root element")]
    OutsideRoot,
}

/// A child node of an element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlNode {
    Element(XmlElement),
    Text(String),
}

/// An XML element with its attributes (namespace declarations included, in
/// document order) and children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlElement {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<XmlNode>,
}

impl XmlElement {
    /// Create an empty element with a (possibly prefixed) name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Builder form of [`set_attr`](Self::set_attr).
    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attr(name, value);
        self
    }

    /// Builder form of [`push_text`](Self::push_text).
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.push_text(text);
        self
    }

    /// Builder form of [`push`](Self::push).
    pub fn with_child(mut self, child: XmlElement) -> Self {
        self.push(child);
        self
    }

    /// Qualified name, e.g. `soap:Envelope`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name without its prefix.
    pub fn local_name(&self) -> &str {
        match self.name.split_once(':') {
            Some((_, local)) => local,
            None => &self.name,
        }
    }

    /// Prefix of the name, if any.
    pub fn prefix(&self) -> Option<&str> {
        self.name.split_once(':').map(|(prefix, _)| prefix)
    }

    /// Attribute value by qualified name.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Set an attribute, replacing an existing value in place.
    pub fn set_attr(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.attributes.iter_mut().find(|(key, _)| *key == name) {
            Some(slot) => slot.1 = value,
            None => self.attributes.push((name, value)),
        }
    }

    /// All attributes in document order.
    pub fn attributes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Namespace declarations made on this element as `(prefix, uri)`;
    /// the default namespace has an empty prefix.
    pub fn namespace_declarations(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes.iter().filter_map(|(key, value)| {
            if key == "xmlns" {
                Some(("", value.as_str()))
            } else {
                key.strip_prefix("xmlns:").map(|prefix| (prefix, value.as_str()))
            }
        })
    }

    /// Default namespace declared on this element.
    pub fn default_namespace(&self) -> Option<&str> {
        self.attr("xmlns")
    }

    /// Append a child element.
    pub fn push(&mut self, child: XmlElement) {
        self.children.push(XmlNode::Element(child));
    }

    /// Append text, merging with a directly preceding text node.
    pub fn push_text(&mut self, text: impl Into<String>) {
        let text = text.into();
        if text.is_empty() {
            return;
        }
        if let Some(XmlNode::Text(last)) = self.children.last_mut() {
            last.push_str(&text);
        } else {
            self.children.push(XmlNode::Text(text));
        }
    }

    /// All child nodes.
    pub fn children(&self) -> &[XmlNode] {
        &self.children
    }

    /// Child elements in order.
    pub fn elements(&self) -> impl Iterator<Item = &XmlElement> {
        self.children.iter().filter_map(|node| match node {
            XmlNode::Element(element) => Some(element),
            XmlNode::Text(_) => None,
        })
    }

    /// First child element.
    pub fn first_element(&self) -> Option<&XmlElement> {
        self.elements().next()
    }

    /// Mutable first child element.
    pub fn first_element_mut(&mut self) -> Option<&mut XmlElement> {
        self.children.iter_mut().find_map(|node| match node {
            XmlNode::Element(element) => Some(element),
            XmlNode::Text(_) => None,
        })
    }

    /// First child element with the given local name.
    pub fn child(&self, local_name: &str) -> Option<&XmlElement> {
        self.elements().find(|e| e.local_name() == local_name)
    }

    /// Child elements with the given local name.
    pub fn children_named<'a>(
        &'a self,
        local_name: &'a str,
    ) -> impl Iterator<Item = &'a XmlElement> + 'a {
        self.elements().filter(move |e| e.local_name() == local_name)
    }

    /// Follow a `/`-separated path of local names from this element.
    pub fn find(&self, path: &str) -> Option<&XmlElement> {
        path.split('/')
            .filter(|step| !step.is_empty())
            .try_fold(self, |element, step| element.child(step))
    }

    /// First descendant (depth-first, document order) with the given local name.
    pub fn descendant(&self, local_name: &str) -> Option<&XmlElement> {
        for child in self.elements() {
            if child.local_name() == local_name {
                return Some(child);
            }
            if let Some(found) = child.descendant(local_name) {
                return Some(found);
            }
        }
        None
    }

    /// Concatenated direct text content.
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|node| match node {
                XmlNode::Text(text) => Some(text.as_str()),
                XmlNode::Element(_) => None,
            })
            .collect()
    }

    /// Remove child elements matching `predicate`, returning how many were removed.
    pub fn remove_elements<F>(&mut self, predicate: F) -> usize
    where
        F: Fn(&XmlElement) -> bool,
    {
        let before = self.children.len();
        self.children.retain(|node| match node {
            XmlNode::Element(element) => !predicate(element),
            XmlNode::Text(_) => true,
        });
        before - self.children.len()
    }

    /// Parse a document from a string.
    pub fn parse(input: &str) -> Result<Self, XmlError> {
        let mut reader = Reader::from_str(input);
        let mut stack: Vec<XmlElement> = Vec::new();
        let mut root: Option<XmlElement> = None;

        loop {
            match reader.read_event() {
                Ok(Event::Start(ref e)) => {
                    if root.is_some() {
                        return Err(XmlError::OutsideRoot);
                    }
                    stack.push(element_from_start(e)?);
                }
                Ok(Event::Empty(ref e)) => {
                    if root.is_some() {
                        return Err(XmlError::OutsideRoot);
                    }
                    let element = element_from_start(e)?;
                    attach(&mut stack, &mut root, element);
                }
                Ok(Event::End(_)) => {
                    let mut element = stack
                        .pop()
                        .ok_or_else(|| XmlError::Malformed("unexpected closing tag".into()))?;
                    drop_indentation(&mut element);
                    attach(&mut stack, &mut root, element);
                }
                Ok(Event::Text(ref e)) => {
                    let text = e
                        .unescape()
                        .map_err(|err| XmlError::Malformed(err.to_string()))?;
                    push_text(&mut stack, &text)?;
                }
                Ok(Event::CData(e)) => {
                    let text = String::from_utf8(e.into_inner().into_owned())
                        .map_err(|err| XmlError::Utf8(err.to_string()))?;
                    push_text(&mut stack, &text)?;
                }
                Ok(Event::DocType(_)) => return Err(XmlError::Doctype),
                Ok(Event::Eof) => break,
                // Declarations, comments and processing instructions carry no content.
                Ok(_) => {}
                Err(e) => return Err(XmlError::Malformed(e.to_string())),
            }
        }

        if let Some(open) = stack.last() {
            return Err(XmlError::Malformed(format!(
                "element <{}> is never closed",
                open.name
            )));
        }
        root.ok_or(XmlError::NoRoot)
    }

    /// Parse a document from raw bytes.
    pub fn parse_bytes(data: &[u8]) -> Result<Self, XmlError> {
        let input =
            std::str::from_utf8(data).map_err(|e| XmlError::Utf8(e.to_string()))?;
        Self::parse(input)
    }

    /// Serialize this element, keeping attributes in document order.
    pub fn to_xml_string(&self) -> String {
        let mut out = String::new();
        self.write_plain(&mut out);
        out
    }

    /// Serialize as a standalone document with an XML declaration.
    pub fn to_document_string(&self) -> String {
        let mut out = String::from(XML_DECLARATION);
        self.write_plain(&mut out);
        out
    }

    /// Inclusive Canonical XML 1.0 (without comments) of this element as
    /// the apex of its own document.
    pub fn canonicalize(&self) -> String {
        self.canonicalize_in_scope(&NamespaceScope::new())
    }

    /// Inclusive Canonical XML 1.0 of this element as a document subset,
    /// where `inherited` holds the namespaces in scope from its ancestors.
    pub fn canonicalize_in_scope(&self, inherited: &NamespaceScope) -> String {
        let mut out = String::new();
        self.write_canonical(&mut out, &NamespaceScope::new(), inherited);
        out
    }

    /// Namespace scope after applying this element's declarations over `parent`.
    pub fn scope_over(&self, parent: &NamespaceScope) -> NamespaceScope {
        let mut scope = parent.clone();
        for (prefix, uri) in self.namespace_declarations() {
            scope.insert(prefix.to_string(), uri.to_string());
        }
        scope
    }

    fn write_plain(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.name);
        for (key, value) in &self.attributes {
            out.push(' ');
            out.push_str(key);
            out.push_str("=\"");
            escape_attr_into(value, out);
            out.push('"');
        }
        if self.children.is_empty() {
            out.push_str("/>");
            return;
        }
        out.push('>');
        for child in &self.children {
            match child {
                XmlNode::Element(element) => element.write_plain(out),
                XmlNode::Text(text) => escape_text_into(text, out),
            }
        }
        out.push_str("</");
        out.push_str(&self.name);
        out.push('>');
    }

    fn write_canonical(
        &self,
        out: &mut String,
        rendered: &NamespaceScope,
        parent: &NamespaceScope,
    ) {
        let scope = self.scope_over(parent);

        // Namespace nodes not already in effect in the output are rendered,
        // default namespace first, then by prefix.
        let mut now_rendered = rendered.clone();
        let mut namespaces: Vec<(&str, &str)> = Vec::new();
        for (prefix, uri) in &scope {
            let current = rendered.get(prefix).map(String::as_str);
            if uri.is_empty() {
                if prefix.is_empty() && current.is_some_and(|u| !u.is_empty()) {
                    namespaces.push(("", ""));
                    now_rendered.remove(prefix);
                }
                continue;
            }
            if current != Some(uri.as_str()) {
                namespaces.push((prefix.as_str(), uri.as_str()));
                now_rendered.insert(prefix.clone(), uri.clone());
            }
        }

        // Attributes sort by (namespace URI, local name); unqualified ones
        // have no namespace and sort first.
        let mut attributes: Vec<(String, &str, &str)> = self
            .attributes
            .iter()
            .filter(|(key, _)| key != "xmlns" && !key.starts_with("xmlns:"))
            .map(|(key, value)| {
                let sort_key = match key.split_once(':') {
                    Some(("xml", local)) => format!("{XML_NS}\u{0}{local}"),
                    Some((prefix, local)) => format!(
                        "{}\u{0}{local}",
                        scope.get(prefix).map(String::as_str).unwrap_or_default()
                    ),
                    None => format!("\u{0}{key}"),
                };
                (sort_key, key.as_str(), value.as_str())
            })
            .collect();
        attributes.sort_by(|a, b| a.0.cmp(&b.0));

        out.push('<');
        out.push_str(&self.name);
        for (prefix, uri) in namespaces {
            if prefix.is_empty() {
                out.push_str(" xmlns=\"");
            } else {
                out.push_str(" xmlns:");
                out.push_str(prefix);
                out.push_str("=\"");
            }
            escape_attr_into(uri, out);
            out.push('"');
        }
        for (_, key, value) in attributes {
            out.push(' ');
            out.push_str(key);
            out.push_str("=\"");
            escape_attr_into(value, out);
            out.push('"');
        }
        out.push('>');
        for child in &self.children {
            match child {
                XmlNode::Element(element) => element.write_canonical(out, &now_rendered, &scope),
                XmlNode::Text(text) => escape_text_into(text, out),
            }
        }
        out.push_str("</");
        out.push_str(&self.name);
        out.push('>');
    }
}

fn element_from_start(start: &BytesStart) -> Result<XmlElement, XmlError> {
    let name = std::str::from_utf8(start.name().as_ref())
        .map_err(|e| XmlError::Utf8(e.to_string()))?
        .to_string();
    let mut element = XmlElement::new(name);
    for attr in start.attributes() {
        let attr = attr.map_err(|e| XmlError::Malformed(e.to_string()))?;
        let key = std::str::from_utf8(attr.key.as_ref())
            .map_err(|e| XmlError::Utf8(e.to_string()))?
            .to_string();
        let value = attr
            .unescape_value()
            .map_err(|e| XmlError::Malformed(e.to_string()))?
            .into_owned();
        element.attributes.push((key, value));
    }
    Ok(element)
}

fn attach(stack: &mut [XmlElement], root: &mut Option<XmlElement>, element: XmlElement) {
    match stack.last_mut() {
        Some(parent) => parent.push(element),
        None => *root = Some(element),
    }
}

fn push_text(stack: &mut [XmlElement], text: &str) -> Result<(), XmlError> {
    match stack.last_mut() {
        Some(parent) => {
            parent.push_text(text);
            Ok(())
        }
        None if is_blank(text) => Ok(()),
        None => Err(XmlError::OutsideRoot),
    }
}

/// Drop whitespace-only text from an element that also has child elements.
fn drop_indentation(element: &mut XmlElement) {
    if element.elements().next().is_none() {
        return;
    }
    element
        .children
        .retain(|node| !matches!(node, XmlNode::Text(text) if is_blank(text)));
}

fn is_blank(text: &str) -> bool {
    text.chars().all(char::is_whitespace)
}

fn escape_text_into(text: &str, out: &mut String) {
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(ch),
        }
    }
}

fn escape_attr_into(value: &str, out: &mut String) {
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '"' => out.push_str("&quot;"),
            '\t' => out.push_str("&#x9;"),
            '\n' => out.push_str("&#xA;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(ch),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EVENT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<eSocial xmlns="http://www.esocial.gov.br/schema/evt/evtMonit/v_S_01_02_00">
  <evtMonit Id="ID1123456780000002019032114182400001">
    <ideEvento>
      <tpAmb>2</tpAmb>
    </ideEvento>
    <obs>A &amp; B</obs>
  </evtMonit>
</eSocial>"#;

    #[test]
    fn test_parse_document() {
        let root = XmlElement::parse(EVENT).unwrap();
        assert_eq!(root.name(), "eSocial");
        assert_eq!(
            root.default_namespace(),
            Some("http://www.esocial.gov.br/schema/evt/evtMonit/v_S_01_02_00")
        );
        let event = root.first_element().unwrap();
        assert_eq!(event.attr("Id"), Some("ID1123456780000002019032114182400001"));
        assert_eq!(root.find("evtMonit/ideEvento/tpAmb").unwrap().text(), "2");
        assert_eq!(root.descendant("obs").unwrap().text(), "A & B");
    }

    #[test]
    fn test_whitespace_only_text_dropped() {
        let root = XmlElement::parse(EVENT).unwrap();
        assert_eq!(root.children().len(), 1);
        assert!(root.text().is_empty());
    }

    #[test]
    fn test_whitespace_only_leaf_kept() {
        let root = XmlElement::parse("<a><obs> </obs><x>  y </x></a>").unwrap();
        assert_eq!(root.child("obs").unwrap().text(), " ");
        assert_eq!(root.to_xml_string(), "<a><obs> </obs><x>  y </x></a>");
        assert_eq!(root.canonicalize(), "<a><obs> </obs><x>  y </x></a>");
        assert_eq!(XmlElement::parse(&root.to_xml_string()).unwrap(), root);
    }

    #[test]
    fn test_reject_plain_text() {
        assert_eq!(
            XmlElement::parse("just some text"),
            Err(XmlError::OutsideRoot)
        );
        assert_eq!(XmlElement::parse(""), Err(XmlError::NoRoot));
    }

    #[test]
    fn test_reject_unclosed_element() {
        let result = XmlElement::parse("<a><b></b>");
        assert!(matches!(result, Err(XmlError::Malformed(_))));
    }

    #[test]
    fn test_reject_second_root() {
        assert_eq!(XmlElement::parse("<a/><b/>"), Err(XmlError::OutsideRoot));
    }

    #[test]
    fn test_reject_doctype() {
        let payload = r#"<?xml version="1.0"?>
<!DOCTYPE foo [<!ENTITY xxe SYSTEM "file:///etc/passwd">]>
<eSocial>&xxe;</eSocial>"#;
        assert_eq!(XmlElement::parse(payload), Err(XmlError::Doctype));
    }

    #[test]
    fn test_doctype_text_inside_content_allowed() {
        let root = XmlElement::parse("<a><![CDATA[see <!DOCTYPE html>]]></a>").unwrap();
        assert_eq!(root.text(), "see <!DOCTYPE html>");

        let root = XmlElement::parse("<a>&lt;!ENTITY x&gt;</a>").unwrap();
        assert_eq!(root.text(), "<!ENTITY x>");
    }

    #[test]
    fn test_plain_serialization_round_trip() {
        let root = XmlElement::parse(EVENT).unwrap();
        let text = root.to_xml_string();
        assert!(text.starts_with("<eSocial xmlns="));
        assert!(text.contains("<obs>A &amp; B</obs>"));
        assert_eq!(XmlElement::parse(&text).unwrap(), root);
    }

    #[test]
    fn test_canonical_attribute_order_and_empty_elements() {
        let element = XmlElement::new("a")
            .with_attr("z", "1")
            .with_attr("b", "2")
            .with_attr("xmlns", "urn:x")
            .with_child(XmlElement::new("c"));
        assert_eq!(
            element.canonicalize(),
            r#"<a xmlns="urn:x" b="2" z="1"><c></c></a>"#
        );
    }

    #[test]
    fn test_canonical_drops_superfluous_declarations() {
        let element = XmlElement::new("a")
            .with_attr("xmlns", "urn:x")
            .with_child(XmlElement::new("b").with_attr("xmlns", "urn:x"))
            .with_child(XmlElement::new("c").with_attr("xmlns", "urn:y"));
        assert_eq!(
            element.canonicalize(),
            r#"<a xmlns="urn:x"><b></b><c xmlns="urn:y"></c></a>"#
        );
    }

    #[test]
    fn test_canonical_subset_renders_inherited_namespaces() {
        let mut inherited = NamespaceScope::new();
        inherited.insert(String::new(), "urn:dsig".to_string());
        inherited.insert("xsi".to_string(), "urn:xsi".to_string());
        let element = XmlElement::new("SignedInfo").with_child(XmlElement::new("Reference"));
        assert_eq!(
            element.canonicalize_in_scope(&inherited),
            r#"<SignedInfo xmlns="urn:dsig" xmlns:xsi="urn:xsi"><Reference></Reference></SignedInfo>"#
        );
    }

    #[test]
    fn test_canonical_escaping() {
        let element = XmlElement::new("a")
            .with_attr("v", "x\"<&\n")
            .with_text("1 < 2 > 0 & \r");
        assert_eq!(
            element.canonicalize(),
            "<a v=\"x&quot;&lt;&amp;&#xA;\">1 &lt; 2 &gt; 0 &amp; &#xD;</a>"
        );
    }

    #[test]
    fn test_remove_elements() {
        let mut element = XmlElement::new("a")
            .with_child(XmlElement::new("b"))
            .with_child(XmlElement::new("Signature"))
            .with_text("t");
        assert_eq!(element.remove_elements(|e| e.local_name() == "Signature"), 1);
        assert_eq!(element.elements().count(), 1);
        assert_eq!(element.text(), "t");
    }
}
