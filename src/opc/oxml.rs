//! Owned, mutable XML tree used by XML parts.
//!
//! A part's XML is parsed once into an [`XmlDocument`]; callers edit the tree in
//! place through [`XmlElement`] and the part serializes whatever the tree holds at
//! that moment. Names are kept as qualified names (`w:body`), exactly as written,
//! and namespace declarations are ordinary `xmlns:*` attributes, so the tree
//! round-trips prefixes untouched.
//!
//! Serialization is compact: a fixed standalone declaration, no indentation,
//! and an explicit end tag for every element (`<w:p></w:p>`, never `<w:p/>`).

use crate::common::xml::{escape_attr, escape_text, resolve_reference, unescape_xml};
use crate::opc::constants::NAMESPACES;
use crate::opc::error::{OpcError, Result};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use std::fmt::Write as _;

/// Declaration written at the top of every serialized document.
pub const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// A node in an element's child list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlNode {
    Element(XmlElement),
    Text(String),
    CData(String),
    Comment(String),
    /// Processing instruction content, target included (`mso-application progid="Word.Document"`)
    ProcessingInstruction(String),
}

impl XmlNode {
    pub fn as_element(&self) -> Option<&XmlElement> {
        match self {
            XmlNode::Element(el) => Some(el),
            _ => None,
        }
    }

    pub fn as_element_mut(&mut self) -> Option<&mut XmlElement> {
        match self {
            XmlNode::Element(el) => Some(el),
            _ => None,
        }
    }
}

impl From<XmlElement> for XmlNode {
    fn from(el: XmlElement) -> Self {
        XmlNode::Element(el)
    }
}

/// An XML element with ordered attributes and children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlElement {
    /// Qualified name as written (`w:document`)
    name: String,

    /// Attributes in document order, values unescaped
    attributes: Vec<(String, String)>,

    children: Vec<XmlNode>,
}

impl XmlElement {
    /// Create an empty element.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Create an element carrying `xmlns:*` declarations for the given prefixes.
    ///
    /// Prefixes missing from the namespace table are skipped.
    ///
    /// # Examples
    ///
    /// ```
    /// use litchi_opc::opc::oxml::XmlElement;
    /// let el = XmlElement::with_nsdecls("w:document", &["w", "r"]);
    /// assert_eq!(
    ///     el.attr("xmlns:w"),
    ///     Some("http://schemas.openxmlformats.org/wordprocessingml/2006/main")
    /// );
    /// ```
    pub fn with_nsdecls(name: impl Into<String>, prefixes: &[&str]) -> Self {
        let mut el = Self::new(name);
        for prefix in prefixes {
            if let Some(uri) = NAMESPACES.get(*prefix) {
                el.set_attr(format!("xmlns:{}", prefix), *uri);
            }
        }
        el
    }

    /// Qualified name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name without its namespace prefix.
    pub fn local_name(&self) -> &str {
        self.name
            .split_once(':')
            .map_or(self.name.as_str(), |(_, local)| local)
    }

    /// Namespace prefix, if the name has one.
    pub fn prefix(&self) -> Option<&str> {
        self.name.split_once(':').map(|(prefix, _)| prefix)
    }

    /// Get an attribute value by qualified name.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Set an attribute, replacing the value in place if it already exists.
    pub fn set_attr(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.attributes.iter_mut().find(|(key, _)| *key == name) {
            Some((_, existing)) => *existing = value,
            None => self.attributes.push((name, value)),
        }
    }

    /// Remove an attribute, returning its value.
    pub fn remove_attr(&mut self, name: &str) -> Option<String> {
        let idx = self.attributes.iter().position(|(key, _)| key == name)?;
        Some(self.attributes.remove(idx).1)
    }

    /// Attributes in document order.
    pub fn attributes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    #[inline]
    pub fn children(&self) -> &[XmlNode] {
        &self.children
    }

    #[inline]
    pub fn children_mut(&mut self) -> &mut Vec<XmlNode> {
        &mut self.children
    }

    /// Append a child node.
    pub fn append_child(&mut self, node: impl Into<XmlNode>) {
        self.children.push(node.into());
    }

    /// Insert a child node at `index`, clamped to the end of the child list.
    pub fn insert_child(&mut self, index: usize, node: impl Into<XmlNode>) {
        let index = index.min(self.children.len());
        self.children.insert(index, node.into());
    }

    /// Remove the child node at `index`.
    pub fn remove_child(&mut self, index: usize) -> Option<XmlNode> {
        (index < self.children.len()).then(|| self.children.remove(index))
    }

    /// Child elements, skipping text and other node kinds.
    pub fn child_elements(&self) -> impl Iterator<Item = &XmlElement> {
        self.children.iter().filter_map(XmlNode::as_element)
    }

    /// First child element with the given qualified name.
    pub fn find_child(&self, name: &str) -> Option<&XmlElement> {
        self.child_elements().find(|el| el.name == name)
    }

    pub fn find_child_mut(&mut self, name: &str) -> Option<&mut XmlElement> {
        self.children
            .iter_mut()
            .filter_map(XmlNode::as_element_mut)
            .find(|el| el.name == name)
    }

    /// Concatenated text and CDATA content of this element and its descendants.
    pub fn text(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        for child in &self.children {
            match child {
                XmlNode::Text(text) | XmlNode::CData(text) => out.push_str(text),
                XmlNode::Element(el) => el.collect_text(out),
                XmlNode::Comment(_) | XmlNode::ProcessingInstruction(_) => {},
            }
        }
    }

    /// Serialize this element (without a declaration) onto `out`.
    pub fn write_to(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.name);
        for (key, value) in &self.attributes {
            let _ = write!(out, r#" {}="{}""#, key, escape_attr(value));
        }
        out.push('>');

        for child in &self.children {
            match child {
                XmlNode::Element(el) => el.write_to(out),
                XmlNode::Text(text) => out.push_str(&escape_text(text)),
                XmlNode::CData(text) => {
                    out.push_str("<![CDATA[");
                    out.push_str(text);
                    out.push_str("]]>");
                },
                XmlNode::Comment(text) => {
                    out.push_str("<!--");
                    out.push_str(text);
                    out.push_str("-->");
                },
                XmlNode::ProcessingInstruction(text) => {
                    out.push_str("<?");
                    out.push_str(text);
                    out.push_str("?>");
                },
            }
        }

        out.push_str("</");
        out.push_str(&self.name);
        out.push('>');
    }

    fn push_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        match self.children.last_mut() {
            Some(XmlNode::Text(existing)) => existing.push_str(text),
            _ => self.children.push(XmlNode::Text(text.to_string())),
        }
    }

    fn drop_whitespace_text(&mut self) {
        self.children.retain(|child| match child {
            XmlNode::Text(text) => !is_xml_whitespace(text),
            _ => true,
        });
    }

    fn from_start(start: &BytesStart<'_>) -> Result<Self> {
        let name = std::str::from_utf8(start.name().as_ref())?.to_string();
        let mut el = Self::new(name);
        for attr in start.attributes() {
            let attr = attr?;
            let key = std::str::from_utf8(attr.key.as_ref())?.to_string();
            let value = attr.unescape_value()?.into_owned();
            el.attributes.push((key, value));
        }
        Ok(el)
    }
}

fn is_xml_whitespace(text: &str) -> bool {
    text.bytes().all(|b| matches!(b, b' ' | b'\t' | b'\n' | b'\r'))
}

/// A parsed XML document: a single root element.
///
/// The prolog (declaration, doctype, top-level comments) is not kept; serialization
/// always writes [`XML_DECLARATION`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlDocument {
    root: XmlElement,
}

impl XmlDocument {
    pub fn new(root: XmlElement) -> Self {
        Self { root }
    }

    /// Parse a document.
    ///
    /// Whitespace-only text is dropped unless an enclosing element carries
    /// `xml:space="preserve"`.
    pub fn parse(xml: &[u8]) -> Result<Self> {
        let xml = xml.strip_prefix(UTF8_BOM).unwrap_or(xml);
        let mut reader = Reader::from_reader(xml);
        reader.config_mut().expand_empty_elements = true;

        // Open elements with their effective xml:space="preserve" state
        let mut stack: Vec<(XmlElement, bool)> = Vec::new();
        let mut root: Option<XmlElement> = None;
        let mut buf = Vec::with_capacity(1024);

        loop {
            match reader.read_event_into(&mut buf)? {
                Event::Start(e) => {
                    if root.is_some() {
                        return Err(OpcError::XmlError(
                            "content after the root element".to_string(),
                        ));
                    }
                    let el = XmlElement::from_start(&e)?;
                    let inherited = stack.last().is_some_and(|(_, preserve)| *preserve);
                    let preserve = match el.attr("xml:space") {
                        Some("preserve") => true,
                        Some("default") => false,
                        _ => inherited,
                    };
                    stack.push((el, preserve));
                },
                Event::End(_) => {
                    let Some((mut el, preserve)) = stack.pop() else {
                        return Err(OpcError::XmlError("unbalanced end tag".to_string()));
                    };
                    if !preserve {
                        el.drop_whitespace_text();
                    }
                    match stack.last_mut() {
                        Some((parent, _)) => parent.children.push(XmlNode::Element(el)),
                        None => root = Some(el),
                    }
                },
                Event::Text(e) => {
                    if let Some((parent, _)) = stack.last_mut() {
                        let raw = std::str::from_utf8(e.as_ref())?;
                        parent.push_text(&unescape_xml(raw));
                    }
                },
                Event::GeneralRef(e) => {
                    if let Some((parent, _)) = stack.last_mut() {
                        let name = std::str::from_utf8(e.as_ref())?;
                        let resolved = resolve_reference(name).ok_or_else(|| {
                            OpcError::XmlError(format!("unknown entity reference '&{};'", name))
                        })?;
                        let mut utf8 = [0u8; 4];
                        parent.push_text(resolved.encode_utf8(&mut utf8));
                    }
                },
                Event::CData(e) => {
                    if let Some((parent, _)) = stack.last_mut() {
                        let text = std::str::from_utf8(e.as_ref())?.to_string();
                        parent.children.push(XmlNode::CData(text));
                    }
                },
                Event::Comment(e) => {
                    if let Some((parent, _)) = stack.last_mut() {
                        let text = std::str::from_utf8(e.as_ref())?.to_string();
                        parent.children.push(XmlNode::Comment(text));
                    }
                },
                Event::PI(e) => {
                    if let Some((parent, _)) = stack.last_mut() {
                        let text = std::str::from_utf8(e.as_ref())?.to_string();
                        parent.children.push(XmlNode::ProcessingInstruction(text));
                    }
                },
                Event::Eof => break,
                _ => {},
            }
            buf.clear();
        }

        if !stack.is_empty() {
            return Err(OpcError::XmlError("unclosed element at end of input".to_string()));
        }
        root.map(Self::new)
            .ok_or_else(|| OpcError::XmlError("document has no root element".to_string()))
    }

    #[inline]
    pub fn root(&self) -> &XmlElement {
        &self.root
    }

    #[inline]
    pub fn root_mut(&mut self) -> &mut XmlElement {
        &mut self.root
    }

    pub fn set_root(&mut self, root: XmlElement) {
        self.root = root;
    }

    pub fn into_root(self) -> XmlElement {
        self.root
    }

    /// Serialize the document with the standalone declaration.
    pub fn to_xml_string(&self) -> String {
        let mut out = String::with_capacity(XML_DECLARATION.len() + 256);
        out.push_str(XML_DECLARATION);
        self.root.write_to(&mut out);
        out
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_xml_string().into_bytes()
    }
}

/// Build `xmlns:*` declarations for the given prefixes, space separated.
///
/// Prefixes missing from the namespace table are skipped.
///
/// # Examples
///
/// ```
/// use litchi_opc::opc::oxml::nsdecls;
/// assert_eq!(
///     nsdecls(&["r"]),
///     r#"xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships""#
/// );
/// ```
pub fn nsdecls(prefixes: &[&str]) -> String {
    prefixes
        .iter()
        .filter_map(|prefix| {
            NAMESPACES
                .get(*prefix)
                .map(|uri| format!(r#"xmlns:{}="{}""#, prefix, uri))
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOCUMENT: &[u8] = br#"<?xml version="1.0" encoding="UTF-8"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
  <w:body>
    <w:p>
      <w:r><w:t xml:space="preserve"> Hello </w:t></w:r>
      <w:r><w:t>a &amp; b &#x41;</w:t></w:r>
    </w:p>
    <w:sectPr/>
  </w:body>
</w:document>"#;

    #[test]
    fn test_parse_and_serialize_compact() {
        let doc = XmlDocument::parse(DOCUMENT).unwrap();
        assert_eq!(doc.root().name(), "w:document");
        assert_eq!(doc.root().local_name(), "document");
        assert_eq!(doc.root().prefix(), Some("w"));

        let xml = doc.to_xml_string();
        assert_eq!(
            xml,
            concat!(
                r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
                r#"<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">"#,
                "<w:body><w:p>",
                r#"<w:r><w:t xml:space="preserve"> Hello </w:t></w:r>"#,
                "<w:r><w:t>a &amp; b A</w:t></w:r>",
                "</w:p><w:sectPr></w:sectPr></w:body></w:document>",
            )
        );
    }

    #[test]
    fn test_preserve_scope_is_inherited() {
        let doc = XmlDocument::parse(br#"<a xml:space="preserve"><b>  </b><c xml:space="default"> </c></a>"#)
            .unwrap();
        let b = doc.root().find_child("b").unwrap();
        assert_eq!(b.text(), "  ");
        let c = doc.root().find_child("c").unwrap();
        assert!(c.children().is_empty());
    }

    #[test]
    fn test_attribute_whitespace_is_reescaped() {
        let doc = XmlDocument::parse(br#"<a v="x&#10;y&#9;z"></a>"#).unwrap();
        assert_eq!(doc.root().attr("v"), Some("x\ny\tz"));
        assert!(doc.to_xml_string().ends_with(r#"<a v="x&#10;y&#9;z"></a>"#));
    }

    #[test]
    fn test_mutation_is_reflected() {
        let mut doc = XmlDocument::parse(b"<root><child/></root>").unwrap();
        let root = doc.root_mut();
        root.set_attr("id", "1");
        root.find_child_mut("child").unwrap().append_child(XmlNode::Text("hi <there>".into()));
        root.insert_child(0, XmlElement::new("first"));
        assert!(doc.to_xml_string().ends_with(
            r#"<root id="1"><first></first><child>hi &lt;there&gt;</child></root>"#
        ));

        let root = doc.root_mut();
        assert_eq!(root.remove_attr("id").as_deref(), Some("1"));
        assert!(root.remove_child(0).is_some());
        assert!(root.remove_child(5).is_none());
        assert_eq!(root.child_elements().count(), 1);
    }

    #[test]
    fn test_cdata_comment_pi_kept() {
        let doc = XmlDocument::parse(b"<r><!--note--><?pi data?><![CDATA[<raw>]]></r>").unwrap();
        assert!(doc
            .to_xml_string()
            .ends_with("<r><!--note--><?pi data?><![CDATA[<raw>]]></r>"));
        assert_eq!(doc.root().text(), "<raw>");
    }

    #[test]
    fn test_bom_is_skipped() {
        let mut xml = UTF8_BOM.to_vec();
        xml.extend_from_slice(b"<r/>");
        assert_eq!(XmlDocument::parse(&xml).unwrap().root().name(), "r");
    }

    #[test]
    fn test_malformed_documents() {
        assert!(XmlDocument::parse(b"").is_err());
        assert!(XmlDocument::parse(b"<a><b></a>").is_err());
        assert!(XmlDocument::parse(b"<a>").is_err());
        assert!(XmlDocument::parse(b"<a></a><b></b>").is_err());
        assert!(XmlDocument::parse(b"<a>&bogus;</a>").is_err());
    }

    #[test]
    fn test_nsdecls() {
        let decls = nsdecls(&["w", "unknown", "r"]);
        assert!(decls.starts_with(r#"xmlns:w=""#));
        assert!(decls.contains(r#" xmlns:r=""#));
        assert!(!decls.contains("unknown"));
    }
}
