//! Content type resolution and the `[Content_Types].xml` item.
//!
//! [`ContentTypeMap`] is the read-side lookup built from an existing index;
//! [`ContentTypesItem`] is the write-side builder that produces a fresh index
//! for the parts being saved.

use crate::common::xml::escape_attr;
use crate::opc::constants::{builtin_content_type, content_type as ct, namespace};
use crate::opc::error::{OpcError, Result};
use crate::opc::packuri::PackURI;
use quick_xml::Reader;
use quick_xml::events::Event;
use std::collections::{BTreeMap, HashMap};

/// Content type map for looking up content types by part name or extension.
///
/// Resolution precedence is Override (exact part name) > Default (extension) >
/// built-in inference for well-known extensions. Part names and extensions are
/// compared ASCII case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct ContentTypeMap {
    /// Maps lower-cased file extensions to default content types
    defaults: HashMap<String, String>,

    /// Maps lower-cased partnames to override content types
    overrides: HashMap<String, String>,
}

impl ContentTypeMap {
    /// Create a new empty content type map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse content types from `[Content_Types].xml`.
    ///
    /// Uses quick-xml for streaming parsing. `Default` and `Override` elements
    /// missing either attribute are ignored.
    pub fn from_xml(xml: &[u8]) -> Result<Self> {
        let mut map = Self::new();
        let mut reader = Reader::from_reader(xml);
        reader.config_mut().trim_text(true);

        let mut buf = Vec::new();
        let mut saw_root = false;

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Empty(ref e)) | Ok(Event::Start(ref e)) => {
                    let key_attr: Option<&[u8]> = match e.local_name().as_ref() {
                        b"Types" => {
                            saw_root = true;
                            None
                        },
                        b"Default" => Some(b"Extension".as_slice()),
                        b"Override" => Some(b"PartName".as_slice()),
                        _ => None,
                    };

                    if let Some(key_attr) = key_attr {
                        let mut key = None;
                        let mut content_type = None;
                        for attr in e.attributes() {
                            let attr = attr?;
                            let name = attr.key.as_ref();
                            if name == key_attr {
                                key = Some(attr.unescape_value()?.into_owned());
                            } else if name == b"ContentType" {
                                content_type = Some(attr.unescape_value()?.into_owned());
                            }
                        }

                        if let (Some(key), Some(content_type)) = (key, content_type) {
                            if key_attr == b"Extension" {
                                map.add_default(&key, content_type);
                            } else {
                                map.add_override(&key, content_type);
                            }
                        }
                    }
                },
                Ok(Event::Eof) => break,
                Err(e) => return Err(e.into()),
                _ => {},
            }
            buf.clear();
        }

        if !saw_root {
            return Err(OpcError::XmlError(
                "Content types parse error: missing <Types> root element".to_string(),
            ));
        }
        Ok(map)
    }

    /// Add a default content type mapping for a file extension.
    ///
    /// The extension is stored lower-cased; a leading period is ignored.
    /// Last write wins.
    pub fn add_default(&mut self, extension: &str, content_type: impl Into<String>) {
        let ext = extension.trim_start_matches('.').to_ascii_lowercase();
        self.defaults.insert(ext, content_type.into());
    }

    /// Add an override content type mapping for a specific partname. Last write wins.
    pub fn add_override(&mut self, partname: &str, content_type: impl Into<String>) {
        self.overrides
            .insert(partname.to_ascii_lowercase(), content_type.into());
    }

    /// Get the content type for a partname.
    ///
    /// First checks for an override, then the declared default for the extension,
    /// then the built-in table of well-known extensions.
    pub fn content_type(&self, pack_uri: &PackURI) -> Result<&str> {
        if let Some(ct) = self.overrides.get(&pack_uri.as_str().to_ascii_lowercase()) {
            return Ok(ct);
        }

        let ext = pack_uri.ext().to_ascii_lowercase();
        if let Some(ct) = self.defaults.get(&ext) {
            return Ok(ct);
        }

        builtin_content_type(&ext).ok_or_else(|| OpcError::ContentTypeNotFound(pack_uri.to_string()))
    }

    /// Number of declared Default entries.
    pub fn default_count(&self) -> usize {
        self.defaults.len()
    }

    /// Number of declared Override entries.
    pub fn override_count(&self) -> usize {
        self.overrides.len()
    }
}

/// Helper for building `[Content_Types].xml` content when saving.
///
/// A part whose content type matches the built-in type for its extension is
/// covered by a Default entry; every other part gets an Override.
#[derive(Debug)]
pub struct ContentTypesItem {
    /// Default content types by lower-cased extension (sorted for stable output)
    defaults: BTreeMap<String, String>,

    /// Override content types by partname (sorted for stable output)
    overrides: BTreeMap<String, String>,
}

impl ContentTypesItem {
    /// Create an item holding only the standard `rels` and `xml` defaults.
    pub fn new() -> Self {
        let mut defaults = BTreeMap::new();
        defaults.insert("rels".to_string(), ct::OPC_RELATIONSHIPS.to_string());
        defaults.insert("xml".to_string(), ct::XML.to_string());

        Self {
            defaults,
            overrides: BTreeMap::new(),
        }
    }

    /// Build the item from `(partname, content type)` pairs.
    pub fn from_parts<'a, I>(parts: I) -> Self
    where
        I: IntoIterator<Item = (&'a PackURI, &'a str)>,
    {
        let mut cti = Self::new();
        for (partname, content_type) in parts {
            cti.add_content_type(partname, content_type);
        }
        cti
    }

    /// Add a content type for a part.
    pub fn add_content_type(&mut self, partname: &PackURI, content_type: &str) {
        let ext = partname.ext().to_ascii_lowercase();

        if builtin_content_type(&ext) == Some(content_type) {
            self.defaults.insert(ext, content_type.to_string());
        } else {
            self.overrides
                .insert(partname.to_string(), content_type.to_string());
        }
    }

    /// Generate the XML for `[Content_Types].xml`.
    pub fn to_xml(&self) -> String {
        let mut xml = String::with_capacity(256 + 128 * (self.defaults.len() + self.overrides.len()));

        xml.push_str(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#);
        xml.push_str(r#"<Types xmlns=""#);
        xml.push_str(namespace::OPC_CONTENT_TYPES);
        xml.push_str(r#"">"#);

        for (ext, content_type) in &self.defaults {
            xml.push_str(&format!(
                r#"<Default Extension="{}" ContentType="{}"/>"#,
                escape_attr(ext),
                escape_attr(content_type)
            ));
        }

        for (partname, content_type) in &self.overrides {
            xml.push_str(&format!(
                r#"<Override PartName="{}" ContentType="{}"/>"#,
                escape_attr(partname),
                escape_attr(content_type)
            ));
        }

        xml.push_str("</Types>");
        xml
    }
}

impl Default for ContentTypesItem {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const CONTENT_TYPES: &[u8] = br#"<?xml version="1.0"?>
        <Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">
            <Default Extension="xml" ContentType="application/xml"/>
            <Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/>
            <Default Extension="PNG" ContentType="image/x-declared-png"/>
            <Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/>
            <Override PartName="/word/media/logo.png" ContentType="image/x-override"/>
        </Types>"#;

    fn uri(s: &str) -> PackURI {
        PackURI::new(s).unwrap()
    }

    #[test]
    fn test_content_type_map() {
        let ct_map = ContentTypeMap::from_xml(CONTENT_TYPES).unwrap();
        assert_eq!(ct_map.default_count(), 3);
        assert_eq!(ct_map.override_count(), 2);

        assert_eq!(ct_map.content_type(&uri("/test.xml")).unwrap(), ct::XML);
        assert_eq!(
            ct_map.content_type(&uri("/word/document.xml")).unwrap(),
            ct::WML_DOCUMENT_MAIN
        );
    }

    #[test]
    fn test_override_beats_default_and_builtin() {
        let ct_map = ContentTypeMap::from_xml(CONTENT_TYPES).unwrap();
        assert_eq!(
            ct_map.content_type(&uri("/word/media/logo.png")).unwrap(),
            "image/x-override"
        );
        // Part names compare case-insensitively
        assert_eq!(
            ct_map.content_type(&uri("/Word/Media/LOGO.png")).unwrap(),
            "image/x-override"
        );
    }

    #[test]
    fn test_default_beats_builtin() {
        let ct_map = ContentTypeMap::from_xml(CONTENT_TYPES).unwrap();
        assert_eq!(
            ct_map.content_type(&uri("/word/media/image1.png")).unwrap(),
            "image/x-declared-png"
        );
    }

    #[test]
    fn test_builtin_fallback() {
        let mut ct_map = ContentTypeMap::new();
        ct_map.add_default("xml", ct::XML);
        ct_map.add_default("rels", ct::OPC_RELATIONSHIPS);

        assert_eq!(
            ct_map.content_type(&uri("/word/media/image1.png")).unwrap(),
            ct::PNG
        );
        assert_eq!(ct_map.content_type(&uri("/a/b.jpe")).unwrap(), ct::JPEG);
        assert_eq!(ct_map.content_type(&uri("/a/b.TIF")).unwrap(), ct::TIFF);
        assert_eq!(ct_map.content_type(&uri("/a/b.xlsx")).unwrap(), ct::SML_SHEET);
    }

    #[test]
    fn test_unknown_extension_fails() {
        let ct_map = ContentTypeMap::new();
        let err = ct_map.content_type(&uri("/word/embeddings/blob.qqq")).unwrap_err();
        assert!(matches!(err, OpcError::ContentTypeNotFound(ref p) if p == "/word/embeddings/blob.qqq"));

        assert!(ct_map.content_type(&uri("/word/noext")).is_err());
    }

    #[test]
    fn test_last_write_wins() {
        let mut ct_map = ContentTypeMap::new();
        ct_map.add_default("BIN", "application/one");
        ct_map.add_default(".bin", "application/two");
        ct_map.add_override("/x/y.bin", "application/three");
        ct_map.add_override("/X/Y.BIN", "application/four");

        assert_eq!(ct_map.content_type(&uri("/a.bin")).unwrap(), "application/two");
        assert_eq!(ct_map.content_type(&uri("/x/y.bin")).unwrap(), "application/four");
    }

    #[test]
    fn test_from_xml_rejects_garbage() {
        assert!(
            ContentTypeMap::from_xml(b"<Types><Default Extension=\"x\" ContentType=\"y\"/></Wrong>")
                .is_err()
        );
        assert!(ContentTypeMap::from_xml(b"not xml at all").is_err());
    }

    #[test]
    fn test_from_xml_keeps_typed_errors() {
        assert!(matches!(
            ContentTypeMap::from_xml(b"<Types></Wrong>"),
            Err(OpcError::QuickXmlError(_))
        ));
        assert!(matches!(
            ContentTypeMap::from_xml(br#"<Types><Default Extension="xml" Extension="rels" ContentType="a/b"/></Types>"#),
            Err(OpcError::AttrError(_))
        ));
    }

    #[test]
    fn test_content_types_xml() {
        let png = uri("/word/media/image1.png");
        let doc = uri("/word/document.xml");
        let odd = uri("/word/media/image2.png");
        let cti = ContentTypesItem::from_parts([
            (&png, ct::PNG),
            (&doc, ct::WML_DOCUMENT_MAIN),
            (&odd, "image/x-custom"),
        ]);

        let xml = cti.to_xml();
        assert!(xml.starts_with(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#));
        assert!(xml.contains(r#"<Default Extension="png" ContentType="image/png"/>"#));
        assert!(xml.contains(r#"<Default Extension="rels""#));
        assert!(xml.contains(r#"<Override PartName="/word/document.xml""#));
        assert!(xml.contains(r#"<Override PartName="/word/media/image2.png" ContentType="image/x-custom"/>"#));

        // The emitted index resolves every part back to its type
        let reparsed = ContentTypeMap::from_xml(xml.as_bytes()).unwrap();
        assert_eq!(reparsed.content_type(&png).unwrap(), ct::PNG);
        assert_eq!(reparsed.content_type(&doc).unwrap(), ct::WML_DOCUMENT_MAIN);
        assert_eq!(reparsed.content_type(&odd).unwrap(), "image/x-custom");
    }

    proptest! {
        #[test]
        fn prop_builtin_extension_case_insensitive(
            ext in prop::sample::select(vec!["png", "jpg", "jpeg", "jpe", "gif", "bmp", "tiff", "tif", "emf", "wmf"]),
            upper in prop::collection::vec(any::<bool>(), 4),
        ) {
            let mixed: String = ext
                .chars()
                .zip(upper.iter().cycle())
                .map(|(c, up)| if *up { c.to_ascii_uppercase() } else { c })
                .collect();
            let ct_map = ContentTypeMap::new();
            let lower = ct_map.content_type(&uri(&format!("/media/img.{ext}"))).unwrap().to_string();
            let other = ct_map.content_type(&uri(&format!("/media/img.{mixed}"))).unwrap();
            prop_assert_eq!(lower.as_str(), other);
        }
    }
}
