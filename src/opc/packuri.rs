//! Provides the PackURI value type and utilities for working with package URIs.
//!
//! A PackURI represents a part name within an OPC package, following the URI format
//! defined by the Open Packaging Conventions specification.

use crate::opc::error::{OpcError, Result};

/// The package pseudo-partname, representing the package itself
pub const PACKAGE_URI: &str = "/";

/// The URI for the [Content_Types].xml part
pub const CONTENT_TYPES_URI: &str = "/[Content_Types].xml";

/// Represents a package URI, which is a partname within an OPC package.
///
/// PackURIs always begin with a forward slash, never end with one (except for the
/// package pseudo-partname `/`), and use forward slashes as path separators.
/// Case is preserved as written.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackURI {
    /// The full pack URI string (e.g., "/word/document.xml")
    uri: String,
}

impl PackURI {
    /// Create a new PackURI from a string.
    ///
    /// # Errors
    /// Returns [`OpcError::InvalidPackUri`] if the URI doesn't start with a forward
    /// slash or ends with one.
    pub fn new<S: Into<String>>(uri: S) -> Result<Self> {
        let uri = uri.into();
        if !uri.starts_with('/') {
            return Err(OpcError::InvalidPackUri(format!(
                "PackURI must begin with slash, got '{}'",
                uri
            )));
        }
        if uri.len() > 1 && uri.ends_with('/') {
            return Err(OpcError::InvalidPackUri(format!(
                "PackURI must not end with slash, got '{}'",
                uri
            )));
        }
        Ok(PackURI { uri })
    }

    /// The package pseudo-partname `/`.
    pub fn package() -> Self {
        PackURI {
            uri: PACKAGE_URI.to_string(),
        }
    }

    /// Create a PackURI from a relative reference and a base URI.
    ///
    /// This translates a relative reference (like "../styles.xml") onto a base URI
    /// (like "/word") to produce an absolute PackURI (like "/styles.xml"), the same
    /// way a relative file reference resolves against a directory. A reference that
    /// is already absolute ("/word/styles.xml") ignores the base. Any `#fragment`
    /// is dropped since it does not name a package member.
    pub fn from_rel_ref(base_uri: &str, relative_ref: &str) -> Result<Self> {
        let relative_ref = match relative_ref.find('#') {
            Some(pos) => &relative_ref[..pos],
            None => relative_ref,
        };
        if relative_ref.is_empty() {
            return Err(OpcError::InvalidPackUri(format!(
                "empty relationship target against base '{}'",
                base_uri
            )));
        }

        let joined = if relative_ref.starts_with('/') {
            relative_ref.to_string()
        } else {
            Self::join_paths(base_uri, relative_ref)
        };
        let normalized = Self::normalize_path(&joined);
        if normalized == PACKAGE_URI {
            return Err(OpcError::InvalidPackUri(format!(
                "relationship target '{}' resolves to the package root",
                relative_ref
            )));
        }
        Self::new(normalized)
    }

    /// Get the base URI (directory portion) of this PackURI.
    ///
    /// For example, "/ppt/slides" for "/ppt/slides/slide1.xml".
    /// For the package pseudo-partname "/", returns "/".
    pub fn base_uri(&self) -> &str {
        match self.uri.rfind('/') {
            Some(0) | None => "/",
            Some(pos) => &self.uri[..pos],
        }
    }

    /// Get the filename portion of this PackURI.
    ///
    /// For example, "slide1.xml" for "/ppt/slides/slide1.xml".
    /// For the package pseudo-partname "/", returns an empty string.
    pub fn filename(&self) -> &str {
        match self.uri.rfind('/') {
            Some(pos) => &self.uri[pos + 1..],
            None => "",
        }
    }

    /// Get the extension portion of this PackURI, as written.
    ///
    /// For example, "xml" for "/word/document.xml" (note: no leading period).
    /// Callers comparing extensions should do so case-insensitively.
    pub fn ext(&self) -> &str {
        let filename = self.filename();
        match filename.rfind('.') {
            Some(pos) => &filename[pos + 1..],
            None => "",
        }
    }

    /// Get the partname index for tuple partnames, or None for singleton partnames.
    ///
    /// For example, returns 21 for "/ppt/slides/slide21.xml" and None for "/ppt/presentation.xml".
    pub fn idx(&self) -> Option<u32> {
        let filename = self.filename();
        let stem = match filename.rfind('.') {
            Some(pos) => &filename[..pos],
            None => filename,
        };

        // Numeric suffix must follow at least one non-digit character ("slide21", not "21")
        let digits = stem.bytes().rev().take_while(u8::is_ascii_digit).count();
        if digits == 0 || digits == stem.len() {
            return None;
        }
        atoi_simd::parse::<u32, false, false>(&stem.as_bytes()[stem.len() - digits..]).ok()
    }

    /// Get the membername (URI with leading slash stripped).
    ///
    /// This is the form used as the Zip file membername for the package item.
    /// Returns an empty string for the package pseudo-partname "/".
    pub fn membername(&self) -> &str {
        &self.uri[1..]
    }

    /// Get the relative reference from a base URI to this PackURI.
    ///
    /// For example, PackURI("/ppt/slideLayouts/slideLayout1.xml") would return
    /// "../slideLayouts/slideLayout1.xml" for base_uri "/ppt/slides".
    pub fn relative_ref(&self, base_uri: &str) -> String {
        if base_uri == PACKAGE_URI {
            return self.membername().to_string();
        }

        let from_parts: Vec<&str> = base_uri.split('/').filter(|s| !s.is_empty()).collect();
        let to_parts: Vec<&str> = self.uri.split('/').filter(|s| !s.is_empty()).collect();

        // The filename itself never counts towards the shared directory prefix
        let common = from_parts
            .iter()
            .zip(to_parts[..to_parts.len().saturating_sub(1)].iter())
            .take_while(|(a, b)| a == b)
            .count();

        let mut result = String::new();
        for _ in common..from_parts.len() {
            result.push_str("../");
        }
        result.push_str(&to_parts[common..].join("/"));
        result
    }

    /// Get the PackURI of the .rels part corresponding to this PackURI.
    ///
    /// For example, "/word/_rels/document.xml.rels" for "/word/document.xml",
    /// and "/_rels/.rels" for the package pseudo-partname.
    pub fn rels_uri(&self) -> PackURI {
        let base_uri = self.base_uri();
        let uri = if base_uri == PACKAGE_URI {
            format!("/_rels/{}.rels", self.filename())
        } else {
            format!("{}/_rels/{}.rels", base_uri, self.filename())
        };
        PackURI { uri }
    }

    /// Get the full URI string.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.uri
    }

    /// Join two paths using forward slashes
    fn join_paths(base: &str, rel: &str) -> String {
        if base.ends_with('/') {
            format!("{}{}", base, rel)
        } else {
            format!("{}/{}", base, rel)
        }
    }

    /// Normalize a path (resolve ".." and "."); ".." never climbs above the root
    fn normalize_path(path: &str) -> String {
        let mut parts: Vec<&str> = Vec::new();

        for part in path.split('/') {
            match part {
                "" | "." => {},
                ".." => {
                    parts.pop();
                },
                _ => parts.push(part),
            }
        }

        format!("/{}", parts.join("/"))
    }
}

impl std::fmt::Display for PackURI {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.uri)
    }
}

impl AsRef<str> for PackURI {
    fn as_ref(&self) -> &str {
        &self.uri
    }
}

impl std::borrow::Borrow<str> for PackURI {
    fn borrow(&self) -> &str {
        &self.uri
    }
}

impl TryFrom<&str> for PackURI {
    type Error = OpcError;

    fn try_from(value: &str) -> Result<Self> {
        PackURI::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_packuri_new() {
        assert!(PackURI::new("/word/document.xml").is_ok());
        assert!(PackURI::new("/").is_ok());
        assert!(PackURI::new("word/document.xml").is_err());
        assert!(PackURI::new("/word/").is_err());
    }

    #[test]
    fn test_base_uri() {
        let uri = PackURI::new("/ppt/slides/slide1.xml").unwrap();
        assert_eq!(uri.base_uri(), "/ppt/slides");

        let top = PackURI::new("/[Content_Types].xml").unwrap();
        assert_eq!(top.base_uri(), "/");

        assert_eq!(PackURI::package().base_uri(), "/");
    }

    #[test]
    fn test_filename_and_ext() {
        let uri = PackURI::new("/word/media/image1.PNG").unwrap();
        assert_eq!(uri.filename(), "image1.PNG");
        assert_eq!(uri.ext(), "PNG");

        assert_eq!(PackURI::package().filename(), "");
        assert_eq!(PackURI::new("/word/noext").unwrap().ext(), "");
    }

    #[test]
    fn test_idx() {
        assert_eq!(PackURI::new("/ppt/slides/slide21.xml").unwrap().idx(), Some(21));
        assert_eq!(PackURI::new("/ppt/presentation.xml").unwrap().idx(), None);
        assert_eq!(PackURI::new("/word/2.xml").unwrap().idx(), None);
    }

    #[test]
    fn test_membername() {
        let uri = PackURI::new("/word/document.xml").unwrap();
        assert_eq!(uri.membername(), "word/document.xml");
        assert_eq!(PackURI::package().membername(), "");
    }

    #[test]
    fn test_from_rel_ref() {
        let uri = PackURI::from_rel_ref("/word", "styles.xml").unwrap();
        assert_eq!(uri.as_str(), "/word/styles.xml");

        let uri = PackURI::from_rel_ref("/ppt/slides", "../slideLayouts/slideLayout1.xml").unwrap();
        assert_eq!(uri.as_str(), "/ppt/slideLayouts/slideLayout1.xml");

        let uri = PackURI::from_rel_ref("/", "word/document.xml").unwrap();
        assert_eq!(uri.as_str(), "/word/document.xml");

        let uri = PackURI::from_rel_ref("/word", "/customXml/item1.xml").unwrap();
        assert_eq!(uri.as_str(), "/customXml/item1.xml");

        let uri = PackURI::from_rel_ref("/word", "./media/../media/image1.png").unwrap();
        assert_eq!(uri.as_str(), "/word/media/image1.png");

        let uri = PackURI::from_rel_ref("/word", "document.xml#bookmark").unwrap();
        assert_eq!(uri.as_str(), "/word/document.xml");

        assert!(PackURI::from_rel_ref("/word", "").is_err());
        assert!(PackURI::from_rel_ref("/word", "..").is_err());
    }

    #[test]
    fn test_relative_ref() {
        let uri = PackURI::new("/ppt/slideLayouts/slideLayout1.xml").unwrap();
        assert_eq!(uri.relative_ref("/ppt/slides"), "../slideLayouts/slideLayout1.xml");
        assert_eq!(uri.relative_ref("/"), "ppt/slideLayouts/slideLayout1.xml");

        let uri = PackURI::new("/word/styles.xml").unwrap();
        assert_eq!(uri.relative_ref("/word"), "styles.xml");

        let uri = PackURI::new("/docProps/core.xml").unwrap();
        assert_eq!(uri.relative_ref("/word/glossary"), "../../docProps/core.xml");
    }

    #[test]
    fn test_rels_uri() {
        let uri = PackURI::new("/word/document.xml").unwrap();
        assert_eq!(uri.rels_uri().as_str(), "/word/_rels/document.xml.rels");

        let uri = PackURI::new("/workbook.xml").unwrap();
        assert_eq!(uri.rels_uri().as_str(), "/_rels/workbook.xml.rels");

        assert_eq!(PackURI::package().rels_uri().as_str(), "/_rels/.rels");
    }

    fn segment() -> impl Strategy<Value = String> {
        "[a-zA-Z][a-zA-Z0-9_]{0,7}"
    }

    proptest! {
        #[test]
        fn prop_relative_ref_resolves_back(
            from in prop::collection::vec(segment(), 0..4),
            to in prop::collection::vec(segment(), 0..4),
            name in "[a-z]{1,8}\\.xml",
        ) {
            let base = format!("/{}", from.join("/"));
            let mut target = to.clone();
            target.push(name);
            let partname = PackURI::new(format!("/{}", target.join("/"))).unwrap();

            let rel = partname.relative_ref(&base);
            let resolved = PackURI::from_rel_ref(&base, &rel).unwrap();
            prop_assert_eq!(resolved, partname);
        }
    }
}
