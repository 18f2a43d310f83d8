//! Relationship-related objects for OPC packages.
//!
//! This module provides types for managing relationships between parts in an OPC package,
//! including internal and external relationships. A relationship never owns its
//! target: internal targets are held through [`WeakPartRef`], so a part's lifetime
//! is decided by the package's part set alone.

use crate::common::xml::escape_attr;
use crate::opc::constants::{namespace, target_mode};
use crate::opc::error::{OpcError, Result};
use crate::opc::packuri::PackURI;
use crate::opc::part::{PartRef, WeakPartRef};
use smallvec::SmallVec;
use std::collections::HashMap;

/// Whether a relationship points at a package part or an external resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TargetMode {
    #[default]
    Internal,
    External,
}

impl TargetMode {
    /// Parse the `TargetMode` attribute value. Anything other than `External` is internal.
    pub fn from_attr(value: &str) -> Self {
        if value == target_mode::EXTERNAL {
            TargetMode::External
        } else {
            TargetMode::Internal
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TargetMode::Internal => target_mode::INTERNAL,
            TargetMode::External => target_mode::EXTERNAL,
        }
    }
}

/// A single relationship from a source part to a target.
///
/// Represents a connection between parts in an OPC package, identified by an rId
/// (relationship ID). Can be either internal (pointing to another part) or external
/// (pointing to an external URL). An internal relationship without a live target
/// is *dangling*: its target was missing from the package or has since been dropped,
/// and it is carried forward so that saving reproduces the original entry.
#[derive(Debug, Clone)]
pub struct Relationship {
    /// Relationship ID (e.g., "rId1", "rId2")
    r_id: String,

    /// Relationship type URI
    reltype: String,

    /// Target reference exactly as written - either a relative part reference or an external URL
    target_ref: String,

    /// Base URI for resolving relative references
    base_uri: String,

    target_mode: TargetMode,

    /// Non-owning reference to the target part; always `None` for external relationships
    target: Option<WeakPartRef>,
}

impl Relationship {
    /// Create a new relationship.
    ///
    /// A target passed for an external relationship is discarded.
    pub fn new(
        r_id: String,
        reltype: String,
        target_ref: String,
        base_uri: String,
        target_mode: TargetMode,
        target: Option<&PartRef>,
    ) -> Self {
        let target = match target_mode {
            TargetMode::Internal => target.map(PartRef::downgrade),
            TargetMode::External => None,
        };
        Self {
            r_id,
            reltype,
            target_ref,
            base_uri,
            target_mode,
            target,
        }
    }

    /// Get the relationship ID.
    #[inline]
    pub fn r_id(&self) -> &str {
        &self.r_id
    }

    /// Get the relationship type.
    #[inline]
    pub fn reltype(&self) -> &str {
        &self.reltype
    }

    /// Get the target reference as written in the `.rels` file.
    ///
    /// For internal relationships, this is a relative part reference.
    /// For external relationships, this is an absolute URL.
    #[inline]
    pub fn target_ref(&self) -> &str {
        &self.target_ref
    }

    #[inline]
    pub fn target_mode(&self) -> TargetMode {
        self.target_mode
    }

    /// Check if this is an external relationship.
    #[inline]
    pub fn is_external(&self) -> bool {
        self.target_mode == TargetMode::External
    }

    /// The target part, if this is an internal relationship whose target is still alive.
    pub fn target_part(&self) -> Option<PartRef> {
        self.target.as_ref().and_then(WeakPartRef::upgrade)
    }

    /// True for an internal relationship with no live target part.
    pub fn is_dangling(&self) -> bool {
        !self.is_external() && self.target_part().is_none()
    }

    /// True if this relationship's target is `part`.
    pub fn targets(&self, part: &PartRef) -> bool {
        self.target.as_ref().is_some_and(|weak| weak.ptr_eq(part))
    }

    /// Get the absolute target partname for internal relationships.
    ///
    /// Returns an error if this is an external relationship.
    pub fn target_partname(&self) -> Result<PackURI> {
        if self.is_external() {
            return Err(OpcError::InvalidRelationship(format!(
                "Cannot get target_partname for external relationship {}",
                self.r_id
            )));
        }
        PackURI::from_rel_ref(&self.base_uri, &self.target_ref)
    }
}

/// Collection of relationships from a single source (the package or one part).
///
/// Relationships keep their insertion order, so a collection loaded from a `.rels`
/// file serializes back in the order it was read. Collections are small, so lookups
/// by rId are linear scans over inline storage.
#[derive(Debug, Clone)]
pub struct Relationships {
    /// Base URI for resolving relative references
    base_uri: String,

    rels: SmallVec<[Relationship; 8]>,
}

impl Relationships {
    /// Create a new empty relationships collection.
    ///
    /// # Arguments
    /// * `base_uri` - Base URI for resolving relative references
    pub fn new(base_uri: impl Into<String>) -> Self {
        Self {
            base_uri: base_uri.into(),
            rels: SmallVec::new(),
        }
    }

    /// Base URI that relative targets in this collection resolve against.
    #[inline]
    pub fn base_uri(&self) -> &str {
        &self.base_uri
    }

    /// Load a relationship read from an existing package, keeping its original rId.
    ///
    /// A relationship already present under the same rId is replaced in place.
    pub fn load(
        &mut self,
        r_id: impl Into<String>,
        reltype: impl Into<String>,
        target_ref: impl Into<String>,
        target: Option<&PartRef>,
        target_mode: TargetMode,
    ) -> &Relationship {
        let rel = Relationship::new(
            r_id.into(),
            reltype.into(),
            target_ref.into(),
            self.base_uri.clone(),
            target_mode,
            target,
        );
        let idx = match self.position(&rel.r_id) {
            Some(idx) => {
                self.rels[idx] = rel;
                idx
            },
            None => {
                self.rels.push(rel);
                self.rels.len() - 1
            },
        };
        &self.rels[idx]
    }

    /// Add a new relationship, assigning the lowest unused `rIdN` of this collection.
    pub fn add(
        &mut self,
        reltype: impl Into<String>,
        target_ref: impl Into<String>,
        target: Option<&PartRef>,
        target_mode: TargetMode,
    ) -> &Relationship {
        let r_id = self.next_r_id();
        self.load(r_id, reltype, target_ref, target, target_mode)
    }

    /// Get a relationship by its ID.
    #[inline]
    pub fn get(&self, r_id: &str) -> Option<&Relationship> {
        self.rels.iter().find(|rel| rel.r_id == r_id)
    }

    /// Get or add an internal relationship to a target part.
    ///
    /// If a relationship of the given type to the target already exists,
    /// returns that relationship. Otherwise, creates a new one with the
    /// next available rId and a target reference relative to this collection's base.
    pub fn get_or_add(&mut self, reltype: &str, target: &PartRef) -> &Relationship {
        let existing = self
            .rels
            .iter()
            .position(|rel| !rel.is_external() && rel.reltype == reltype && rel.targets(target));
        match existing {
            Some(idx) => &self.rels[idx],
            None => {
                let target_ref = target.partname().relative_ref(&self.base_uri);
                self.add(reltype, target_ref, Some(target), TargetMode::Internal)
            },
        }
    }

    /// Get or add an external relationship, returning its rId.
    pub fn get_or_add_ext_rel(&mut self, reltype: &str, target_ref: &str) -> String {
        if let Some(rel) = self
            .rels
            .iter()
            .find(|rel| rel.is_external() && rel.reltype == reltype && rel.target_ref == target_ref)
        {
            return rel.r_id.clone();
        }

        self.add(reltype, target_ref, None, TargetMode::External)
            .r_id
            .clone()
    }

    /// Get the next available relationship ID.
    ///
    /// Generates IDs in the format "rId1", "rId2", etc., filling in gaps
    /// if any exist.
    fn next_r_id(&self) -> String {
        let mut used_numbers: SmallVec<[u32; 16]> = self
            .rels
            .iter()
            .filter_map(|rel| {
                rel.r_id
                    .strip_prefix("rId")
                    .and_then(|digits| atoi_simd::parse::<u32, false, false>(digits.as_bytes()).ok())
            })
            .collect();
        used_numbers.sort_unstable();

        // Find first gap or use next number
        let mut next_num = 1u32;
        for &num in &used_numbers {
            match num.cmp(&next_num) {
                std::cmp::Ordering::Equal => next_num += 1,
                std::cmp::Ordering::Greater => break,
                std::cmp::Ordering::Less => {},
            }
        }

        format!("rId{}", next_num)
    }

    /// Get the single relationship of a specific type.
    ///
    /// Returns an error if no relationship of the type is found,
    /// or if multiple relationships of the type exist.
    pub fn part_with_reltype(&self, reltype: &str) -> Result<&Relationship> {
        let mut matching = self.rels.iter().filter(|rel| rel.reltype == reltype);
        match (matching.next(), matching.next()) {
            (Some(rel), None) => Ok(rel),
            (None, _) => Err(OpcError::RelationshipNotFound(format!(
                "No relationship of type '{}'",
                reltype
            ))),
            (Some(_), Some(_)) => Err(OpcError::InvalidRelationship(format!(
                "Multiple relationships of type '{}'",
                reltype
            ))),
        }
    }

    /// Resolved internal relationships as an rId to part map.
    ///
    /// External and dangling relationships are left out.
    pub fn related_parts(&self) -> HashMap<String, PartRef> {
        self.rels
            .iter()
            .filter_map(|rel| rel.target_part().map(|part| (rel.r_id.clone(), part)))
            .collect()
    }

    /// Get an iterator over all relationships in insertion order.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &Relationship> {
        self.rels.iter()
    }

    /// Get the number of relationships in the collection.
    #[inline]
    pub fn len(&self) -> usize {
        self.rels.len()
    }

    /// Check if the collection is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rels.is_empty()
    }

    /// Remove a relationship by its ID.
    pub fn remove(&mut self, r_id: &str) -> Option<Relationship> {
        self.position(r_id).map(|idx| self.rels.remove(idx))
    }

    fn position(&self, r_id: &str) -> Option<usize> {
        self.rels.iter().position(|rel| rel.r_id == r_id)
    }

    /// Serialize relationships to `.rels` XML.
    ///
    /// Every relationship is written with its target reference as stored, so
    /// dangling relationships are emitted exactly like resolved ones.
    pub fn to_xml(&self) -> String {
        let mut xml = String::with_capacity(160 + 160 * self.rels.len());

        xml.push_str(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#);
        xml.push_str(r#"<Relationships xmlns=""#);
        xml.push_str(namespace::OPC_RELATIONSHIPS);
        xml.push_str(r#"">"#);

        for rel in &self.rels {
            let target_mode = if rel.is_external() {
                r#" TargetMode="External""#
            } else {
                ""
            };

            xml.push_str(&format!(
                r#"<Relationship Id="{}" Type="{}" Target="{}"{}/>"#,
                escape_attr(rel.r_id()),
                escape_attr(rel.reltype()),
                escape_attr(rel.target_ref()),
                target_mode
            ));
        }

        xml.push_str("</Relationships>");
        xml
    }
}

impl Default for Relationships {
    fn default() -> Self {
        Self::new(crate::opc::packuri::PACKAGE_URI)
    }
}

impl<'a> IntoIterator for &'a Relationships {
    type Item = &'a Relationship;
    type IntoIter = std::slice::Iter<'a, Relationship>;

    fn into_iter(self) -> Self::IntoIter {
        self.rels.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opc::constants::{content_type as ct, relationship_type as rt};
    use crate::opc::part::BlobPart;
    use proptest::prelude::*;

    fn blob_part(name: &str) -> PartRef {
        PartRef::new(BlobPart::new(
            PackURI::new(name).unwrap(),
            ct::XML.to_string(),
            Vec::new(),
        ))
    }

    #[test]
    fn test_relationship_creation() {
        let rel = Relationship::new(
            "rId1".to_string(),
            "http://example.com/rel".to_string(),
            "target.xml".to_string(),
            "/word".to_string(),
            TargetMode::Internal,
            None,
        );

        assert_eq!(rel.r_id(), "rId1");
        assert_eq!(rel.reltype(), "http://example.com/rel");
        assert!(!rel.is_external());
        assert!(rel.is_dangling());
        assert_eq!(rel.target_partname().unwrap().as_str(), "/word/target.xml");
    }

    #[test]
    fn test_external_never_holds_target() {
        let part = blob_part("/word/styles.xml");
        let rel = Relationship::new(
            "rId9".to_string(),
            rt::HYPERLINK.to_string(),
            "https://example.com/".to_string(),
            "/word".to_string(),
            TargetMode::External,
            Some(&part),
        );
        assert!(rel.target_part().is_none());
        assert!(!rel.is_dangling());
        assert!(rel.target_partname().is_err());
    }

    #[test]
    fn test_next_r_id() {
        let mut rels = Relationships::new("/word");
        assert_eq!(rels.next_r_id(), "rId1");

        rels.load("rId1", "type1", "target1", None, TargetMode::Internal);
        assert_eq!(rels.next_r_id(), "rId2");

        rels.load("rId3", "type1", "target3", None, TargetMode::Internal);
        rels.load("rIdFoo", "type1", "foo", None, TargetMode::Internal);
        assert_eq!(rels.next_r_id(), "rId2");
    }

    #[test]
    fn test_load_preserves_rid_and_order() {
        let mut rels = Relationships::new("/");
        rels.load("rId7", rt::OFFICE_DOCUMENT, "word/document.xml", None, TargetMode::Internal);
        rels.load("rId2", rt::CORE_PROPERTIES, "docProps/core.xml", None, TargetMode::Internal);
        rels.load("rId7", rt::OFFICE_DOCUMENT, "word/document2.xml", None, TargetMode::Internal);

        let ids: Vec<&str> = rels.iter().map(Relationship::r_id).collect();
        assert_eq!(ids, ["rId7", "rId2"]);
        assert_eq!(rels.get("rId7").unwrap().target_ref(), "word/document2.xml");
    }

    #[test]
    fn test_get_or_add() {
        let mut rels = Relationships::new("/word");
        let styles = blob_part("/word/styles.xml");
        let theme = blob_part("/word/theme/theme1.xml");

        let r_id1 = rels.get_or_add(rt::STYLES, &styles).r_id().to_string();
        assert_eq!(r_id1, "rId1");

        // Getting the same relationship should return the same rId
        let r_id2 = rels.get_or_add(rt::STYLES, &styles).r_id().to_string();
        assert_eq!(r_id2, "rId1");

        // Different target should create new relationship
        let rel3 = rels.get_or_add(rt::THEME, &theme);
        assert_eq!(rel3.r_id(), "rId2");
        assert_eq!(rel3.target_ref(), "theme/theme1.xml");
        assert!(rel3.targets(&theme));
    }

    #[test]
    fn test_get_or_add_ext_rel() {
        let mut rels = Relationships::new("/word");
        let a = rels.get_or_add_ext_rel(rt::HYPERLINK, "https://example.com/");
        let b = rels.get_or_add_ext_rel(rt::HYPERLINK, "https://example.com/");
        let c = rels.get_or_add_ext_rel(rt::HYPERLINK, "https://example.org/");
        assert_eq!(a, "rId1");
        assert_eq!(b, "rId1");
        assert_eq!(c, "rId2");
        assert!(rels.get("rId2").unwrap().is_external());
    }

    #[test]
    fn test_part_with_reltype() {
        let mut rels = Relationships::new("/");
        assert!(matches!(
            rels.part_with_reltype(rt::OFFICE_DOCUMENT),
            Err(OpcError::RelationshipNotFound(_))
        ));

        rels.add(rt::OFFICE_DOCUMENT, "word/document.xml", None, TargetMode::Internal);
        assert_eq!(rels.part_with_reltype(rt::OFFICE_DOCUMENT).unwrap().r_id(), "rId1");

        rels.add(rt::OFFICE_DOCUMENT, "word/other.xml", None, TargetMode::Internal);
        assert!(matches!(
            rels.part_with_reltype(rt::OFFICE_DOCUMENT),
            Err(OpcError::InvalidRelationship(_))
        ));
    }

    #[test]
    fn test_related_parts_skips_dangling_and_external() {
        let styles = blob_part("/word/styles.xml");
        let mut rels = Relationships::new("/word");
        rels.add(rt::STYLES, "styles.xml", Some(&styles), TargetMode::Internal);
        rels.add(rt::FONT_TABLE, "fontTable.xml", None, TargetMode::Internal);
        rels.add(rt::HYPERLINK, "https://example.com/", None, TargetMode::External);

        let related = rels.related_parts();
        assert_eq!(related.len(), 1);
        assert!(related["rId1"].ptr_eq(&styles));
    }

    #[test]
    fn test_dropped_target_becomes_dangling() {
        let mut rels = Relationships::new("/word");
        {
            let styles = blob_part("/word/styles.xml");
            rels.add(rt::STYLES, "styles.xml", Some(&styles), TargetMode::Internal);
            assert!(!rels.get("rId1").unwrap().is_dangling());
        }
        let rel = rels.get("rId1").unwrap();
        assert!(rel.is_dangling());
        assert_eq!(rel.target_ref(), "styles.xml");
    }

    #[test]
    fn test_remove() {
        let mut rels = Relationships::new("/word");
        rels.add(rt::STYLES, "styles.xml", None, TargetMode::Internal);
        rels.add(rt::THEME, "theme/theme1.xml", None, TargetMode::Internal);
        assert!(rels.remove("rId1").is_some());
        assert!(rels.remove("rId1").is_none());
        assert_eq!(rels.len(), 1);
        // The freed rId is reused
        assert_eq!(rels.add(rt::STYLES, "styles.xml", None, TargetMode::Internal).r_id(), "rId1");
    }

    #[test]
    fn test_to_xml() {
        let mut rels = Relationships::new("/word");
        rels.load("rId2", rt::STYLES, "styles.xml", None, TargetMode::Internal);
        rels.load("rId1", rt::HYPERLINK, "https://example.com/?a=1&b=2", None, TargetMode::External);

        let xml = rels.to_xml();
        assert!(xml.starts_with(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#));
        let styles_at = xml.find(r#"Id="rId2""#).unwrap();
        let link_at = xml.find(r#"Id="rId1""#).unwrap();
        assert!(styles_at < link_at, "insertion order must be kept");
        assert!(xml.contains(r#"Target="https://example.com/?a=1&amp;b=2" TargetMode="External"/>"#));
        assert!(xml.ends_with("</Relationships>"));
    }

    proptest! {
        #[test]
        fn prop_add_assigns_lowest_unused(used in prop::collection::btree_set(1u32..20, 0..12)) {
            let mut rels = Relationships::new("/");
            for n in &used {
                rels.load(format!("rId{n}"), "t", "x.xml", None, TargetMode::Internal);
            }
            let expected = (1u32..).find(|n| !used.contains(n)).unwrap();
            let r_id = rels.add("t", "y.xml", None, TargetMode::Internal).r_id().to_string();
            prop_assert_eq!(r_id, format!("rId{expected}"));
        }
    }
}
