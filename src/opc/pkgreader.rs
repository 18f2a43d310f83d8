//! Low-level, read-only API to a serialized Open Packaging Convention (OPC) package.
//!
//! The [`PackageReader`] discovers parts by walking the relationship graph from the
//! package root, depth first. Members that are never reached through a relationship
//! are not loaded. A relationship whose target is absent from the archive, or present
//! without a resolvable content type, is kept in its owner's serialized
//! relationships but produces no part; the package layer later turns it into a
//! dangling relationship so it survives a save.

use crate::opc::constants::normalize_reltype;
use crate::opc::content_types::ContentTypeMap;
use crate::opc::error::{OpcError, Result};
use crate::opc::packuri::{CONTENT_TYPES_URI, PACKAGE_URI, PackURI};
use crate::opc::phys_pkg::PhysPkgReader;
use crate::opc::rel::TargetMode;
use quick_xml::Reader;
use quick_xml::events::Event;
use smallvec::SmallVec;
use std::collections::HashSet;
use tracing::{debug, warn};

/// Serialized relationships of one source, in document order.
pub type SerializedRelationships = SmallVec<[SerializedRelationship; 8]>;

/// Serialized part with its content and relationships.
///
/// Represents a part as loaded from the physical package, before
/// being converted into a Part object.
#[derive(Debug)]
pub struct SerializedPart {
    /// The partname (URI) of this part
    pub partname: PackURI,

    /// The content type of this part
    pub content_type: String,

    /// Type of the relationship through which the walk first reached this part
    pub reltype: String,

    /// The binary content of this part
    pub blob: Vec<u8>,

    /// Serialized relationships from this part
    pub srels: SerializedRelationships,
}

/// Serialized relationship as read from a .rels file.
///
/// Contains all relationship information in string form, before
/// being converted into Relationship objects with resolved part references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializedRelationship {
    /// Base URI for resolving relative references
    pub base_uri: String,

    /// Relationship ID (e.g., "rId1")
    pub r_id: String,

    /// Relationship type URI, strict OOXML types already mapped to transitional
    pub reltype: String,

    /// Target reference (relative URI or external URL)
    pub target_ref: String,

    /// Internal part reference or external resource
    pub target_mode: TargetMode,
}

impl SerializedRelationship {
    /// Check if this is an external relationship.
    #[inline]
    pub fn is_external(&self) -> bool {
        self.target_mode == TargetMode::External
    }

    /// Get the target partname for internal relationships.
    ///
    /// Resolves the relative target reference against the base URI
    /// to produce an absolute PackURI.
    pub fn target_partname(&self) -> Result<PackURI> {
        if self.is_external() {
            return Err(OpcError::InvalidRelationship(
                "Cannot get target_partname for external relationship".to_string(),
            ));
        }
        PackURI::from_rel_ref(&self.base_uri, &self.target_ref)
    }
}

/// Package reader that provides access to serialized parts and relationships.
#[derive(Debug, Default)]
pub struct PackageReader {
    /// Package-level relationships
    pkg_srels: SerializedRelationships,

    /// Serialized parts in discovery (depth-first) order
    sparts: Vec<SerializedPart>,
}

impl PackageReader {
    /// Read the content-type index and root relationships, then walk the graph.
    ///
    /// # Errors
    /// * [`OpcError::PartNotFound`] if `[Content_Types].xml` is missing
    /// * [`OpcError::MalformedXml`] if `[Content_Types].xml` or any `.rels` member
    ///   does not parse
    pub fn from_phys_reader(phys_reader: &PhysPkgReader) -> Result<Self> {
        let content_types = ContentTypeMap::from_xml(phys_reader.content_types_xml()?)
            .map_err(|e| OpcError::malformed(CONTENT_TYPES_URI, e))?;

        let pkg_srels = Self::load_srels(phys_reader, &PackURI::package())?;
        let sparts = Self::walk_parts(phys_reader, &content_types, &pkg_srels)?;

        debug!(
            members = phys_reader.len(),
            parts = sparts.len(),
            root_rels = pkg_srels.len(),
            "read package"
        );
        Ok(Self { pkg_srels, sparts })
    }

    /// Read and parse the relationships member of a source, if it has one.
    fn load_srels(phys_reader: &PhysPkgReader, source_uri: &PackURI) -> Result<SerializedRelationships> {
        match phys_reader.rels_xml_for(source_uri) {
            Some(rels_xml) => parse_rels_xml(rels_xml, source_uri.base_uri())
                .map_err(|e| OpcError::malformed(source_uri.rels_uri().as_str(), e)),
            None => Ok(SmallVec::new()),
        }
    }

    /// Discover parts depth first, visiting each partname at most once.
    ///
    /// A part's children are explored before its remaining siblings. Targets that
    /// are skipped are not marked visited, so a later relationship to the same
    /// partname is examined again.
    fn walk_parts(
        phys_reader: &PhysPkgReader,
        content_types: &ContentTypeMap,
        pkg_srels: &[SerializedRelationship],
    ) -> Result<Vec<SerializedPart>> {
        let mut sparts: Vec<SerializedPart> = Vec::with_capacity(32);
        let mut visited: HashSet<PackURI> = HashSet::with_capacity(32);

        // (source part index or None for the package, next relationship to examine)
        let mut stack: Vec<(Option<usize>, usize)> = vec![(None, 0)];

        while let Some(&(owner, cursor)) = stack.last() {
            let srels = match owner {
                Some(idx) => &sparts[idx].srels[..],
                None => pkg_srels,
            };
            let Some(srel) = srels.get(cursor) else {
                stack.pop();
                continue;
            };
            if let Some(top) = stack.last_mut() {
                top.1 += 1;
            }

            if srel.is_external() {
                continue;
            }

            let source = owner.map_or(PACKAGE_URI, |idx| sparts[idx].partname.as_str());
            let partname = match srel.target_partname() {
                Ok(partname) => partname,
                Err(err) => {
                    warn!(
                        source,
                        r_id = %srel.r_id,
                        reltype = %srel.reltype,
                        target_ref = %srel.target_ref,
                        error = %err,
                        "unresolvable relationship target; preserving dangling relationship"
                    );
                    continue;
                },
            };
            if visited.contains(&partname) {
                continue;
            }

            // Presence first: a missing member is dangling regardless of content types
            if !phys_reader.contains(partname.as_str()) {
                warn!(
                    source,
                    partname = %partname,
                    r_id = %srel.r_id,
                    reltype = %srel.reltype,
                    "relationship target missing from package; preserving dangling relationship"
                );
                continue;
            }

            let content_type = match content_types.content_type(&partname) {
                Ok(content_type) => content_type.to_string(),
                Err(_) => {
                    warn!(
                        source,
                        partname = %partname,
                        r_id = %srel.r_id,
                        reltype = %srel.reltype,
                        "relationship target has no content type; preserving dangling relationship"
                    );
                    continue;
                },
            };

            let reltype = srel.reltype.clone();
            let blob = phys_reader.blob_for(partname.as_str())?.to_vec();
            let srels = Self::load_srels(phys_reader, &partname)?;

            visited.insert(partname.clone());
            sparts.push(SerializedPart {
                partname,
                content_type,
                reltype,
                blob,
                srels,
            });
            stack.push((Some(sparts.len() - 1), 0));
        }

        Ok(sparts)
    }

    /// Get an iterator over all serialized parts.
    pub fn iter_sparts(&self) -> impl Iterator<Item = &SerializedPart> {
        self.sparts.iter()
    }

    /// Get package-level relationships.
    pub fn pkg_srels(&self) -> &[SerializedRelationship] {
        &self.pkg_srels
    }

    /// Take ownership of package-level relationships.
    pub fn take_pkg_srels(&mut self) -> SerializedRelationships {
        std::mem::take(&mut self.pkg_srels)
    }

    /// Take ownership of all serialized parts.
    pub fn take_sparts(&mut self) -> Vec<SerializedPart> {
        std::mem::take(&mut self.sparts)
    }
}

/// Parse a `.rels` member into serialized relationships.
///
/// `Relationship` elements missing `Id`, `Type` or `Target` are ignored. An empty
/// member yields no relationships; any other content must have a `Relationships`
/// root element.
pub fn parse_rels_xml(rels_xml: &[u8], base_uri: &str) -> Result<SerializedRelationships> {
    let mut srels = SmallVec::new();
    if rels_xml.iter().all(u8::is_ascii_whitespace) {
        return Ok(srels);
    }

    let mut reader = Reader::from_reader(rels_xml);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut saw_root = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Empty(ref e)) | Ok(Event::Start(ref e)) => match e.local_name().as_ref() {
                b"Relationships" => saw_root = true,
                b"Relationship" => {
                    let mut r_id = None;
                    let mut reltype = None;
                    let mut target_ref = None;
                    let mut target_mode = TargetMode::Internal;

                    for attr in e.attributes() {
                        let attr = attr?;
                        match attr.key.as_ref() {
                            b"Id" => r_id = Some(attr.unescape_value()?.into_owned()),
                            b"Type" => {
                                reltype = Some(normalize_reltype(&attr.unescape_value()?).into_owned())
                            },
                            b"Target" => target_ref = Some(attr.unescape_value()?.into_owned()),
                            b"TargetMode" => {
                                target_mode = TargetMode::from_attr(&attr.unescape_value()?)
                            },
                            _ => {},
                        }
                    }

                    match (r_id, reltype, target_ref) {
                        (Some(r_id), Some(reltype), Some(target_ref)) => {
                            srels.push(SerializedRelationship {
                                base_uri: base_uri.to_string(),
                                r_id,
                                reltype,
                                target_ref,
                                target_mode,
                            });
                        },
                        (r_id, reltype, target_ref) => {
                            warn!(
                                source = base_uri,
                                r_id = r_id.as_deref().unwrap_or_default(),
                                reltype = reltype.as_deref().unwrap_or_default(),
                                target = target_ref.as_deref().unwrap_or_default(),
                                "dropping relationship without Id, Type or Target"
                            );
                        },
                    }
                },
                _ => {},
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.into()),
            _ => {},
        }
        buf.clear();
    }

    if !saw_root {
        return Err(OpcError::XmlError(
            "Rels parse error: missing <Relationships> root element".to_string(),
        ));
    }
    Ok(srels)
}
