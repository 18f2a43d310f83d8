//! Objects that implement reading and writing OPC packages.
//!
//! This module provides the main [`OpcPackage`] type, which represents an Open
//! Packaging Convention package in memory. The package owns every part; the
//! relationship graph only refers to parts weakly, so dropping a part from the
//! package turns every relationship that pointed at it into a dangling one.

use crate::opc::constants::relationship_type;
use crate::opc::error::{OpcError, Result};
use crate::opc::packuri::{PACKAGE_URI, PackURI};
use crate::opc::part::{PartFactory, PartRef};
use crate::opc::phys_pkg::PhysPkgReader;
use crate::opc::pkgreader::{PackageReader, SerializedRelationship};
use crate::opc::pkgwriter::{PackageWriter, WriteOptions};
use crate::opc::rel::{Relationship, Relationships};
use std::collections::{HashMap, HashSet};
use std::io::{Read, Write};
use std::path::Path;
use tracing::debug;

/// Main API class for working with OPC packages.
///
/// OpcPackage represents an Open Packaging Convention package in memory,
/// providing access to parts, relationships, and package-level operations.
#[derive(Debug)]
pub struct OpcPackage {
    /// Package-level relationships
    rels: Relationships,

    /// Every part owned by the package, indexed by partname
    parts: HashMap<PackURI, PartRef>,
}

impl OpcPackage {
    /// Create a new empty OPC package.
    pub fn new() -> Self {
        Self {
            rels: Relationships::new(PACKAGE_URI),
            parts: HashMap::new(),
        }
    }

    /// Open an OPC package from a file.
    ///
    /// # Example
    /// ```no_run
    /// use litchi_opc::opc::package::OpcPackage;
    ///
    /// let pkg = OpcPackage::open("document.docx")?;
    /// let main = pkg.main_document_part()?;
    /// println!("{}", main.partname());
    /// # Ok::<(), litchi_opc::opc::error::OpcError>(())
    /// ```
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path, PartFactory::default())
    }

    /// Open an OPC package from a file, building parts with `factory`.
    pub fn open_with<P: AsRef<Path>>(path: P, factory: PartFactory) -> Result<Self> {
        let phys_reader = PhysPkgReader::open(path)?;
        Self::unmarshal(&phys_reader, &factory)
    }

    /// Load an OPC package from in-memory bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        Self::from_bytes_with(data, PartFactory::default())
    }

    pub fn from_bytes_with(data: &[u8], factory: PartFactory) -> Result<Self> {
        let phys_reader = PhysPkgReader::from_bytes(data)?;
        Self::unmarshal(&phys_reader, &factory)
    }

    /// Load an OPC package from a reader.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        Self::from_reader_with(reader, PartFactory::default())
    }

    pub fn from_reader_with<R: Read>(reader: R, factory: PartFactory) -> Result<Self> {
        let phys_reader = PhysPkgReader::from_reader(reader)?;
        Self::unmarshal(&phys_reader, &factory)
    }

    /// Build the in-memory package from a physical package.
    ///
    /// Parts are created by the factory in discovery order, relationships are then
    /// wired with weak targets (absent targets stay dangling), and finally every
    /// part's `after_unmarshal` hook runs in load order.
    fn unmarshal(phys_reader: &PhysPkgReader, factory: &PartFactory) -> Result<Self> {
        let mut pkg_reader = PackageReader::from_phys_reader(phys_reader)?;
        let pkg_srels = pkg_reader.take_pkg_srels();
        let sparts = pkg_reader.take_sparts();

        let mut parts: HashMap<PackURI, PartRef> = HashMap::with_capacity(sparts.len());
        let mut loaded = Vec::with_capacity(sparts.len());
        for spart in sparts {
            let part = factory.load(
                spart.partname.clone(),
                &spart.content_type,
                &spart.reltype,
                spart.blob,
            )?;
            let part = PartRef::from_boxed(part);
            parts.insert(spart.partname, part.clone());
            loaded.push((part, spart.srels));
        }

        let mut rels = Relationships::new(PACKAGE_URI);
        let mut dangling = 0usize;
        for srel in &pkg_srels {
            dangling += usize::from(load_rel(&mut rels, srel, &parts));
        }

        for (part, srels) in &loaded {
            let mut part = part.write();
            let part_rels = part.rels_mut();
            for srel in srels {
                dangling += usize::from(load_rel(part_rels, srel, &parts));
            }
        }

        for (part, _) in &loaded {
            part.write().after_unmarshal();
        }

        debug!(parts = parts.len(), dangling, "unmarshalled package");
        Ok(Self { rels, parts })
    }

    /// Save the package to a file.
    ///
    /// The archive is built completely in memory first; on error the file is not
    /// created or modified.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let bytes = self.to_bytes()?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    /// Write the package to a stream.
    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<()> {
        let bytes = self.to_bytes()?;
        writer.write_all(&bytes)?;
        Ok(())
    }

    /// Serialize the package to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        self.to_bytes_with(WriteOptions::default())
    }

    /// Serialize the package to bytes with explicit options.
    ///
    /// Only parts reachable from the package relationships are written. Each of
    /// them gets its `before_marshal` hook first.
    pub fn to_bytes_with(&self, options: WriteOptions) -> Result<Vec<u8>> {
        let parts: Vec<PartRef> = self.iter_parts().collect();
        for part in &parts {
            part.write().before_marshal();
        }
        PackageWriter::to_bytes_with(&self.rels, &parts, options)
    }

    /// Get the package-level relationships.
    #[inline]
    pub fn rels(&self) -> &Relationships {
        &self.rels
    }

    /// Get mutable access to the package-level relationships.
    #[inline]
    pub fn rels_mut(&mut self) -> &mut Relationships {
        &mut self.rels
    }

    /// Iterate over every part reachable through the relationship graph.
    ///
    /// Depth first from the package relationships, each part once, in a
    /// deterministic order: a part's targets are visited before its later siblings.
    /// External and dangling relationships are skipped. The walk keeps an explicit
    /// stack, so arbitrarily deep chains do not grow the call stack.
    pub fn iter_parts(&self) -> impl Iterator<Item = PartRef> {
        let mut result = Vec::with_capacity(self.parts.len());
        let mut visited: HashSet<PackURI> = HashSet::with_capacity(self.parts.len());
        let mut stack = vec![related_targets(&self.rels).into_iter()];

        while let Some(targets) = stack.last_mut() {
            let Some(part) = targets.next() else {
                stack.pop();
                continue;
            };
            if !visited.insert(part.partname().clone()) {
                continue;
            }
            let children = related_targets(part.read().rels());
            result.push(part);
            stack.push(children.into_iter());
        }

        result.into_iter()
    }

    /// Iterate over every relationship in the package exactly once.
    ///
    /// Depth first, in the same order as [`OpcPackage::iter_parts`]; each part's
    /// relationships are yielded the first time the part is reached. External and
    /// dangling relationships are included.
    pub fn iter_rels(&self) -> impl Iterator<Item = Relationship> {
        let mut result = Vec::new();
        let mut visited: HashSet<PackURI> = HashSet::new();
        let mut stack = vec![self.rels.iter().cloned().collect::<Vec<_>>().into_iter()];

        while let Some(rels) = stack.last_mut() {
            let Some(rel) = rels.next() else {
                stack.pop();
                continue;
            };
            let target = rel.target_part();
            result.push(rel);

            let Some(part) = target else {
                continue;
            };
            if !visited.insert(part.partname().clone()) {
                continue;
            }
            let children: Vec<Relationship> = part.read().rels().iter().cloned().collect();
            stack.push(children.into_iter());
        }

        result.into_iter()
    }

    /// Get a part by its partname.
    pub fn part(&self, partname: &PackURI) -> Option<&PartRef> {
        self.parts.get(partname)
    }

    /// Check if a part exists in the package.
    pub fn contains_part(&self, partname: &PackURI) -> bool {
        self.parts.contains_key(partname)
    }

    /// Number of parts owned by the package, reachable or not.
    pub fn part_count(&self) -> usize {
        self.parts.len()
    }

    /// Add a part to the package, returning any part it replaces.
    ///
    /// Adding a part does not relate it to anything; it is only saved once it is
    /// reachable from the package relationships.
    pub fn add_part(&mut self, part: PartRef) -> Option<PartRef> {
        self.parts.insert(part.partname().clone(), part)
    }

    /// Remove a part from the package.
    ///
    /// Relationships that targeted it become dangling once the returned handle
    /// (and any other handle) is dropped.
    pub fn drop_part(&mut self, partname: &PackURI) -> Option<PartRef> {
        self.parts.remove(partname)
    }

    /// Create or reuse a package-level relationship to `part`, returning its rId.
    ///
    /// The part is added to the package if it is not already owned by it.
    pub fn relate_to(&mut self, part: &PartRef, reltype: &str) -> String {
        if !self.parts.contains_key(part.partname()) {
            self.parts.insert(part.partname().clone(), part.clone());
        }
        self.rels.get_or_add(reltype, part).r_id().to_string()
    }

    /// Get the part the package relates to with `reltype`.
    ///
    /// # Errors
    /// * [`OpcError::RelationshipNotFound`] if there is no such relationship, or it
    ///   is external or dangling
    /// * [`OpcError::InvalidRelationship`] if there is more than one
    pub fn related_part(&self, reltype: &str) -> Result<PartRef> {
        let rel = self.rels.part_with_reltype(reltype)?;
        rel.target_part().ok_or_else(|| {
            OpcError::RelationshipNotFound(format!(
                "Relationship {} of type '{}' is external or has no target part",
                rel.r_id(),
                reltype
            ))
        })
    }

    /// Get the main document part (the target of the `officeDocument` relationship).
    pub fn main_document_part(&self) -> Result<PartRef> {
        self.related_part(relationship_type::OFFICE_DOCUMENT)
    }

    /// Find the next available partname for a part template.
    ///
    /// The first `%d` in `template` is replaced by the lowest positive number that
    /// gives a partname not already owned by the package.
    ///
    /// # Example
    /// ```
    /// # use litchi_opc::opc::package::OpcPackage;
    /// let pkg = OpcPackage::new();
    /// let next_image = pkg.next_partname("/word/media/image%d.png")?;
    /// assert_eq!(next_image.as_str(), "/word/media/image1.png");
    /// # Ok::<(), litchi_opc::opc::error::OpcError>(())
    /// ```
    pub fn next_partname(&self, template: &str) -> Result<PackURI> {
        if !template.contains("%d") {
            return Err(OpcError::InvalidPackUri(format!(
                "Partname template '{}' has no %d placeholder",
                template
            )));
        }

        // With n parts, at least one of n + 1 candidates is free
        for n in 1..=self.parts.len() + 1 {
            let candidate = PackURI::new(template.replacen("%d", &n.to_string(), 1))?;
            if !self.parts.contains_key(&candidate) {
                return Ok(candidate);
            }
        }
        Err(OpcError::InvalidPackUri(format!(
            "No free partname for template '{}'",
            template
        )))
    }
}

impl Default for OpcPackage {
    fn default() -> Self {
        Self::new()
    }
}

/// Load one serialized relationship into `rels`, returning true if it is dangling.
fn load_rel(
    rels: &mut Relationships,
    srel: &SerializedRelationship,
    parts: &HashMap<PackURI, PartRef>,
) -> bool {
    let target = if srel.is_external() {
        None
    } else {
        srel.target_partname()
            .ok()
            .and_then(|partname| parts.get(&partname))
    };
    let dangling = !srel.is_external() && target.is_none();
    rels.load(
        srel.r_id.as_str(),
        srel.reltype.as_str(),
        srel.target_ref.as_str(),
        target,
        srel.target_mode,
    );
    dangling
}

/// Live internal targets of a relationship collection, in order.
fn related_targets(rels: &Relationships) -> Vec<PartRef> {
    rels.iter().filter_map(Relationship::target_part).collect()
}
