//! Open Packaging Convention (OPC) objects related to package parts.
//!
//! This module provides the [`Part`] trait with its two built-in implementations,
//! [`BlobPart`] for opaque binary content and [`XmlPart`] for parsed, mutable XML,
//! plus the [`PartFactory`] that chooses an implementation while a package loads.
//!
//! Parts live behind [`PartRef`], a shared handle owned by the package. Relationships
//! hold a [`WeakPartRef`] instead, so pointing at a part never keeps it alive.

use crate::opc::error::{OpcError, Result};
use crate::opc::oxml::{XmlDocument, XmlElement};
use crate::opc::packuri::PackURI;
use crate::opc::rel::Relationships;
use memchr::memmem;
use parking_lot::{
    MappedRwLockReadGuard, MappedRwLockWriteGuard, RwLock, RwLockReadGuard, RwLockWriteGuard,
};
use std::any::Any;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

/// Trait representing a part in an OPC package.
///
/// Parts are the fundamental units of content in an OPC package. Each part
/// has a unique partname (PackURI), a content type, and may have relationships
/// to other parts.
///
/// Domain types implement this trait to give a part richer behavior; register them
/// with a [`PartFactory`] and recover the concrete type through [`PartRef::read_as`].
pub trait Part: Any + Send + Sync + fmt::Debug {
    /// Get the partname of this part.
    fn partname(&self) -> &PackURI;

    /// Get the content type of this part.
    fn content_type(&self) -> &str;

    /// Get the serialized content of this part.
    ///
    /// XML parts serialize their current tree on every call, so the result always
    /// reflects the latest mutation.
    fn blob(&self) -> Result<Cow<'_, [u8]>>;

    /// Get the relationships for this part.
    fn rels(&self) -> &Relationships;

    /// Get mutable access to the relationships for this part.
    fn rels_mut(&mut self) -> &mut Relationships;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Called on every reachable part right before the package is serialized.
    fn before_marshal(&mut self) {}

    /// Called on every loaded part once the whole package graph is wired up.
    fn after_unmarshal(&mut self) {}

    /// Add or get a relationship to another part.
    ///
    /// If a relationship of the given type to the target already exists,
    /// returns its rId. Otherwise, creates a new relationship and returns
    /// the new rId.
    fn relate_to(&mut self, target: &PartRef, reltype: &str) -> String {
        self.rels_mut().get_or_add(reltype, target).r_id().to_string()
    }

    /// Add or get an external relationship.
    fn relate_to_ext(&mut self, target_url: &str, reltype: &str) -> String {
        self.rels_mut().get_or_add_ext_rel(reltype, target_url)
    }

    /// Get the target reference for a relationship ID.
    fn target_ref(&self, r_id: &str) -> Result<&str> {
        self.rels()
            .get(r_id)
            .map(|rel| rel.target_ref())
            .ok_or_else(|| OpcError::RelationshipNotFound(format!("rId: {}", r_id)))
    }

    /// Count references to a relationship ID in the part content.
    ///
    /// Counts `r:id="…"` attributes in the serialized blob. Returns 0 when the
    /// blob cannot be produced.
    fn rel_ref_count(&self, r_id: &str) -> usize {
        let Ok(blob) = self.blob() else {
            return 0;
        };
        let pattern = format!(r#"r:id="{}""#, r_id);
        memmem::find_iter(&blob, pattern.as_bytes()).count()
    }

    /// Remove a relationship unless the content still references it more than once.
    ///
    /// Returns true if the relationship was removed.
    fn drop_rel(&mut self, r_id: &str) -> bool {
        if self.rel_ref_count(r_id) < 2 {
            self.rels_mut().remove(r_id).is_some()
        } else {
            false
        }
    }
}

type SharedPart = Arc<RwLock<Box<dyn Part>>>;

/// Shared handle to a part owned by a package.
///
/// The partname is cached on the handle so it can be read while the part itself is
/// locked, e.g. when a part relates to itself.
#[derive(Clone)]
pub struct PartRef {
    partname: PackURI,
    inner: SharedPart,
}

impl PartRef {
    /// Wrap a concrete part.
    pub fn new<P: Part>(part: P) -> Self {
        Self::from_boxed(Box::new(part))
    }

    pub fn from_boxed(part: Box<dyn Part>) -> Self {
        Self {
            partname: part.partname().clone(),
            inner: Arc::new(RwLock::new(part)),
        }
    }

    #[inline]
    pub fn partname(&self) -> &PackURI {
        &self.partname
    }

    /// Lock the part for reading.
    #[inline]
    pub fn read(&self) -> RwLockReadGuard<'_, Box<dyn Part>> {
        self.inner.read()
    }

    /// Lock the part for writing.
    #[inline]
    pub fn write(&self) -> RwLockWriteGuard<'_, Box<dyn Part>> {
        self.inner.write()
    }

    /// Lock the part for reading as its concrete type, or `None` if it is another type.
    pub fn read_as<T: Part>(&self) -> Option<MappedRwLockReadGuard<'_, T>> {
        RwLockReadGuard::try_map(self.inner.read(), |part| part.as_any().downcast_ref::<T>()).ok()
    }

    /// Lock the part for writing as its concrete type, or `None` if it is another type.
    pub fn write_as<T: Part>(&self) -> Option<MappedRwLockWriteGuard<'_, T>> {
        RwLockWriteGuard::try_map(self.inner.write(), |part| {
            part.as_any_mut().downcast_mut::<T>()
        })
        .ok()
    }

    /// Create a non-owning handle to this part.
    pub fn downgrade(&self) -> WeakPartRef {
        WeakPartRef {
            partname: self.partname.clone(),
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// True if both handles point at the same part.
    #[inline]
    pub fn ptr_eq(&self, other: &PartRef) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for PartRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartRef")
            .field("partname", &self.partname)
            .finish_non_exhaustive()
    }
}

/// Non-owning handle to a part, held by relationships.
#[derive(Debug, Clone)]
pub struct WeakPartRef {
    partname: PackURI,
    inner: Weak<RwLock<Box<dyn Part>>>,
}

impl WeakPartRef {
    /// Partname the handle was created for.
    #[inline]
    pub fn partname(&self) -> &PackURI {
        &self.partname
    }

    /// Get a strong handle if the part is still owned by someone.
    pub fn upgrade(&self) -> Option<PartRef> {
        self.inner.upgrade().map(|inner| PartRef {
            partname: self.partname.clone(),
            inner,
        })
    }

    #[inline]
    pub fn ptr_eq(&self, part: &PartRef) -> bool {
        std::ptr::eq(self.inner.as_ptr(), Arc::as_ptr(&part.inner))
    }
}

/// A basic implementation of a Part that stores binary content.
///
/// This is the default part type for content no registered constructor claims.
#[derive(Debug)]
pub struct BlobPart {
    /// The partname (URI) of this part
    partname: PackURI,

    /// The content type of this part
    content_type: String,

    /// The binary content of this part
    blob: Vec<u8>,

    /// Relationships from this part to other parts
    rels: Relationships,
}

impl BlobPart {
    /// Create a new BlobPart.
    ///
    /// # Arguments
    /// * `partname` - The partname (URI) of this part
    /// * `content_type` - The content type of this part
    /// * `blob` - The binary content of this part
    pub fn new(partname: PackURI, content_type: String, blob: Vec<u8>) -> Self {
        let rels = Relationships::new(partname.base_uri());
        Self {
            partname,
            content_type,
            blob,
            rels,
        }
    }

    /// Replace the content.
    pub fn set_blob(&mut self, blob: Vec<u8>) {
        self.blob = blob;
    }
}

impl Part for BlobPart {
    fn partname(&self) -> &PackURI {
        &self.partname
    }

    fn content_type(&self) -> &str {
        &self.content_type
    }

    fn blob(&self) -> Result<Cow<'_, [u8]>> {
        Ok(Cow::Borrowed(&self.blob))
    }

    fn rels(&self) -> &Relationships {
        &self.rels
    }

    fn rels_mut(&mut self) -> &mut Relationships {
        &mut self.rels
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// An XML part whose content is held as a parsed, mutable tree.
///
/// The XML is parsed once on load. Callers edit the tree through [`XmlPart::root_mut`]
/// and [`Part::blob`] serializes the tree as it stands.
#[derive(Debug)]
pub struct XmlPart {
    /// The partname (URI) of this part
    partname: PackURI,

    /// The content type of this part
    content_type: String,

    document: XmlDocument,

    /// Relationships from this part to other parts
    rels: Relationships,
}

impl XmlPart {
    pub fn new(partname: PackURI, content_type: String, document: XmlDocument) -> Self {
        let rels = Relationships::new(partname.base_uri());
        Self {
            partname,
            content_type,
            document,
            rels,
        }
    }

    /// Load an XML part by parsing raw XML.
    ///
    /// # Errors
    /// Returns [`OpcError::MalformedXml`] naming the part if the XML does not parse.
    pub fn load(partname: PackURI, content_type: String, blob: &[u8]) -> Result<Self> {
        let document =
            XmlDocument::parse(blob).map_err(|e| OpcError::malformed(partname.as_str(), e))?;
        Ok(Self::new(partname, content_type, document))
    }

    /// Create an XML part around an existing root element.
    pub fn from_element(partname: PackURI, content_type: String, root: XmlElement) -> Self {
        Self::new(partname, content_type, XmlDocument::new(root))
    }

    /// A constructor suitable for [`PartFactory::register`].
    pub fn constructor() -> PartConstructor {
        Arc::new(
            |partname: PackURI, content_type: &str, _reltype: &str, blob: Vec<u8>| {
                let part = XmlPart::load(partname, content_type.to_string(), &blob)?;
                Ok(Box::new(part) as Box<dyn Part>)
            },
        )
    }

    #[inline]
    pub fn root(&self) -> &XmlElement {
        self.document.root()
    }

    #[inline]
    pub fn root_mut(&mut self) -> &mut XmlElement {
        self.document.root_mut()
    }

    /// Replace the root element.
    pub fn set_root(&mut self, root: XmlElement) {
        self.document.set_root(root);
    }

    #[inline]
    pub fn document(&self) -> &XmlDocument {
        &self.document
    }
}

impl Part for XmlPart {
    fn partname(&self) -> &PackURI {
        &self.partname
    }

    fn content_type(&self) -> &str {
        &self.content_type
    }

    fn blob(&self) -> Result<Cow<'_, [u8]>> {
        Ok(Cow::Owned(self.document.to_bytes()))
    }

    fn rels(&self) -> &Relationships {
        &self.rels
    }

    fn rels_mut(&mut self) -> &mut Relationships {
        &mut self.rels
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn rel_ref_count(&self, r_id: &str) -> usize {
        fn count(el: &XmlElement, r_id: &str) -> usize {
            let own = el
                .attributes()
                .filter(|(key, value)| *key == "r:id" && *value == r_id)
                .count();
            own + el.child_elements().map(|child| count(child, r_id)).sum::<usize>()
        }
        count(self.root(), r_id)
    }
}

/// Builds a part from its partname, content type, the type of the relationship it
/// was reached through, and its raw content.
pub type PartConstructor =
    Arc<dyn Fn(PackURI, &str, &str, Vec<u8>) -> Result<Box<dyn Part>> + Send + Sync>;

/// Chooses a constructor from a content type and relationship type, or defers with `None`.
pub type PartSelector = Arc<dyn Fn(&str, &str) -> Option<PartConstructor> + Send + Sync>;

/// Factory for creating Part instances while a package loads.
///
/// Lookup order:
/// 1. the selector, if one is set and it returns a constructor
/// 2. the constructor registered for the exact content type
/// 3. [`XmlPart`] for XML content types, when [`PartFactory::with_xml_fallback`] is on
/// 4. [`BlobPart`]
#[derive(Clone, Default)]
pub struct PartFactory {
    constructors: HashMap<String, PartConstructor>,
    selector: Option<PartSelector>,
    xml_fallback: bool,
}

impl PartFactory {
    /// Create a factory with no registrations; every part loads as a [`BlobPart`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Load parts with an XML content type as [`XmlPart`] unless something more
    /// specific claims them.
    pub fn with_xml_fallback(mut self) -> Self {
        self.xml_fallback = true;
        self
    }

    /// Map a content type to a constructor, replacing any previous registration.
    pub fn register<F>(&mut self, content_type: impl Into<String>, constructor: F)
    where
        F: Fn(PackURI, &str, &str, Vec<u8>) -> Result<Box<dyn Part>> + Send + Sync + 'static,
    {
        self.constructors
            .insert(content_type.into(), Arc::new(constructor));
    }

    /// Set a selector that is consulted before the content-type registry.
    pub fn set_selector<F>(&mut self, selector: F)
    where
        F: Fn(&str, &str) -> Option<PartConstructor> + Send + Sync + 'static,
    {
        self.selector = Some(Arc::new(selector));
    }

    /// Build a part, selecting the constructor as described on [`PartFactory`].
    pub fn load(
        &self,
        partname: PackURI,
        content_type: &str,
        reltype: &str,
        blob: Vec<u8>,
    ) -> Result<Box<dyn Part>> {
        if let Some(constructor) = self
            .selector
            .as_ref()
            .and_then(|select| select(content_type, reltype))
        {
            return constructor(partname, content_type, reltype, blob);
        }

        if let Some(constructor) = self.constructors.get(content_type) {
            return constructor(partname, content_type, reltype, blob);
        }

        if self.xml_fallback && Self::is_xml_content_type(content_type) {
            return Ok(Box::new(XmlPart::load(partname, content_type.to_string(), &blob)?));
        }

        Ok(Box::new(BlobPart::new(partname, content_type.to_string(), blob)))
    }

    /// Check if a content type represents XML content.
    #[inline]
    pub fn is_xml_content_type(content_type: &str) -> bool {
        content_type.ends_with("+xml") || content_type.ends_with("/xml")
    }
}

impl fmt::Debug for PartFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut registered: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        registered.sort_unstable();
        f.debug_struct("PartFactory")
            .field("registered", &registered)
            .field("has_selector", &self.selector.is_some())
            .field("xml_fallback", &self.xml_fallback)
            .finish()
    }
}
