/// Open Packaging Conventions (OPC) implementation.
///
/// This module implements the packaging layer shared by the Office Open XML
/// formats: a ZIP container whose members are parts, typed through
/// `[Content_Types].xml` and connected by `.rels` relationship members.
/// It includes support for:
///
/// - Package structure (parts, relationships, dangling relationships)
/// - Content type management
/// - ZIP-based physical packaging
/// - Pluggable part construction through [`PartFactory`]
///
/// # Performance Features
///
/// - Uses `memchr` for fast relationship reference counting
/// - Uses `atoi_simd` for fast rId number parsing
/// - Uses `quick-xml` for XML parsing
/// - Uses `phf` for the static content-type and namespace tables
pub mod constants;
pub mod content_types;
pub mod error;
pub mod oxml;
pub mod package;
pub mod packuri;
pub mod part;
pub mod phys_pkg;
pub mod pkgreader;
pub mod pkgwriter;
pub mod rel;

// Re-export commonly used types
pub use content_types::ContentTypeMap;
pub use error::{OpcError, Result};
pub use oxml::{XmlDocument, XmlElement, XmlNode};
pub use package::OpcPackage;
pub use packuri::PackURI;
pub use part::{BlobPart, Part, PartFactory, PartRef, WeakPartRef, XmlPart};
pub use phys_pkg::{Compression, PhysPkgReader, PhysPkgWriter};
pub use pkgreader::PackageReader;
pub use pkgwriter::{PackageWriter, WriteOptions};
pub use rel::{Relationship, Relationships, TargetMode};
