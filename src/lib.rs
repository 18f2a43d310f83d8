//! Litchi OPC - an Open Packaging Conventions engine for Office documents
//!
//! This library reads and writes the ZIP-based packages used by `.docx`, `.xlsx`
//! and `.pptx` files. It loads the relationship graph into memory, lets parts be
//! edited or replaced, and saves the package back without losing anything it could
//! not resolve.
//!
//! # Features
//!
//! - **Graph loading**: parts are discovered by walking relationships from the
//!   package root, not by listing the archive
//! - **Dangling relationships**: relationships to missing parts are kept and
//!   written back unchanged
//! - **Pluggable parts**: a [`PartFactory`](opc::PartFactory) builds domain types
//!   by content type or relationship type; unknown parts stay opaque blobs
//! - **Mutable XML parts**: XML parts are held as a tree and re-serialized on save
//!
//! # Example - Reading and saving a DOCX package
//!
//! ```no_run
//! use litchi_opc::OpcPackage;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let pkg = OpcPackage::open("document.docx")?;
//!
//! for part in pkg.iter_parts() {
//!     let part = part.read();
//!     println!("{} ({})", part.partname(), part.content_type());
//! }
//!
//! pkg.save("copy.docx")?;
//! # Ok(())
//! # }
//! ```
//!
//! # Example - Custom part types
//!
//! ```no_run
//! use litchi_opc::opc::constants::content_type;
//! use litchi_opc::{OpcPackage, PartFactory, XmlPart};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut factory = PartFactory::new();
//! factory.register(content_type::WML_STYLES, |partname, ct, _reltype, blob| {
//!     Ok(Box::new(XmlPart::load(partname, ct.to_string(), &blob)?) as Box<dyn litchi_opc::Part>)
//! });
//!
//! let pkg = OpcPackage::open_with("document.docx", factory)?;
//! let main = pkg.main_document_part()?;
//! println!("main document: {}", main.partname());
//! # Ok(())
//! # }
//! ```

pub mod common;
pub mod opc;

pub use opc::{
    OpcError, OpcPackage, PackURI, Part, PartFactory, PartRef, Relationship, Relationships,
    Result, XmlPart,
};
