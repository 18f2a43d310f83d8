//! Error types for OPC package operations.
//!
//! Transport failures (not a ZIP archive, OLE2 encrypted container) are kept
//! apart from structural failures so callers can tell a password-protected
//! document from a corrupt one. The low-level cause is always reachable through
//! [`std::error::Error::source`].

use thiserror::Error;

#[derive(Error, Debug)]
pub enum OpcError {
    #[error("Package not found: {0}")]
    PackageNotFound(String),

    #[error("Not an OPC package (not a valid zip archive): {source}")]
    NotAPackage {
        #[source]
        source: zip::result::ZipError,
    },

    #[error("Encrypted package: input is an OLE2 compound document, not a zip archive")]
    EncryptedPackage {
        #[source]
        source: zip::result::ZipError,
    },

    #[error("Invalid pack URI: {0}")]
    InvalidPackUri(String),

    #[error("Part not found: {0}")]
    PartNotFound(String),

    #[error("Relationship not found: {0}")]
    RelationshipNotFound(String),

    #[error("Content type not found for partname: {0}")]
    ContentTypeNotFound(String),

    #[error("Invalid relationship: {0}")]
    InvalidRelationship(String),

    #[error("Malformed XML in {member}: {source}")]
    MalformedXml {
        member: String,
        #[source]
        source: Box<OpcError>,
    },

    #[error("XML parsing error: {0}")]
    XmlError(String),

    #[error("Quick-XML error: {0}")]
    QuickXmlError(#[from] quick_xml::Error),

    #[error("Failed to produce blob for part {partname}: {source}")]
    Blob {
        partname: String,
        #[source]
        source: Box<OpcError>,
    },

    #[error("ZIP error: {0}")]
    ZipError(#[from] zip::result::ZipError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("UTF-8 conversion error: {0}")]
    Utf8Error(#[from] std::str::Utf8Error),

    #[error("Attribute error: {0}")]
    AttrError(#[from] quick_xml::events::attributes::AttrError),
}

impl OpcError {
    /// Wrap a parse failure with the name of the package member it came from.
    pub(crate) fn malformed(member: impl Into<String>, source: OpcError) -> Self {
        OpcError::MalformedXml {
            member: member.into(),
            source: Box::new(source),
        }
    }

    /// True if the input was an OLE2 compound document (password-protected package).
    pub fn is_encrypted(&self) -> bool {
        matches!(self, OpcError::EncryptedPackage { .. })
    }

    /// True if the input could not be opened as a zip archive for any reason
    /// other than being an encrypted package.
    pub fn is_not_a_package(&self) -> bool {
        matches!(self, OpcError::NotAPackage { .. })
    }
}

pub type Result<T> = std::result::Result<T, OpcError>;
