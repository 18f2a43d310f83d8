//! Provides a general interface to a physical OPC package (ZIP file).
//!
//! The reader inflates every member once on open and serves blobs out of memory,
//! so the graph walk in the package reader never touches the archive again. The
//! writer accumulates a complete archive in memory and hands it back on
//! [`PhysPkgWriter::finish`]; nothing reaches the destination until then.

use crate::opc::error::{OpcError, Result};
use crate::opc::packuri::{CONTENT_TYPES_URI, PackURI};
use std::collections::HashMap;
use std::io::{Cursor, Read, Write};
use std::path::Path;
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Signature of an OLE2 compound document. Password-protected OOXML files are
/// stored in this container instead of a ZIP archive.
const OLE2_MAGIC: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

/// Upper bound on the buffer reserved up front for one member.
const MAX_PREALLOC: u64 = 16 * 1024 * 1024;

/// Physical package reader that provides access to members of a ZIP-based OPC package.
///
/// Members are addressed by pack URI string (`/word/document.xml`), not by the raw
/// ZIP entry name.
#[derive(Debug)]
pub struct PhysPkgReader {
    /// Inflated member contents keyed by pack URI
    members: HashMap<String, Vec<u8>>,

    /// Pack URIs in archive order
    order: Vec<String>,
}

impl PhysPkgReader {
    /// Open an OPC package from a file path.
    ///
    /// # Errors
    /// Returns [`OpcError::PackageNotFound`] if the path does not exist, and the
    /// errors of [`PhysPkgReader::from_bytes`] if the file is not a package.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(OpcError::PackageNotFound(path.display().to_string()));
        }

        let data = std::fs::read(path)?;
        Self::from_bytes(&data)
    }

    /// Create a reader from a reader, buffering it fully first.
    pub fn from_reader<R: Read>(mut reader: R) -> Result<Self> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        Self::from_bytes(&data)
    }

    /// Create a reader over an in-memory package.
    ///
    /// # Errors
    /// * [`OpcError::EncryptedPackage`] if the bytes are an OLE2 compound document
    /// * [`OpcError::NotAPackage`] for any other input that is not a ZIP archive,
    ///   including archives whose members are truncated or fail their checksum
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut archive = ZipArchive::new(Cursor::new(data)).map_err(|source| {
            if data.starts_with(&OLE2_MAGIC) {
                OpcError::EncryptedPackage { source }
            } else {
                OpcError::NotAPackage { source }
            }
        })?;

        let mut members = HashMap::with_capacity(archive.len());
        let mut order = Vec::with_capacity(archive.len());
        for i in 0..archive.len() {
            let mut file = archive
                .by_index(i)
                .map_err(|source| OpcError::NotAPackage { source })?;
            if file.is_dir() {
                continue;
            }

            let uri = member_uri(file.name());
            // The declared size is untrusted header data
            let capacity = file.size().min(MAX_PREALLOC) as usize;
            let mut blob = Vec::with_capacity(capacity);
            file.read_to_end(&mut blob)
                .map_err(|e| OpcError::NotAPackage { source: ZipError::Io(e) })?;
            if members.insert(uri.clone(), blob).is_none() {
                order.push(uri);
            }
        }

        Ok(Self { members, order })
    }

    /// Pack URIs of every member, in archive order.
    pub fn uris(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// True if the archive holds a member for the given pack URI.
    #[inline]
    pub fn contains(&self, pack_uri: &str) -> bool {
        self.members.contains_key(pack_uri)
    }

    /// Get the binary content of a member.
    ///
    /// # Errors
    /// Returns [`OpcError::PartNotFound`] if the member does not exist.
    pub fn blob_for(&self, pack_uri: &str) -> Result<&[u8]> {
        self.members
            .get(pack_uri)
            .map(Vec::as_slice)
            .ok_or_else(|| OpcError::PartNotFound(pack_uri.to_string()))
    }

    /// Get the content of `[Content_Types].xml`.
    pub fn content_types_xml(&self) -> Result<&[u8]> {
        self.blob_for(CONTENT_TYPES_URI)
    }

    /// Get the `.rels` XML for a source, or `None` if the source has no relationships member.
    pub fn rels_xml_for(&self, source_uri: &PackURI) -> Option<&[u8]> {
        let rels_uri = source_uri.rels_uri();
        self.members.get(rels_uri.as_str()).map(Vec::as_slice)
    }

    /// Number of (non-directory) members.
    #[inline]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Map a ZIP entry name to a pack URI string.
///
/// Producers occasionally write a leading `/` or Windows separators; both are
/// normalized away so lookups by pack URI succeed.
fn member_uri(name: &str) -> String {
    let trimmed = name.trim_start_matches(['/', '\\']);
    let mut uri = String::with_capacity(trimmed.len() + 1);
    uri.push('/');
    if trimmed.contains('\\') {
        uri.push_str(&trimmed.replace('\\', "/"));
    } else {
        uri.push_str(trimmed);
    }
    uri
}

/// Compression applied to members written by [`PhysPkgWriter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    #[default]
    Deflated,
    Stored,
}

impl Compression {
    fn method(self) -> CompressionMethod {
        match self {
            Compression::Deflated => CompressionMethod::Deflated,
            Compression::Stored => CompressionMethod::Stored,
        }
    }
}

/// Physical package writer that builds a ZIP-based OPC package in memory.
pub struct PhysPkgWriter {
    zip: ZipWriter<Cursor<Vec<u8>>>,
    options: SimpleFileOptions,
}

impl PhysPkgWriter {
    /// Create a writer that deflates every member.
    pub fn new() -> Self {
        Self::with_compression(Compression::Deflated)
    }

    pub fn with_compression(compression: Compression) -> Self {
        Self {
            zip: ZipWriter::new(Cursor::new(Vec::new())),
            options: SimpleFileOptions::default().compression_method(compression.method()),
        }
    }

    /// Write a member using the writer's compression.
    ///
    /// # Arguments
    /// * `pack_uri` - Pack URI of the member; the leading `/` is stripped for the entry name
    /// * `blob` - Member content
    pub fn write(&mut self, pack_uri: &str, blob: &[u8]) -> Result<()> {
        self.write_with(pack_uri, blob, self.options)
    }

    /// Write a member without compression.
    pub fn write_stored(&mut self, pack_uri: &str, blob: &[u8]) -> Result<()> {
        let options = self.options.compression_method(CompressionMethod::Stored);
        self.write_with(pack_uri, blob, options)
    }

    fn write_with(&mut self, pack_uri: &str, blob: &[u8], options: SimpleFileOptions) -> Result<()> {
        let name = pack_uri.strip_prefix('/').unwrap_or(pack_uri);
        self.zip.start_file(name, options)?;
        self.zip.write_all(blob)?;
        Ok(())
    }

    /// Finish the archive and return its bytes.
    pub fn finish(self) -> Result<Vec<u8>> {
        let cursor = self.zip.finish()?;
        Ok(cursor.into_inner())
    }
}

impl Default for PhysPkgWriter {
    fn default() -> Self {
        Self::new()
    }
}
