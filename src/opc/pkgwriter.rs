//! Package writer for OPC packages.
//!
//! This module serializes a set of parts and the package-level relationships into
//! a complete archive: `[Content_Types].xml`, `_rels/.rels`, then every part blob
//! followed by its own `.rels` member when it has relationships.
//!
//! Every part blob is produced before the first byte is written, so a part that
//! fails to serialize aborts the whole save and the destination is never touched.

use crate::opc::content_types::ContentTypesItem;
use crate::opc::error::{OpcError, Result};
use crate::opc::packuri::{CONTENT_TYPES_URI, PackURI};
use crate::opc::part::PartRef;
use crate::opc::phys_pkg::{Compression, PhysPkgWriter};
use crate::opc::rel::Relationships;
use std::io::Write;
use std::path::Path;
use tracing::debug;

/// Options for serializing a package.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOptions {
    /// Compression for part blobs. `[Content_Types].xml` and `.rels` members are
    /// always deflated.
    pub compression: Compression,
}

impl WriteOptions {
    pub fn stored() -> Self {
        Self {
            compression: Compression::Stored,
        }
    }
}

/// One part, fully serialized and ready to be written.
struct PartPayload {
    partname: PackURI,
    content_type: String,
    blob: Vec<u8>,
    rels_xml: Option<String>,
}

/// Package writer that serializes OPC parts to a ZIP archive.
///
/// # Example
///
/// ```no_run
/// use litchi_opc::opc::package::OpcPackage;
/// use litchi_opc::opc::pkgwriter::PackageWriter;
///
/// let pkg = OpcPackage::open("input.docx")?;
/// let parts: Vec<_> = pkg.iter_parts().collect();
/// let bytes = PackageWriter::to_bytes(pkg.rels(), &parts)?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct PackageWriter;

impl PackageWriter {
    /// Write a package to a file.
    ///
    /// The file is created only after the whole archive has been built.
    pub fn save<P: AsRef<Path>>(path: P, root_rels: &Relationships, parts: &[PartRef]) -> Result<()> {
        let bytes = Self::to_bytes(root_rels, parts)?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    /// Write a package to a stream.
    pub fn write<W: Write>(mut writer: W, root_rels: &Relationships, parts: &[PartRef]) -> Result<()> {
        let bytes = Self::to_bytes(root_rels, parts)?;
        writer.write_all(&bytes)?;
        Ok(())
    }

    /// Serialize a package to bytes with default options.
    pub fn to_bytes(root_rels: &Relationships, parts: &[PartRef]) -> Result<Vec<u8>> {
        Self::to_bytes_with(root_rels, parts, WriteOptions::default())
    }

    /// Serialize a package to bytes.
    ///
    /// # Errors
    /// Returns [`OpcError::Blob`] naming the first part whose blob could not be
    /// produced; nothing is returned for the partial archive.
    pub fn to_bytes_with(
        root_rels: &Relationships,
        parts: &[PartRef],
        options: WriteOptions,
    ) -> Result<Vec<u8>> {
        let payloads = parts
            .iter()
            .map(Self::serialize_part)
            .collect::<Result<Vec<_>>>()?;

        let mut phys_writer = PhysPkgWriter::new();

        // [Content_Types].xml
        let cti = ContentTypesItem::from_parts(
            payloads
                .iter()
                .map(|payload| (&payload.partname, payload.content_type.as_str())),
        );
        phys_writer.write(CONTENT_TYPES_URI, cti.to_xml().as_bytes())?;

        // _rels/.rels, omitted entirely when the package has no relationships
        if !root_rels.is_empty() {
            let rels_uri = PackURI::package().rels_uri();
            phys_writer.write(rels_uri.as_str(), root_rels.to_xml().as_bytes())?;
        }

        for payload in &payloads {
            match options.compression {
                Compression::Deflated => phys_writer.write(payload.partname.as_str(), &payload.blob)?,
                Compression::Stored => {
                    phys_writer.write_stored(payload.partname.as_str(), &payload.blob)?
                },
            }

            if let Some(rels_xml) = &payload.rels_xml {
                let rels_uri = payload.partname.rels_uri();
                phys_writer.write(rels_uri.as_str(), rels_xml.as_bytes())?;
            }
        }

        debug!(
            parts = payloads.len(),
            root_rels = root_rels.len(),
            compression = ?options.compression,
            "wrote package"
        );
        phys_writer.finish()
    }

    fn serialize_part(part: &PartRef) -> Result<PartPayload> {
        let part = part.read();
        let blob = part
            .blob()
            .map_err(|e| OpcError::Blob {
                partname: part.partname().to_string(),
                source: Box::new(e),
            })?
            .into_owned();
        let rels = part.rels();

        Ok(PartPayload {
            partname: part.partname().clone(),
            content_type: part.content_type().to_string(),
            blob,
            rels_xml: (!rels.is_empty()).then(|| rels.to_xml()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opc::constants::{content_type as ct, relationship_type as rt};
    use crate::opc::part::{BlobPart, Part};
    use crate::opc::phys_pkg::PhysPkgReader;
    use crate::opc::rel::TargetMode;
    use std::any::Any;
    use std::borrow::Cow;

    fn uri(s: &str) -> PackURI {
        PackURI::new(s).unwrap()
    }

    #[derive(Debug)]
    struct BrokenPart {
        partname: PackURI,
        rels: Relationships,
    }

    impl Part for BrokenPart {
        fn partname(&self) -> &PackURI {
            &self.partname
        }

        fn content_type(&self) -> &str {
            ct::XML
        }

        fn blob(&self) -> Result<Cow<'_, [u8]>> {
            Err(OpcError::XmlError("cannot serialize".to_string()))
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

    #[test]
    fn test_write_empty_package() {
        let bytes = PackageWriter::to_bytes(&Relationships::default(), &[]).unwrap();
        let reader = PhysPkgReader::from_bytes(&bytes).unwrap();

        let uris: Vec<&str> = reader.uris().collect();
        assert_eq!(uris, [CONTENT_TYPES_URI]);
        let content_types = std::str::from_utf8(reader.content_types_xml().unwrap()).unwrap();
        assert!(content_types.contains(r#"<Default Extension="rels""#));
        assert!(content_types.contains(r#"<Default Extension="xml""#));
    }

    #[test]
    fn test_write_parts_and_rels() {
        let document = PartRef::new(BlobPart::new(
            uri("/word/document.xml"),
            ct::WML_DOCUMENT_MAIN.to_string(),
            b"<w:document/>".to_vec(),
        ));
        let image = PartRef::new(BlobPart::new(
            uri("/word/media/image1.png"),
            ct::PNG.to_string(),
            vec![0x89, b'P', b'N', b'G'],
        ));
        document.write().relate_to(&image, rt::IMAGE);

        let mut root_rels = Relationships::default();
        root_rels.get_or_add(rt::OFFICE_DOCUMENT, &document);

        let bytes = PackageWriter::to_bytes(&root_rels, &[document.clone(), image.clone()]).unwrap();
        let reader = PhysPkgReader::from_bytes(&bytes).unwrap();

        let uris: Vec<&str> = reader.uris().collect();
        assert_eq!(
            uris,
            [
                "/[Content_Types].xml",
                "/_rels/.rels",
                "/word/document.xml",
                "/word/_rels/document.xml.rels",
                "/word/media/image1.png",
            ]
        );

        let content_types = std::str::from_utf8(reader.content_types_xml().unwrap()).unwrap();
        assert!(content_types.contains(r#"<Default Extension="png" ContentType="image/png"/>"#));
        assert!(content_types.contains(r#"<Override PartName="/word/document.xml""#));
        assert!(!content_types.contains(r#"PartName="/word/media/image1.png""#));

        let rels = std::str::from_utf8(reader.blob_for("/word/_rels/document.xml.rels").unwrap()).unwrap();
        assert!(rels.contains(r#"Target="media/image1.png""#));
    }

    #[test]
    fn test_dangling_relationship_is_written() {
        let document = PartRef::new(BlobPart::new(
            uri("/word/document.xml"),
            ct::WML_DOCUMENT_MAIN.to_string(),
            b"<w:document/>".to_vec(),
        ));
        document
            .write()
            .rels_mut()
            .load("rId5", rt::IMAGE, "media/gone.png", None, TargetMode::Internal);

        let bytes = PackageWriter::to_bytes(&Relationships::default(), &[document]).unwrap();
        let reader = PhysPkgReader::from_bytes(&bytes).unwrap();
        let rels = std::str::from_utf8(reader.blob_for("/word/_rels/document.xml.rels").unwrap()).unwrap();
        assert!(rels.contains(r#"Id="rId5""#));
        assert!(rels.contains(r#"Target="media/gone.png""#));
        assert!(!reader.contains("/word/media/gone.png"));
    }

    #[test]
    fn test_blob_error_aborts_write() {
        let good = PartRef::new(BlobPart::new(uri("/a.xml"), ct::XML.to_string(), b"<a/>".to_vec()));
        let broken = PartRef::new(BrokenPart {
            partname: uri("/b.xml"),
            rels: Relationships::new("/"),
        });

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.docx");
        let err = PackageWriter::save(&path, &Relationships::default(), &[good, broken]).unwrap_err();
        match err {
            OpcError::Blob { partname, .. } => assert_eq!(partname, "/b.xml"),
            other => panic!("unexpected error: {other}"),
        }
        assert!(!path.exists());
    }

    #[test]
    fn test_stored_compression() {
        let part = PartRef::new(BlobPart::new(uri("/media/a.png"), ct::PNG.to_string(), vec![1, 2, 3]));
        let bytes =
            PackageWriter::to_bytes_with(&Relationships::default(), &[part], WriteOptions::stored())
                .unwrap();

        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).unwrap();
        assert_eq!(
            archive.by_name("media/a.png").unwrap().compression(),
            zip::CompressionMethod::Stored
        );
        assert_eq!(
            archive.by_name("[Content_Types].xml").unwrap().compression(),
            zip::CompressionMethod::Deflated
        );
    }
}
