use crate::crypto::EncryptionError;
use crate::kas::KasError;
use crate::manifest::TdfManifest;
use std::io::{self, Cursor, Read, Seek, Write};
use zip::write::FileOptions;
use zip::{ZipArchive, ZipWriter};

const MANIFEST_ENTRY: &str = "0.manifest.json";
const PAYLOAD_ENTRY: &str = "0.payload";

#[derive(Debug, thiserror::Error)]
pub enum TdfError {
    #[error("ZIP error: {0}")]
    ZipError(#[from] zip::result::ZipError),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error("Invalid TDF structure: {0}")]
    Structure(String),
    #[error("Cryptographic operation failed: {0}")]
    Crypto(#[from] EncryptionError),
    #[error("KAS error: {0}")]
    Kas(#[from] KasError),
    #[error("Policy binding mismatch: policy was altered or the key does not belong to it")]
    PolicyBindingMismatch,
    #[error("Root signature mismatch: payload integrity check failed")]
    RootSignatureMismatch,
    #[error("Segment hash mismatch at segment {0}")]
    SegmentHashMismatch(usize),
}

impl TdfError {
    /// Returns a suggestion for how to fix this error, if available
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            TdfError::ZipError(_) | TdfError::Structure(_) => {
                Some("The input does not look like a ZIP TDF; check it was produced by a protect call")
            }
            TdfError::Kas(KasError::AccessDenied(_)) => {
                Some("The entity lacks an entitlement for one of the object's attributes")
            }
            _ => None,
        }
    }
}

/// Read-only view over a protected object's ZIP container
#[derive(Debug)]
pub struct TdfArchive<R: Read + Seek> {
    zip_archive: ZipArchive<R>,
}

/// Manifest and raw (still encrypted) payload of a protected object
#[derive(Debug)]
pub struct TdfEntry {
    pub manifest: TdfManifest,
    pub payload: Vec<u8>,
}

impl TdfArchive<Cursor<Vec<u8>>> {
    /// Opens a TDF archive held in memory
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, TdfError> {
        Self::new(Cursor::new(bytes))
    }
}

impl<R: Read + Seek> TdfArchive<R> {
    /// Creates a new TDF archive from a reader that implements Read + Seek
    pub fn new(reader: R) -> Result<Self, TdfError> {
        let zip_archive = ZipArchive::new(reader)?;
        Ok(Self { zip_archive })
    }

    /// Reads only the manifest
    pub fn manifest(&mut self) -> Result<TdfManifest, TdfError> {
        let mut manifest_file = self
            .zip_archive
            .by_name(MANIFEST_ENTRY)
            .map_err(|_| TdfError::Structure(format!("Missing manifest file: {}", MANIFEST_ENTRY)))?;
        let mut manifest_contents = String::new();
        manifest_file.read_to_string(&mut manifest_contents)?;
        Ok(TdfManifest::from_json(&manifest_contents)?)
    }

    /// Reads the manifest and the payload
    pub fn entry(&mut self) -> Result<TdfEntry, TdfError> {
        let manifest = self.manifest()?;
        if manifest.payload.url != PAYLOAD_ENTRY {
            return Err(TdfError::Structure(format!(
                "Unsupported payload reference: {}",
                manifest.payload.url
            )));
        }

        let payload = {
            let mut payload_file = self
                .zip_archive
                .by_name(PAYLOAD_ENTRY)
                .map_err(|_| TdfError::Structure(format!("Missing payload file: {}", PAYLOAD_ENTRY)))?;
            let mut payload = Vec::new();
            payload_file.read_to_end(&mut payload)?;
            payload
        };

        Ok(TdfEntry { manifest, payload })
    }
}

/// Writes a single-entry TDF archive into memory
pub struct TdfArchiveBuilder {
    writer: ZipWriter<Cursor<Vec<u8>>>,
}

impl TdfArchiveBuilder {
    pub fn new() -> Self {
        Self {
            writer: ZipWriter::new(Cursor::new(Vec::new())),
        }
    }

    /// Adds the manifest and the concatenated segments as the payload
    pub fn add_entry_with_segments(
        &mut self,
        manifest: &TdfManifest,
        segments: &[Vec<u8>],
    ) -> Result<(), TdfError> {
        let manifest_json = manifest.to_json()?;

        // Payload first, matching the reference SDK layout
        self.writer.start_file::<_, ()>(
            PAYLOAD_ENTRY,
            FileOptions::default().compression_method(zip::CompressionMethod::Stored),
        )?;
        for segment in segments {
            self.writer.write_all(segment)?;
        }

        self.writer.start_file::<_, ()>(
            MANIFEST_ENTRY,
            FileOptions::default().compression_method(zip::CompressionMethod::Stored),
        )?;
        self.writer.write_all(manifest_json.as_bytes())?;

        Ok(())
    }

    /// Finalizes the archive and returns its bytes
    pub fn finish(self) -> Result<Vec<u8>, TdfError> {
        let cursor = self.writer.finish()?;
        Ok(cursor.into_inner())
    }
}

impl Default for TdfArchiveBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_archive() -> Result<Vec<u8>, TdfError> {
        let manifest = TdfManifest::new(
            PAYLOAD_ENTRY.to_string(),
            "http://kas.example.com".to_string(),
            1024,
        );
        let mut builder = TdfArchiveBuilder::new();
        builder.add_entry_with_segments(
            &manifest,
            &[b"test payload ".to_vec(), b"data".to_vec()],
        )?;
        builder.finish()
    }

    #[test]
    fn test_tdf_archive_creation_and_reading() -> Result<(), TdfError> {
        let archive_data = create_test_archive()?;
        let mut archive = TdfArchive::from_bytes(archive_data)?;

        let entry = archive.entry()?;
        assert_eq!(entry.payload, b"test payload data");
        assert_eq!(entry.manifest.payload.url, "0.payload");
        assert_eq!(
            entry.manifest.key_access().map(|k| k.url.as_str()),
            Some("http://kas.example.com")
        );
        Ok(())
    }

    #[test]
    fn test_not_a_zip() {
        let result = TdfArchive::from_bytes(b"plain text, not a TDF".to_vec());
        let err = result.unwrap_err();
        assert!(matches!(err, TdfError::ZipError(_)));
        assert!(err.suggestion().is_some());
    }

    #[test]
    fn test_missing_payload_entry() -> Result<(), TdfError> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let manifest = TdfManifest::new(
            PAYLOAD_ENTRY.to_string(),
            "http://kas.example.com".to_string(),
            1024,
        );
        writer.start_file::<_, ()>(MANIFEST_ENTRY, FileOptions::default())?;
        writer.write_all(manifest.to_json()?.as_bytes())?;
        let bytes = writer.finish()?.into_inner();

        let mut archive = TdfArchive::from_bytes(bytes)?;
        assert!(archive.manifest().is_ok());
        assert!(matches!(archive.entry(), Err(TdfError::Structure(_))));
        Ok(())
    }
}
