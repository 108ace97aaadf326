//! TDF3 envelope assembly and verification
//!
//! Sealing is split in two so the async key-wrap step stays outside this
//! module:
//!
//! ```text
//! prepare(data, kas_url, policy)  ->  PreparedEnvelope   (payload encrypted)
//! kas.wrap_key(payload_key)       ->  WrappedKey
//! PreparedEnvelope::finish(key)   ->  ZIP bytes + manifest
//! ```
//!
//! [`open`] is the inverse once a key access server has released the key.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

use crate::archive::{TdfArchiveBuilder, TdfEntry, TdfError};
use crate::crypto::TdfEncryption;
use crate::kas::WrappedKey;
use crate::manifest::TdfManifest;
use crate::policy::Policy;

pub const DEFAULT_SEGMENT_SIZE: usize = 2 * 1024 * 1024;
pub const PAYLOAD_URL: &str = "0.payload";

/// An encrypted payload whose key has not been wrapped yet
pub struct PreparedEnvelope {
    encryption: TdfEncryption,
    manifest: TdfManifest,
    segments: Vec<Vec<u8>>,
}

/// Encrypt `data` under a fresh payload key and fill in every manifest field
/// except the wrapped key
pub fn prepare(
    data: &[u8],
    kas_url: &str,
    policy: &Policy,
    segment_size: usize,
) -> Result<PreparedEnvelope, TdfError> {
    let encryption = TdfEncryption::new();
    let segmented = encryption.encrypt_with_segments(data, segment_size)?;

    let mut manifest = TdfManifest::new(
        PAYLOAD_URL.to_string(),
        kas_url.to_string(),
        segment_size as u64,
    );
    manifest.set_policy(policy)?;

    let binding = encryption.policy_binding(&manifest.encryption_information.policy)?;
    if let Some(kao) = manifest.encryption_information.key_access.first_mut() {
        kao.policy_binding.hash = binding;
    }

    for info in &segmented.segment_info {
        manifest.add_segment(
            info.hash.clone(),
            Some(info.plaintext_size),
            Some(info.encrypted_size),
        );
    }

    manifest
        .encryption_information
        .integrity_information
        .root_signature
        .sig = encryption.root_signature(&segmented.gmac_tags)?;

    Ok(PreparedEnvelope {
        encryption,
        manifest,
        segments: segmented.segments,
    })
}

impl PreparedEnvelope {
    pub fn payload_key(&self) -> &[u8] {
        self.encryption.payload_key()
    }

    /// Attach the wrapped key and write the ZIP container
    pub fn finish(mut self, wrapped: WrappedKey) -> Result<(Vec<u8>, TdfManifest), TdfError> {
        let kao = self
            .manifest
            .encryption_information
            .key_access
            .first_mut()
            .ok_or_else(|| TdfError::Structure("manifest has no key access entry".to_string()))?;
        kao.wrapped_key = wrapped.wrapped_key;
        kao.kid = wrapped.kid;

        let mut builder = TdfArchiveBuilder::new();
        builder.add_entry_with_segments(&self.manifest, &self.segments)?;
        Ok((builder.finish()?, self.manifest))
    }
}

/// Verify and decrypt a protected object with its released payload key
///
/// Checks run in order: policy binding, each segment's GMAC, root signature.
pub fn open(entry: &TdfEntry, payload_key: &[u8]) -> Result<Vec<u8>, TdfError> {
    let encryption = TdfEncryption::with_payload_key(payload_key)?;
    let info = &entry.manifest.encryption_information;

    let kao = entry
        .manifest
        .key_access()
        .ok_or_else(|| TdfError::Structure("manifest has no key access entry".to_string()))?;
    if encryption.policy_binding(&info.policy)? != kao.policy_binding.hash {
        return Err(TdfError::PolicyBindingMismatch);
    }

    let integrity = &info.integrity_information;
    let (plaintext, gmac_tags) =
        encryption.decrypt_with_segments(&entry.payload, &integrity.encrypted_segment_sizes())?;

    for (index, (segment, tag)) in integrity.segments.iter().zip(&gmac_tags).enumerate() {
        if segment.hash != BASE64.encode(tag) {
            return Err(TdfError::SegmentHashMismatch(index));
        }
    }

    if encryption.root_signature(&gmac_tags)? != integrity.root_signature.sig {
        return Err(TdfError::RootSignatureMismatch);
    }

    Ok(plaintext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::TdfArchive;

    fn seal(data: &[u8], segment_size: usize) -> (Vec<u8>, Vec<u8>) {
        let policy = Policy::from_labels(&["https://example.com/attr/attr1/value/value1".to_string()]);
        let prepared = prepare(data, "http://kas.example.com", &policy, segment_size).unwrap();
        let key = prepared.payload_key().to_vec();
        let (bytes, _) = prepared
            .finish(WrappedKey {
                wrapped_key: "opaque".to_string(),
                kid: None,
            })
            .unwrap();
        (bytes, key)
    }

    #[test]
    fn test_seal_and_open() {
        let data = b"hello world, split across a few segments";
        let (bytes, key) = seal(data, 8);

        let entry = TdfArchive::from_bytes(bytes).unwrap().entry().unwrap();
        assert_eq!(entry.manifest.encryption_information.integrity_information.segments.len(), 5);
        assert_eq!(open(&entry, &key).unwrap(), data);
    }

    #[test]
    fn test_empty_object() {
        let (bytes, key) = seal(b"", DEFAULT_SEGMENT_SIZE);
        let entry = TdfArchive::from_bytes(bytes).unwrap().entry().unwrap();
        assert!(open(&entry, &key).unwrap().is_empty());
    }

    #[test]
    fn test_altered_policy_is_rejected() {
        let (bytes, key) = seal(b"classified", 1024);
        let mut entry = TdfArchive::from_bytes(bytes).unwrap().entry().unwrap();

        entry
            .manifest
            .set_policy(&Policy::from_labels(&[]))
            .unwrap();
        assert!(matches!(
            open(&entry, &key),
            Err(TdfError::PolicyBindingMismatch)
        ));
    }

    #[test]
    fn test_altered_root_signature_is_rejected() {
        let (bytes, key) = seal(b"classified", 1024);
        let mut entry = TdfArchive::from_bytes(bytes).unwrap().entry().unwrap();

        entry
            .manifest
            .encryption_information
            .integrity_information
            .root_signature
            .sig = BASE64.encode([0u8; 32]);
        assert!(matches!(
            open(&entry, &key),
            Err(TdfError::RootSignatureMismatch)
        ));
    }

    #[test]
    fn test_wrong_key_is_rejected() {
        let (bytes, _) = seal(b"classified", 1024);
        let entry = TdfArchive::from_bytes(bytes).unwrap().entry().unwrap();
        assert!(open(&entry, &[9u8; 32]).is_err());
    }
}
