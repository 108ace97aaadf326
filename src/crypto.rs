use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use hmac::{Hmac, Mac};
use rand::{rngs::OsRng, RngCore};
use sha2::Sha256;
use thiserror::Error;

pub(crate) const GCM_IV_SIZE: usize = 12; // 96-bit IV
pub(crate) const GCM_TAG_SIZE: usize = 16; // 128-bit authentication tag
const KEY_SIZE: usize = 32; // AES-256

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum EncryptionError {
    #[error("Encryption failed: {0}")]
    AeadError(aes_gcm::Error),
    #[error("Invalid key length")]
    InvalidKeyLength,
    #[error("Base64 decode error: {0}")]
    Base64Error(#[from] base64::DecodeError),
    #[error("Segment error: {0}")]
    SegmentError(String),
    #[error("Key format error: {0}")]
    KeyFormat(String),
}

/// Holds the symmetric payload key for one protected object
pub struct TdfEncryption {
    payload_key: Vec<u8>,
}

impl TdfEncryption {
    /// Create a new instance with a freshly generated payload key
    pub fn new() -> Self {
        let mut payload_key = vec![0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut payload_key);
        Self { payload_key }
    }

    /// Use a payload key unwrapped by a key access server
    pub fn with_payload_key(payload_key: &[u8]) -> Result<Self, EncryptionError> {
        if payload_key.len() != KEY_SIZE {
            return Err(EncryptionError::InvalidKeyLength);
        }
        Ok(Self {
            payload_key: payload_key.to_vec(),
        })
    }

    pub fn payload_key(&self) -> &[u8] {
        &self.payload_key
    }

    /// Encrypt data as a sequence of independently authenticated segments
    ///
    /// Each segment is stored as `[IV][ciphertext][tag]`; the GCM tag doubles
    /// as the segment's GMAC hash in the manifest.
    pub fn encrypt_with_segments(
        &self,
        data: &[u8],
        segment_size: usize,
    ) -> Result<SegmentedPayload, EncryptionError> {
        if segment_size == 0 {
            return Err(EncryptionError::SegmentError(
                "segment size must be positive".to_string(),
            ));
        }
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.payload_key));
        let mut segments = Vec::new();
        let mut segment_info = Vec::new();
        let mut gmac_tags = Vec::new();

        for chunk in data.chunks(segment_size) {
            let mut iv = vec![0u8; GCM_IV_SIZE];
            OsRng.fill_bytes(&mut iv);
            let nonce = Nonce::from_slice(&iv);

            let ciphertext = cipher
                .encrypt(nonce, chunk)
                .map_err(EncryptionError::AeadError)?;

            let gmac_tag = ciphertext[ciphertext.len() - GCM_TAG_SIZE..].to_vec();

            let mut segment_data = iv;
            segment_data.extend_from_slice(&ciphertext);

            segment_info.push(SegmentInfo {
                hash: BASE64.encode(&gmac_tag),
                plaintext_size: chunk.len() as u64,
                encrypted_size: segment_data.len() as u64,
            });
            gmac_tags.push(gmac_tag);
            segments.push(segment_data);
        }

        Ok(SegmentedPayload {
            segments,
            segment_info,
            gmac_tags,
        })
    }

    /// Decrypt a concatenated segment payload
    ///
    /// Returns the plaintext and the GMAC tags in segment order so the caller
    /// can verify the root signature.
    pub fn decrypt_with_segments(
        &self,
        payload: &[u8],
        encrypted_sizes: &[u64],
    ) -> Result<(Vec<u8>, Vec<Vec<u8>>), EncryptionError> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.payload_key));
        let mut plaintext = Vec::with_capacity(payload.len());
        let mut gmac_tags = Vec::with_capacity(encrypted_sizes.len());
        let mut offset = 0usize;

        for &size in encrypted_sizes {
            let size = usize::try_from(size)
                .map_err(|_| EncryptionError::SegmentError("Segment too large".to_string()))?;
            let end = offset
                .checked_add(size)
                .filter(|end| *end <= payload.len())
                .ok_or_else(|| {
                    EncryptionError::SegmentError("Segment extends beyond payload".to_string())
                })?;
            let segment_data = &payload[offset..end];
            if segment_data.len() < GCM_IV_SIZE + GCM_TAG_SIZE {
                return Err(EncryptionError::SegmentError(
                    "Segment too small".to_string(),
                ));
            }

            let (iv, ciphertext_and_tag) = segment_data.split_at(GCM_IV_SIZE);
            let decrypted = cipher
                .decrypt(Nonce::from_slice(iv), ciphertext_and_tag)
                .map_err(EncryptionError::AeadError)?;

            gmac_tags.push(ciphertext_and_tag[ciphertext_and_tag.len() - GCM_TAG_SIZE..].to_vec());
            plaintext.extend_from_slice(&decrypted);
            offset = end;
        }

        if offset != payload.len() {
            return Err(EncryptionError::SegmentError(format!(
                "{} trailing bytes after last segment",
                payload.len() - offset
            )));
        }

        Ok((plaintext, gmac_tags))
    }

    /// HMAC-SHA256 over the concatenated segment tags, base64 encoded
    pub fn root_signature(&self, gmac_tags: &[Vec<u8>]) -> Result<String, EncryptionError> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.payload_key)
            .map_err(|_| EncryptionError::InvalidKeyLength)?;
        for tag in gmac_tags {
            mac.update(tag);
        }
        Ok(BASE64.encode(mac.finalize().into_bytes()))
    }

    /// HMAC-SHA256 over the base64 policy string, base64 encoded
    pub fn policy_binding(&self, policy_b64: &str) -> Result<String, EncryptionError> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.payload_key)
            .map_err(|_| EncryptionError::InvalidKeyLength)?;
        mac.update(policy_b64.as_bytes());
        Ok(BASE64.encode(mac.finalize().into_bytes()))
    }
}

impl Default for TdfEncryption {
    fn default() -> Self {
        Self::new()
    }
}

/// Information about an encrypted segment
#[derive(Debug, Clone)]
pub struct SegmentInfo {
    pub hash: String,        // Base64 encoded GMAC tag
    pub plaintext_size: u64, // Size before encryption
    pub encrypted_size: u64, // Size after encryption (includes IV + tag)
}

/// Result of segment-based encryption
#[derive(Debug)]
pub struct SegmentedPayload {
    pub segments: Vec<Vec<u8>>,
    pub segment_info: Vec<SegmentInfo>,
    pub gmac_tags: Vec<Vec<u8>>,
}

/// Wrap a payload key under a symmetric key-encryption key
///
/// Output is base64 of `[IV][ciphertext][tag]`.
pub fn wrap_key_with_aes_gcm(payload_key: &[u8], kek: &[u8]) -> Result<String, EncryptionError> {
    if kek.len() != KEY_SIZE {
        return Err(EncryptionError::InvalidKeyLength);
    }
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(kek));
    let mut iv = vec![0u8; GCM_IV_SIZE];
    OsRng.fill_bytes(&mut iv);
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&iv), payload_key)
        .map_err(EncryptionError::AeadError)?;
    iv.extend_from_slice(&ciphertext);
    Ok(BASE64.encode(iv))
}

/// Inverse of [`wrap_key_with_aes_gcm`]
pub fn unwrap_key_with_aes_gcm(wrapped_b64: &str, kek: &[u8]) -> Result<Vec<u8>, EncryptionError> {
    if kek.len() != KEY_SIZE {
        return Err(EncryptionError::InvalidKeyLength);
    }
    let wrapped = BASE64.decode(wrapped_b64)?;
    if wrapped.len() < GCM_IV_SIZE + GCM_TAG_SIZE {
        return Err(EncryptionError::KeyFormat(format!(
            "wrapped key too short: {} bytes",
            wrapped.len()
        )));
    }
    let (iv, ciphertext) = wrapped.split_at(GCM_IV_SIZE);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(kek));
    cipher
        .decrypt(Nonce::from_slice(iv), ciphertext)
        .map_err(EncryptionError::AeadError)
}

/// Wrap a payload key with a KAS RSA public key (RSA-OAEP, SHA-1)
///
/// SHA-1 matches the platform's asymmetric encryption. Returns base64.
pub fn wrap_key_with_rsa_oaep(
    payload_key: &[u8],
    kas_public_key_pem: &str,
) -> Result<String, EncryptionError> {
    use rsa::pkcs8::DecodePublicKey;
    use rsa::{Oaep, RsaPublicKey};
    use sha1::Sha1;

    let public_key = RsaPublicKey::from_public_key_pem(kas_public_key_pem)
        .map_err(|e| EncryptionError::KeyFormat(e.to_string()))?;

    let wrapped_key = public_key
        .encrypt(&mut OsRng, Oaep::new::<Sha1>(), payload_key)
        .map_err(|e| EncryptionError::KeyFormat(e.to_string()))?;

    Ok(BASE64.encode(wrapped_key))
}
