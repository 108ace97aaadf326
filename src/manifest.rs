use crate::policy::Policy;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};

pub const TDF_SPEC_VERSION: &str = "4.3.0";

/// `0.manifest.json` of a ZIP TDF
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TdfManifest {
    pub payload: Payload,
    pub encryption_information: EncryptionInformation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payload {
    #[serde(rename = "type")]
    pub payload_type: String,
    pub url: String,
    pub protocol: String,
    pub is_encrypted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptionInformation {
    #[serde(rename = "type")]
    pub encryption_type: String,
    pub key_access: Vec<KeyAccess>,
    pub method: EncryptionMethod,
    pub integrity_information: IntegrityInformation,
    /// Base64 of the policy JSON
    pub policy: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyBinding {
    pub alg: String,
    pub hash: String,
}

/// Where and how the payload key is wrapped
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyAccess {
    #[serde(rename = "type")]
    pub access_type: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    pub protocol: String,
    pub wrapped_key: String,
    pub policy_binding: PolicyBinding,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptionMethod {
    pub algorithm: String,
    pub is_streamable: bool,
    /// Unused for segmented payloads; every segment carries its own IV
    pub iv: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityInformation {
    pub root_signature: RootSignature,
    pub segment_hash_alg: String,
    pub segments: Vec<Segment>,
    pub segment_size_default: u64,
    pub encrypted_segment_size_default: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootSignature {
    pub alg: String,
    pub sig: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    pub hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_segment_size: Option<u64>,
}

impl KeyAccess {
    /// Creates a wrapped-key entry for one key access server
    pub fn new(url: String) -> Self {
        KeyAccess {
            access_type: "wrapped".to_string(),
            url,
            kid: None,
            protocol: "kas".to_string(),
            wrapped_key: String::new(),
            policy_binding: PolicyBinding {
                alg: "HS256".to_string(),
                hash: String::new(),
            },
        }
    }
}

impl IntegrityInformation {
    /// Encrypted size of every segment, falling back to the manifest default
    pub fn encrypted_segment_sizes(&self) -> Vec<u64> {
        self.segments
            .iter()
            .map(|s| {
                s.encrypted_segment_size
                    .unwrap_or(self.encrypted_segment_size_default)
            })
            .collect()
    }
}

impl TdfManifest {
    /// Create a manifest for a single-payload ZIP TDF bound to one KAS
    pub fn new(payload_url: String, kas_url: String, segment_size: u64) -> Self {
        TdfManifest {
            payload: Payload {
                payload_type: "reference".to_string(),
                url: payload_url,
                protocol: "zip".to_string(),
                is_encrypted: true,
                mime_type: Some("application/octet-stream".to_string()),
            },
            encryption_information: EncryptionInformation {
                encryption_type: "split".to_string(),
                key_access: vec![KeyAccess::new(kas_url)],
                method: EncryptionMethod {
                    algorithm: "AES-256-GCM".to_string(),
                    is_streamable: true,
                    iv: String::new(),
                },
                integrity_information: IntegrityInformation {
                    root_signature: RootSignature {
                        alg: "HS256".to_string(),
                        sig: String::new(),
                    },
                    segment_hash_alg: "GMAC".to_string(),
                    segments: Vec::new(),
                    segment_size_default: segment_size,
                    encrypted_segment_size_default: segment_size + 28, // +IV+tag
                },
                policy: String::new(),
            },
            schema_version: Some(TDF_SPEC_VERSION.to_string()),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Pretty-printed JSON, the human-diffable manifest description
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn set_policy(&mut self, policy: &Policy) -> Result<(), serde_json::Error> {
        self.encryption_information.policy = BASE64.encode(policy.to_json()?);
        Ok(())
    }

    /// Decode the embedded policy
    pub fn policy(&self) -> Result<Policy, serde_json::Error> {
        let bytes = BASE64
            .decode(&self.encryption_information.policy)
            .map_err(|e| {
                serde_json::Error::io(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    e.to_string(),
                ))
            })?;
        serde_json::from_slice(&bytes)
    }

    pub fn add_segment(
        &mut self,
        hash: String,
        segment_size: Option<u64>,
        encrypted_segment_size: Option<u64>,
    ) {
        self.encryption_information
            .integrity_information
            .segments
            .push(Segment {
                hash,
                segment_size,
                encrypted_segment_size,
            });
    }

    /// The first key access entry; a protected object always has one
    pub fn key_access(&self) -> Option<&KeyAccess> {
        self.encryption_information.key_access.first()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_deserialization() {
        let json = r#"{
            "encryptionInformation": {
                "type": "split",
                "keyAccess": [{
                    "type": "wrapped",
                    "url": "http://localhost:8080",
                    "protocol": "kas",
                    "wrappedKey": "abc123",
                    "policyBinding": {
                        "alg": "HS256",
                        "hash": "def456"
                    },
                    "kid": "r1"
                }],
                "method": {
                    "algorithm": "AES-256-GCM",
                    "iv": "",
                    "isStreamable": true
                },
                "integrityInformation": {
                  "rootSignature": {
                    "alg": "HS256",
                    "sig": "M2E2MTI5YmMxMWU0ODIzZDA4YTdkNTY2MzdlNDM4OGRlZDE2MTFhZjU1YTY1YzBhYWNlMWVjYjlmODUzNmNiZQ=="
                  },
                  "segmentHashAlg": "GMAC",
                  "segments": [
                      {
                          "hash": "NzhlZDg5OWMwZWVhZDBjMWEzZTQyYmFlODA0NjNlMDM=",
                          "segmentSize": 14056,
                          "encryptedSegmentSize": 14084
                        }
                  ],
                  "segmentSizeDefault": 1000000,
                  "encryptedSegmentSizeDefault": 1000028
                },
                "policy": "base64policy"
            },
            "payload": {
                "type": "reference",
                "url": "0.payload",
                "protocol": "zip",
                "mimeType": "application/octet-stream",
                "isEncrypted": true
            }
        }"#;

        let manifest = TdfManifest::from_json(json).unwrap();
        let kao = manifest.key_access().unwrap();
        assert_eq!(kao.policy_binding.alg, "HS256");
        assert_eq!(kao.kid.as_deref(), Some("r1"));
        assert_eq!(
            manifest
                .encryption_information
                .integrity_information
                .encrypted_segment_sizes(),
            vec![14084]
        );
        assert!(manifest.schema_version.is_none());
    }

    #[test]
    fn test_segment_size_falls_back_to_default() {
        let mut manifest = TdfManifest::new(
            "0.payload".to_string(),
            "http://kas.example.com".to_string(),
            1024,
        );
        manifest.add_segment("h".to_string(), None, None);
        assert_eq!(
            manifest
                .encryption_information
                .integrity_information
                .encrypted_segment_sizes(),
            vec![1052]
        );
    }

    #[test]
    fn test_policy_round_trip() {
        let mut manifest = TdfManifest::new(
            "0.payload".to_string(),
            "http://kas.example.com:4000".to_string(),
            1024,
        );
        let labels = vec!["https://example.com/attr/attr1/value/value1".to_string()];
        let policy = Policy::from_labels(&labels);
        manifest.set_policy(&policy).unwrap();

        let decoded = manifest.policy().unwrap();
        assert_eq!(decoded, policy);
    }

    #[test]
    fn test_manifest_json_is_pretty() {
        let manifest = TdfManifest::new(
            "0.payload".to_string(),
            "http://kas.example.com".to_string(),
            1024,
        );
        let json = manifest.to_json().unwrap();
        assert!(json.contains('\n'));
        assert!(json.contains("\"schemaVersion\": \"4.3.0\""));
    }
}
