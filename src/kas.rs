//! Key Access Service (KAS) integration
//!
//! A protected object's payload key never travels in the clear: on protect the
//! key access server wraps it, on unprotect the server decides (by policy)
//! whether to release it again. [`KeyAccessServer`] is that seam.
//!
//! Two implementations are provided:
//!
//! - [`RemoteKas`] talks to a platform KAS over HTTP. Protect fetches the
//!   KAS RSA public key and wraps locally with RSA-OAEP. Unprotect runs the
//!   v2 rewrap protocol:
//!   1. Generate an ephemeral RSA key pair
//!   2. Build the unsigned rewrap request from the manifest
//!   3. Sign it as an ES256 JWT
//!   4. POST to `{kas}/v2/rewrap` with the bearer token
//!   5. Decrypt the returned key with the ephemeral private key (RSA-OAEP)
//! - [`LocalKas`] keeps a key-encryption key in process memory. Objects it
//!   protects can only be unprotected through the same instance, which makes
//!   it suitable for offline pipelines and tests.

use std::future::Future;
use std::pin::Pin;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::debug;

use crate::crypto;
use crate::manifest::TdfManifest;

/// KAS client errors
#[derive(Debug, Error)]
pub enum KasError {
    #[error("HTTP error: {0}")]
    HttpError(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Authentication failed")]
    AuthenticationFailed,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Key unwrapping failed: {0}")]
    UnwrapError(String),

    #[error("Cryptographic error: {0}")]
    CryptoError(String),

    #[error("Manifest has no key access entry")]
    MissingKeyAccess,

    #[error("JSON serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Base64 decode error: {0}")]
    Base64Error(#[from] base64::DecodeError),

    #[error("Reqwest error: {0}")]
    ReqwestError(#[from] reqwest::Error),
}

pub type KasFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, KasError>> + Send + 'a>>;

/// Per-call context handed to the key access server by a client handle
#[derive(Clone, Copy)]
pub struct KasContext<'a> {
    pub http: &'a reqwest::Client,
    pub access_token: &'a str,
}

/// A payload key wrapped for one key access server
#[derive(Debug, Clone)]
pub struct WrappedKey {
    pub wrapped_key: String,
    pub kid: Option<String>,
}

pub trait KeyAccessServer: Send + Sync {
    /// Wrap a fresh payload key so that only `kas_url` can release it
    fn wrap_key<'a>(
        &'a self,
        ctx: KasContext<'a>,
        kas_url: &'a str,
        payload_key: &'a [u8],
    ) -> KasFuture<'a, WrappedKey>;

    /// Ask the server to release the payload key of a protected object
    fn unwrap_key<'a>(
        &'a self,
        ctx: KasContext<'a>,
        manifest: &'a TdfManifest,
    ) -> KasFuture<'a, Vec<u8>>;
}

/// Rewrap request body, carried as the `requestBody` claim of the signed token
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UnsignedRewrapRequest {
    client_public_key: String,
    requests: Vec<PolicyRequest>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PolicyRequest {
    policy: RewrapPolicy,
    key_access_objects: Vec<RewrapKeyAccess>,
}

#[derive(Debug, Serialize)]
struct RewrapPolicy {
    id: String,
    /// Base64 policy, exactly as embedded in the manifest
    body: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RewrapKeyAccess {
    key_access_object_id: String,
    key_access_object: RewrapKeyAccessObject,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RewrapKeyAccessObject {
    #[serde(rename = "type")]
    key_type: String,
    url: String,
    protocol: String,
    wrapped_key: String,
    policy_binding: RewrapPolicyBinding,
    #[serde(skip_serializing_if = "Option::is_none")]
    kid: Option<String>,
}

#[derive(Debug, Serialize)]
struct RewrapPolicyBinding {
    hash: String,
    algorithm: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RewrapResponse {
    #[serde(default)]
    responses: Vec<PolicyRewrapResult>,
}

#[derive(Debug, Deserialize)]
struct PolicyRewrapResult {
    #[serde(default)]
    results: Vec<KeyAccessRewrapResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeyAccessRewrapResult {
    status: String,
    kas_wrapped_key: Option<String>,
    /// Older platforms return the key under this name
    entity_wrapped_key: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KasPublicKeyResponse {
    public_key: String,
    kid: Option<String>,
}

/// Key access server reached over HTTP
#[derive(Debug, Clone)]
pub struct RemoteKas {
    ephemeral_key_bits: usize,
}

impl RemoteKas {
    pub fn new() -> Self {
        Self {
            ephemeral_key_bits: 2048,
        }
    }

    /// Size of the ephemeral RSA key generated per rewrap
    #[must_use]
    pub fn ephemeral_key_bits(mut self, bits: usize) -> Self {
        self.ephemeral_key_bits = bits;
        self
    }

    async fn fetch_public_key(
        &self,
        ctx: KasContext<'_>,
        kas_url: &str,
    ) -> Result<KasPublicKeyResponse, KasError> {
        let endpoint = format!("{}/v2/kas_public_key", kas_url.trim_end_matches('/'));
        debug!(%endpoint, "fetching KAS public key");

        let response = ctx
            .http
            .get(&endpoint)
            .query(&[("algorithm", "rsa:2048")])
            .bearer_auth(ctx.access_token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status.as_u16(), body));
        }
        Ok(response.json().await?)
    }

    async fn rewrap(
        &self,
        ctx: KasContext<'_>,
        manifest: &TdfManifest,
    ) -> Result<Vec<u8>, KasError> {
        use rsa::pkcs8::{EncodePublicKey, LineEnding};
        use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
        use sha1::Sha1;

        let kao = manifest.key_access().ok_or(KasError::MissingKeyAccess)?;

        let private_key = RsaPrivateKey::new(&mut OsRng, self.ephemeral_key_bits)
            .map_err(|e| KasError::CryptoError(format!("RSA key generation failed: {}", e)))?;
        let public_key_pem = RsaPublicKey::from(&private_key)
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| KasError::CryptoError(e.to_string()))?;

        let unsigned_request = build_rewrap_request(manifest, public_key_pem)?;
        let signed_request = json!({ "signedRequestToken": create_signed_jwt(&unsigned_request)? });

        let rewrap_endpoint = format!("{}/v2/rewrap", kao.url.trim_end_matches('/'));
        debug!(%rewrap_endpoint, "requesting rewrap");

        let response = ctx
            .http
            .post(&rewrap_endpoint)
            .bearer_auth(ctx.access_token)
            .json(&signed_request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status.as_u16(), body));
        }

        let rewrap_response: RewrapResponse = response.json().await?;
        let wrapped_key = extract_wrapped_key(&rewrap_response)?;

        // SHA-1 OAEP matches the platform's asymmetric decryption
        private_key
            .decrypt(Oaep::new::<Sha1>(), &wrapped_key)
            .map_err(|e| KasError::UnwrapError(format!("RSA-OAEP decryption failed: {}", e)))
    }
}

impl Default for RemoteKas {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyAccessServer for RemoteKas {
    fn wrap_key<'a>(
        &'a self,
        ctx: KasContext<'a>,
        kas_url: &'a str,
        payload_key: &'a [u8],
    ) -> KasFuture<'a, WrappedKey> {
        Box::pin(async move {
            let public_key = self.fetch_public_key(ctx, kas_url).await?;
            let wrapped_key = crypto::wrap_key_with_rsa_oaep(payload_key, &public_key.public_key)
                .map_err(|e| KasError::CryptoError(e.to_string()))?;
            Ok(WrappedKey {
                wrapped_key,
                kid: public_key.kid,
            })
        })
    }

    fn unwrap_key<'a>(
        &'a self,
        ctx: KasContext<'a>,
        manifest: &'a TdfManifest,
    ) -> KasFuture<'a, Vec<u8>> {
        Box::pin(self.rewrap(ctx, manifest))
    }
}

fn status_error(status: u16, body: String) -> KasError {
    match status {
        401 => KasError::AuthenticationFailed,
        403 => KasError::AccessDenied(body),
        _ => KasError::HttpError(format!("HTTP {}: {}", status, body)),
    }
}

/// Extract the policy UUID from the manifest's base64 policy
fn extract_policy_uuid(base64_policy: &str) -> Result<String, KasError> {
    let policy_bytes = BASE64.decode(base64_policy)?;
    let policy_json: serde_json::Value = serde_json::from_slice(&policy_bytes)?;

    policy_json
        .get("uuid")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| KasError::InvalidResponse("Policy missing 'uuid' field".to_string()))
}

fn build_rewrap_request(
    manifest: &TdfManifest,
    client_public_key: String,
) -> Result<UnsignedRewrapRequest, KasError> {
    let key_access_objects = manifest
        .encryption_information
        .key_access
        .iter()
        .enumerate()
        .map(|(idx, kao)| RewrapKeyAccess {
            key_access_object_id: format!("kao-{}", idx),
            key_access_object: RewrapKeyAccessObject {
                key_type: kao.access_type.clone(),
                url: kao.url.clone(),
                protocol: kao.protocol.clone(),
                wrapped_key: kao.wrapped_key.clone(),
                policy_binding: RewrapPolicyBinding {
                    hash: kao.policy_binding.hash.clone(),
                    algorithm: kao.policy_binding.alg.clone(),
                },
                kid: kao.kid.clone(),
            },
        })
        .collect();

    let policy = RewrapPolicy {
        id: extract_policy_uuid(&manifest.encryption_information.policy)?,
        body: manifest.encryption_information.policy.clone(),
    };

    Ok(UnsignedRewrapRequest {
        client_public_key,
        requests: vec![PolicyRequest {
            policy,
            key_access_objects,
        }],
    })
}

/// Sign the rewrap request as an ES256 JWT with a throwaway P-256 key
fn create_signed_jwt(request: &UnsignedRewrapRequest) -> Result<String, KasError> {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use p256::ecdsa::{signature::Signer, Signature, SigningKey};

    let signing_key = SigningKey::random(&mut OsRng);
    let request_body = serde_json::to_string(request)?;

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| KasError::CryptoError(e.to_string()))?
        .as_secs();

    let header = json!({ "alg": "ES256", "typ": "JWT" });
    // requestBody must be a string, not a nested object
    let payload = json!({
        "requestBody": request_body,
        "iat": now,
        "exp": now + 60
    });

    let signing_input = format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header)?),
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(&payload)?)
    );
    let signature: Signature = signing_key.sign(signing_input.as_bytes());

    Ok(format!(
        "{}.{}",
        signing_input,
        URL_SAFE_NO_PAD.encode(signature.to_bytes())
    ))
}

fn extract_wrapped_key(response: &RewrapResponse) -> Result<Vec<u8>, KasError> {
    let key_result = response
        .responses
        .first()
        .ok_or_else(|| KasError::InvalidResponse("Empty response".to_string()))?
        .results
        .first()
        .ok_or_else(|| KasError::InvalidResponse("No key results".to_string()))?;

    if key_result.status != "permit" {
        let error_msg = key_result
            .error
            .clone()
            .unwrap_or_else(|| "Access denied".to_string());
        return Err(KasError::AccessDenied(error_msg));
    }

    let wrapped_key_b64 = key_result
        .kas_wrapped_key
        .as_ref()
        .or(key_result.entity_wrapped_key.as_ref())
        .ok_or_else(|| KasError::InvalidResponse("Missing wrapped key".to_string()))?;

    Ok(BASE64.decode(wrapped_key_b64)?)
}

/// In-process key access server holding a random key-encryption key
pub struct LocalKas {
    kek: [u8; 32],
    kid: String,
}

impl LocalKas {
    pub fn new() -> Self {
        let mut kek = [0u8; 32];
        OsRng.fill_bytes(&mut kek);
        Self {
            kek,
            kid: "local".to_string(),
        }
    }
}

impl Default for LocalKas {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LocalKas {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalKas").field("kid", &self.kid).finish()
    }
}

impl KeyAccessServer for LocalKas {
    fn wrap_key<'a>(
        &'a self,
        _ctx: KasContext<'a>,
        _kas_url: &'a str,
        payload_key: &'a [u8],
    ) -> KasFuture<'a, WrappedKey> {
        Box::pin(async move {
            let wrapped_key = crypto::wrap_key_with_aes_gcm(payload_key, &self.kek)
                .map_err(|e| KasError::CryptoError(e.to_string()))?;
            Ok(WrappedKey {
                wrapped_key,
                kid: Some(self.kid.clone()),
            })
        })
    }

    fn unwrap_key<'a>(
        &'a self,
        _ctx: KasContext<'a>,
        manifest: &'a TdfManifest,
    ) -> KasFuture<'a, Vec<u8>> {
        Box::pin(async move {
            let kao = manifest.key_access().ok_or(KasError::MissingKeyAccess)?;
            crypto::unwrap_key_with_aes_gcm(&kao.wrapped_key, &self.kek)
                .map_err(|e| KasError::UnwrapError(e.to_string()))
        })
    }
}
