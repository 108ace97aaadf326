//! Secure client construction
//!
//! [`ClientFactory::build`] turns a connection config plus an identity mode
//! into a ready-to-use [`TdfClient`]. Construction is pure: it picks the
//! transport, binds the grant and builds the HTTP client, but talks to no
//! service. The access token is fetched on first use and kept for the life
//! of the handle.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::OnceCell;
use tracing::debug;

use crate::auth::{AuthError, Grant, IdentityProvider, OidcTokenProvider};
use crate::config::{Identity, OpentdfConfig};
use crate::error::{ConfigError, OpenTdfError};
use crate::kas::{KasContext, KeyAccessServer, RemoteKas, WrappedKey};
use crate::manifest::TdfManifest;

pub const DEFAULT_AUTH_SCOPES: &[&str] = &["email"];

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub fn default_auth_scopes() -> Vec<String> {
    DEFAULT_AUTH_SCOPES.iter().map(|s| s.to_string()).collect()
}

/// Connection security chosen from the token endpoint's scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Plaintext,
    Tls { skip_verify: bool },
}

impl Transport {
    /// Exactly one `http://` selects plaintext; otherwise exactly one
    /// `https://` selects TLS. Anything else is rejected.
    pub fn for_token_endpoint(
        token_endpoint: &str,
        insecure_skip_verify: bool,
    ) -> Result<Self, ConfigError> {
        if token_endpoint.matches("http://").count() == 1 {
            Ok(Transport::Plaintext)
        } else if token_endpoint.matches("https://").count() == 1 {
            Ok(Transport::Tls {
                skip_verify: insecure_skip_verify,
            })
        } else {
            Err(ConfigError::InvalidTokenEndpoint(token_endpoint.to_string()))
        }
    }

    /// The scheme rule covers the token endpoint only; the same client also
    /// reaches the KAS at whatever scheme its URL names.
    fn http_client(self, timeout: Duration) -> Result<reqwest::Client, ConfigError> {
        let builder = reqwest::Client::builder().timeout(timeout);
        let builder = match self {
            Transport::Plaintext => builder,
            Transport::Tls { skip_verify } => builder.danger_accept_invalid_certs(skip_verify),
        };
        builder
            .build()
            .map_err(|e| ConfigError::Transport(e.to_string()))
    }
}

/// Builds one [`TdfClient`] per call; cheap to clone and share across tasks
#[derive(Clone)]
pub struct ClientFactory {
    idp: Arc<dyn IdentityProvider>,
    kas: Arc<dyn KeyAccessServer>,
    request_timeout: Duration,
}

impl ClientFactory {
    pub fn new() -> Self {
        Self {
            idp: Arc::new(OidcTokenProvider),
            kas: Arc::new(RemoteKas::new()),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_identity_provider(mut self, idp: Arc<dyn IdentityProvider>) -> Self {
        self.idp = idp;
        self
    }

    #[must_use]
    pub fn with_key_access(mut self, kas: Arc<dyn KeyAccessServer>) -> Self {
        self.kas = kas;
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Build a client for `identity` against `config`
    ///
    /// # Errors
    ///
    /// - [`ConfigError::InvalidTokenEndpoint`] when the token endpoint has no
    ///   single explicit scheme, for either identity mode
    /// - [`ConfigError::MissingDelegatedCredential`] when a delegated identity
    ///   carries an empty token or on-behalf client id
    pub fn build(
        &self,
        config: &OpentdfConfig,
        identity: &Identity,
        auth_scopes: &[String],
    ) -> Result<TdfClient, OpenTdfError> {
        let transport =
            Transport::for_token_endpoint(&config.token_endpoint, config.insecure_skip_verify)?;

        let grant = match identity {
            Identity::Service => Grant::ClientCredentials {
                client_id: config.client_id.clone(),
                client_secret: config.client_secret.clone(),
            },
            Identity::Delegated(token) => {
                if token.access_token.is_empty() {
                    return Err(ConfigError::MissingDelegatedCredential("access token").into());
                }
                if token.npe_client_id.is_empty() {
                    return Err(ConfigError::MissingDelegatedCredential("npe client id").into());
                }
                Grant::TokenExchange {
                    client_id: config.client_id.clone(),
                    client_secret: config.client_secret.clone(),
                    subject_token: token.access_token.clone(),
                    audience: token.npe_client_id.clone(),
                }
            }
        };

        debug!(?transport, identity = identity.label(), "building client");

        Ok(TdfClient {
            http: transport.http_client(self.request_timeout)?,
            transport,
            token_endpoint: config.token_endpoint.clone(),
            kas_url: config.kas_url.clone(),
            grant,
            scopes: auth_scopes.to_vec(),
            identity: identity.label(),
            idp: Arc::clone(&self.idp),
            kas: Arc::clone(&self.kas),
            token: OnceCell::new(),
        })
    }
}

impl Default for ClientFactory {
    fn default() -> Self {
        Self::new()
    }
}

/// An authenticated handle to the platform for one identity
pub struct TdfClient {
    http: reqwest::Client,
    transport: Transport,
    token_endpoint: String,
    kas_url: String,
    grant: Grant,
    scopes: Vec<String>,
    identity: &'static str,
    idp: Arc<dyn IdentityProvider>,
    kas: Arc<dyn KeyAccessServer>,
    token: OnceCell<String>,
}

impl TdfClient {
    pub fn transport(&self) -> Transport {
        self.transport
    }

    /// Key access server location from the connection config
    pub fn kas_url(&self) -> &str {
        &self.kas_url
    }

    /// `"npe"` or `"pe"`
    pub fn identity(&self) -> &'static str {
        self.identity
    }

    async fn access_token(&self) -> Result<&str, AuthError> {
        self.token
            .get_or_try_init(|| {
                self.idp
                    .fetch_token(&self.http, &self.token_endpoint, &self.grant, &self.scopes)
            })
            .await
            .map(String::as_str)
    }

    pub(crate) async fn wrap_key(
        &self,
        kas_url: &str,
        payload_key: &[u8],
    ) -> Result<WrappedKey, OpenTdfError> {
        let ctx = KasContext {
            http: &self.http,
            access_token: self.access_token().await?,
        };
        Ok(self.kas.wrap_key(ctx, kas_url, payload_key).await?)
    }

    pub(crate) async fn unwrap_key(&self, manifest: &TdfManifest) -> Result<Vec<u8>, OpenTdfError> {
        let ctx = KasContext {
            http: &self.http,
            access_token: self.access_token().await?,
        };
        Ok(self.kas.unwrap_key(ctx, manifest).await?)
    }
}

impl std::fmt::Debug for TdfClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TdfClient")
            .field("transport", &self.transport)
            .field("identity", &self.identity)
            .field("token_endpoint", &self.token_endpoint)
            .field("kas_url", &self.kas_url)
            .finish_non_exhaustive()
    }
}
