//! Identity provider access
//!
//! A [`TdfClient`](crate::client::TdfClient) needs one bearer token for the
//! key access server. How it is obtained depends on the identity mode:
//!
//! - NPE: `client_credentials` grant with the configured client id and secret
//! - PE: RFC 8693 token exchange of the caller's token for one scoped to the
//!   on-behalf client
//!
//! Acquiring the person's original token is the caller's job.

use std::future::Future;
use std::pin::Pin;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

pub const TOKEN_EXCHANGE_GRANT: &str = "urn:ietf:params:oauth:grant-type:token-exchange";
pub const ACCESS_TOKEN_TYPE: &str = "urn:ietf:params:oauth:token-type:access_token";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("token endpoint response did not contain an access_token")]
    MissingAccessToken,

    #[error("token endpoint returned HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("token request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("key access server rejected the access token")]
    KasRejected,
}

/// Credentials presented to the token endpoint
#[derive(Clone, PartialEq, Eq)]
pub enum Grant {
    ClientCredentials {
        client_id: String,
        client_secret: String,
    },
    TokenExchange {
        client_id: String,
        client_secret: String,
        subject_token: String,
        audience: String,
    },
}

impl Grant {
    fn form(&self, scopes: &[String]) -> Vec<(&'static str, String)> {
        let mut form = match self {
            Grant::ClientCredentials {
                client_id,
                client_secret,
            } => vec![
                ("grant_type", "client_credentials".to_string()),
                ("client_id", client_id.clone()),
                ("client_secret", client_secret.clone()),
            ],
            Grant::TokenExchange {
                client_id,
                client_secret,
                subject_token,
                audience,
            } => vec![
                ("grant_type", TOKEN_EXCHANGE_GRANT.to_string()),
                ("client_id", client_id.clone()),
                ("client_secret", client_secret.clone()),
                ("subject_token", subject_token.clone()),
                ("subject_token_type", ACCESS_TOKEN_TYPE.to_string()),
                ("audience", audience.clone()),
            ],
        };
        if !scopes.is_empty() {
            form.push(("scope", scopes.join(" ")));
        }
        form
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Grant::ClientCredentials { .. } => "client_credentials",
            Grant::TokenExchange { .. } => "token_exchange",
        }
    }
}

impl std::fmt::Debug for Grant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Grant::ClientCredentials { client_id, .. } => f
                .debug_struct("ClientCredentials")
                .field("client_id", client_id)
                .finish_non_exhaustive(),
            Grant::TokenExchange {
                client_id,
                audience,
                ..
            } => f
                .debug_struct("TokenExchange")
                .field("client_id", client_id)
                .field("audience", audience)
                .finish_non_exhaustive(),
        }
    }
}

pub type AuthFuture<'a> = Pin<Box<dyn Future<Output = Result<String, AuthError>> + Send + 'a>>;

pub trait IdentityProvider: Send + Sync {
    /// Obtain an access token for `grant`
    fn fetch_token<'a>(
        &'a self,
        http: &'a reqwest::Client,
        token_endpoint: &'a str,
        grant: &'a Grant,
        scopes: &'a [String],
    ) -> AuthFuture<'a>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
}

/// OAuth2 token endpoint client
#[derive(Debug, Clone, Default)]
pub struct OidcTokenProvider;

impl IdentityProvider for OidcTokenProvider {
    fn fetch_token<'a>(
        &'a self,
        http: &'a reqwest::Client,
        token_endpoint: &'a str,
        grant: &'a Grant,
        scopes: &'a [String],
    ) -> AuthFuture<'a> {
        Box::pin(async move {
            debug!(endpoint = token_endpoint, grant = grant.kind(), "requesting access token");

            let response = http
                .post(token_endpoint)
                .form(&grant.form(scopes))
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(AuthError::Rejected {
                    status: status.as_u16(),
                    body,
                });
            }

            let token: TokenResponse = response.json().await?;
            token
                .access_token
                .filter(|t| !t.is_empty())
                .ok_or(AuthError::MissingAccessToken)
        })
    }
}

/// Hands out a fixed token without contacting any endpoint
#[derive(Clone)]
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl std::fmt::Debug for StaticTokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StaticTokenProvider(<redacted>)")
    }
}

impl IdentityProvider for StaticTokenProvider {
    fn fetch_token<'a>(
        &'a self,
        _http: &'a reqwest::Client,
        _token_endpoint: &'a str,
        _grant: &'a Grant,
        _scopes: &'a [String],
    ) -> AuthFuture<'a> {
        Box::pin(async move { Ok(self.token.clone()) })
    }
}
