//! Connection configuration and identity credentials
//!
//! Everything here is plain data constructed by the caller once per
//! operation and shared read-only for its duration.

use serde::{Deserialize, Serialize};

/// Endpoints and client credentials for one platform
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpentdfConfig {
    pub client_id: String,
    pub client_secret: String,
    /// Platform host, sometimes referenced as `host`
    pub platform_endpoint: String,
    /// OIDC token endpoint; must carry an explicit `http://` or `https://` scheme
    pub token_endpoint: String,
    pub kas_url: String,
    #[serde(default)]
    pub insecure_skip_verify: bool,
}

impl OpentdfConfig {
    /// Read a configuration from the conventional environment variables
    ///
    /// Intended for embedding applications and test harnesses; the library
    /// itself never consults the environment.
    ///
    /// | Field | Variable |
    /// |---|---|
    /// | `client_id` | `OPENTDF_CLIENT_ID` |
    /// | `client_secret` | `OPENTDF_CLIENT_SECRET` |
    /// | `platform_endpoint` | `OPENTDF_HOSTNAME` |
    /// | `token_endpoint` | `OIDC_TOKEN_ENDPOINT` |
    /// | `kas_url` | `OPENTDF_KAS_URL` |
    /// | `insecure_skip_verify` | `INSECURE_SKIP_VERIFY` (`TRUE` enables) |
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).unwrap_or_default();
        Self {
            client_id: var("OPENTDF_CLIENT_ID"),
            client_secret: var("OPENTDF_CLIENT_SECRET"),
            platform_endpoint: var("OPENTDF_HOSTNAME"),
            token_endpoint: var("OIDC_TOKEN_ENDPOINT"),
            kas_url: var("OPENTDF_KAS_URL"),
            insecure_skip_verify: var("INSECURE_SKIP_VERIFY") == "TRUE",
        }
    }
}

/// A person entity's previously obtained token plus the client it acts through
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenAuth {
    pub access_token: String,
    pub npe_client_id: String,
}

impl TokenAuth {
    pub fn new(access_token: impl Into<String>, npe_client_id: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            npe_client_id: npe_client_id.into(),
        }
    }
}

// Keep bearer tokens out of logs.
impl std::fmt::Debug for TokenAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenAuth")
            .field("access_token", &"<redacted>")
            .field("npe_client_id", &self.npe_client_id)
            .finish()
    }
}

/// Which trust model a client authenticates under
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    /// Non-person entity: the configured client credentials
    Service,
    /// Person entity: the given token, exchanged for a client-scoped one
    Delegated(TokenAuth),
}

impl Identity {
    pub fn is_delegated(&self) -> bool {
        matches!(self, Identity::Delegated(_))
    }

    pub(crate) fn label(&self) -> &'static str {
        match self {
            Identity::Service => "npe",
            Identity::Delegated(_) => "pe",
        }
    }
}
