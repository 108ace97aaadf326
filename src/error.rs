//! Unified error type for the public API
//!
//! Internal modules keep their domain-specific errors ([`TdfError`],
//! [`AuthError`], [`EnumerationError`], ...) for precise handling. This type
//! folds them into the categories callers branch on: configuration,
//! authentication, transform, local I/O and enumeration.
//!
//! Nothing in this crate retries. Every category is fatal for the item (or
//! the call) it was raised in.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::archive::TdfError;
use crate::auth::AuthError;
use crate::enumerate::EnumerationError;
use crate::fqn::FqnError;

/// Malformed caller input, always detected before any network or file I/O.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid token endpoint '{0}': expected exactly one http:// or https:// scheme")]
    InvalidTokenEndpoint(String),

    #[error("invalid KAS URL '{0}': should contain a single protocol")]
    InvalidKasUrl(String),

    #[error("delegated identity requires a non-empty {0}")]
    MissingDelegatedCredential(&'static str),

    #[error("invalid output file path given")]
    MissingOutputPath,

    #[error("output file path '{path}' should have {suffix} extension")]
    WrongOutputExtension { path: PathBuf, suffix: String },

    #[error("input file path '{path}' does not end with any of {suffixes:?}")]
    MissingSuffix { path: PathBuf, suffixes: Vec<String> },

    #[error("derived output '{0}' would overwrite its input")]
    OutputWouldOverwriteInput(PathBuf),

    #[error("invalid attribute '{label}': {source}")]
    InvalidAttribute {
        label: String,
        #[source]
        source: FqnError,
    },

    #[error("failed to build HTTP transport: {0}")]
    Transport(String),
}

/// Error type for every fallible public operation
#[derive(Debug, Error)]
pub enum OpenTdfError {
    /// Malformed endpoint, scheme, output path or attribute
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// Identity provider refused or answered without a token
    #[error("Authentication error: {0}")]
    Authentication(#[from] AuthError),

    /// The protect/unprotect call itself failed
    #[error("Transform error: {0}")]
    Transform(#[from] TdfError),

    /// Local file open/read/write failure
    #[error("IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The input set could not be resolved; no item was dispatched
    #[error("Enumeration error: {0}")]
    Enumeration(#[from] EnumerationError),

    /// A per-item deadline elapsed before the transform finished
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The task running an item panicked or was cancelled
    #[error("Item task failed: {0}")]
    TaskFailed(String),
}

impl OpenTdfError {
    pub(crate) fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Always false: the core never retries, callers own transient-failure handling
    pub fn is_retryable(&self) -> bool {
        false
    }

    /// Returns a suggestion for resolving this error, when one exists
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Configuration(ConfigError::InvalidTokenEndpoint(_)) => {
                Some("Use a token endpoint such as https://idp.example.com/realms/opentdf/protocol/openid-connect/token")
            }
            Self::Configuration(ConfigError::InvalidAttribute { .. }) => {
                Some("Attributes must follow https://<namespace>/attr/<name>/value/<value>")
            }
            Self::Authentication(AuthError::MissingAccessToken) => {
                Some("Check the client id and secret registered with the identity provider")
            }
            Self::Authentication(AuthError::KasRejected) => {
                Some("Check that the identity provider issues tokens the key access server trusts")
            }
            _ => None,
        }
    }

    pub fn is_configuration_error(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    pub fn is_authentication_error(&self) -> bool {
        matches!(self, Self::Authentication(_))
    }

    pub fn is_transform_error(&self) -> bool {
        matches!(self, Self::Transform(_))
    }

    pub fn is_io_error(&self) -> bool {
        matches!(self, Self::Io { .. })
    }

    pub fn is_enumeration_error(&self) -> bool {
        matches!(self, Self::Enumeration(_))
    }
}

impl From<crate::kas::KasError> for OpenTdfError {
    fn from(e: crate::kas::KasError) -> Self {
        match e {
            crate::kas::KasError::AuthenticationFailed => {
                Self::Authentication(AuthError::KasRejected)
            }
            e => Self::Transform(TdfError::from(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        let config_err: OpenTdfError =
            ConfigError::InvalidTokenEndpoint("ftp://host".to_string()).into();
        assert!(config_err.is_configuration_error());
        assert!(!config_err.is_transform_error());
        assert!(!config_err.is_retryable());
        assert!(config_err.suggestion().is_some());

        let io_err = OpenTdfError::io("/tmp/missing", io::Error::from(io::ErrorKind::NotFound));
        assert!(io_err.is_io_error());
        assert!(!io_err.is_configuration_error());

        let auth_err: OpenTdfError = AuthError::MissingAccessToken.into();
        assert!(auth_err.is_authentication_error());
    }

    #[test]
    fn test_error_display_names_path() {
        let err = OpenTdfError::io(
            "/data/input.txt",
            io::Error::from(io::ErrorKind::PermissionDenied),
        );
        let msg = err.to_string();
        assert!(msg.contains("/data/input.txt"));
    }

    #[test]
    fn test_kas_error_is_transform() {
        let err: OpenTdfError = crate::kas::KasError::AccessDenied("nope".to_string()).into();
        assert!(err.is_transform_error());
    }

    #[test]
    fn test_kas_token_rejection_is_authentication() {
        let err: OpenTdfError = crate::kas::KasError::AuthenticationFailed.into();
        assert!(err.is_authentication_error());
        assert!(!err.is_transform_error());
        assert!(err.suggestion().is_some());
    }
}
