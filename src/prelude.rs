//! Commonly used types in one import
//!
//! ```rust
//! use opentdf_batch::prelude::*;
//!
//! let config = OpentdfConfig::from_env();
//! let batch = Batch::new(config, Identity::Service)
//!     .options(BatchOptions::new().max_concurrency(8));
//! # drop(batch);
//! ```

pub use crate::auth::{IdentityProvider, OidcTokenProvider, StaticTokenProvider};
pub use crate::batch::{
    protect_dir, protect_glob, protect_paths, protect_with_extensions, unprotect_dir,
    unprotect_paths, unprotect_with_extensions, Batch, BatchError, BatchOptions, BatchOutcome,
};
pub use crate::client::{ClientFactory, TdfClient};
pub use crate::config::{Identity, OpentdfConfig, TokenAuth};
pub use crate::enumerate::{Direction, ObjectSelector};
pub use crate::error::{ConfigError, OpenTdfError};
pub use crate::kas::{KeyAccessServer, LocalKas, RemoteKas};
pub use crate::naming::SuffixPolicy;
pub use crate::transform::{
    inspect, protect, protect_file, protect_stream, protect_string, unprotect, unprotect_file,
    unprotect_stream, unprotect_string,
};
