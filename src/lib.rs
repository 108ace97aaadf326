//! Concurrent protect and unprotect of files as OpenTDF objects
//!
//! A [`Batch`] resolves a set of files, builds a client for a service (NPE)
//! or delegated (PE) identity, and transforms every file concurrently. Single
//! objects go through the [`transform`] functions directly.

mod archive;
mod crypto;
mod manifest;
mod policy;
mod tdf;

pub mod auth;
pub mod batch;
pub mod client;
pub mod config;
pub mod enumerate;
pub mod error;
pub mod fqn;
pub mod kas;
pub mod naming;
pub mod prelude;
pub mod transform;

pub use archive::{TdfArchive, TdfError};
pub use batch::{Batch, BatchError, BatchOptions, BatchOutcome, ItemFailure};
pub use client::{ClientFactory, TdfClient, Transport};
pub use config::{Identity, OpentdfConfig, TokenAuth};
pub use crypto::EncryptionError;
pub use enumerate::{Direction, ObjectSelector};
pub use error::{ConfigError, OpenTdfError};
pub use manifest::TdfManifest;
pub use naming::SuffixPolicy;
pub use policy::Policy;
