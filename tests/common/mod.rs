//! Common test utilities for opentdf-batch integration tests
//!
//! Most tests run fully offline: a [`LocalKas`] stands in for the key access
//! server and a [`StaticTokenProvider`] for the identity provider.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use opentdf_batch::auth::StaticTokenProvider;
use opentdf_batch::kas::{KeyAccessServer, LocalKas};
use opentdf_batch::{BatchOptions, ClientFactory, Identity, OpentdfConfig, TdfClient, TokenAuth};

pub const KAS_URL: &str = "http://localhost:8080/kas";
pub const TOKEN_ENDPOINT: &str =
    "http://localhost:8888/auth/realms/opentdf/protocol/openid-connect/token";

pub const ATTR_VALUE_1: &str = "https://example.com/attr/attr1/value/value1";
pub const ATTR_VALUE_2: &str = "https://example.com/attr/attr1/value/value2";

pub const TEST_PLAINTEXT: &[u8] = b"Hello, OpenTDF! This is test data for encryption.";

/// Install a fmt subscriber once; controlled by `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn test_config() -> OpentdfConfig {
    OpentdfConfig {
        client_id: "opentdf-sdk".to_string(),
        client_secret: "secret".to_string(),
        platform_endpoint: "localhost:8080".to_string(),
        token_endpoint: TOKEN_ENDPOINT.to_string(),
        kas_url: KAS_URL.to_string(),
        insecure_skip_verify: false,
    }
}

pub fn person() -> Identity {
    Identity::Delegated(TokenAuth::new("person-access-token", "opentdf"))
}

pub fn labels() -> Vec<String> {
    vec![ATTR_VALUE_1.to_string(), ATTR_VALUE_2.to_string()]
}

/// Factory that never leaves the process
pub fn offline_factory(kas: &Arc<LocalKas>) -> ClientFactory {
    let kas: Arc<dyn KeyAccessServer> = kas.clone();
    ClientFactory::new()
        .with_identity_provider(Arc::new(StaticTokenProvider::new("test-token")))
        .with_key_access(kas)
}

pub fn offline_options(kas: &Arc<LocalKas>) -> BatchOptions {
    BatchOptions::new().client_factory(offline_factory(kas))
}

pub fn offline_client(kas: &Arc<LocalKas>, identity: &Identity) -> TdfClient {
    offline_factory(kas)
        .build(&test_config(), identity, &["email".to_string()])
        .expect("offline client")
}

/// Write `(name, contents)` pairs under `dir`, creating parents
pub fn write_files(dir: &Path, files: &[(&str, &[u8])]) -> Vec<PathBuf> {
    files
        .iter()
        .map(|(name, contents)| {
            let path = dir.join(name);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(&path, contents).unwrap();
            path
        })
        .collect()
}

pub fn sorted(mut paths: Vec<PathBuf>) -> Vec<PathBuf> {
    paths.sort();
    paths
}
