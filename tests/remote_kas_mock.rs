//! Identity provider and KAS over HTTP, served by mockito
//!
//! The rewrap mock behaves like a real KAS: it unwraps the payload key with
//! its private key and re-wraps it for the ephemeral key in the signed
//! request, so a full protect/unprotect round trip runs over the wire.

mod common;

use std::sync::Arc;

use base64::engine::general_purpose::{STANDARD as BASE64, URL_SAFE_NO_PAD};
use base64::Engine as _;
use mockito::{Matcher, Server, ServerGuard};
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey, LineEnding};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;

use common::*;
use opentdf_batch::auth::{AuthError, StaticTokenProvider, TOKEN_EXCHANGE_GRANT};
use opentdf_batch::kas::{KasError, KeyAccessServer, RemoteKas};
use opentdf_batch::transform::{protect, unprotect};
use opentdf_batch::{
    ClientFactory, Identity, OpenTdfError, OpentdfConfig, TdfClient, TdfError, Transport,
};

const KEY_BITS: usize = 1024;

fn remote_config(server: &ServerGuard) -> OpentdfConfig {
    OpentdfConfig {
        token_endpoint: format!("{}/token", server.url()),
        kas_url: format!("{}/kas", server.url()),
        ..test_config()
    }
}

fn remote_client(server: &ServerGuard, identity: &Identity) -> TdfClient {
    let kas: Arc<dyn KeyAccessServer> = Arc::new(RemoteKas::new().ephemeral_key_bits(KEY_BITS));
    ClientFactory::new()
        .with_key_access(kas)
        .build(&remote_config(server), identity, &["email".to_string()])
        .unwrap()
}

/// Pull the client public key and wrapped key out of a signed rewrap request
fn rewrap_for_client(kas_key: &RsaPrivateKey, body: &[u8]) -> serde_json::Value {
    let signed: serde_json::Value = serde_json::from_slice(body).unwrap();
    let jwt = signed["signedRequestToken"].as_str().unwrap();
    let claims = URL_SAFE_NO_PAD.decode(jwt.split('.').nth(1).unwrap()).unwrap();
    let claims: serde_json::Value = serde_json::from_slice(&claims).unwrap();
    let request: serde_json::Value =
        serde_json::from_str(claims["requestBody"].as_str().unwrap()).unwrap();

    let client_key =
        RsaPublicKey::from_public_key_pem(request["clientPublicKey"].as_str().unwrap()).unwrap();
    let wrapped = request["requests"][0]["keyAccessObjects"][0]["keyAccessObject"]["wrappedKey"]
        .as_str()
        .unwrap();

    let payload_key = kas_key
        .decrypt(Oaep::new::<Sha1>(), &BASE64.decode(wrapped).unwrap())
        .unwrap();
    let rewrapped = client_key
        .encrypt(&mut rand::rngs::OsRng, Oaep::new::<Sha1>(), &payload_key)
        .unwrap();

    serde_json::json!({
        "responses": [{
            "policyId": request["requests"][0]["policy"]["id"],
            "results": [{
                "keyAccessObjectId": "kao-0",
                "status": "permit",
                "kasWrappedKey": BASE64.encode(rewrapped)
            }]
        }]
    })
}

async fn mock_public_key(server: &mut ServerGuard, kas_key: &RsaPrivateKey) -> mockito::Mock {
    let pem = RsaPublicKey::from(kas_key)
        .to_public_key_pem(LineEnding::LF)
        .unwrap();
    server
        .mock("GET", "/kas/v2/kas_public_key")
        .match_query(Matcher::UrlEncoded("algorithm".into(), "rsa:2048".into()))
        .match_header("authorization", "Bearer abc")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(serde_json::json!({ "publicKey": pem, "kid": "r1" }).to_string())
        .create_async()
        .await
}

fn token_body() -> String {
    r#"{"access_token":"abc","token_type":"Bearer","expires_in":300}"#.to_string()
}

#[tokio::test]
async fn test_npe_round_trip_over_http() {
    init_tracing();
    let mut server = Server::new_async().await;
    let kas_key = RsaPrivateKey::new(&mut rand::rngs::OsRng, KEY_BITS).unwrap();

    let token_mock = server
        .mock("POST", "/token")
        .match_body(Matcher::AllOf(vec![
            Matcher::UrlEncoded("grant_type".into(), "client_credentials".into()),
            Matcher::UrlEncoded("client_id".into(), "opentdf-sdk".into()),
            Matcher::UrlEncoded("scope".into(), "email".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(token_body())
        .expect(1)
        .create_async()
        .await;
    let public_key_mock = mock_public_key(&mut server, &kas_key).await;

    let rewrap_key = kas_key.clone();
    let rewrap_mock = server
        .mock("POST", "/kas/v2/rewrap")
        .match_header("authorization", "Bearer abc")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body_from_request(move |request| {
            rewrap_for_client(&rewrap_key, request.body().unwrap())
                .to_string()
                .into_bytes()
        })
        .create_async()
        .await;

    let client = remote_client(&server, &Identity::Service);
    let kas_url = remote_config(&server).kas_url;

    let (protected, manifest) = protect(&client, TEST_PLAINTEXT, &kas_url, &labels())
        .await
        .unwrap();
    assert!(manifest.contains("\"kid\": \"r1\""));

    let plaintext = unprotect(&client, &protected).await.unwrap();
    assert_eq!(plaintext, TEST_PLAINTEXT);

    token_mock.assert_async().await;
    public_key_mock.assert_async().await;
    rewrap_mock.assert_async().await;
}

#[tokio::test]
async fn test_pe_uses_token_exchange() {
    let mut server = Server::new_async().await;
    let kas_key = RsaPrivateKey::new(&mut rand::rngs::OsRng, KEY_BITS).unwrap();

    let token_mock = server
        .mock("POST", "/token")
        .match_body(Matcher::AllOf(vec![
            Matcher::UrlEncoded("grant_type".into(), TOKEN_EXCHANGE_GRANT.into()),
            Matcher::UrlEncoded("subject_token".into(), "person-access-token".into()),
            Matcher::UrlEncoded("audience".into(), "opentdf".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(token_body())
        .expect(1)
        .create_async()
        .await;
    let _public_key_mock = mock_public_key(&mut server, &kas_key).await;

    let client = remote_client(&server, &person());
    let kas_url = remote_config(&server).kas_url;
    protect(&client, TEST_PLAINTEXT, &kas_url, &labels())
        .await
        .unwrap();

    token_mock.assert_async().await;
}

#[tokio::test]
async fn test_rewrap_denied() {
    let mut server = Server::new_async().await;
    let kas_key = RsaPrivateKey::new(&mut rand::rngs::OsRng, KEY_BITS).unwrap();

    let _token_mock = server
        .mock("POST", "/token")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(token_body())
        .create_async()
        .await;
    let _public_key_mock = mock_public_key(&mut server, &kas_key).await;
    let _rewrap_mock = server
        .mock("POST", "/kas/v2/rewrap")
        .with_status(403)
        .with_body("entity lacks entitlement")
        .create_async()
        .await;

    let client = remote_client(&server, &Identity::Service);
    let kas_url = remote_config(&server).kas_url;
    let (protected, _) = protect(&client, TEST_PLAINTEXT, &kas_url, &labels())
        .await
        .unwrap();

    let err = unprotect(&client, &protected).await.unwrap_err();
    assert!(matches!(
        err,
        OpenTdfError::Transform(TdfError::Kas(KasError::AccessDenied(_)))
    ));
}

#[tokio::test]
async fn test_rewrap_unauthorized_is_authentication_error() {
    let mut server = Server::new_async().await;
    let kas_key = RsaPrivateKey::new(&mut rand::rngs::OsRng, KEY_BITS).unwrap();

    let _token_mock = server
        .mock("POST", "/token")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(token_body())
        .create_async()
        .await;
    let _public_key_mock = mock_public_key(&mut server, &kas_key).await;
    let _rewrap_mock = server
        .mock("POST", "/kas/v2/rewrap")
        .with_status(401)
        .with_body("token expired")
        .create_async()
        .await;

    let client = remote_client(&server, &Identity::Service);
    let kas_url = remote_config(&server).kas_url;
    let (protected, _) = protect(&client, TEST_PLAINTEXT, &kas_url, &labels())
        .await
        .unwrap();

    let err = unprotect(&client, &protected).await.unwrap_err();
    assert!(err.is_authentication_error());
    assert!(matches!(
        err,
        OpenTdfError::Authentication(AuthError::KasRejected)
    ));
}

#[tokio::test]
async fn test_tls_token_endpoint_with_plaintext_kas() {
    let mut server = Server::new_async().await;
    let kas_key = RsaPrivateKey::new(&mut rand::rngs::OsRng, KEY_BITS).unwrap();
    let public_key_mock = mock_public_key(&mut server, &kas_key).await;

    let config = OpentdfConfig {
        token_endpoint: "https://idp.example.com/token".to_string(),
        ..remote_config(&server)
    };
    let kas: Arc<dyn KeyAccessServer> = Arc::new(RemoteKas::new().ephemeral_key_bits(KEY_BITS));
    let client = ClientFactory::new()
        .with_identity_provider(Arc::new(StaticTokenProvider::new("abc")))
        .with_key_access(kas)
        .build(&config, &Identity::Service, &["email".to_string()])
        .unwrap();
    assert_eq!(client.transport(), Transport::Tls { skip_verify: false });

    protect(&client, TEST_PLAINTEXT, &config.kas_url, &labels())
        .await
        .unwrap();
    public_key_mock.assert_async().await;
}

#[tokio::test]
async fn test_identity_provider_rejects_client() {
    let mut server = Server::new_async().await;
    let _token_mock = server
        .mock("POST", "/token")
        .with_status(401)
        .with_body(r#"{"error":"invalid_client"}"#)
        .create_async()
        .await;

    let client = remote_client(&server, &Identity::Service);
    let kas_url = remote_config(&server).kas_url;
    let err = protect(&client, TEST_PLAINTEXT, &kas_url, &labels())
        .await
        .unwrap_err();

    assert!(err.is_authentication_error());
    assert!(matches!(
        err,
        OpenTdfError::Authentication(AuthError::Rejected { status: 401, .. })
    ));
}

#[tokio::test]
async fn test_token_response_without_access_token() {
    let mut server = Server::new_async().await;
    let _token_mock = server
        .mock("POST", "/token")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"token_type":"Bearer"}"#)
        .create_async()
        .await;

    let client = remote_client(&server, &Identity::Service);
    let kas_url = remote_config(&server).kas_url;
    let err = protect(&client, TEST_PLAINTEXT, &kas_url, &[])
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        OpenTdfError::Authentication(AuthError::MissingAccessToken)
    ));
    assert!(err.suggestion().is_some());
}
