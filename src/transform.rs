//! Single-object protect and unprotect
//!
//! Each entry point takes a ready [`TdfClient`]. Nothing here retries; any
//! failure surfaces to the caller with its cause attached.

use std::path::{Path, PathBuf};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::archive::{TdfArchive, TdfError};
use crate::client::TdfClient;
use crate::error::{ConfigError, OpenTdfError};
use crate::fqn::{validate_labels, FqnValidationRules};
use crate::manifest::TdfManifest;
use crate::naming::{resolve_protect_output, SuffixPolicy};
use crate::policy::Policy;
use crate::tdf::{self, DEFAULT_SEGMENT_SIZE};

/// A KAS location must name exactly one protocol
pub fn validate_kas_url(kas_url: &str) -> Result<(), ConfigError> {
    if kas_url.matches("http").count() != 1 {
        return Err(ConfigError::InvalidKasUrl(kas_url.to_string()));
    }
    Ok(())
}

/// Protect `plaintext`, returning the protected bytes and the pretty-printed manifest
///
/// Labels are checked against the default FQN rules and the KAS URL against
/// [`validate_kas_url`] before any network call.
pub async fn protect(
    client: &TdfClient,
    plaintext: &[u8],
    kas_url: &str,
    labels: &[String],
) -> Result<(Vec<u8>, String), OpenTdfError> {
    validate_kas_url(kas_url)?;
    validate_labels(labels, &FqnValidationRules::default())?;
    seal(client, plaintext, kas_url, labels).await
}

/// [`protect`] for inputs the caller has already validated
pub(crate) async fn seal(
    client: &TdfClient,
    plaintext: &[u8],
    kas_url: &str,
    labels: &[String],
) -> Result<(Vec<u8>, String), OpenTdfError> {
    let policy = Policy::from_labels(labels);
    let prepared = tdf::prepare(plaintext, kas_url, &policy, DEFAULT_SEGMENT_SIZE)?;
    let wrapped = client.wrap_key(kas_url, prepared.payload_key()).await?;
    let (bytes, manifest) = prepared.finish(wrapped)?;

    let manifest_json = manifest.to_json().map_err(TdfError::from)?;
    Ok((bytes, manifest_json))
}

/// Recover the plaintext of a protected object
pub async fn unprotect(client: &TdfClient, protected: &[u8]) -> Result<Vec<u8>, OpenTdfError> {
    let entry = TdfArchive::from_bytes(protected.to_vec())?.entry()?;
    let payload_key = client.unwrap_key(&entry.manifest).await?;
    Ok(tdf::open(&entry, &payload_key)?)
}

/// Read the manifest of a protected object without contacting any service
pub fn inspect(protected: &[u8]) -> Result<TdfManifest, OpenTdfError> {
    Ok(TdfArchive::from_bytes(protected.to_vec())?.manifest()?)
}

/// Protect a string against the client's configured KAS
///
/// Returns `(manifest_json, protected_bytes)`.
pub async fn protect_string(
    client: &TdfClient,
    text: &str,
    labels: &[String],
) -> Result<(String, Vec<u8>), OpenTdfError> {
    let (bytes, manifest) = protect(client, text.as_bytes(), client.kas_url(), labels).await?;
    Ok((manifest, bytes))
}

pub async fn unprotect_string(client: &TdfClient, protected: &[u8]) -> Result<String, OpenTdfError> {
    let plaintext = unprotect(client, protected).await?;
    String::from_utf8(plaintext).map_err(|e| {
        TdfError::Structure(format!("plaintext is not valid UTF-8: {}", e)).into()
    })
}

/// Protect everything read from `reader` into `writer`
///
/// The object is buffered in memory before encryption.
pub async fn protect_stream<R, W>(
    client: &TdfClient,
    mut reader: R,
    mut writer: W,
    labels: &[String],
) -> Result<String, OpenTdfError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut plaintext = Vec::new();
    reader
        .read_to_end(&mut plaintext)
        .await
        .map_err(stream_error)?;

    let (bytes, manifest) = protect(client, &plaintext, client.kas_url(), labels).await?;

    writer.write_all(&bytes).await.map_err(stream_error)?;
    writer.flush().await.map_err(stream_error)?;
    Ok(manifest)
}

/// Unprotect from `reader` into `writer`, returning the plaintext length
pub async fn unprotect_stream<R, W>(
    client: &TdfClient,
    mut reader: R,
    mut writer: W,
) -> Result<u64, OpenTdfError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut protected = Vec::new();
    reader
        .read_to_end(&mut protected)
        .await
        .map_err(stream_error)?;

    let plaintext = unprotect(client, &protected).await?;

    writer.write_all(&plaintext).await.map_err(stream_error)?;
    writer.flush().await.map_err(stream_error)?;
    Ok(plaintext.len() as u64)
}

fn stream_error(e: std::io::Error) -> OpenTdfError {
    TdfError::IoError(e).into()
}

/// Protect `input` into `output`, applying `suffix_policy` to the destination
pub async fn protect_file(
    client: &TdfClient,
    input: &Path,
    output: &Path,
    labels: &[String],
    suffix_policy: SuffixPolicy,
) -> Result<PathBuf, OpenTdfError> {
    let output = resolve_protect_output(output, suffix_policy)?;
    if output == input {
        return Err(ConfigError::OutputWouldOverwriteInput(output).into());
    }

    let plaintext = tokio::fs::read(input)
        .await
        .map_err(|e| OpenTdfError::io(input, e))?;
    let (bytes, _) = protect(client, &plaintext, client.kas_url(), labels).await?;
    tokio::fs::write(&output, bytes)
        .await
        .map_err(|e| OpenTdfError::io(&output, e))?;
    Ok(output)
}

/// Unprotect `input` into `output`
pub async fn unprotect_file(
    client: &TdfClient,
    input: &Path,
    output: &Path,
) -> Result<PathBuf, OpenTdfError> {
    if output.as_os_str().is_empty() {
        return Err(ConfigError::MissingOutputPath.into());
    }
    if output == input {
        return Err(ConfigError::OutputWouldOverwriteInput(output.to_path_buf()).into());
    }

    let protected = tokio::fs::read(input)
        .await
        .map_err(|e| OpenTdfError::io(input, e))?;
    let plaintext = unprotect(client, &protected).await?;
    tokio::fs::write(output, plaintext)
        .await
        .map_err(|e| OpenTdfError::io(output, e))?;
    Ok(output.to_path_buf())
}
