//! Source downloads and content hashing.

use crate::error::AppError;
use crate::http::HttpClient;
use crate::runtime::Runtime;
use anyhow::{Context, Result};
use log::{debug, info};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

/// Download `url` to `dest`, retrying transient failures.
#[tracing::instrument(skip(runtime, http_client))]
pub async fn download_file<R: Runtime>(
    runtime: &R,
    url: &str,
    dest: &Path,
    http_client: &HttpClient,
) -> Result<()> {
    info!("Downloading {}...", url);

    let bytes = http_client
        .download_file(url, || {
            runtime
                .create_file(dest)
                .with_context(|| format!("Failed to create file at {:?}", dest))
        })
        .await?;

    debug!("Downloaded {} bytes to {:?}", bytes, dest);
    Ok(())
}

/// Lowercase hex SHA-256 of a file's contents.
pub fn sha256_file<R: Runtime>(runtime: &R, path: &Path) -> Result<String> {
    let mut reader = runtime.open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let n = reader
            .read(&mut buffer)
            .with_context(|| format!("Failed to read {:?}", path))?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Fail with [`AppError::HashMismatch`] unless the file hashes to `expected`.
pub fn verify_sha256<R: Runtime>(runtime: &R, path: &Path, url: &str, expected: &str) -> Result<()> {
    let actual = sha256_file(runtime, path)?;
    if !actual.eq_ignore_ascii_case(expected) {
        return Err(AppError::HashMismatch {
            url: url.to_string(),
            expected: expected.to_lowercase(),
            actual,
        }
        .into());
    }
    debug!("Verified sha256 of {:?}", path);
    Ok(())
}
