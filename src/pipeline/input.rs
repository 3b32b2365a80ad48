//! Reference-document input: load the PDF that assembled pages are
//! interleaved with, from a local path or an HTTP/HTTPS URL.
//!
//! The bytes are held in memory because pdfium loads them with
//! `load_pdf_from_byte_vec`; nothing is written to disk. The `%PDF` magic
//! bytes are validated up front so a login page saved as `.pdf` fails with
//! a clear error instead of a pdfium parse failure.

use crate::error::HarvestError;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

/// A loaded reference document.
#[derive(Debug, Clone)]
pub struct ReferenceDocument {
    /// Path or URL it was loaded from.
    pub source: String,
    pub bytes: Vec<u8>,
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Load the reference document named by `input`.
pub async fn load_reference(input: &str, timeout_secs: u64) -> Result<ReferenceDocument, HarvestError> {
    let bytes = if is_url(input) {
        download(input, timeout_secs).await?
    } else {
        read_local(input).await?
    };
    check_magic(input, &bytes)?;
    debug!("Reference document {input}: {} bytes", bytes.len());
    Ok(ReferenceDocument {
        source: input.to_string(),
        bytes,
    })
}

async fn read_local(path_str: &str) -> Result<Vec<u8>, HarvestError> {
    let path = PathBuf::from(path_str);
    tokio::fs::read(&path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => HarvestError::ReferenceNotFound { path },
        _ => HarvestError::CorruptDocument {
            detail: format!("cannot read {}: {e}", path.display()),
        },
    })
}

async fn download(url: &str, timeout_secs: u64) -> Result<Vec<u8>, HarvestError> {
    info!("Downloading reference PDF from: {}", url);
    let failed = |reason: String| HarvestError::ReferenceDownloadFailed {
        url: url.to_string(),
        reason,
    };

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| failed(e.to_string()))?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            failed(format!("timed out after {timeout_secs}s"))
        } else {
            failed(e.to_string())
        }
    })?;

    if !response.status().is_success() {
        return Err(failed(format!("HTTP {}", response.status())));
    }

    let bytes = response.bytes().await.map_err(|e| failed(e.to_string()))?;
    info!("Downloaded {} bytes", bytes.len());
    Ok(bytes.to_vec())
}

fn check_magic(source: &str, bytes: &[u8]) -> Result<(), HarvestError> {
    if bytes.starts_with(b"%PDF") {
        return Ok(());
    }
    let mut magic = [0u8; 4];
    let n = bytes.len().min(4);
    magic[..n].copy_from_slice(&bytes[..n]);
    Err(HarvestError::NotAPdf {
        path: PathBuf::from(source),
        magic,
    })
}
