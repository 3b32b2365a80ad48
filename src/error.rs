//! Error types for the qbank2pdf library.
//!
//! Four error types reflect four distinct failure scopes:
//!
//! * [`HarvestError`]: **Fatal**: the run cannot produce a document at all
//!   (invalid configuration, unreadable reference PDF, pdfium unavailable,
//!   encoder failure). Returned as `Err(HarvestError)` from the top-level
//!   `run*` functions.
//!
//! * [`ItemError`]: **Non-fatal**: one item slot could not be harvested
//!   cleanly (readiness timeout, reveal control mismatch, explanation never
//!   appeared). Stored in [`crate::output::HarvestOutput::item_errors`] so
//!   callers can inspect partial success.
//!
//! * [`ImageError`]: **Non-fatal**: a single image could not be fetched,
//!   captured or decoded. The resolver logs it and substitutes a placeholder.
//!
//! * [`SessionError`]: returned by [`crate::session::BrowserSession`]
//!   operations; the navigator decides per call site whether it is
//!   recoverable, item-fatal or loop-fatal.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the qbank2pdf library.
#[derive(Debug, Error)]
pub enum HarvestError {
    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A configured CSS selector does not parse.
    #[error("Invalid selector for '{field}': {selector:?} ({detail})")]
    InvalidSelector {
        field: String,
        selector: String,
        detail: String,
    },

    // ── Reference document errors ─────────────────────────────────────────
    /// Reference document was not found at the given path.
    #[error("Reference PDF not found: '{path}'\nCheck the path exists and is readable.")]
    ReferenceNotFound { path: PathBuf },

    /// The reference file exists but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    /// Reference document URL could not be downloaded.
    #[error("Failed to download reference PDF '{url}': {reason}")]
    ReferenceDownloadFailed { url: String, reason: String },

    /// pdfium refused to open a document (reference or freshly encoded).
    #[error("PDF document could not be opened: {detail}")]
    CorruptDocument { detail: String },

    // ── Encoder errors ────────────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Install libpdfium for your platform and either place it next to the binary,\n\
put it on the system library path, or pass --pdfium-lib /path/to/libpdfium.\n"
    )]
    PdfiumBindingFailed(String),

    /// The PDF encoder failed while building or saving the document.
    #[error("Document encoding failed: {detail}")]
    EncodeFailed { detail: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output PDF file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Harvested records could not be read or written as JSON.
    #[error("Records file '{path}': {detail}")]
    RecordsIo { path: PathBuf, detail: String },

    // ── Session errors ────────────────────────────────────────────────────
    /// The browser session could not be established.
    #[error("Browser session error: {0}")]
    Session(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single harvested item slot.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum ItemError {
    /// The content-readiness marker never became visible.
    #[error("Item {ordinal}: content not ready after {waited_ms}ms")]
    ContentNotReady { ordinal: usize, waited_ms: u64 },

    /// The answer-reveal control was missing or carried an unexpected label.
    #[error("Item {ordinal}: reveal control label {found:?}, expected {expected:?}")]
    RevealLabelMismatch {
        ordinal: usize,
        expected: String,
        found: Option<String>,
    },

    /// One of the intermediate sub-views could not be advanced.
    #[error("Item {ordinal}: pre-reveal step {step} failed: {detail}")]
    SubStepFailed {
        ordinal: usize,
        step: usize,
        detail: String,
    },

    /// The revealed-answer marker never appeared; the slot was skipped.
    #[error("Item {ordinal}: explanation not ready after {secs}s")]
    ExplanationTimeout { ordinal: usize, secs: u64 },

    /// The next-item control was missing or navigation failed.
    #[error("Item {ordinal}: could not advance to the next item: {detail}")]
    AdvanceFailed { ordinal: usize, detail: String },
}

impl ItemError {
    /// 1-indexed ordinal of the item slot this error belongs to.
    pub fn ordinal(&self) -> usize {
        match self {
            ItemError::ContentNotReady { ordinal, .. }
            | ItemError::RevealLabelMismatch { ordinal, .. }
            | ItemError::SubStepFailed { ordinal, .. }
            | ItemError::ExplanationTimeout { ordinal, .. }
            | ItemError::AdvanceFailed { ordinal, .. } => *ordinal,
        }
    }
}

/// A non-fatal error while resolving one image reference.
#[derive(Debug, Clone, Error)]
pub enum ImageError {
    /// Transport-level failure (DNS, TLS, connection reset).
    #[error("fetch of '{url}' failed: {reason}")]
    Fetch { url: String, reason: String },

    /// The server answered with a non-success status.
    #[error("fetch of '{url}' returned HTTP {status}")]
    HttpStatus { url: String, status: u16 },

    /// Bytes were received but are not a decodable image.
    #[error("image decode failed: {detail}")]
    Decode { detail: String },

    /// Screenshot capture of the live element failed.
    #[error("screenshot of '{url}' failed: {detail}")]
    Capture { url: String, detail: String },

    /// Resolution exceeded its per-image timeout.
    #[error("resolution of '{url}' timed out after {secs}s")]
    Timeout { url: String, secs: u64 },

    /// A `data:` URI is malformed.
    #[error("malformed inline image payload: {detail}")]
    InvalidInline { detail: String },
}

/// Errors surfaced by a [`crate::session::BrowserSession`] implementation.
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    /// No element matched the locator.
    #[error("no element matches {locator}")]
    ElementNotFound { locator: String },

    /// A bounded wait inside the driver expired.
    #[error("{what} timed out after {secs}s")]
    Timeout { what: String, secs: u64 },

    /// The underlying browser protocol reported an error.
    #[error("browser protocol error: {0}")]
    Protocol(String),
}
