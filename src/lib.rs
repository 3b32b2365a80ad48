//! # qbank2pdf
//!
//! Harvest question-bank items (question text, answer explanations,
//! diagnostic images, reference material) from an authenticated browser
//! session and assemble them into one printable PDF.
//!
//! ## Pipeline Overview
//!
//! ```text
//! start URL
//!  │
//!  ├─ 1. Navigate  per-item state machine: ready → reveal → explanation → next
//!  ├─ 2. Extract   snapshot HTML → typed records (selector chains with fallbacks)
//!  ├─ 3. Resolve   image refs → embeddable data URIs + pixel sizes (fetch or screenshot)
//!  ├─ 4. Assemble  items → blocks (width clamp, two-row image grids, page breaks)
//!  ├─ 5. Layout    blocks → positioned text/image ops per page
//!  ├─ 6. Encode    pdfium (spawn_blocking)
//!  └─ 7. Merge     optional: interleave reference-PDF page groups per item
//! ```
//!
//! The harvest is sequential on one session. Faults are absorbed at the
//! smallest scope: a missing image becomes a placeholder, an item whose
//! explanation never appears is skipped, and a broken "next" control stops
//! the loop with everything gathered so far. Only configuration, reference
//! document and encoder failures are returned as [`HarvestError`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use qbank2pdf::{run_to_file, ChromeSession, HarvestConfig, PipelineVariant};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Chrome started with --remote-debugging-port=9222 and already logged in.
//!     let session = ChromeSession::connect("ws://127.0.0.1:9222/devtools/browser/abc").await?;
//!     let config = HarvestConfig::builder()
//!         .start_location("https://qbank.example/exam/118/A/1")
//!         .item_count(75)
//!         .variant(PipelineVariant::with_problem())
//!         .font_path("fonts/NotoSansJP-Regular.ttf")
//!         .output_path("118A.pdf")
//!         .build()?;
//!     let output = run_to_file(&session, &config).await?;
//!     eprintln!("{} items, {} pages", output.stats.harvested_items, output.stats.output_pages);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature   | Default | Description |
//! |-----------|---------|-------------|
//! | `browser` | via cli | [`ChromeSession`], a chromiumoxide-backed [`BrowserSession`] |
//! | `cli`     | on      | Enables the `qbank2pdf` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Without `browser` the library still runs against any [`BrowserSession`]
//! implementation, and [`render_items`] needs no browser at all.

// ── Modules ──────────────────────────────────────────────────────────────

#[cfg(feature = "browser")]
pub mod chrome;
pub mod config;
pub mod error;
pub mod labels;
pub mod model;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod run;
pub mod session;

// ── Re-exports ───────────────────────────────────────────────────────────

#[cfg(feature = "browser")]
pub use chrome::ChromeSession;
pub use config::{
    HarvestConfig, HarvestConfigBuilder, ImageStrategy, PageLayout, PipelineVariant,
    SelectorChain, SelectorSet, UnresolvedFallback,
};
pub use error::{HarvestError, ImageError, ItemError, SessionError};
pub use model::{
    ExplanationRecord, ImageRef, ImageSlot, Item, ProblemRecord, ReferenceRecord, ResolvedImage,
    Section, SectionKind,
};
pub use output::{Harvest, HarvestOutput, HarvestStats, StopReason};
pub use pipeline::render::{DocumentEncoder, EncodedDocument, PdfiumEncoder};
pub use pipeline::resolve::{ImageResolver, ReqwestFetcher};
pub use progress::{HarvestProgressCallback, NoopProgressCallback, ProgressCallback};
pub use run::{
    harvest_items, load_records, render_items, run, run_to_file, run_with, save_records,
    write_atomic, RenderedDocument,
};
pub use session::{BrowserSession, Cookie, HttpFetch, HttpResponse, Locator, PageSnapshot};
