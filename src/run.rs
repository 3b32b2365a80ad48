//! Top-level entry points.
//!
//! [`run`] is harvest → resolve → assemble → layout → encode → (merge) in
//! one call. The halves are public on their own: [`harvest_items`] stops
//! after resolution, and [`render_items`] turns previously harvested (or
//! [`load_records`]-loaded) items into a PDF without touching a browser.

use crate::config::HarvestConfig;
use crate::error::HarvestError;
use crate::model::Item;
use crate::output::{Harvest, HarvestOutput, HarvestStats, StopReason};
use crate::pipeline::assemble::assemble;
use crate::pipeline::harvest::harvest;
use crate::pipeline::input::{load_reference, ReferenceDocument};
use crate::pipeline::layout::paginate;
use crate::pipeline::merge::{merged_page_count, plan_merge, reference_pages_copied};
use crate::pipeline::render::{DocumentEncoder, PdfiumEncoder};
use crate::pipeline::resolve::{ImageResolver, ReqwestFetcher};
use crate::session::{BrowserSession, HttpFetch};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// A rendered PDF and its page accounting.
#[derive(Debug, Clone)]
pub struct RenderedDocument {
    pub pdf: Vec<u8>,
    pub assembled_pages: usize,
    pub reference_pages_copied: usize,
    pub output_pages: usize,
}

/// Harvest, render and return everything in memory, using the reqwest
/// fetcher and the pdfium encoder from `config`.
pub async fn run(
    session: &dyn BrowserSession,
    config: &HarvestConfig,
) -> Result<HarvestOutput, HarvestError> {
    let fetcher = default_fetcher(config)?;
    let encoder = PdfiumEncoder::new(config.pdfium_lib_path.clone(), config.font_path.clone());
    run_with(session, fetcher, &encoder, config).await
}

/// [`run`] with explicit collaborators.
pub async fn run_with(
    session: &dyn BrowserSession,
    fetcher: Arc<dyn HttpFetch>,
    encoder: &dyn DocumentEncoder,
    config: &HarvestConfig,
) -> Result<HarvestOutput, HarvestError> {
    let total_start = Instant::now();

    // Fail before harvesting rather than after, when the reference is bad.
    let reference = load_configured_reference(config).await?;

    let harvest_start = Instant::now();
    let harvest = harvest_items(session, fetcher, config).await?;
    let harvest_duration_ms = harvest_start.elapsed().as_millis() as u64;

    let render_start = Instant::now();
    let rendered = render_with_reference(&harvest.items, reference.as_ref(), encoder, config).await?;
    let render_duration_ms = render_start.elapsed().as_millis() as u64;

    let mut stats = stats_for(&harvest.items, &rendered, config.item_count, harvest.stop_reason);
    stats.skipped_items = harvest.skipped;
    stats.harvest_duration_ms = harvest_duration_ms;
    stats.render_duration_ms = render_duration_ms;
    stats.total_duration_ms = total_start.elapsed().as_millis() as u64;

    info!(
        "Run complete: {} item(s), {} page(s) in {}ms",
        stats.harvested_items, stats.output_pages, stats.total_duration_ms
    );

    Ok(HarvestOutput {
        items: harvest.items,
        pdf: rendered.pdf,
        stats,
        item_errors: harvest.item_errors,
    })
}

/// [`run`], then write the PDF to `config.output_path` atomically.
pub async fn run_to_file(
    session: &dyn BrowserSession,
    config: &HarvestConfig,
) -> Result<HarvestOutput, HarvestError> {
    let output = run(session, config).await?;
    write_atomic(&config.output_path, &output.pdf).await?;
    info!("Wrote {}", config.output_path.display());
    Ok(output)
}

/// Run the harvest loop with a fresh per-run image resolver.
pub async fn harvest_items(
    session: &dyn BrowserSession,
    fetcher: Arc<dyn HttpFetch>,
    config: &HarvestConfig,
) -> Result<Harvest, HarvestError> {
    let resolver = ImageResolver::new(config, fetcher);
    harvest(session, &resolver, config).await
}

/// Assemble, paginate and encode `items`, merging with the configured
/// reference document when enabled.
pub async fn render_items(
    items: &[Item],
    encoder: &dyn DocumentEncoder,
    config: &HarvestConfig,
) -> Result<(RenderedDocument, HarvestStats), HarvestError> {
    let start = Instant::now();
    let reference = load_configured_reference(config).await?;
    let rendered = render_with_reference(items, reference.as_ref(), encoder, config).await?;
    let mut stats = stats_for(items, &rendered, items.len(), StopReason::FromRecords);
    stats.render_duration_ms = start.elapsed().as_millis() as u64;
    stats.total_duration_ms = stats.render_duration_ms;
    Ok((rendered, stats))
}

async fn load_configured_reference(
    config: &HarvestConfig,
) -> Result<Option<ReferenceDocument>, HarvestError> {
    match (&config.reference_document, config.merge_with_reference) {
        (Some(source), true) => Ok(Some(
            load_reference(source, config.download_timeout_secs).await?,
        )),
        _ => Ok(None),
    }
}

async fn render_with_reference(
    items: &[Item],
    reference: Option<&ReferenceDocument>,
    encoder: &dyn DocumentEncoder,
    config: &HarvestConfig,
) -> Result<RenderedDocument, HarvestError> {
    if items.is_empty() {
        warn!("No items harvested; the document will only contain reference pages, if any");
    }
    let model = assemble(items, config.layout.max_image_width());
    let laid_out = paginate(&model, &config.layout);
    let encoded = encoder.encode(laid_out).await?;
    let assembled_pages = encoded.page_count();

    let Some(reference) = reference else {
        return Ok(RenderedDocument {
            pdf: encoded.bytes,
            assembled_pages,
            reference_pages_copied: 0,
            output_pages: assembled_pages,
        });
    };

    let reference_pages = encoder.page_count(&reference.bytes).await?;
    let plan = plan_merge(&encoded.item_pages, reference_pages, config.merge_group_size);
    let copied = reference_pages_copied(&plan);
    if copied < reference_pages {
        info!(
            "Reference {} has {} page(s); {} left unused",
            reference.source,
            reference_pages,
            reference_pages - copied
        );
    }
    let pdf = encoder.merge(&plan, &encoded.bytes, &reference.bytes).await?;
    Ok(RenderedDocument {
        pdf,
        assembled_pages,
        reference_pages_copied: copied,
        output_pages: merged_page_count(&plan),
    })
}

fn stats_for(
    items: &[Item],
    rendered: &RenderedDocument,
    requested: usize,
    stop_reason: StopReason,
) -> HarvestStats {
    let images_total = items.iter().map(Item::image_count).sum();
    let images_unresolved = items
        .iter()
        .flat_map(|i| i.image_slots())
        .filter(|s| !s.resolved().is_some_and(|r| r.is_inline()))
        .count();
    HarvestStats {
        requested_items: requested,
        harvested_items: items.len(),
        images_total,
        images_unresolved,
        assembled_pages: rendered.assembled_pages,
        reference_pages_copied: rendered.reference_pages_copied,
        output_pages: rendered.output_pages,
        stop_reason,
        ..HarvestStats::default()
    }
}

fn default_fetcher(config: &HarvestConfig) -> Result<Arc<dyn HttpFetch>, HarvestError> {
    let fetcher = ReqwestFetcher::new(Duration::from_secs(config.fetch_timeout_secs))
        .map_err(|e| HarvestError::Internal(format!("HTTP client: {e}")))?;
    Ok(Arc::new(fetcher))
}

// ── Files ────────────────────────────────────────────────────────────────

/// Write `bytes` to `path` via a temporary sibling and a rename, so a
/// crash never leaves a truncated PDF behind.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), HarvestError> {
    let failed = |source: std::io::Error| HarvestError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(failed)?;
    }
    let tmp_path = path.with_extension("pdf.tmp");
    tokio::fs::write(&tmp_path, bytes).await.map_err(failed)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(failed)?;
    Ok(())
}

/// Save harvested items as pretty-printed JSON.
pub async fn save_records(path: &Path, items: &[Item]) -> Result<(), HarvestError> {
    let records_err = |detail: String| HarvestError::RecordsIo {
        path: path.to_path_buf(),
        detail,
    };
    let json = serde_json::to_vec_pretty(items).map_err(|e| records_err(e.to_string()))?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| records_err(e.to_string()))?;
    }
    tokio::fs::write(path, json)
        .await
        .map_err(|e| records_err(e.to_string()))
}

/// Load items saved by [`save_records`].
pub async fn load_records(path: &Path) -> Result<Vec<Item>, HarvestError> {
    let records_err = |detail: String| HarvestError::RecordsIo {
        path: path.to_path_buf(),
        detail,
    };
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| records_err(e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| records_err(e.to_string()))
}
