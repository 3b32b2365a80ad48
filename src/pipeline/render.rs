//! PDF encoding: laid-out pages → PDF bytes, and page-range merging.
//!
//! ## Why spawn_blocking?
//!
//! `pdfium-render` wraps the pdfium C++ library, which keeps thread-local
//! state and blocks for the whole encode. Every call runs inside
//! `tokio::task::spawn_blocking` so Tokio worker threads never stall.
//!
//! ## Fonts
//!
//! The built-in PDF base fonts have no Japanese glyphs. When a TrueType
//! font is configured it is embedded as a CID font and used for all text;
//! without one the encoder falls back to Helvetica and CJK text will not
//! render.

use crate::error::HarvestError;
use crate::pipeline::layout::{DrawOp, LaidOutDocument};
use crate::pipeline::merge::MergeStep;
use crate::pipeline::resolve::decode_data_uri;
use async_trait::async_trait;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Output of [`DocumentEncoder::encode`].
#[derive(Debug, Clone)]
pub struct EncodedDocument {
    pub bytes: Vec<u8>,
    /// Pages per item, in document order.
    pub item_pages: Vec<usize>,
}

impl EncodedDocument {
    pub fn page_count(&self) -> usize {
        self.item_pages.iter().sum()
    }
}

/// Byte-stream encoder for assembled documents.
#[async_trait]
pub trait DocumentEncoder: Send + Sync {
    /// Encode every laid-out page into one PDF.
    async fn encode(&self, doc: LaidOutDocument) -> Result<EncodedDocument, HarvestError>;

    /// Page count of an existing PDF.
    async fn page_count(&self, pdf: &[u8]) -> Result<usize, HarvestError>;

    /// Execute a merge plan, copying page ranges out of `assembled` and
    /// `reference` into a new document.
    async fn merge(
        &self,
        plan: &[MergeStep],
        assembled: &[u8],
        reference: &[u8],
    ) -> Result<Vec<u8>, HarvestError>;
}

/// [`DocumentEncoder`] backed by pdfium-render.
#[derive(Debug, Clone, Default)]
pub struct PdfiumEncoder {
    lib_path: Option<PathBuf>,
    font_path: Option<PathBuf>,
}

impl PdfiumEncoder {
    pub fn new(lib_path: Option<PathBuf>, font_path: Option<PathBuf>) -> Self {
        Self {
            lib_path,
            font_path,
        }
    }
}

#[async_trait]
impl DocumentEncoder for PdfiumEncoder {
    async fn encode(&self, doc: LaidOutDocument) -> Result<EncodedDocument, HarvestError> {
        let lib = self.lib_path.clone();
        let font = self.font_path.clone();
        tokio::task::spawn_blocking(move || encode_blocking(lib.as_deref(), font.as_deref(), &doc))
            .await
            .map_err(|e| HarvestError::Internal(format!("Encode task panicked: {}", e)))?
    }

    async fn page_count(&self, pdf: &[u8]) -> Result<usize, HarvestError> {
        let lib = self.lib_path.clone();
        let bytes = pdf.to_vec();
        tokio::task::spawn_blocking(move || {
            let pdfium = bind(lib.as_deref())?;
            let document = pdfium
                .load_pdf_from_byte_vec(bytes, None)
                .map_err(|e| corrupt(&e))?;
            Ok(document.pages().len() as usize)
        })
        .await
        .map_err(|e| HarvestError::Internal(format!("Page-count task panicked: {}", e)))?
    }

    async fn merge(
        &self,
        plan: &[MergeStep],
        assembled: &[u8],
        reference: &[u8],
    ) -> Result<Vec<u8>, HarvestError> {
        let lib = self.lib_path.clone();
        let plan = plan.to_vec();
        let assembled = assembled.to_vec();
        let reference = reference.to_vec();
        tokio::task::spawn_blocking(move || merge_blocking(lib.as_deref(), &plan, assembled, reference))
            .await
            .map_err(|e| HarvestError::Internal(format!("Merge task panicked: {}", e)))?
    }
}

/// Bind to pdfium: the explicit path (file or directory) when given,
/// otherwise a library next to the working directory, then the system one.
fn bind(lib_path: Option<&Path>) -> Result<Pdfium, HarvestError> {
    let bindings = match lib_path {
        Some(p) if p.is_dir() => {
            Pdfium::bind_to_library(&Pdfium::pdfium_platform_library_name_at_path(p))
        }
        Some(p) => Pdfium::bind_to_library(p),
        None => Pdfium::bind_to_library(&Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library()),
    }
    .map_err(|e| HarvestError::PdfiumBindingFailed(format!("{:?}", e)))?;
    Ok(Pdfium::new(bindings))
}

fn encode_err(e: &PdfiumError) -> HarvestError {
    HarvestError::EncodeFailed {
        detail: format!("{:?}", e),
    }
}

fn corrupt(e: &PdfiumError) -> HarvestError {
    HarvestError::CorruptDocument {
        detail: format!("{:?}", e),
    }
}

fn points(v: f64) -> PdfPoints {
    PdfPoints::new(v as f32)
}

/// Blocking implementation of encoding.
fn encode_blocking(
    lib_path: Option<&Path>,
    font_path: Option<&Path>,
    doc: &LaidOutDocument,
) -> Result<EncodedDocument, HarvestError> {
    let pdfium = bind(lib_path)?;
    let mut document = pdfium.create_new_pdf().map_err(|e| encode_err(&e))?;

    let font = match font_path {
        Some(path) => document
            .fonts_mut()
            .load_true_type_from_file(path, true)
            .map_err(|e| HarvestError::EncodeFailed {
                detail: format!("font {}: {:?}", path.display(), e),
            })?,
        None => {
            warn!("No font configured; CJK text will not render");
            document.fonts_mut().helvetica()
        }
    };

    // The same image often appears on several pages (carried-forward
    // reference material); decode each payload once.
    let mut decoded: HashMap<&str, Option<DynamicImage>> = HashMap::new();

    for (index, page) in doc.pages.iter().enumerate() {
        let mut pdf_page = document
            .pages_mut()
            .create_page_at_end(PdfPagePaperSize::Custom(
                points(doc.width_pt),
                points(doc.height_pt),
            ))
            .map_err(|e| encode_err(&e))?;

        for op in &page.ops {
            match op {
                DrawOp::Text { x, y, size, text } => {
                    pdf_page
                        .objects_mut()
                        .create_text_object(points(*x), points(*y), text, font, points(*size))
                        .map_err(|e| encode_err(&e))?;
                }
                DrawOp::Image {
                    x,
                    y,
                    width,
                    height,
                    data,
                } => {
                    let image = decoded
                        .entry(data.as_str())
                        .or_insert_with(|| decode_image(data));
                    let Some(image) = image.as_ref() else {
                        continue;
                    };
                    pdf_page
                        .objects_mut()
                        .create_image_object(
                            points(*x),
                            points(*y),
                            image,
                            Some(points(*width)),
                            Some(points(*height)),
                        )
                        .map_err(|e| encode_err(&e))?;
                }
            }
        }
        debug!("Encoded page {} (item {})", index + 1, page.item_ordinal);
    }

    let bytes = document.save_to_bytes().map_err(|e| encode_err(&e))?;
    info!("Encoded {} pages → {} bytes", doc.pages.len(), bytes.len());
    Ok(EncodedDocument {
        bytes,
        item_pages: doc.item_pages.clone(),
    })
}

/// Decode a `data:` payload to pixels. Failures drop the image from the page.
fn decode_image(data: &str) -> Option<DynamicImage> {
    let decoded = decode_data_uri(data).and_then(|bytes| {
        image::load_from_memory(&bytes).map_err(|e| crate::error::ImageError::Decode {
            detail: e.to_string(),
        })
    });
    match decoded {
        Ok(img) => Some(img),
        Err(e) => {
            warn!("Dropping undecodable image from page: {e}");
            None
        }
    }
}

/// Blocking implementation of merging.
fn merge_blocking(
    lib_path: Option<&Path>,
    plan: &[MergeStep],
    assembled: Vec<u8>,
    reference: Vec<u8>,
) -> Result<Vec<u8>, HarvestError> {
    let pdfium = bind(lib_path)?;
    let assembled = pdfium
        .load_pdf_from_byte_vec(assembled, None)
        .map_err(|e| corrupt(&e))?;
    let reference = pdfium
        .load_pdf_from_byte_vec(reference, None)
        .map_err(|e| corrupt(&e))?;
    let mut merged = pdfium.create_new_pdf().map_err(|e| encode_err(&e))?;

    for step in plan {
        let (source, range) = match step {
            MergeStep::Reference(r) => (&reference, r),
            MergeStep::Assembled(r) => (&assembled, r),
        };
        if range.is_empty() {
            continue;
        }
        let destination = merged.pages().len();
        merged
            .pages_mut()
            .copy_page_range_from_document(
                source,
                (range.start as PdfPageIndex)..=((range.end - 1) as PdfPageIndex),
                destination,
            )
            .map_err(|e| encode_err(&e))?;
    }

    let bytes = merged.save_to_bytes().map_err(|e| encode_err(&e))?;
    info!("Merged {} pages → {} bytes", merged.pages().len(), bytes.len());
    Ok(bytes)
}
