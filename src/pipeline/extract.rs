//! Field extraction: page snapshot HTML → typed records.
//!
//! Extraction is a pure function of one snapshot. It knows nothing about
//! navigation or timing; the navigator decides when a snapshot is worth
//! taking and retries where absence usually means "not rendered yet".
//!
//! ## One scan, many labels
//!
//! Explanation pages consist of repeated blocks, each with a title element
//! and detail elements. Instead of one "find the block titled X" scan per
//! label, [`FieldExtractor::scan_blocks`] walks every block once and builds
//! a label → block map; sections are then plain lookups.
//!
//! ## Selector fallbacks
//!
//! Every field is a [`SelectorChain`]: the primary selector is tried first
//! and the fallbacks only when it matches nothing. Invalid selectors are
//! rejected when the extractor is built, never at extraction time.
//!
//! ## Image sources
//!
//! Image references are stored the way the browser's `img.src` reports
//! them: relative `src`/lazy-load values are joined against the URL of the
//! snapshot they came from. `data:` URIs are kept verbatim.
//!
//! `scraper::Html` is not `Send`; every public method parses, extracts owned
//! values and drops the DOM before returning, so callers can hold the
//! results across `.await` points.

use crate::config::{SelectorChain, SelectorSet};
use crate::error::HarvestError;
use crate::model::{
    ExplanationRecord, ImageRef, ImageSlot, ProblemRecord, ReferenceRecord, Section, SectionKind,
};
use crate::pipeline::normalize::{clean_inline, clean_text};
use crate::session::PageSnapshot;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;
use scraper::{ElementRef, Html, Selector};
use std::collections::{HashMap, HashSet};

/// Leading bracketed index token such as `[4-519(4/4)] `.
static RE_INDEX_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*\[[^\]\n]*\]\s*").unwrap());

/// A [`SelectorChain`] with every alternative parsed.
#[derive(Debug, Clone)]
struct CompiledChain {
    selectors: Vec<Selector>,
}

impl CompiledChain {
    fn compile(field: &str, chain: &SelectorChain) -> Result<Self, HarvestError> {
        let selectors = chain
            .0
            .iter()
            .map(|s| {
                Selector::parse(s).map_err(|e| HarvestError::InvalidSelector {
                    field: field.to_string(),
                    selector: s.clone(),
                    detail: format!("{e:?}"),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        if selectors.is_empty() {
            return Err(HarvestError::InvalidSelector {
                field: field.to_string(),
                selector: String::new(),
                detail: "no selector configured".into(),
            });
        }
        Ok(Self { selectors })
    }

    /// First element matched by the first alternative that matches anything.
    fn first<'a>(&self, root: ElementRef<'a>) -> Option<ElementRef<'a>> {
        self.selectors.iter().find_map(|s| root.select(s).next())
    }

    /// All elements of the first alternative that matches anything.
    fn all<'a>(&self, root: ElementRef<'a>) -> Vec<ElementRef<'a>> {
        for s in &self.selectors {
            let found: Vec<ElementRef<'a>> = root.select(s).collect();
            if !found.is_empty() {
                return found;
            }
        }
        Vec::new()
    }
}

/// One labelled block found by [`FieldExtractor::scan_blocks`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScannedBlock {
    /// Detail texts joined with `\n`.
    pub detail: String,
    pub images: Vec<ImageRef>,
}

/// Extracts typed fields from page snapshots using compiled selectors.
#[derive(Debug, Clone)]
pub struct FieldExtractor {
    content_ready: CompiledChain,
    question_text: CompiledChain,
    question_images: CompiledChain,
    item_id: CompiledChain,
    choices: CompiledChain,
    reveal_button: CompiledChain,
    section_block: CompiledChain,
    section_title: CompiledChain,
    section_detail: CompiledChain,
    reference_block: CompiledChain,
    reference_title: CompiledChain,
    reference_body: CompiledChain,
    image: CompiledChain,
    lazy_src_attributes: Vec<String>,
}

impl FieldExtractor {
    /// Compile every selector of `set`, failing on the first invalid one.
    pub fn new(set: &SelectorSet) -> Result<Self, HarvestError> {
        // Locators only handed to the browser still have to be valid CSS.
        for (field, chain) in [
            ("sub_step_button", &set.sub_step_button),
            ("revealed_marker", &set.revealed_marker),
            ("next_button", &set.next_button),
        ] {
            CompiledChain::compile(field, chain)?;
        }

        Ok(Self {
            content_ready: CompiledChain::compile("content_ready", &set.content_ready)?,
            question_text: CompiledChain::compile("question_text", &set.question_text)?,
            question_images: CompiledChain::compile("question_images", &set.question_images)?,
            item_id: CompiledChain::compile("item_id", &set.item_id)?,
            choices: CompiledChain::compile("choices", &set.choices)?,
            reveal_button: CompiledChain::compile("reveal_button", &set.reveal_button)?,
            section_block: CompiledChain::compile("section_block", &set.section_block)?,
            section_title: CompiledChain::compile("section_title", &set.section_title)?,
            section_detail: CompiledChain::compile("section_detail", &set.section_detail)?,
            reference_block: CompiledChain::compile("reference_block", &set.reference_block)?,
            reference_title: CompiledChain::compile("reference_title", &set.reference_title)?,
            reference_body: CompiledChain::compile("reference_body", &set.reference_body)?,
            image: CompiledChain::compile("image", &set.image)?,
            lazy_src_attributes: set.lazy_src_attributes.clone(),
        })
    }

    /// `true` when the content-readiness marker is present in the snapshot.
    pub fn content_present(&self, html: &str) -> bool {
        let doc = Html::parse_document(html);
        self.content_ready.first(doc.root_element()).is_some()
    }

    /// Question text, or `None` when the field is absent or still empty.
    pub fn question_text(&self, html: &str) -> Option<String> {
        let doc = Html::parse_document(html);
        self.question_text
            .first(doc.root_element())
            .map(|el| clean_text(&element_text(el)))
            .filter(|t| !t.is_empty())
    }

    /// Everything on the question side except the text, which the navigator
    /// polls for separately.
    pub fn problem(&self, page: &PageSnapshot, ordinal: usize, question: String) -> ProblemRecord {
        let doc = Html::parse_document(&page.html);
        let root = doc.root_element();
        let base = page_base(page);

        let item_id = self
            .item_id
            .first(root)
            .map(|el| clean_inline(&element_text(el)))
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| ordinal.to_string());

        let images = self
            .question_images
            .first(root)
            .map(|container| self.image_refs(container, base.as_ref()))
            .unwrap_or_default();

        ProblemRecord {
            ordinal,
            item_id,
            question,
            images: images.into_iter().map(ImageSlot::pending).collect(),
            choices: self.choices_in(root),
        }
    }

    /// Answer choices, duplicates removed in first-appearance order.
    pub fn choices(&self, html: &str) -> Vec<String> {
        let doc = Html::parse_document(html);
        self.choices_in(doc.root_element())
    }

    fn choices_in(&self, root: ElementRef<'_>) -> Vec<String> {
        dedup_preserving_order(
            self.choices
                .all(root)
                .into_iter()
                .map(|el| clean_inline(&element_text(el)))
                .filter(|t| !t.is_empty()),
        )
    }

    /// Trimmed visible label of the answer-reveal control, if present.
    pub fn reveal_label(&self, html: &str) -> Option<String> {
        let doc = Html::parse_document(html);
        self.reveal_button
            .first(doc.root_element())
            .map(|el| clean_inline(&element_text(el)))
    }

    /// Walk every section block once and map title → block.
    ///
    /// When two blocks share a title the first one wins.
    pub fn scan_blocks(&self, page: &PageSnapshot) -> HashMap<String, ScannedBlock> {
        let doc = Html::parse_document(&page.html);
        let base = page_base(page);
        let mut blocks = HashMap::new();
        for block in self.section_block.all(doc.root_element()) {
            let Some(title) = self
                .section_title
                .first(block)
                .map(|el| clean_inline(&element_text(el)))
            else {
                continue;
            };
            if title.is_empty() {
                continue;
            }
            let detail = self
                .section_detail
                .all(block)
                .into_iter()
                .map(|el| clean_text(&element_text(el)))
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
                .join("\n");
            blocks.entry(title).or_insert_with(|| ScannedBlock {
                detail,
                images: self.image_refs(block, base.as_ref()),
            });
        }
        blocks
    }

    /// All explanation sections, one per [`SectionKind`]. Missing blocks
    /// become empty sections.
    pub fn explanation(&self, page: &PageSnapshot) -> ExplanationRecord {
        let mut blocks = self.scan_blocks(page);
        let sections = SectionKind::ALL
            .into_iter()
            .map(|kind| match blocks.remove(kind.label()) {
                None => Section::empty(kind),
                Some(block) if kind == SectionKind::ImageDiagnosis => {
                    let caption = strip_index_token(&block.detail);
                    Section {
                        kind,
                        text: String::new(),
                        images: block.images.into_iter().map(ImageSlot::pending).collect(),
                        caption: (!caption.is_empty()).then_some(caption),
                    }
                }
                Some(block) => Section {
                    kind,
                    text: block.detail,
                    images: block.images.into_iter().map(ImageSlot::pending).collect(),
                    caption: None,
                },
            })
            .collect();
        ExplanationRecord { sections }
    }

    /// The supplementary reference-material block, if the page shows one.
    pub fn reference(&self, page: &PageSnapshot) -> Option<ReferenceRecord> {
        let doc = Html::parse_document(&page.html);
        let block = self.reference_block.first(doc.root_element())?;
        let title = self
            .reference_title
            .first(block)
            .map(|el| clean_inline(&element_text(el)))
            .unwrap_or_default();
        let body = self
            .reference_body
            .all(block)
            .into_iter()
            .map(|el| clean_text(&element_text(el)))
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n");
        let images = self.image_refs(block, page_base(page).as_ref());
        if title.is_empty() && body.is_empty() && images.is_empty() {
            return None;
        }
        Some(ReferenceRecord {
            title,
            body,
            images: images.into_iter().map(ImageSlot::pending).collect(),
        })
    }

    /// Image references inside `block`: `src`, else the first non-empty
    /// lazy-load attribute, made absolute against `base`. Elements with no
    /// usable source are skipped.
    fn image_refs(&self, block: ElementRef<'_>, base: Option<&Url>) -> Vec<ImageRef> {
        self.image
            .all(block)
            .into_iter()
            .filter_map(|img| {
                let el = img.value();
                let primary = el.attr("src").map(str::trim).unwrap_or("");
                let source = if primary.is_empty() {
                    self.lazy_src_attributes
                        .iter()
                        .filter_map(|attr| el.attr(attr))
                        .map(str::trim)
                        .find(|v| !v.is_empty())
                        .unwrap_or("")
                } else {
                    primary
                };
                (!source.is_empty()).then(|| ImageRef::new(absolute_source(base, source)))
            })
            .collect()
    }
}

/// Base URL of a snapshot; `None` for blank or opaque locations.
fn page_base(page: &PageSnapshot) -> Option<Url> {
    Url::parse(page.url.trim())
        .ok()
        .filter(|url| !url.cannot_be_a_base())
}

/// `source` joined against `base`, or unchanged when it is a `data:` URI
/// or cannot be joined.
pub fn absolute_source(base: Option<&Url>, source: &str) -> String {
    if source.starts_with("data:") {
        return source.to_string();
    }
    base.and_then(|b| b.join(source).ok())
        .map(String::from)
        .unwrap_or_else(|| source.to_string())
}

/// Remove duplicates, keeping the first occurrence of each value in place.
pub fn dedup_preserving_order<I>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}

/// Strip a leading bracketed index token (`[4-519(4/4)] `) from a caption.
pub fn strip_index_token(text: &str) -> String {
    RE_INDEX_TOKEN.replace(text, "").trim().to_string()
}

fn element_text(el: ElementRef<'_>) -> String {
    el.text().collect::<String>()
}
