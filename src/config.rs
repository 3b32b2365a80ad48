//! Configuration types for a harvest run.
//!
//! All run behaviour is controlled through [`HarvestConfig`], built via its
//! [`HarvestConfigBuilder`]. The four site variants (explanation only, with
//! problem text, multi-part sequences, with reference material) are one
//! pipeline parameterised by [`PipelineVariant`]; per-site markup differences
//! live in [`SelectorSet`], never in code branches.

use crate::error::HarvestError;
use crate::labels::{self, selectors};
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for one harvest-and-assemble run.
///
/// # Example
/// ```rust
/// use qbank2pdf::{HarvestConfig, PipelineVariant};
///
/// let config = HarvestConfig::builder()
///     .start_location("https://qbank.example/exam/118/A")
///     .item_count(75)
///     .variant(PipelineVariant::with_problem())
///     .output_path("118A.pdf")
///     .build()
///     .unwrap();
/// assert_eq!(config.merge_group_size, 4);
/// ```
#[derive(Clone)]
pub struct HarvestConfig {
    /// URL of the first item. Required; the session navigates here before
    /// harvesting.
    pub start_location: String,

    /// Number of item slots to visit. Default: 1.
    pub item_count: usize,

    /// Where the finished PDF is written. Default: `output.pdf`.
    pub output_path: PathBuf,

    /// Interleave assembled pages with page groups from a reference PDF. Default: false.
    pub merge_with_reference: bool,

    /// Local path or HTTP/HTTPS URL of the reference PDF.
    pub reference_document: Option<String>,

    /// Reference pages copied before each item's pages. Default: 4.
    pub merge_group_size: usize,

    /// Which optional stages the site exposes.
    pub variant: PipelineVariant,

    /// Locators for every element the navigator and extractor touch.
    pub selectors: SelectorSet,

    /// Expected visible label of the answer-reveal control.
    pub reveal_label: String,

    /// Fixed interval between readiness polls, in milliseconds. Default: 500.
    pub poll_interval_ms: u64,

    /// Ceiling for the content-readiness wait, in seconds. Default: 30.
    pub readiness_timeout_secs: u64,

    /// Ceiling for the revealed-answer marker wait, in seconds. Default: 15.
    pub explanation_timeout_secs: u64,

    /// Polls of the question-text field before giving up. Default: 60.
    pub question_text_attempts: u32,

    /// Ceiling for each pre-reveal sub-step and for the next control, in seconds. Default: 10.
    pub sub_step_timeout_secs: u64,

    /// Per-image fetch/capture timeout, in seconds. Default: 30.
    pub fetch_timeout_secs: u64,

    /// How remote image references are turned into bytes. Default: fetch.
    pub image_strategy: ImageStrategy,

    /// What an unresolvable image becomes. Default: placeholder.
    pub unresolved_fallback: UnresolvedFallback,

    /// Concurrent resolutions within one item (fetch strategy only). Default: 4.
    pub image_concurrency: usize,

    /// Page geometry of the assembled document.
    pub layout: PageLayout,

    /// TrueType font embedded in the output; needed for Japanese glyphs.
    pub font_path: Option<PathBuf>,

    /// Explicit pdfium library location. Default: system library path.
    pub pdfium_lib_path: Option<PathBuf>,

    /// Timeout for downloading a reference PDF given as a URL. Default: 120.
    pub download_timeout_secs: u64,

    /// Optional per-item progress callback.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            start_location: String::new(),
            item_count: 1,
            output_path: PathBuf::from("output.pdf"),
            merge_with_reference: false,
            reference_document: None,
            merge_group_size: 4,
            variant: PipelineVariant::default(),
            selectors: SelectorSet::default(),
            reveal_label: labels::DEFAULT_REVEAL_LABEL.to_string(),
            poll_interval_ms: 500,
            readiness_timeout_secs: 30,
            explanation_timeout_secs: 15,
            question_text_attempts: 60,
            sub_step_timeout_secs: 10,
            fetch_timeout_secs: 30,
            image_strategy: ImageStrategy::default(),
            unresolved_fallback: UnresolvedFallback::default(),
            image_concurrency: 4,
            layout: PageLayout::default(),
            font_path: None,
            pdfium_lib_path: None,
            download_timeout_secs: 120,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for HarvestConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HarvestConfig")
            .field("start_location", &self.start_location)
            .field("item_count", &self.item_count)
            .field("output_path", &self.output_path)
            .field("merge_with_reference", &self.merge_with_reference)
            .field("reference_document", &self.reference_document)
            .field("merge_group_size", &self.merge_group_size)
            .field("variant", &self.variant)
            .field("image_strategy", &self.image_strategy)
            .field("unresolved_fallback", &self.unresolved_fallback)
            .field("layout", &self.layout)
            .field("font_path", &self.font_path)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn HarvestProgressCallback>"),
            )
            .finish()
    }
}

impl HarvestConfig {
    /// Create a new builder for `HarvestConfig`.
    pub fn builder() -> HarvestConfigBuilder {
        HarvestConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_secs(self.readiness_timeout_secs)
    }

    pub fn explanation_timeout(&self) -> Duration {
        Duration::from_secs(self.explanation_timeout_secs)
    }

    pub fn sub_step_timeout(&self) -> Duration {
        Duration::from_secs(self.sub_step_timeout_secs)
    }

    /// Effective per-item resolution concurrency. Screenshot capture shares
    /// the single browser session and is always serialised.
    pub fn effective_image_concurrency(&self) -> usize {
        match self.image_strategy {
            ImageStrategy::Screenshot => 1,
            ImageStrategy::Fetch => self.image_concurrency.max(1),
        }
    }
}

/// Builder for [`HarvestConfig`].
#[derive(Debug)]
pub struct HarvestConfigBuilder {
    config: HarvestConfig,
}

impl HarvestConfigBuilder {
    pub fn start_location(mut self, location: impl Into<String>) -> Self {
        self.config.start_location = location.into();
        self
    }

    pub fn item_count(mut self, n: usize) -> Self {
        self.config.item_count = n;
        self
    }

    pub fn output_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.output_path = path.into();
        self
    }

    /// Enable merging with the given reference document.
    pub fn merge_with_reference(mut self, reference: impl Into<String>) -> Self {
        self.config.merge_with_reference = true;
        self.config.reference_document = Some(reference.into());
        self
    }

    pub fn merge_group_size(mut self, g: usize) -> Self {
        self.config.merge_group_size = g;
        self
    }

    pub fn variant(mut self, variant: PipelineVariant) -> Self {
        self.config.variant = variant;
        self
    }

    pub fn selectors(mut self, selectors: SelectorSet) -> Self {
        self.config.selectors = selectors;
        self
    }

    pub fn reveal_label(mut self, label: impl Into<String>) -> Self {
        self.config.reveal_label = label.into();
        self
    }

    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    pub fn readiness_timeout_secs(mut self, secs: u64) -> Self {
        self.config.readiness_timeout_secs = secs;
        self
    }

    pub fn explanation_timeout_secs(mut self, secs: u64) -> Self {
        self.config.explanation_timeout_secs = secs;
        self
    }

    pub fn question_text_attempts(mut self, n: u32) -> Self {
        self.config.question_text_attempts = n.max(1);
        self
    }

    pub fn sub_step_timeout_secs(mut self, secs: u64) -> Self {
        self.config.sub_step_timeout_secs = secs;
        self
    }

    pub fn fetch_timeout_secs(mut self, secs: u64) -> Self {
        self.config.fetch_timeout_secs = secs.max(1);
        self
    }

    pub fn image_strategy(mut self, strategy: ImageStrategy) -> Self {
        self.config.image_strategy = strategy;
        self
    }

    pub fn unresolved_fallback(mut self, fallback: UnresolvedFallback) -> Self {
        self.config.unresolved_fallback = fallback;
        self
    }

    pub fn image_concurrency(mut self, n: usize) -> Self {
        self.config.image_concurrency = n.max(1);
        self
    }

    pub fn layout(mut self, layout: PageLayout) -> Self {
        self.config.layout = layout;
        self
    }

    pub fn font_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.font_path = Some(path.into());
        self
    }

    pub fn pdfium_lib_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_lib_path = Some(path.into());
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<HarvestConfig, HarvestError> {
        let c = &self.config;
        if c.start_location.trim().is_empty() {
            return Err(HarvestError::InvalidConfig(
                "A start location is required".into(),
            ));
        }
        if c.item_count == 0 {
            return Err(HarvestError::InvalidConfig(
                "Item count must be ≥ 1".into(),
            ));
        }
        if c.merge_group_size == 0 {
            return Err(HarvestError::InvalidConfig(
                "Merge group size must be ≥ 1".into(),
            ));
        }
        if c.poll_interval_ms == 0 {
            return Err(HarvestError::InvalidConfig(
                "Poll interval must be ≥ 1ms".into(),
            ));
        }
        if c.merge_with_reference && c.reference_document.is_none() {
            return Err(HarvestError::InvalidConfig(
                "Merging requires a reference document".into(),
            ));
        }
        if c.layout.usable_width() <= 0.0 || c.layout.usable_height() <= 0.0 {
            return Err(HarvestError::InvalidConfig(format!(
                "Margins of {}pt leave no usable area on a {}×{}pt page",
                c.layout.margin_pt, c.layout.width_pt, c.layout.height_pt
            )));
        }
        Ok(self.config)
    }
}

// ── Variant ──────────────────────────────────────────────────────────────

/// The optional stages a site variant exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PipelineVariant {
    /// Extract question text, images and choices before revealing the answer.
    pub include_problem: bool,
    /// Extract the supplementary reference-material block.
    pub include_reference_material: bool,
    /// Intermediate sub-views to advance through before the reveal control.
    pub pre_reveal_steps: usize,
}

impl PipelineVariant {
    /// Explanation pages only.
    pub fn explanation_only() -> Self {
        Self::default()
    }

    /// Question text and choices, then the explanation.
    pub fn with_problem() -> Self {
        Self {
            include_problem: true,
            ..Self::default()
        }
    }

    /// Multi-part sequences: three sub-views precede the reveal control.
    pub fn multi_part() -> Self {
        Self {
            include_problem: true,
            include_reference_material: false,
            pre_reveal_steps: 3,
        }
    }

    /// Items accompanied by a reference-material block.
    pub fn with_reference_material() -> Self {
        Self {
            include_problem: true,
            include_reference_material: true,
            pre_reveal_steps: 0,
        }
    }

    /// Parse a preset name as accepted on the command line.
    pub fn from_preset(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "explanation" | "explanation-only" => Some(Self::explanation_only()),
            "problem" | "with-problem" => Some(Self::with_problem()),
            "multi" | "multi-part" => Some(Self::multi_part()),
            "reference" | "with-reference" => Some(Self::with_reference_material()),
            _ => None,
        }
    }
}

// ── Selectors ────────────────────────────────────────────────────────────

/// A primary CSS selector followed by ordered fallbacks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SelectorChain(pub Vec<String>);

impl SelectorChain {
    pub fn from_static(list: &[&str]) -> Self {
        Self(list.iter().map(|s| s.to_string()).collect())
    }

    /// The primary (first) selector, used where the driver takes one locator.
    pub fn primary(&self) -> &str {
        self.0.first().map(String::as_str).unwrap_or("")
    }

    /// All alternatives joined into one CSS selector list.
    pub fn joined(&self) -> String {
        self.0.join(", ")
    }
}

/// Every locator used by the extractor and navigator.
///
/// Deserialisable from JSON; missing fields fall back to the built-in
/// defaults, so an override file only needs the selectors that differ.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorSet {
    pub content_ready: SelectorChain,
    pub question_text: SelectorChain,
    pub question_images: SelectorChain,
    pub item_id: SelectorChain,
    pub choices: SelectorChain,
    pub sub_step_button: SelectorChain,
    pub reveal_button: SelectorChain,
    pub revealed_marker: SelectorChain,
    pub next_button: SelectorChain,
    pub section_block: SelectorChain,
    pub section_title: SelectorChain,
    pub section_detail: SelectorChain,
    pub reference_block: SelectorChain,
    pub reference_title: SelectorChain,
    pub reference_body: SelectorChain,
    pub image: SelectorChain,
    pub lazy_src_attributes: Vec<String>,
}

impl Default for SelectorSet {
    fn default() -> Self {
        Self {
            content_ready: SelectorChain::from_static(selectors::CONTENT_READY),
            question_text: SelectorChain::from_static(selectors::QUESTION_TEXT),
            question_images: SelectorChain::from_static(selectors::QUESTION_IMAGES),
            item_id: SelectorChain::from_static(selectors::ITEM_ID),
            choices: SelectorChain::from_static(selectors::CHOICES),
            sub_step_button: SelectorChain::from_static(selectors::SUB_STEP_BUTTON),
            reveal_button: SelectorChain::from_static(selectors::REVEAL_BUTTON),
            revealed_marker: SelectorChain::from_static(selectors::REVEALED_MARKER),
            next_button: SelectorChain::from_static(selectors::NEXT_BUTTON),
            section_block: SelectorChain::from_static(selectors::SECTION_BLOCK),
            section_title: SelectorChain::from_static(selectors::SECTION_TITLE),
            section_detail: SelectorChain::from_static(selectors::SECTION_DETAIL),
            reference_block: SelectorChain::from_static(selectors::REFERENCE_BLOCK),
            reference_title: SelectorChain::from_static(selectors::REFERENCE_TITLE),
            reference_body: SelectorChain::from_static(selectors::REFERENCE_BODY),
            image: SelectorChain::from_static(selectors::IMAGE),
            lazy_src_attributes: selectors::LAZY_SRC_ATTRIBUTES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl SelectorSet {
    /// Load an override file. Fields absent from the JSON keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, HarvestError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            HarvestError::InvalidConfig(format!("cannot read selectors {}: {e}", path.display()))
        })?;
        serde_json::from_str(&text).map_err(|e| {
            HarvestError::InvalidConfig(format!("invalid selectors {}: {e}", path.display()))
        })
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// How a remote image reference is turned into bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ImageStrategy {
    /// Authenticated HTTP GET carrying the session cookies. (default)
    #[default]
    Fetch,
    /// Screenshot of the live `<img>` element in the browser session, for
    /// sources that authorise at render time.
    Screenshot,
}

/// What an image becomes when it cannot be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum UnresolvedFallback {
    /// `embeddable = None`; the document shows an error placeholder. (default)
    #[default]
    Placeholder,
    /// Keep the original URL as the embeddable value so the document can at
    /// least print the reference.
    KeepUrl,
}

/// Page geometry in PDF points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageLayout {
    pub width_pt: f64,
    pub height_pt: f64,
    pub margin_pt: f64,
    pub body_font_size: f64,
    pub header_font_size: f64,
}

impl Default for PageLayout {
    /// A4 portrait with 40pt margins.
    fn default() -> Self {
        Self {
            width_pt: 595.28,
            height_pt: 841.89,
            margin_pt: 40.0,
            body_font_size: 10.5,
            header_font_size: 14.0,
        }
    }
}

impl PageLayout {
    pub fn usable_width(&self) -> f64 {
        self.width_pt - 2.0 * self.margin_pt
    }

    pub fn usable_height(&self) -> f64 {
        self.height_pt - 2.0 * self.margin_pt
    }

    /// Widest an image may be rendered: one third of the usable width.
    pub fn max_image_width(&self) -> f64 {
        self.usable_width() / 3.0
    }
}
