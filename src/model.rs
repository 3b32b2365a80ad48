//! Harvested record types.
//!
//! Records are created once per item by the extractor and are read-only
//! afterwards, with one exception: each [`ImageSlot`] is transformed in
//! place from [`ImageSlot::Pending`] to [`ImageSlot::Resolved`] by the image
//! resolver. The transform is one-way; a resolved slot is never reset.

use crate::labels;
use serde::{Deserialize, Serialize};
use std::fmt;

/// An image as captured from the page: a remote URL or an inline `data:` URI.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageRef(String);

impl ImageRef {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `true` for an already-embedded `data:` payload.
    pub fn is_inline(&self) -> bool {
        self.0.starts_with("data:")
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_inline() {
            // Inline payloads can be megabytes long.
            let head: String = self.0.chars().take(32).collect();
            write!(f, "{head}…")
        } else {
            f.write_str(&self.0)
        }
    }
}

/// An image after resolution.
///
/// `embeddable == None` means resolution failed; consumers render a
/// placeholder. When the resolver is configured to keep URLs, `embeddable`
/// may hold the original remote URL instead of a `data:` URI.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResolvedImage {
    pub embeddable: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl ResolvedImage {
    pub fn unresolved() -> Self {
        Self::default()
    }

    /// `true` when `embeddable` carries decodable inline bytes.
    pub fn is_inline(&self) -> bool {
        self.embeddable
            .as_deref()
            .is_some_and(|e| e.starts_with("data:"))
    }

    pub fn dimensions(&self) -> Option<(u32, u32)> {
        Some((self.width?, self.height?))
    }
}

/// One image position inside a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ImageSlot {
    Pending { reference: ImageRef },
    Resolved { reference: ImageRef, image: ResolvedImage },
}

impl ImageSlot {
    pub fn pending(reference: ImageRef) -> Self {
        ImageSlot::Pending { reference }
    }

    pub fn reference(&self) -> &ImageRef {
        match self {
            ImageSlot::Pending { reference } | ImageSlot::Resolved { reference, .. } => reference,
        }
    }

    pub fn resolved(&self) -> Option<&ResolvedImage> {
        match self {
            ImageSlot::Pending { .. } => None,
            ImageSlot::Resolved { image, .. } => Some(image),
        }
    }

    /// Replace a pending slot with its resolution. Already-resolved slots
    /// are left untouched.
    pub fn resolve_with(&mut self, image: ResolvedImage) {
        if let ImageSlot::Pending { reference } = self {
            let reference = std::mem::replace(reference, ImageRef::new(String::new()));
            *self = ImageSlot::Resolved { reference, image };
        }
    }
}

/// The labelled explanation blocks, in the order they are printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SectionKind {
    ImageDiagnosis,
    Keyword,
    KeyPoints,
    Diagnosis,
    ChoiceAnalysis,
    Guideline,
}

impl SectionKind {
    /// Text sections in their fixed print order (the image-diagnosis block
    /// is printed separately, before all of these).
    pub const TEXT_ORDER: [SectionKind; 5] = [
        SectionKind::Keyword,
        SectionKind::KeyPoints,
        SectionKind::Diagnosis,
        SectionKind::ChoiceAnalysis,
        SectionKind::Guideline,
    ];

    pub const ALL: [SectionKind; 6] = [
        SectionKind::ImageDiagnosis,
        SectionKind::Keyword,
        SectionKind::KeyPoints,
        SectionKind::Diagnosis,
        SectionKind::ChoiceAnalysis,
        SectionKind::Guideline,
    ];

    /// Title text the block carries on the page.
    pub fn label(self) -> &'static str {
        match self {
            SectionKind::ImageDiagnosis => labels::LABEL_IMAGE_DIAGNOSIS,
            SectionKind::Keyword => labels::LABEL_KEYWORD,
            SectionKind::KeyPoints => labels::LABEL_KEY_POINTS,
            SectionKind::Diagnosis => labels::LABEL_DIAGNOSIS,
            SectionKind::ChoiceAnalysis => labels::LABEL_CHOICE_ANALYSIS,
            SectionKind::Guideline => labels::LABEL_GUIDELINE,
        }
    }
}

/// A named block of explanation text with its images.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub kind: SectionKind,
    /// Newline-joined detail text; empty (never absent) when the block is missing.
    pub text: String,
    pub images: Vec<ImageSlot>,
    pub caption: Option<String>,
}

impl Section {
    pub fn empty(kind: SectionKind) -> Self {
        Self {
            kind,
            text: String::new(),
            images: Vec::new(),
            caption: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
            && self.images.is_empty()
            && self.caption.as_deref().map_or(true, str::is_empty)
    }
}

/// All explanation sections of one item, one entry per [`SectionKind`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExplanationRecord {
    pub sections: Vec<Section>,
}

impl ExplanationRecord {
    pub fn section(&self, kind: SectionKind) -> Option<&Section> {
        self.sections.iter().find(|s| s.kind == kind)
    }

    /// Text of the given section, or `""` when it is absent.
    pub fn text(&self, kind: SectionKind) -> &str {
        self.section(kind).map_or("", |s| s.text.as_str())
    }

    /// `true` when every section is empty and no section has images.
    /// This is the end-of-content signal for the harvest loop.
    pub fn is_empty(&self) -> bool {
        self.sections.iter().all(Section::is_empty)
    }
}

/// The question side of an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProblemRecord {
    pub ordinal: usize,
    pub item_id: String,
    pub question: String,
    pub images: Vec<ImageSlot>,
    /// Answer choices, duplicates removed, first-appearance order kept.
    pub choices: Vec<String>,
}

/// Supplementary reference material shown alongside some items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceRecord {
    pub title: String,
    pub body: String,
    pub images: Vec<ImageSlot>,
}

/// One harvested unit of content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// 1-indexed harvest position.
    pub ordinal: usize,
    pub problem: Option<ProblemRecord>,
    pub explanation: ExplanationRecord,
    pub reference: Option<ReferenceRecord>,
}

impl Item {
    /// Every image slot of the item, in print order.
    pub fn image_slots_mut(&mut self) -> Vec<&mut ImageSlot> {
        let mut slots: Vec<&mut ImageSlot> = Vec::new();
        if let Some(problem) = self.problem.as_mut() {
            slots.extend(problem.images.iter_mut());
        }
        if let Some(reference) = self.reference.as_mut() {
            slots.extend(reference.images.iter_mut());
        }
        for section in self.explanation.sections.iter_mut() {
            slots.extend(section.images.iter_mut());
        }
        slots
    }

    pub fn image_slots(&self) -> impl Iterator<Item = &ImageSlot> {
        self.problem
            .iter()
            .flat_map(|p| p.images.iter())
            .chain(self.reference.iter().flat_map(|r| r.images.iter()))
            .chain(self.explanation.sections.iter().flat_map(|s| s.images.iter()))
    }

    pub fn image_count(&self) -> usize {
        self.image_slots().count()
    }
}
