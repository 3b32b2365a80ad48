//! Document assembly: ordered items → [`DocumentModel`].
//!
//! The model is a flat list of blocks per item. It carries no positions;
//! [`crate::pipeline::layout`] paginates it. Keeping the two apart means the
//! image-grid and ordering rules can be tested without fonts or pdfium.
//!
//! Per item the blocks are, in order:
//!
//! 1. the problem page (heading, question text, images, choices) when the
//!    item has a problem record, followed by a page break;
//! 2. the explanation heading, the diagnostic image block, its caption and
//!    every non-empty text section in [`SectionKind::TEXT_ORDER`];
//! 3. the reference-material block when present;
//! 4. a trailing spacer and a page break.

use crate::labels::{EXPLANATION_HEADER, IMAGE_ERROR_PLACEHOLDER, REFERENCE_HEADER};
use crate::model::{ImageSlot, Item, SectionKind};
use serde::Serialize;

/// One image position after the width rule has been applied.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ImageCell {
    /// An embeddable image at its render size in points.
    Image {
        data: String,
        width: f64,
        height: f64,
    },
    /// The resolver kept the remote URL; printed as a reference.
    Link { url: String },
    /// Resolution failed; an inline placeholder is printed.
    Error { message: String },
    /// Padding so grid rows stay rectangular.
    Empty,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Block {
    Heading(String),
    Subheading(String),
    Text(String),
    Image(ImageCell),
    /// Borderless two-row image table.
    ImageGrid { rows: Vec<Vec<ImageCell>> },
    Spacer,
    PageBreak,
}

/// All blocks of one item.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemDocument {
    pub ordinal: usize,
    pub blocks: Vec<Block>,
}

/// The assembled document, items in harvest order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DocumentModel {
    pub items: Vec<ItemDocument>,
}

impl DocumentModel {
    /// Ordinals in document order.
    pub fn ordinals(&self) -> Vec<usize> {
        self.items.iter().map(|i| i.ordinal).collect()
    }
}

/// Assemble `items` in the order given. `max_image_width` is the widest an
/// image may be rendered, in points.
pub fn assemble(items: &[Item], max_image_width: f64) -> DocumentModel {
    DocumentModel {
        items: items
            .iter()
            .map(|item| assemble_item(item, max_image_width))
            .collect(),
    }
}

fn assemble_item(item: &Item, max_width: f64) -> ItemDocument {
    let mut blocks = Vec::new();

    if let Some(problem) = &item.problem {
        blocks.push(Block::Heading(format!("{}. {}", item.ordinal, problem.item_id)));
        blocks.push(Block::Text(problem.question.clone()));
        blocks.extend(image_block(&problem.images, max_width));
        if !problem.choices.is_empty() {
            blocks.push(Block::Text(problem.choices.join("\n")));
        }
        blocks.push(Block::PageBreak);
    }

    blocks.push(Block::Heading(format!("{EXPLANATION_HEADER} {}", item.ordinal)));

    if let Some(diag) = item.explanation.section(SectionKind::ImageDiagnosis) {
        blocks.extend(image_block(&diag.images, max_width));
        if let Some(caption) = diag.caption.as_deref().filter(|c| !c.is_empty()) {
            blocks.push(Block::Text(caption.to_string()));
        }
    }

    for kind in SectionKind::TEXT_ORDER {
        let Some(section) = item.explanation.section(kind) else {
            continue;
        };
        if section.is_empty() {
            continue;
        }
        blocks.push(Block::Subheading(kind.label().to_string()));
        if !section.text.is_empty() {
            blocks.push(Block::Text(section.text.clone()));
        }
        blocks.extend(image_block(&section.images, max_width));
    }

    if let Some(reference) = &item.reference {
        let heading = if reference.title.is_empty() {
            REFERENCE_HEADER.to_string()
        } else {
            format!("{REFERENCE_HEADER}: {}", reference.title)
        };
        blocks.push(Block::Subheading(heading));
        if !reference.body.is_empty() {
            blocks.push(Block::Text(reference.body.clone()));
        }
        blocks.extend(image_block(&reference.images, max_width));
    }

    blocks.push(Block::Spacer);
    blocks.push(Block::PageBreak);

    ItemDocument {
        ordinal: item.ordinal,
        blocks,
    }
}

/// Image layout for one slot group: nothing, a single image, or a grid.
pub fn image_block(slots: &[ImageSlot], max_width: f64) -> Option<Block> {
    match slots {
        [] => None,
        [only] => Some(Block::Image(image_cell(only, max_width))),
        many => Some(Block::ImageGrid {
            rows: split_rows(many.iter().map(|s| image_cell(s, max_width)).collect()),
        }),
    }
}

/// Two rows: the first gets `ceil(k/2)` cells, the second the rest, padded
/// with [`ImageCell::Empty`] to the same length.
pub fn split_rows(mut cells: Vec<ImageCell>) -> Vec<Vec<ImageCell>> {
    let first_len = cells.len().div_ceil(2);
    let mut second = cells.split_off(first_len);
    second.resize(first_len, ImageCell::Empty);
    vec![cells, second]
}

/// `min(natural, max)`.
pub fn render_width(natural_width: u32, max_width: f64) -> f64 {
    f64::from(natural_width).min(max_width)
}

fn image_cell(slot: &ImageSlot, max_width: f64) -> ImageCell {
    let placeholder = || ImageCell::Error {
        message: IMAGE_ERROR_PLACEHOLDER.to_string(),
    };
    let Some(image) = slot.resolved() else {
        return placeholder();
    };
    let Some(embeddable) = image.embeddable.as_deref() else {
        return placeholder();
    };
    if !image.is_inline() {
        return ImageCell::Link {
            url: embeddable.to_string(),
        };
    }
    match image.dimensions() {
        Some((w, h)) if w > 0 && h > 0 => {
            let width = render_width(w, max_width);
            ImageCell::Image {
                data: embeddable.to_string(),
                width,
                height: f64::from(h) * width / f64::from(w),
            }
        }
        _ => placeholder(),
    }
}
