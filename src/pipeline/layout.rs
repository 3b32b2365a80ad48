//! Pagination: [`DocumentModel`] → positioned draw operations per page.
//!
//! Pure and deterministic; no fonts are loaded. Text width is estimated per
//! character (full-width for CJK, about half for Latin), which is accurate
//! enough to wrap Japanese body text without measuring glyphs.
//!
//! Coordinates are PDF points with the origin at the bottom-left corner, as
//! pdfium expects them. Every item starts on a fresh page, so the number of
//! pages each item produced is known before anything is encoded; the merge
//! planner depends on that.

use crate::config::PageLayout;
use crate::pipeline::assemble::{Block, DocumentModel, ImageCell, ItemDocument};
use serde::Serialize;

/// Line height as a multiple of the font size.
const LINE_SPACING: f64 = 1.45;
/// Vertical gap after an image block, as a multiple of the body size.
const IMAGE_GAP: f64 = 0.6;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum DrawOp {
    /// One line of text; `y` is the baseline.
    Text {
        x: f64,
        y: f64,
        size: f64,
        text: String,
    },
    /// An image; `(x, y)` is its bottom-left corner.
    Image {
        x: f64,
        y: f64,
        width: f64,
        height: f64,
        data: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LaidOutPage {
    pub item_ordinal: usize,
    pub ops: Vec<DrawOp>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LaidOutDocument {
    pub width_pt: f64,
    pub height_pt: f64,
    pub pages: Vec<LaidOutPage>,
    /// Pages produced by each item, in document order.
    pub item_pages: Vec<usize>,
}

impl LaidOutDocument {
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }
}

/// Paginate every item of `model` onto pages of `layout`.
pub fn paginate(model: &DocumentModel, layout: &PageLayout) -> LaidOutDocument {
    let mut p = Paginator::new(layout);
    let mut item_pages = Vec::with_capacity(model.items.len());
    for item in &model.items {
        let before = p.pages.len();
        p.item(item);
        item_pages.push(p.pages.len() - before);
    }
    LaidOutDocument {
        width_pt: layout.width_pt,
        height_pt: layout.height_pt,
        pages: p.pages,
        item_pages,
    }
}

struct Paginator<'a> {
    layout: &'a PageLayout,
    pages: Vec<LaidOutPage>,
    ops: Vec<DrawOp>,
    ordinal: usize,
    /// Top of the remaining free space on the current page.
    y: f64,
}

impl<'a> Paginator<'a> {
    fn new(layout: &'a PageLayout) -> Self {
        Self {
            layout,
            pages: Vec::new(),
            ops: Vec::new(),
            ordinal: 0,
            y: layout.height_pt - layout.margin_pt,
        }
    }

    fn top(&self) -> f64 {
        self.layout.height_pt - self.layout.margin_pt
    }

    fn bottom(&self) -> f64 {
        self.layout.margin_pt
    }

    fn body_line(&self) -> f64 {
        self.layout.body_font_size * LINE_SPACING
    }

    fn item(&mut self, item: &ItemDocument) {
        self.flush();
        self.ordinal = item.ordinal;
        for block in &item.blocks {
            self.block(block);
        }
        self.flush();
    }

    /// Close the current page if anything was drawn on it.
    fn flush(&mut self) {
        if !self.ops.is_empty() {
            self.pages.push(LaidOutPage {
                item_ordinal: self.ordinal,
                ops: std::mem::take(&mut self.ops),
            });
        }
        self.y = self.top();
    }

    /// Start a new page unless `height` still fits (an empty page always fits).
    fn reserve(&mut self, height: f64) {
        if self.y - height < self.bottom() && !self.ops.is_empty() {
            self.flush();
        }
    }

    fn block(&mut self, block: &Block) {
        let body = self.layout.body_font_size;
        match block {
            Block::Heading(text) => {
                self.text(text, self.layout.header_font_size);
                self.y -= body * 0.5;
            }
            Block::Subheading(text) => {
                self.y -= body * 0.4;
                self.text(text, body * 1.15);
            }
            Block::Text(text) => self.text(text, body),
            Block::Image(cell) => self.row(std::slice::from_ref(cell), self.layout.usable_width()),
            Block::ImageGrid { rows } => {
                for row in rows {
                    if row.iter().all(|c| matches!(c, ImageCell::Empty)) {
                        continue;
                    }
                    let col_width = self.layout.usable_width() / row.len().max(1) as f64;
                    self.row(row, col_width);
                }
            }
            Block::Spacer => {
                self.y -= self.body_line();
                if self.y < self.bottom() {
                    self.flush();
                }
            }
            Block::PageBreak => self.flush(),
        }
    }

    fn text(&mut self, text: &str, size: f64) {
        let line_height = size * LINE_SPACING;
        let x = self.layout.margin_pt;
        for line in wrap(text, size, self.layout.usable_width()) {
            self.reserve(line_height);
            self.y -= line_height;
            if !line.is_empty() {
                self.ops.push(DrawOp::Text {
                    x,
                    y: self.y + line_height * 0.25,
                    size,
                    text: line,
                });
            }
        }
    }

    /// One row of cells, each in a column of `col_width`, top-aligned.
    fn row(&mut self, cells: &[ImageCell], col_width: f64) {
        let body = self.layout.body_font_size;
        let line_height = self.body_line();
        let max_height = self.layout.usable_height();

        let sized: Vec<(f64, f64)> = cells
            .iter()
            .map(|cell| match cell {
                ImageCell::Image { width, height, .. } => {
                    fit(*width, *height, col_width, max_height)
                }
                ImageCell::Link { url } => {
                    (col_width, wrap(url, body, col_width).len() as f64 * line_height)
                }
                ImageCell::Error { message } => {
                    (col_width, wrap(message, body, col_width).len() as f64 * line_height)
                }
                ImageCell::Empty => (0.0, 0.0),
            })
            .collect();
        let row_height = sized.iter().map(|(_, h)| *h).fold(0.0, f64::max);
        if row_height <= 0.0 {
            return;
        }

        self.reserve(row_height);
        let row_top = self.y;
        for (col, (cell, (w, h))) in cells.iter().zip(&sized).enumerate() {
            let x = self.layout.margin_pt + col as f64 * col_width;
            match cell {
                ImageCell::Image { data, .. } => self.ops.push(DrawOp::Image {
                    x,
                    y: row_top - h,
                    width: *w,
                    height: *h,
                    data: data.clone(),
                }),
                ImageCell::Link { url: text } | ImageCell::Error { message: text } => {
                    let mut baseline = row_top;
                    for line in wrap(text, body, col_width) {
                        baseline -= line_height;
                        self.ops.push(DrawOp::Text {
                            x,
                            y: baseline + line_height * 0.25,
                            size: body,
                            text: line,
                        });
                    }
                }
                ImageCell::Empty => {}
            }
        }
        self.y = row_top - row_height - body * IMAGE_GAP;
    }
}

/// Scale `(w, h)` down to fit `max_w × max_h`, keeping the aspect ratio.
fn fit(w: f64, h: f64, max_w: f64, max_h: f64) -> (f64, f64) {
    let scale = (max_w / w).min(max_h / h).min(1.0);
    (w * scale, h * scale)
}

/// Estimated advance width of `c` at `size`.
fn char_width(c: char, size: f64) -> f64 {
    if c.is_ascii() {
        size * 0.55
    } else if is_wide(c) {
        size
    } else {
        size * 0.6
    }
}

fn is_wide(c: char) -> bool {
    matches!(c as u32,
        0x1100..=0x115F
        | 0x2E80..=0xA4CF
        | 0xAC00..=0xD7A3
        | 0xF900..=0xFAFF
        | 0xFE30..=0xFE4F
        | 0xFF00..=0xFF60
        | 0xFFE0..=0xFFE6
        | 0x20000..=0x3FFFD)
}

fn text_width(s: &str, size: f64) -> f64 {
    s.chars().map(|c| char_width(c, size)).sum()
}

/// Wrap `text` to `max_width`. Explicit newlines are kept (blank lines
/// included). Latin words are not split when a space is available; CJK
/// text breaks between any two characters.
pub fn wrap(text: &str, size: f64, max_width: f64) -> Vec<String> {
    let mut lines = Vec::new();
    for paragraph in text.split('\n') {
        let mut current = String::new();
        let mut width = 0.0;
        for c in paragraph.chars() {
            let w = char_width(c, size);
            if width + w > max_width && !current.is_empty() {
                match current.rfind(' ') {
                    Some(k) if k > 0 && current[k + 1..].is_ascii() && !c.is_whitespace() => {
                        let tail = current[k + 1..].to_string();
                        current.truncate(k);
                        lines.push(std::mem::take(&mut current));
                        width = text_width(&tail, size);
                        current = tail;
                    }
                    _ => {
                        lines.push(std::mem::take(&mut current));
                        width = 0.0;
                    }
                }
                if c == ' ' && current.is_empty() {
                    continue;
                }
            }
            current.push(c);
            width += w;
        }
        lines.push(current.trim_end().to_string());
    }
    lines
}
