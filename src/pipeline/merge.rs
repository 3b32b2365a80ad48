//! Merge planning: interleave reference-document page groups with the
//! assembled pages of each item.
//!
//! For item `i` (0-indexed) the reference pages `[i*g, i*g+g)` are copied
//! first, then that item's assembled pages. Groups past the end of the
//! reference document are clipped or dropped; a short reference is not an
//! error. The plan is pure index arithmetic; the encoder executes it with
//! opaque page-level copies.

use serde::Serialize;
use std::ops::Range;

/// One copy operation of the merged output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum MergeStep {
    /// Copy these pages of the reference document.
    Reference(Range<usize>),
    /// Copy these pages of the assembled document.
    Assembled(Range<usize>),
}

impl MergeStep {
    pub fn len(&self) -> usize {
        match self {
            MergeStep::Reference(r) | MergeStep::Assembled(r) => r.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Build the merge plan.
///
/// `item_pages[i]` is the number of assembled pages item `i` produced;
/// their sum must equal the assembled document's page count.
pub fn plan_merge(item_pages: &[usize], reference_pages: usize, group_size: usize) -> Vec<MergeStep> {
    let mut steps = Vec::with_capacity(item_pages.len() * 2);
    let mut assembled_start = 0;
    for (i, &pages) in item_pages.iter().enumerate() {
        let start = (i * group_size).min(reference_pages);
        let end = (start + group_size).min(reference_pages);
        if start < end {
            steps.push(MergeStep::Reference(start..end));
        }
        if pages > 0 {
            steps.push(MergeStep::Assembled(assembled_start..assembled_start + pages));
        }
        assembled_start += pages;
    }
    steps
}

/// Reference pages a plan copies.
pub fn reference_pages_copied(plan: &[MergeStep]) -> usize {
    plan.iter()
        .filter(|s| matches!(s, MergeStep::Reference(_)))
        .map(MergeStep::len)
        .sum()
}

/// Total pages of the merged output.
pub fn merged_page_count(plan: &[MergeStep]) -> usize {
    plan.iter().map(MergeStep::len).sum()
}
