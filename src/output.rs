//! Result types of a harvest run.

use crate::error::ItemError;
use crate::model::Item;
use serde::{Deserialize, Serialize};

/// Why the harvest loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StopReason {
    /// Every requested slot was visited.
    #[default]
    Completed,
    /// A slot had no explanation content at all.
    EndOfContent,
    /// The next-item control was missing or did not work.
    AdvanceFailed,
    /// The run rendered previously saved records; nothing was harvested.
    FromRecords,
}

/// Statistics for a completed run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HarvestStats {
    pub requested_items: usize,
    pub harvested_items: usize,
    /// Slots abandoned because the explanation never appeared.
    pub skipped_items: usize,
    pub images_total: usize,
    /// Images rendered as a placeholder or kept as a bare URL.
    pub images_unresolved: usize,
    pub assembled_pages: usize,
    pub reference_pages_copied: usize,
    pub output_pages: usize,
    pub stop_reason: StopReason,
    pub harvest_duration_ms: u64,
    pub render_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// Items and errors from the harvest loop alone.
#[derive(Debug, Clone, Default)]
pub struct Harvest {
    /// Harvested items, in harvest order, images resolved.
    pub items: Vec<Item>,
    pub item_errors: Vec<ItemError>,
    pub skipped: usize,
    pub stop_reason: StopReason,
}

/// Everything a full run produces.
#[derive(Debug, Clone)]
pub struct HarvestOutput {
    pub items: Vec<Item>,
    /// The finished PDF.
    pub pdf: Vec<u8>,
    pub stats: HarvestStats,
    /// Non-fatal per-item faults, in the order they occurred.
    pub item_errors: Vec<ItemError>,
}
