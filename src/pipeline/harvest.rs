//! Harvest loop: runs the [`Navigator`] across the requested item slots.
//!
//! All mutable state of a run lives in [`RunState`], created at the start
//! of [`harvest`] and consumed at the end; nothing survives between runs.

use crate::config::HarvestConfig;
use crate::error::{HarvestError, ItemError};
use crate::model::{Item, ReferenceRecord};
use crate::output::{Harvest, StopReason};
use crate::pipeline::extract::FieldExtractor;
use crate::pipeline::navigate::{Navigator, Transition};
use crate::pipeline::resolve::ImageResolver;
use crate::session::BrowserSession;
use tracing::{info, warn};

/// Accumulator for one run.
#[derive(Debug, Default)]
pub struct RunState {
    /// Append-only, in harvest order.
    items: Vec<Item>,
    /// Most recent reference-material block, shown on later items that
    /// have none of their own.
    last_reference: Option<ReferenceRecord>,
    errors: Vec<ItemError>,
    skipped: usize,
}

impl RunState {
    /// Append a harvested item, carrying the last reference block forward.
    pub fn push(&mut self, mut item: Item, carry_reference: bool) {
        if carry_reference {
            match &item.reference {
                Some(reference) => self.last_reference = Some(reference.clone()),
                None => item.reference = self.last_reference.clone(),
            }
        }
        self.items.push(item);
    }

    pub fn record_errors(&mut self, errors: impl IntoIterator<Item = ItemError>) {
        self.errors.extend(errors);
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    fn finish(self, stop_reason: StopReason) -> Harvest {
        Harvest {
            items: self.items,
            item_errors: self.errors,
            skipped: self.skipped,
            stop_reason,
        }
    }
}

/// Navigate to the start location and harvest up to `item_count` slots.
///
/// Only a failure to reach the start location is an error; every later
/// fault ends as a recorded [`ItemError`] and, at worst, an early stop with
/// the items gathered so far.
pub async fn harvest(
    session: &dyn BrowserSession,
    resolver: &ImageResolver,
    config: &HarvestConfig,
) -> Result<Harvest, HarvestError> {
    let extractor = FieldExtractor::new(&config.selectors)?;
    let navigator = Navigator::new(session, &extractor, resolver, config);
    let total = config.item_count;
    let callback = config.progress_callback.as_ref();

    session
        .goto(&config.start_location)
        .await
        .map_err(|e| HarvestError::Session(format!("cannot open {}: {e}", config.start_location)))?;

    if let Some(cb) = callback {
        cb.on_harvest_start(total);
    }
    info!("Harvesting up to {} item(s) from {}", total, config.start_location);

    let mut state = RunState::default();
    let mut stop_reason = StopReason::Completed;

    for ordinal in 1..=total {
        if let Some(cb) = callback {
            cb.on_item_start(ordinal, total);
        }

        let visit = navigator.visit(ordinal, ordinal == total).await;
        state.record_errors(visit.errors.iter().cloned());

        match visit.item {
            Some(item) => {
                if let Some(cb) = callback {
                    cb.on_item_complete(ordinal, total, item.image_count());
                }
                state.push(item, config.variant.include_reference_material);
            }
            None if visit.next != Transition::End => {
                state.skipped += 1;
                let reason = visit
                    .errors
                    .last()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| "skipped".into());
                if let Some(cb) = callback {
                    cb.on_item_skipped(ordinal, total, &reason);
                }
            }
            None => {}
        }

        match visit.next {
            Transition::Advanced | Transition::Last => {}
            Transition::End => {
                stop_reason = StopReason::EndOfContent;
                break;
            }
            Transition::AdvanceFailed => {
                warn!(
                    "Harvest stopped at item {ordinal}; keeping {} item(s)",
                    state.items().len()
                );
                stop_reason = StopReason::AdvanceFailed;
                break;
            }
        }
    }

    let harvested = state.items().len();
    if let Some(cb) = callback {
        cb.on_harvest_complete(total, harvested);
    }
    info!(
        "Harvest finished: {harvested}/{total} item(s), {} skipped, stop reason {stop_reason:?}",
        state.skipped
    );
    Ok(state.finish(stop_reason))
}
