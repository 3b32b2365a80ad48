//! Progress-callback trait for per-item harvest events.
//!
//! Inject an [`Arc<dyn HarvestProgressCallback>`] via
//! [`crate::config::HarvestConfigBuilder::progress_callback`] to receive
//! events as the harvest loop visits each item slot.
//!
//! ```rust
//! use qbank2pdf::{HarvestConfig, HarvestProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct Counter(AtomicUsize);
//!
//! impl HarvestProgressCallback for Counter {
//!     fn on_item_complete(&self, ordinal: usize, total: usize, image_count: usize) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("item {ordinal}/{total} ({image_count} images)");
//!     }
//! }
//!
//! let config = HarvestConfig::builder()
//!     .start_location("https://qbank.example/q/1")
//!     .progress_callback(Arc::new(Counter(AtomicUsize::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the harvest loop as it visits each item slot.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. The harvest loop is sequential, but the trait is
/// `Send + Sync` so a callback can be shared with other tasks.
pub trait HarvestProgressCallback: Send + Sync {
    /// Called once before the first item.
    fn on_harvest_start(&self, total_items: usize) {
        let _ = total_items;
    }

    /// Called when the navigator starts on an item slot (1-indexed).
    fn on_item_start(&self, ordinal: usize, total_items: usize) {
        let _ = (ordinal, total_items);
    }

    /// Called after an item was extracted and its images resolved.
    fn on_item_complete(&self, ordinal: usize, total_items: usize, image_count: usize) {
        let _ = (ordinal, total_items, image_count);
    }

    /// Called when a slot produced no record (explanation timeout).
    fn on_item_skipped(&self, ordinal: usize, total_items: usize, reason: &str) {
        let _ = (ordinal, total_items, reason);
    }

    /// Called once when the loop stops, for whatever reason.
    fn on_harvest_complete(&self, total_items: usize, harvested: usize) {
        let _ = (total_items, harvested);
    }
}

/// A no-op implementation; the default when no callback is configured.
pub struct NoopProgressCallback;

impl HarvestProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::HarvestConfig`].
pub type ProgressCallback = Arc<dyn HarvestProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TrackingCallback {
        starts: AtomicUsize,
        completes: AtomicUsize,
        skips: AtomicUsize,
        harvested: AtomicUsize,
    }

    impl HarvestProgressCallback for TrackingCallback {
        fn on_item_start(&self, _ordinal: usize, _total: usize) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_item_complete(&self, _ordinal: usize, _total: usize, _images: usize) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_item_skipped(&self, _ordinal: usize, _total: usize, _reason: &str) {
            self.skips.fetch_add(1, Ordering::SeqCst);
        }

        fn on_harvest_complete(&self, _total: usize, harvested: usize) {
            self.harvested.store(harvested, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_harvest_start(3);
        cb.on_item_start(1, 3);
        cb.on_item_complete(1, 3, 2);
        cb.on_item_skipped(2, 3, "timeout");
        cb.on_harvest_complete(3, 1);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();
        tracker.on_item_start(1, 2);
        tracker.on_item_complete(1, 2, 0);
        tracker.on_item_start(2, 2);
        tracker.on_item_skipped(2, 2, "explanation timeout");
        tracker.on_harvest_complete(2, 1);

        assert_eq!(tracker.starts.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.completes.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.skips.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.harvested.load(Ordering::SeqCst), 1);
    }
}
