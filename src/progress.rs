//! Progress-callback trait for per-node export events.
//!
//! Inject an [`Arc<dyn ExportProgressCallback>`] via
//! [`crate::config::ExportConfigBuilder::progress_callback`] to receive events
//! while the walker visits each node.
//!
//! # Example
//!
//! ```rust
//! use docweave::{ExportConfig, ExportProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: Arc<AtomicUsize>,
//! }
//!
//! impl ExportProgressCallback for CountingCallback {
//!     fn on_node_complete(&self, index: usize, total: usize, topic: &str) {
//!         self.completed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{}/{} {}", index, total, topic);
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback {
//!     completed: Arc::new(AtomicUsize::new(0)),
//! });
//!
//! let config = ExportConfig::builder()
//!     .progress_callback(counter as Arc<dyn ExportProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the export pipeline as it processes each node.
///
/// Nodes are processed strictly in traversal order, but the trait is
/// `Send + Sync` so callbacks can be shared with other tasks (for example a
/// progress bar redraw thread). All methods default to no-ops.
pub trait ExportProgressCallback: Send + Sync {
    /// Called once before the first node, with the number of reachable nodes.
    fn on_export_start(&self, total_nodes: usize) {
        let _ = total_nodes;
    }

    /// Called before a node's content is normalised.
    ///
    /// # Arguments
    /// * `index` — 1-indexed traversal position
    /// * `total` — reachable nodes
    /// * `topic` — the node's topic text
    fn on_node_start(&self, index: usize, total: usize, topic: &str) {
        let _ = (index, total, topic);
    }

    /// Called after a node's fragments were appended to the document.
    fn on_node_complete(&self, index: usize, total: usize, topic: &str) {
        let _ = (index, total, topic);
    }

    /// Called when an inline image was dropped from the document.
    fn on_asset_error(&self, url: &str, error: &str) {
        let _ = (url, error);
    }

    /// Called once after the document was serialised.
    ///
    /// # Arguments
    /// * `total_nodes` — nodes written
    /// * `bytes`       — size of the produced document
    fn on_export_complete(&self, total_nodes: usize, bytes: usize) {
        let _ = (total_nodes, bytes);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ExportProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ExportConfig`].
pub type ProgressCallback = Arc<dyn ExportProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TrackingCallback {
        started_total: AtomicUsize,
        completes: AtomicUsize,
        asset_errors: AtomicUsize,
        bytes: AtomicUsize,
    }

    impl ExportProgressCallback for TrackingCallback {
        fn on_export_start(&self, total_nodes: usize) {
            self.started_total.store(total_nodes, Ordering::SeqCst);
        }

        fn on_node_complete(&self, _index: usize, _total: usize, _topic: &str) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_asset_error(&self, _url: &str, _error: &str) {
            self.asset_errors.fetch_add(1, Ordering::SeqCst);
        }

        fn on_export_complete(&self, _total_nodes: usize, bytes: usize) {
            self.bytes.store(bytes, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_export_start(3);
        cb.on_node_start(1, 3, "root");
        cb.on_node_complete(1, 3, "root");
        cb.on_asset_error("http://x/y.png", "timeout");
        cb.on_export_complete(3, 1024);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();
        tracker.on_export_start(2);
        tracker.on_node_complete(1, 2, "root");
        tracker.on_node_complete(2, 2, "child");
        tracker.on_asset_error("http://x/y.png", "refused");
        tracker.on_export_complete(2, 4096);

        assert_eq!(tracker.started_total.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.completes.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.asset_errors.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.bytes.load(Ordering::SeqCst), 4096);
    }
}
