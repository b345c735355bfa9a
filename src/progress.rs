//! Progress-callback trait for per-reference tagging events.
//!
//! Inject an [`Arc<dyn TaggingProgressCallback>`] via
//! [`crate::config::TagConfigBuilder::progress_callback`] to receive events
//! as the pipeline describes each image and link.
//!
//! # Example
//!
//! ```rust
//! use edgequake_pdf_alttag::{TaggingProgressCallback, TagConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     described: AtomicUsize,
//! }
//!
//! impl TaggingProgressCallback for CountingCallback {
//!     fn on_image_complete(&self, object_id: u32, index: usize, total: usize, text_len: usize) {
//!         self.described.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("Figure {object_id} ({}/{total}): {text_len} chars", index + 1);
//!     }
//! }
//!
//! let config = TagConfig::builder()
//!     .progress_callback(Arc::new(CountingCallback { described: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the tagging pipeline as it processes references.
///
/// Image events arrive strictly in manifest order. Link events may arrive
/// in any order and from interleaved futures, so implementations must
/// protect shared mutable state (`Mutex`, atomics).
pub trait TaggingProgressCallback: Send + Sync {
    /// Called once after the manifest is loaded and links are discovered.
    fn on_run_start(&self, images: usize, links: usize) {
        let _ = (images, links);
    }

    /// Called just before the model is asked to describe an image.
    fn on_image_start(&self, object_id: u32, index: usize, total: usize) {
        let _ = (object_id, index, total);
    }

    /// Called when an image description (possibly empty) was produced.
    fn on_image_complete(&self, object_id: u32, index: usize, total: usize, text_len: usize) {
        let _ = (object_id, index, total, text_len);
    }

    /// Called when an image failed after all retries.
    fn on_image_error(&self, object_id: u32, index: usize, total: usize, error: &str) {
        let _ = (object_id, index, total, error);
    }

    /// Called when a link description completes or fails.
    fn on_link_complete(&self, object_id: u32, ok: bool) {
        let _ = (object_id, ok);
    }

    /// Called once after the tagged document is published.
    fn on_run_complete(&self, resolved: usize, fallback: usize) {
        let _ = (resolved, fallback);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl TaggingProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::TagConfig`].
pub type ProgressCallback = Arc<dyn TaggingProgressCallback>;
