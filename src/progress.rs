//! Progress-callback trait for per-page OCR events.
//!
//! Inject an [`Arc<dyn ExtractionProgressCallback>`] via
//! [`crate::config::StreamConfigBuilder::progress_callback`] to receive
//! events while the OCR fallback works through a document. Native and
//! verbatim extraction finish in one step and emit no page events.
//!
//! # Example
//!
//! ```rust
//! use edgequake_docstream::{ExtractionProgressCallback, StreamConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: Arc<AtomicUsize>,
//! }
//!
//! impl ExtractionProgressCallback for CountingCallback {
//!     fn on_page_complete(&self, page_num: usize, total_pages: usize, text_len: usize) {
//!         self.completed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("OCR page {}/{} ({} chars)", page_num, total_pages, text_len);
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback {
//!     completed: Arc::new(AtomicUsize::new(0)),
//! });
//!
//! let config = StreamConfig::builder()
//!     .progress_callback(counter as Arc<dyn ExtractionProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the extraction pipeline as it OCRs each page.
///
/// Implementations must be `Send + Sync`: with `concurrency > 1` the page
/// methods may be called from several tasks at once. All methods default to
/// no-ops so callers only override what they care about.
pub trait ExtractionProgressCallback: Send + Sync {
    /// Called once before the first page is normalised.
    fn on_extraction_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called just before a page enters normalisation.
    ///
    /// `page_num` is 1-indexed.
    fn on_page_start(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// Called when recognition for a page succeeded.
    ///
    /// `text_len` is the character count of the recognised text.
    fn on_page_complete(&self, page_num: usize, total_pages: usize, text_len: usize) {
        let _ = (page_num, total_pages, text_len);
    }

    /// Called when a page failed. The extraction is aborted afterwards.
    fn on_page_error(&self, page_num: usize, total_pages: usize, error: &str) {
        let _ = (page_num, total_pages, error);
    }

    /// Called once after every page succeeded.
    fn on_extraction_complete(&self, total_pages: usize) {
        let _ = total_pages;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ExtractionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::StreamConfig`].
pub type ProgressCallback = Arc<dyn ExtractionProgressCallback>;
