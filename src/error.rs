//! Error types for the edgequake-docstream library.
//!
//! Three error types reflect three distinct failure modes:
//!
//! * [`DocStreamError`]: **Fatal**, the request cannot proceed at all
//!   (input file missing, provider not configured, pdfium not loadable).
//!   Returned as `Err(DocStreamError)` from library entry points.
//!
//! * [`ExtractionError`]: **Stage failure**, one step of the extraction
//!   pipeline failed. Every variant knows which [`Stage`] it came from and,
//!   for per-page stages, which page. Extraction errors abort the request
//!   before any model output is streamed.
//!
//! * [`UpstreamError`]: the model stream failed to open, broke mid-response
//!   or went silent. The relay turns it into a terminal error frame; it is
//!   never propagated to the caller as a Rust error.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-docstream library.
#[derive(Debug, Error)]
pub enum DocStreamError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("File not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    // ── Pipeline errors ───────────────────────────────────────────────────
    /// Extraction failed at a specific stage.
    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    /// The document store could not be read or written.
    #[error("Document store unavailable: {detail}")]
    StoreUnavailable { detail: String },

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
You can:\n\
  • Place libpdfium next to the binary or in the working directory.\n\
  • Set PDFIUM_LIB_PATH=/path/to/libpdfium to use an existing copy.\n\
  • Install pdfium system-wide so the dynamic loader can find it.\n"
    )]
    PdfiumBindingFailed(String),
}

/// The pipeline step an [`ExtractionError`] originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Content-type classification.
    Classify,
    /// Verbatim UTF-8 decoding of a plain-text upload.
    Decode,
    /// Native PDF text-layer extraction.
    TextLayer,
    /// PDF page rasterisation.
    Rasterise,
    /// Resize / grayscale / contrast normalisation.
    Normalise,
    /// Optical character recognition.
    Recognise,
    /// Scratch-directory management for raster artefacts.
    Artefacts,
}

/// A failure in one stage of the extraction pipeline.
///
/// Page numbers are 0-based page indices, matching the order in which pages
/// are concatenated into the final text.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// The declared content type is not one of the four supported formats.
    #[error("Unsupported content type '{content_type}'")]
    UnsupportedFormat { content_type: String },

    /// A plain-text upload was not valid UTF-8.
    #[error("Uploaded text is not valid UTF-8: {source}")]
    InvalidText {
        #[source]
        source: std::str::Utf8Error,
    },

    /// The PDF could not be opened or its text layer could not be read.
    #[error("Native text extraction failed: {detail}")]
    TextLayerFailed { detail: String },

    /// pdfium could not be bound, or could not open the document for
    /// rendering. No page was reached.
    #[error("Rasterisation failed before any page was rendered: {detail}")]
    RasterDocumentFailed { detail: String },

    /// pdfium could not render a page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    /// A raster image was unreadable or corrupt.
    #[error("Image decode failed for page {page}: {detail}")]
    ImageDecodeFailed { page: usize, detail: String },

    /// The recognition engine failed on a page.
    #[error("Recognition failed for page {page}: {detail}")]
    RecognitionFailed { page: usize, detail: String },

    /// The scratch directory for raster artefacts could not be created or
    /// written. `page` is set when writing that page's artefact failed.
    #[error("Raster artefact I/O failed: {source}")]
    Artefacts {
        page: Option<usize>,
        #[source]
        source: std::io::Error,
    },

    /// A blocking task running `stage` panicked or was cancelled.
    #[error("Internal extraction error in {stage:?} stage: {detail}")]
    Internal { stage: Stage, detail: String },
}

impl ExtractionError {
    /// The stage that failed.
    pub fn stage(&self) -> Stage {
        match self {
            ExtractionError::UnsupportedFormat { .. } => Stage::Classify,
            ExtractionError::InvalidText { .. } => Stage::Decode,
            ExtractionError::TextLayerFailed { .. } => Stage::TextLayer,
            ExtractionError::RasterDocumentFailed { .. }
            | ExtractionError::RasterisationFailed { .. } => Stage::Rasterise,
            ExtractionError::ImageDecodeFailed { .. } => Stage::Normalise,
            ExtractionError::RecognitionFailed { .. } => Stage::Recognise,
            ExtractionError::Artefacts { .. } => Stage::Artefacts,
            ExtractionError::Internal { stage, .. } => *stage,
        }
    }

    /// The 0-based page index the failure belongs to, for per-page stages.
    pub fn page(&self) -> Option<usize> {
        match self {
            ExtractionError::RasterisationFailed { page, .. }
            | ExtractionError::ImageDecodeFailed { page, .. }
            | ExtractionError::RecognitionFailed { page, .. } => Some(*page),
            ExtractionError::Artefacts { page, .. } => *page,
            _ => None,
        }
    }
}

/// A failure of the upstream model stream.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UpstreamError {
    /// The streaming request could not be started.
    #[error("Upstream stream could not be opened: {0}")]
    Connect(String),

    /// The stream errored after it was opened.
    #[error("Upstream stream failed: {0}")]
    Stream(String),

    /// No token arrived within the configured idle timeout.
    #[error("Upstream stream idle for more than {secs}s")]
    IdleTimeout { secs: u64 },
}
