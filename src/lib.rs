//! # edgequake-docstream
//!
//! Extract text from uploaded documents (plain text, PDF, images) and stream
//! a model's response back as framed chunks.
//!
//! ## Why this crate?
//!
//! Uploaded documents arrive in every state: digital PDFs with a clean text
//! layer, scanned PDFs with none, phone photos of a page. This crate reads
//! the text layer when it is trustworthy and falls back to OCR (rasterise,
//! normalise, recognise) when it is not, then relays the model's streamed
//! translation or answer to the caller without buffering it.
//!
//! ## Pipeline Overview
//!
//! ```text
//! upload
//!  │
//!  ├─ 1. Classify   text/plain | application/pdf | image/* | unsupported
//!  ├─ 2. Extract    verbatim / native text layer / OCR fallback per page
//!  ├─ 3. Persist    save the document (failures logged, never fatal)
//!  ├─ 4. Prompt     translation of the first 4000 chars
//!  └─ 5. Relay      token stream → data frames → [DONE] | [ERROR]
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_docstream::{
//!     DocumentService, Extractor, MemoryStore, ProviderTokenSource, StreamConfig, UploadedFile,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = StreamConfig::default();
//!     let source = Arc::new(ProviderTokenSource::from_config(&config)?);
//!     let extractor = Extractor::with_pdfium(config)?;
//!     let service = DocumentService::new(extractor, Arc::new(MemoryStore::new()), source);
//!
//!     let bytes = std::fs::read("scan.pdf")?;
//!     let relay = service
//!         .upload(UploadedFile::new(bytes, "application/pdf", "scan.pdf"))
//!         .await;
//!     let mut stdout = tokio::io::stdout();
//!     edgequake_docstream::write_frames(relay, &mut stdout).await;
//!     Ok(())
//! }
//! ```
//!
//! ## Frame Protocol
//!
//! ```text
//! data: <fragment>\n\n     zero or more
//! data: [DONE]\n\n         terminal, success
//! data: [ERROR] <msg>\n\n  terminal, replaces [DONE]
//! ```
//!
//! Use [`FrameDecoder`] to parse frames back from arbitrary byte chunks.
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `docstream` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! ## External Tools
//!
//! * **pdfium**: loaded at runtime from `PDFIUM_LIB_PATH`, the working
//!   directory, or the system library path.
//! * **tesseract**: invoked as a child process with the `ara` and `tur`
//!   language models by default.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod extract;
pub mod format;
pub mod frame;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod service;
pub mod store;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{StreamConfig, StreamConfigBuilder, DEFAULT_MODEL, DEFAULT_NATIVE_TEXT_THRESHOLD};
pub use error::{DocStreamError, ExtractionError, Stage, UpstreamError};
pub use extract::Extractor;
pub use format::DocumentFormat;
pub use frame::{decode_byte_stream, FrameDecoder, FrameError, StreamChunk};
pub use output::{ExtractionMethod, ExtractionResult, PersistedDocument};
pub use pipeline::input::{resolve_upload, UploadedFile};
pub use pipeline::llm::{ProviderTokenSource, TokenSource};
pub use pipeline::render::PdfiumBackend;
pub use progress::{ExtractionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use service::DocumentService;
pub use store::{DocumentStore, JsonlStore, MemoryStore};
pub use stream::{forward_chunks, write_frames, RelayOutcome, RelayPhase, RelayStream};
