//! Pipeline stages for document extraction and model access.
//!
//! Each submodule implements exactly one step. Stages that touch the
//! outside world (pdfium, tesseract, the model provider) sit behind a trait
//! so the orchestrator in [`crate::extract`] can be driven by fakes.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ native ──(too little text)──▶ render ──▶ normalize ──▶ recognize
//! (bytes)   (pdfium)                     (pdfium)   (image)       (tesseract)
//!
//! extracted text ──▶ llm ──▶ token stream
//! ```
//!
//! 1. [`input`]     build an upload from a local path or URL
//! 2. [`native`]    read the embedded PDF text layer
//! 3. [`render`]    rasterise pages; blocking, so it runs in `spawn_blocking`
//! 4. [`normalize`] resize, grayscale, stretch contrast
//! 5. [`recognize`] OCR one normalised page
//! 6. [`llm`]       open a streamed model response

pub mod input;
pub mod llm;
pub mod native;
pub mod normalize;
pub mod recognize;
pub mod render;
