//! Extraction orchestration: the fallback policy from upload to text.
//!
//! ```text
//! plain text ──▶ UTF-8 decode                                  (verbatim)
//! pdf        ──▶ text layer ──(≥ threshold)──────────────────▶ (native)
//!                     └──(< threshold)──▶ rasterise every page
//!                                          ──▶ normalise ──▶ recognise (ocr)
//! image      ──▶ normalise ──▶ recognise                       (ocr)
//! ```
//!
//! Raster artefacts live in a [`tempfile::TempDir`] owned by the call; it is
//! removed when the call returns, whichever way it returns.
//!
//! Any failed page fails the whole document. Pages may be OCR'd concurrently
//! (`StreamConfig::concurrency`) but the text is always assembled in page
//! order.

use crate::config::StreamConfig;
use crate::error::{DocStreamError, ExtractionError, Stage};
use crate::format::DocumentFormat;
use crate::output::{ExtractionMethod, ExtractionResult};
use crate::pipeline::input::UploadedFile;
use crate::pipeline::native::TextLayerExtractor;
use crate::pipeline::normalize::{ContrastNormalizer, Normalizer};
use crate::pipeline::recognize::{Recognizer, TesseractEngine};
use crate::pipeline::render::{PdfiumBackend, RasterOptions, RasterPage, Rasterizer};
use futures::stream::{self, StreamExt, TryStreamExt};
use image::ImageFormat;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// Runs the extraction pipeline for one upload at a time.
///
/// Holds no per-request state; share one instance between requests.
pub struct Extractor {
    text_layer: Arc<dyn TextLayerExtractor>,
    rasterizer: Arc<dyn Rasterizer>,
    normalizer: Arc<dyn Normalizer>,
    recognizer: Arc<dyn Recognizer>,
    config: StreamConfig,
}

impl Extractor {
    pub fn new(
        config: StreamConfig,
        text_layer: Arc<dyn TextLayerExtractor>,
        rasterizer: Arc<dyn Rasterizer>,
        normalizer: Arc<dyn Normalizer>,
        recognizer: Arc<dyn Recognizer>,
    ) -> Self {
        Self {
            text_layer,
            rasterizer,
            normalizer,
            recognizer,
            config,
        }
    }

    /// Production pipeline: pdfium for text and rendering, contrast
    /// normalisation, tesseract for recognition.
    ///
    /// Fails if the pdfium library cannot be loaded.
    pub fn with_pdfium(config: StreamConfig) -> Result<Self, DocStreamError> {
        Ok(Self::from_backend(config, PdfiumBackend::new(None)?))
    }

    /// Like [`Extractor::with_pdfium`] but without checking the binding up
    /// front; a missing library surfaces as a stage failure on the first PDF.
    pub fn from_backend(config: StreamConfig, pdfium: PdfiumBackend) -> Self {
        let pdfium = Arc::new(pdfium);
        let normalizer = Arc::new(ContrastNormalizer::new(config.normalize_long_edge));
        let recognizer = Arc::new(TesseractEngine::new(
            config.tesseract_cmd.clone(),
            config.tessdata_dir.clone(),
        ));
        Self::new(config, pdfium.clone(), pdfium, normalizer, recognizer)
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Extract the text of `upload` according to its declared content type.
    pub async fn extract(
        &self,
        upload: &UploadedFile,
    ) -> Result<ExtractionResult, ExtractionError> {
        let format = DocumentFormat::classify(upload.content_type());
        let start = Instant::now();
        debug!(
            "Extracting '{}' as {} ({} bytes)",
            upload.filename(),
            format,
            upload.bytes().len()
        );

        let result = match format {
            DocumentFormat::PlainText => decode_verbatim(upload.bytes()),
            DocumentFormat::Pdf => self.extract_pdf(upload.bytes()).await,
            DocumentFormat::Image => self.extract_image(upload.bytes()).await,
            DocumentFormat::Unsupported => Err(ExtractionError::UnsupportedFormat {
                content_type: upload.content_type().to_string(),
            }),
        }?;

        info!(
            method = %result.method,
            pages = result.page_count,
            chars = result.text.chars().count(),
            "Extracted '{}' in {}ms",
            upload.filename(),
            start.elapsed().as_millis()
        );
        Ok(result)
    }

    // ── PDF ──────────────────────────────────────────────────────────────

    async fn extract_pdf(&self, bytes: &[u8]) -> Result<ExtractionResult, ExtractionError> {
        let pdf: Arc<[u8]> = Arc::from(bytes);

        let text_layer = Arc::clone(&self.text_layer);
        let password = self.config.pdf_password.clone();
        let doc = Arc::clone(&pdf);
        let layer = tokio::task::spawn_blocking(move || {
            text_layer.extract_text(&doc, password.as_deref())
        })
        .await
        .map_err(|e| task_failed(Stage::TextLayer, e))??;

        let trimmed_chars = layer.text.trim().chars().count();
        if trimmed_chars >= self.config.native_text_threshold {
            return Ok(ExtractionResult {
                text: layer.text,
                method: ExtractionMethod::Native,
                page_count: layer.page_count,
            });
        }

        info!(
            "Native text too short ({} < {} chars); falling back to OCR",
            trimmed_chars, self.config.native_text_threshold
        );

        let scratch = scratch_dir()?;
        let rasterizer = Arc::clone(&self.rasterizer);
        let options = RasterOptions {
            dpi: self.config.dpi,
            max_rendered_pixels: self.config.max_rendered_pixels,
            password: self.config.pdf_password.clone(),
        };
        let out_dir = scratch.path().to_path_buf();
        let pages =
            tokio::task::spawn_blocking(move || rasterizer.rasterize(&pdf, &options, &out_dir))
                .await
                .map_err(|e| task_failed(Stage::Rasterise, e))??;

        let page_count = pages.len();
        let text = self.recognize_pages(pages, scratch.path()).await?;
        Ok(ExtractionResult {
            text,
            method: ExtractionMethod::Ocr,
            page_count,
        })
    }

    /// OCR every rendered page, bounded by `concurrency`, and join the page
    /// texts with `\n` in page order.
    async fn recognize_pages(
        &self,
        mut pages: Vec<RasterPage>,
        scratch: &Path,
    ) -> Result<String, ExtractionError> {
        pages.sort_by_key(|p| p.index);
        let total = pages.len();
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_extraction_start(total);
        }

        let mut texts: Vec<(usize, String)> = stream::iter(pages)
            .map(|page| async move {
                let raw = tokio::fs::read(&page.path)
                    .await
                    .map_err(|e| ExtractionError::ImageDecodeFailed {
                        page: page.index,
                        detail: format!("could not read {}: {}", page.path.display(), e),
                    });
                match raw {
                    Ok(raw) => self.ocr_page(page.index, total, raw, scratch).await,
                    Err(e) => Err(self.report_page_error(page.index, total, e)),
                }
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .try_collect()
            .await?;

        texts.sort_by_key(|(index, _)| *index);

        if let Some(ref cb) = self.config.progress_callback {
            cb.on_extraction_complete(total);
        }

        let texts: Vec<String> = texts.into_iter().map(|(_, text)| text).collect();
        Ok(texts.join("\n"))
    }

    // ── Image ────────────────────────────────────────────────────────────

    async fn extract_image(&self, bytes: &[u8]) -> Result<ExtractionResult, ExtractionError> {
        let scratch = scratch_dir()?;
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_extraction_start(1);
        }
        let (_, text) = self.ocr_page(0, 1, bytes.to_vec(), scratch.path()).await?;
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_extraction_complete(1);
        }
        Ok(ExtractionResult {
            text,
            method: ExtractionMethod::Ocr,
            page_count: 1,
        })
    }

    // ── Per page ─────────────────────────────────────────────────────────

    /// Normalise one raw raster, write it next to the other artefacts, and
    /// recognise it.
    async fn ocr_page(
        &self,
        index: usize,
        total: usize,
        raw: Vec<u8>,
        scratch: &Path,
    ) -> Result<(usize, String), ExtractionError> {
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_page_start(index + 1, total);
        }

        match self.normalize_and_recognize(index, raw, scratch).await {
            Ok(text) => {
                debug!(page = index + 1, chars = text.chars().count(), "Page recognised");
                if let Some(ref cb) = self.config.progress_callback {
                    cb.on_page_complete(index + 1, total, text.chars().count());
                }
                Ok((index, text))
            }
            Err(e) => Err(self.report_page_error(index, total, e)),
        }
    }

    async fn normalize_and_recognize(
        &self,
        index: usize,
        raw: Vec<u8>,
        scratch: &Path,
    ) -> Result<String, ExtractionError> {
        let normalizer = Arc::clone(&self.normalizer);
        let path = scratch.join(format!("page-{:04}-normalized.png", index + 1));
        let target = path.clone();
        tokio::task::spawn_blocking(move || -> Result<PathBuf, ExtractionError> {
            let image = normalizer
                .normalize(&raw)
                .map_err(|e| ExtractionError::ImageDecodeFailed {
                    page: index,
                    detail: e.to_string(),
                })?;
            image
                .save_with_format(&target, ImageFormat::Png)
                .map_err(|e| ExtractionError::Artefacts {
                    page: Some(index),
                    source: std::io::Error::other(e.to_string()),
                })?;
            Ok(target)
        })
        .await
        .map_err(|e| task_failed(Stage::Normalise, e))??;

        self.recognizer
            .recognize(&path, &self.config.ocr_languages)
            .await
            .map_err(|detail| ExtractionError::RecognitionFailed { page: index, detail })
    }

    fn report_page_error(
        &self,
        index: usize,
        total: usize,
        error: ExtractionError,
    ) -> ExtractionError {
        warn!(page = index + 1, stage = ?error.stage(), "Page failed: {}", error);
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_page_error(index + 1, total, &error.to_string());
        }
        error
    }
}

fn decode_verbatim(bytes: &[u8]) -> Result<ExtractionResult, ExtractionError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|source| ExtractionError::InvalidText { source })?
        .to_string();
    Ok(ExtractionResult {
        text,
        method: ExtractionMethod::Verbatim,
        page_count: 0,
    })
}

fn scratch_dir() -> Result<TempDir, ExtractionError> {
    tempfile::Builder::new()
        .prefix("docstream-")
        .tempdir()
        .map_err(|source| ExtractionError::Artefacts { page: None, source })
}

fn task_failed(stage: Stage, e: tokio::task::JoinError) -> ExtractionError {
    ExtractionError::Internal {
        stage,
        detail: e.to_string(),
    }
}
