//! Native text extraction: read the embedded text layer of a PDF.
//!
//! This is the cheap path. It never rasterises anything; a scanned PDF
//! simply yields little or no text and the orchestrator falls back to OCR.

use crate::error::ExtractionError;
use crate::pipeline::render::PdfiumBackend;
use tracing::debug;

/// The text layer of a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextLayer {
    /// Page texts joined with a blank line, in page order.
    pub text: String,
    pub page_count: usize,
}

/// Extracts embedded text directly from a PDF.
pub trait TextLayerExtractor: Send + Sync {
    /// Blocking; call from `spawn_blocking`.
    fn extract_text(
        &self,
        pdf: &[u8],
        password: Option<&str>,
    ) -> Result<TextLayer, ExtractionError>;
}

impl TextLayerExtractor for PdfiumBackend {
    fn extract_text(
        &self,
        pdf: &[u8],
        password: Option<&str>,
    ) -> Result<TextLayer, ExtractionError> {
        let pdfium = self
            .bind()
            .map_err(|detail| ExtractionError::TextLayerFailed { detail })?;

        let document = pdfium
            .load_pdf_from_byte_slice(pdf, password)
            .map_err(|e| ExtractionError::TextLayerFailed {
                detail: format!("could not open document: {:?}", e),
            })?;

        let pages = document.pages();
        let mut texts = Vec::with_capacity(pages.len() as usize);
        for (index, page) in pages.iter().enumerate() {
            let text = page.text().map_err(|e| ExtractionError::TextLayerFailed {
                detail: format!("page {}: {:?}", index, e),
            })?;
            texts.push(text.all());
        }

        let layer = TextLayer {
            text: texts.join("\n\n"),
            page_count: texts.len(),
        };
        debug!(
            "Text layer: {} pages, {} chars",
            layer.page_count,
            layer.text.chars().count()
        );
        Ok(layer)
    }
}
