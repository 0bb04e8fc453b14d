//! Data produced by the pipeline: extraction results and stored documents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which pipeline path produced a document's text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    /// Embedded PDF text layer, no raster images produced.
    Native,
    /// Rasterise → normalise → recognise.
    Ocr,
    /// Plain-text bytes decoded as UTF-8.
    Verbatim,
}

impl fmt::Display for ExtractionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExtractionMethod::Native => "native",
            ExtractionMethod::Ocr => "ocr",
            ExtractionMethod::Verbatim => "verbatim",
        };
        f.write_str(s)
    }
}

/// Text extracted from one upload.
///
/// For [`ExtractionMethod::Ocr`], `text` is the per-page recognition output
/// joined with `\n` in page order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub text: String,
    pub method: ExtractionMethod,
    /// Pages processed: the PDF page count for native/OCR PDFs, 1 for
    /// images, 0 for plain text.
    pub page_count: usize,
}

impl ExtractionResult {
    /// At most `max_chars` characters of the text, cut on a char boundary.
    pub fn truncated(&self, max_chars: usize) -> &str {
        match self.text.char_indices().nth(max_chars) {
            Some((byte_idx, _)) => &self.text[..byte_idx],
            None => &self.text,
        }
    }
}

/// A document saved by a [`crate::store::DocumentStore`].
///
/// Created once per successful extraction and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedDocument {
    /// Identity assigned by the store.
    pub id: u64,
    /// Original file name of the upload.
    pub name: String,
    /// Full extracted text.
    pub content: String,
    pub uploaded_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(text: &str) -> ExtractionResult {
        ExtractionResult {
            text: text.to_string(),
            method: ExtractionMethod::Verbatim,
            page_count: 0,
        }
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        // Arabic letters are two bytes each in UTF-8.
        let r = result("مرحبا بالعالم");
        assert_eq!(r.truncated(5), "مرحبا");
        assert_eq!(r.truncated(100), "مرحبا بالعالم");
        assert_eq!(r.truncated(0), "");
    }

    #[test]
    fn method_serialises_as_snake_case() {
        let json = serde_json::to_string(&ExtractionMethod::Ocr).unwrap();
        assert_eq!(json, "\"ocr\"");
        assert_eq!(ExtractionMethod::Native.to_string(), "native");
    }
}
