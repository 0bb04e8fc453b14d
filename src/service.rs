//! The two request flows: upload-and-translate, and ask.
//!
//! ```text
//! upload: classify ─▶ extract ─▶ save ─▶ truncate ─▶ translate ─▶ RelayStream
//! ask:    list     ─▶ join context ─▶ answer ─────────────────▶ RelayStream
//! ```
//!
//! Both return a [`RelayStream`] in every case, so a caller always receives
//! exactly one terminal chunk. Failures before the model is called (empty
//! upload, unsupported type, extraction error) become a relay that emits a
//! single error chunk. Store failures are logged and otherwise ignored.

use crate::error::DocStreamError;
use crate::extract::Extractor;
use crate::format::DocumentFormat;
use crate::output::PersistedDocument;
use crate::pipeline::input::UploadedFile;
use crate::pipeline::llm::TokenSource;
use crate::prompts::{question_messages, translation_messages};
use crate::store::{newest_first, DocumentStore};
use crate::stream::{RelayStream, UpstreamFuture};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Caller-visible error texts.
pub mod messages {
    pub const NO_FILE: &str = "No file uploaded!";
    pub const UNSUPPORTED: &str = "Unsupported file type!";
    pub const EXTRACTION_FAILED: &str = "Text extraction failed!";
    pub const TRANSLATION_FAILED: &str = "Translation failed!";
    pub const ANSWER_FAILED: &str = "Question answering failed!";
}

/// Reject uploads that can never be extracted, before any backend is
/// touched. Returns the upload's format, or the caller-visible message.
pub fn check_upload(file: &UploadedFile) -> Result<DocumentFormat, &'static str> {
    if file.is_empty() {
        warn!("Rejected upload '{}': no content", file.filename());
        return Err(messages::NO_FILE);
    }

    let format = DocumentFormat::classify(file.content_type());
    if !format.is_supported() {
        warn!(
            "Rejected upload '{}': unsupported content type '{}'",
            file.filename(),
            file.content_type()
        );
        return Err(messages::UNSUPPORTED);
    }
    Ok(format)
}

/// Request handler shared by all requests.
///
/// Owns no per-request state: document context for questions is read from
/// the store on every call.
pub struct DocumentService {
    extractor: Extractor,
    store: Arc<dyn DocumentStore>,
    source: Arc<dyn TokenSource>,
}

impl DocumentService {
    pub fn new(
        extractor: Extractor,
        store: Arc<dyn DocumentStore>,
        source: Arc<dyn TokenSource>,
    ) -> Self {
        Self {
            extractor,
            store,
            source,
        }
    }

    /// Extract `file`, persist the text, and stream its English translation.
    pub async fn upload(&self, file: UploadedFile) -> RelayStream {
        if let Err(message) = check_upload(&file) {
            return RelayStream::failed(message);
        }

        let extraction = match self.extractor.extract(&file).await {
            Ok(result) => result,
            Err(e) => {
                error!(
                    stage = ?e.stage(),
                    page = ?e.page(),
                    "Extraction of '{}' failed: {}",
                    file.filename(),
                    e
                );
                return RelayStream::failed(messages::EXTRACTION_FAILED);
            }
        };

        match self
            .store
            .save(file.filename(), &extraction.text, Utc::now())
            .await
        {
            Ok(doc) => info!("Stored '{}' as document {}", doc.name, doc.id),
            Err(e) => error!("Could not store '{}': {}", file.filename(), e),
        }

        let prompt_text = extraction.truncated(self.extractor.config().max_prompt_chars);
        let upstream = self.source.open(translation_messages(prompt_text));
        self.relay(upstream, messages::TRANSLATION_FAILED)
    }

    /// Stream an answer to `question` using every stored document as context.
    pub async fn ask(&self, question: &str) -> RelayStream {
        let context = match self.store.list().await {
            Ok(docs) => docs
                .iter()
                .map(|d| d.content.as_str())
                .collect::<Vec<_>>()
                .join("\n"),
            Err(e) => {
                error!("Could not read documents for context: {}", e);
                String::new()
            }
        };
        info!(
            "Answering question with {} chars of document context",
            context.chars().count()
        );

        let upstream = self.source.open(question_messages(&context, question));
        self.relay(upstream, messages::ANSWER_FAILED)
    }

    /// All stored documents, most recent first.
    pub async fn documents(&self) -> Result<Vec<PersistedDocument>, DocStreamError> {
        Ok(newest_first(self.store.list().await?))
    }

    fn relay(&self, upstream: UpstreamFuture, error_message: &str) -> RelayStream {
        let timeout = self
            .extractor
            .config()
            .stream_idle_timeout_secs
            .map(Duration::from_secs);
        RelayStream::new(upstream, error_message).with_idle_timeout(timeout)
    }
}
