//! Configuration types for document extraction and streaming.
//!
//! All behaviour is controlled through [`StreamConfig`], built via its
//! [`StreamConfigBuilder`]. One struct carries every knob so a config can be
//! cloned into each request, logged, and compared between runs.

use crate::error::DocStreamError;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Minimum trimmed character count for native PDF text to be trusted.
///
/// Below this, the PDF is assumed to have no real text layer (e.g. a scan)
/// and every page goes through OCR instead.
pub const DEFAULT_NATIVE_TEXT_THRESHOLD: usize = 50;

/// Default model used for translation and question answering.
pub const DEFAULT_MODEL: &str = "gpt-4o";

/// Configuration for extraction and streaming.
///
/// Built via [`StreamConfig::builder()`] or using [`StreamConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_docstream::StreamConfig;
///
/// let config = StreamConfig::builder()
///     .native_text_threshold(80)
///     .ocr_languages(["ara", "tur", "eng"])
///     .concurrency(4)
///     .build()
///     .unwrap();
/// assert_eq!(config.native_text_threshold, 80);
/// ```
#[derive(Clone)]
pub struct StreamConfig {
    /// Fallback threshold in trimmed characters. Default: 50.
    pub native_text_threshold: usize,

    /// Tesseract language identifiers, always recognised jointly. Default: `ara`, `tur`.
    pub ocr_languages: Vec<String>,

    /// Rasterisation density in dots per inch. Range: 72–600. Default: 300.
    pub dpi: u32,

    /// Cap on either rendered page dimension in pixels. Default: 4000.
    ///
    /// Protects against posters and oversized pages that would otherwise
    /// allocate hundreds of megabytes at 300 DPI.
    pub max_rendered_pixels: u32,

    /// Long edge of every normalised image in pixels. Default: 1600.
    pub normalize_long_edge: u32,

    /// Number of pages OCR'd concurrently. Default: 1.
    ///
    /// Output order never depends on this value; pages are always
    /// concatenated in document order.
    pub concurrency: usize,

    /// Tesseract executable. Default: `tesseract`.
    pub tesseract_cmd: String,

    /// Directory containing `*.traineddata` files (`--tessdata-dir`).
    pub tessdata_dir: Option<PathBuf>,

    /// PDF user password for encrypted documents.
    pub pdf_password: Option<String>,

    /// Maximum characters of extracted text sent to the model. Default: 4000.
    pub max_prompt_chars: usize,

    /// LLM model identifier. If None, uses [`DEFAULT_MODEL`].
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature for translation and answers. Default: 0.1.
    ///
    /// Translation should stay faithful to the source text, so the default
    /// keeps the model close to deterministic.
    pub temperature: f32,

    /// Maximum tokens the model may generate per response. Default: 4096.
    pub max_tokens: usize,

    /// Maximum silence between upstream tokens before the stream is failed.
    /// `None` disables the timeout. Default: 60 seconds.
    pub stream_idle_timeout_secs: Option<u64>,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Per-page OCR progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            native_text_threshold: DEFAULT_NATIVE_TEXT_THRESHOLD,
            ocr_languages: vec!["ara".to_string(), "tur".to_string()],
            dpi: 300,
            max_rendered_pixels: 4000,
            normalize_long_edge: 1600,
            concurrency: 1,
            tesseract_cmd: "tesseract".to_string(),
            tessdata_dir: None,
            pdf_password: None,
            max_prompt_chars: 4000,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.1,
            max_tokens: 4096,
            stream_idle_timeout_secs: Some(60),
            download_timeout_secs: 120,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for StreamConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamConfig")
            .field("native_text_threshold", &self.native_text_threshold)
            .field("ocr_languages", &self.ocr_languages)
            .field("dpi", &self.dpi)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("normalize_long_edge", &self.normalize_long_edge)
            .field("concurrency", &self.concurrency)
            .field("tesseract_cmd", &self.tesseract_cmd)
            .field("tessdata_dir", &self.tessdata_dir)
            .field("max_prompt_chars", &self.max_prompt_chars)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("stream_idle_timeout_secs", &self.stream_idle_timeout_secs)
            .field("download_timeout_secs", &self.download_timeout_secs)
            .finish()
    }
}

impl StreamConfig {
    /// Create a new builder for `StreamConfig`.
    pub fn builder() -> StreamConfigBuilder {
        StreamConfigBuilder {
            config: Self::default(),
        }
    }

    /// Tesseract language argument, e.g. `ara+tur`.
    pub fn language_spec(&self) -> String {
        self.ocr_languages.join("+")
    }

    /// Model identifier to request, falling back to [`DEFAULT_MODEL`].
    pub fn model_or_default(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }
}

/// Builder for [`StreamConfig`].
pub struct StreamConfigBuilder {
    config: StreamConfig,
}

impl fmt::Debug for StreamConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl StreamConfigBuilder {
    pub fn native_text_threshold(mut self, chars: usize) -> Self {
        self.config.native_text_threshold = chars;
        self
    }

    pub fn ocr_languages<I, S>(mut self, languages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.ocr_languages = languages.into_iter().map(Into::into).collect();
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 600);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn normalize_long_edge(mut self, px: u32) -> Self {
        self.config.normalize_long_edge = px;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn tesseract_cmd(mut self, cmd: impl Into<String>) -> Self {
        self.config.tesseract_cmd = cmd.into();
        self
    }

    pub fn tessdata_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.tessdata_dir = Some(dir.into());
        self
    }

    pub fn pdf_password(mut self, pwd: impl Into<String>) -> Self {
        self.config.pdf_password = Some(pwd.into());
        self
    }

    pub fn max_prompt_chars(mut self, n: usize) -> Self {
        self.config.max_prompt_chars = n;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn stream_idle_timeout_secs(mut self, secs: Option<u64>) -> Self {
        self.config.stream_idle_timeout_secs = secs;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<StreamConfig, DocStreamError> {
        let c = &self.config;
        if c.ocr_languages.is_empty() || c.ocr_languages.iter().any(|l| l.trim().is_empty()) {
            return Err(DocStreamError::InvalidConfig(
                "At least one non-empty OCR language is required".into(),
            ));
        }
        if c.normalize_long_edge < 100 {
            return Err(DocStreamError::InvalidConfig(format!(
                "Normalised long edge must be ≥ 100 px, got {}",
                c.normalize_long_edge
            )));
        }
        if c.max_prompt_chars == 0 {
            return Err(DocStreamError::InvalidConfig("max_prompt_chars must be ≥ 1".into()));
        }
        if c.max_tokens == 0 {
            return Err(DocStreamError::InvalidConfig("max_tokens must be ≥ 1".into()));
        }
        if c.download_timeout_secs == 0 {
            return Err(DocStreamError::InvalidConfig("Download timeout must be ≥ 1s".into()));
        }
        if c.stream_idle_timeout_secs == Some(0) {
            return Err(DocStreamError::InvalidConfig(
                "Stream idle timeout must be ≥ 1s (use None to disable)".into(),
            ));
        }
        Ok(self.config)
    }
}
