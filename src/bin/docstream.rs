//! CLI binary for edgequake-docstream.
//!
//! A thin shim over the library crate: maps flags to `StreamConfig`, runs
//! one request, and writes the resulting frames to stdout. Logs and
//! progress go to stderr so stdout carries only the frame protocol.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use edgequake_docstream::service::{check_upload, messages};
use edgequake_docstream::{
    resolve_upload, store::newest_first, write_frames, DocumentFormat, DocumentService,
    DocumentStore, Extractor, ExtractionProgressCallback, JsonlStore, MemoryStore, PdfiumBackend,
    ProgressCallback, ProviderTokenSource, RelayOutcome, RelayStream, StreamChunk, StreamConfig,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── OCR progress bar ─────────────────────────────────────────────────────────

/// Renders OCR page progress on stderr. Pages may finish out of order when
/// `--concurrency` is above 1.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::hidden();
        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
        })
    }

    fn elapsed_secs(&self, page_num: usize) -> f64 {
        self.start_times
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&page_num)
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl ExtractionProgressCallback for CliProgressCallback {
    fn on_extraction_start(&self, total_pages: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}/{len} pages  ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ");

        self.bar.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        self.bar.set_length(total_pages as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("OCR");
        self.bar.enable_steady_tick(Duration::from_millis(80));
    }

    fn on_page_start(&self, page_num: usize, _total_pages: usize) {
        self.start_times
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(page_num, Instant::now());
        self.bar.set_message(format!("page {page_num}"));
    }

    fn on_page_complete(&self, page_num: usize, total_pages: usize, text_len: usize) {
        let secs = self.elapsed_secs(page_num);
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {:<8}  {}",
            green("✓"),
            page_num,
            total_pages,
            dim(&format!("{text_len:>5} chars")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, page_num: usize, total_pages: usize, error: &str) {
        let secs = self.elapsed_secs(page_num);
        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}  {}",
            red("✗"),
            page_num,
            total_pages,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.finish_and_clear();
    }

    fn on_extraction_complete(&self, total_pages: usize) {
        self.bar.finish_and_clear();
        eprintln!(
            "{} {} pages recognised",
            green("✔"),
            bold(&total_pages.to_string())
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract a scanned PDF and stream its English translation
  docstream upload scan.pdf

  # Photo of a page, served over HTTP
  docstream upload https://example.org/page.jpg

  # Force the content type when the extension is misleading
  docstream upload blob.bin --content-type image/png

  # Ask about everything uploaded so far
  docstream ask "What is the invoice total?"

  # List stored documents, newest first
  docstream list --json

OUTPUT:
  stdout carries frames only:
    data: <fragment>        (zero or more, blank line after each)
    data: [DONE]            (success)
    data: [ERROR] <message> (failure, replaces [DONE])

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Path to libpdfium
  DOCSTREAM_STORE         Document store file
"#;

/// Extract documents and stream LLM translations and answers as frames.
#[derive(Parser, Debug)]
#[command(
    name = "docstream",
    version,
    about = "Extract text from documents (with OCR fallback) and stream LLM translations as frames",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// JSON-lines file holding extracted documents.
    #[arg(
        long,
        global = true,
        env = "DOCSTREAM_STORE",
        default_value = "docstream-documents.jsonl"
    )]
    store: PathBuf,

    /// LLM model ID.
    #[arg(long, global = true, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, global = true, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Minimum trimmed characters of native PDF text before OCR is skipped.
    #[arg(long, global = true, env = "DOCSTREAM_NATIVE_THRESHOLD", default_value_t = 50)]
    native_threshold: usize,

    /// OCR languages, used jointly (comma-separated tesseract codes).
    #[arg(
        long,
        global = true,
        env = "DOCSTREAM_LANGUAGES",
        value_delimiter = ',',
        default_value = "ara,tur"
    )]
    languages: Vec<String>,

    /// Rasterisation DPI (72–600).
    #[arg(long, global = true, env = "DOCSTREAM_DPI", default_value_t = 300,
          value_parser = clap::value_parser!(u32).range(72..=600))]
    dpi: u32,

    /// Pages OCR'd at once.
    #[arg(short, long, global = true, env = "DOCSTREAM_CONCURRENCY", default_value_t = 1)]
    concurrency: usize,

    /// tesseract executable.
    #[arg(long, global = true, env = "DOCSTREAM_TESSERACT", default_value = "tesseract")]
    tesseract: String,

    /// Directory containing tesseract language models.
    #[arg(long, global = true, env = "TESSDATA_PREFIX")]
    tessdata_dir: Option<PathBuf>,

    /// PDF user password for encrypted documents.
    #[arg(long, global = true, env = "DOCSTREAM_PASSWORD")]
    password: Option<String>,

    /// Characters of extracted text sent for translation.
    #[arg(long, global = true, env = "DOCSTREAM_MAX_PROMPT_CHARS", default_value_t = 4000)]
    max_prompt_chars: usize,

    /// Max LLM output tokens per response.
    #[arg(long, global = true, env = "DOCSTREAM_MAX_TOKENS", default_value_t = 4096)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, global = true, env = "DOCSTREAM_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Seconds without an upstream token before the stream fails (0 disables).
    #[arg(long, global = true, env = "DOCSTREAM_IDLE_TIMEOUT", default_value_t = 60)]
    idle_timeout: u64,

    /// HTTP download timeout in seconds.
    #[arg(long, global = true, env = "DOCSTREAM_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Disable the OCR progress bar.
    #[arg(long, global = true, env = "DOCSTREAM_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "DOCSTREAM_VERBOSE")]
    verbose: bool,

    /// Suppress all logs except errors.
    #[arg(short, long, global = true, env = "DOCSTREAM_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract a local file or URL, store it, and stream its translation.
    Upload {
        /// Local file path or HTTP/HTTPS URL.
        input: String,

        /// Declared content type (default: from extension or HTTP header).
        #[arg(long)]
        content_type: Option<String>,
    },
    /// Stream an answer using every stored document as context.
    Ask {
        /// The question.
        question: String,
    },
    /// List stored documents, newest first.
    List {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let progress: Option<ProgressCallback> = if cli.quiet || cli.no_progress {
        None
    } else {
        Some(CliProgressCallback::new() as Arc<dyn ExtractionProgressCallback>)
    };
    let config = build_config(&cli, progress)?;

    match &cli.command {
        Command::List { json } => {
            let store = JsonlStore::open(&cli.store)
                .await
                .with_context(|| format!("Failed to open document store {:?}", cli.store))?;
            let docs = newest_first(store.list().await.context("Failed to list documents")?);
            if *json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&docs).context("Failed to serialise documents")?
                );
            } else {
                for doc in &docs {
                    println!(
                        "{:>4}  {}  {:<32}  {} chars",
                        doc.id,
                        doc.uploaded_at.format("%Y-%m-%d %H:%M:%S"),
                        doc.name,
                        doc.content.chars().count()
                    );
                }
            }
            Ok(())
        }
        Command::Upload {
            input,
            content_type,
        } => {
            let file = match resolve_upload(input, content_type.as_deref(), &config).await {
                Ok(file) => file,
                Err(e) => {
                    tracing::error!("Failed to read '{}': {}", input, e);
                    return emit(RelayStream::failed(messages::NO_FILE)).await;
                }
            };

            // Rejections need neither pdfium nor a provider.
            let format = match check_upload(&file) {
                Ok(format) => format,
                Err(message) => return emit(RelayStream::failed(message)).await,
            };

            // Only PDFs need pdfium; bind eagerly so a missing library is
            // logged with setup hints.
            let backend = if format == DocumentFormat::Pdf {
                match PdfiumBackend::new(None) {
                    Ok(backend) => backend,
                    Err(e) => {
                        tracing::error!("PDF support unavailable: {}", e);
                        return emit(RelayStream::failed(messages::EXTRACTION_FAILED)).await;
                    }
                }
            } else {
                PdfiumBackend::default()
            };
            let source = match ProviderTokenSource::from_config(&config) {
                Ok(source) => source,
                Err(e) => {
                    tracing::error!("Failed to initialise LLM provider: {}", e);
                    return emit(RelayStream::failed(messages::TRANSLATION_FAILED)).await;
                }
            };
            let service = DocumentService::new(
                Extractor::from_backend(config, backend),
                open_store(&cli.store).await,
                Arc::new(source),
            );
            emit(service.upload(file).await).await
        }
        Command::Ask { question } => {
            let source = match ProviderTokenSource::from_config(&config) {
                Ok(source) => source,
                Err(e) => {
                    tracing::error!("Failed to initialise LLM provider: {}", e);
                    return emit(RelayStream::failed(messages::ANSWER_FAILED)).await;
                }
            };
            let service = DocumentService::new(
                Extractor::from_backend(config, PdfiumBackend::default()),
                open_store(&cli.store).await,
                Arc::new(source),
            );
            emit(service.ask(question).await).await
        }
    }
}

/// Open the JSON-lines store, or fall back to an empty in-memory store so
/// the request still streams. The failure is logged.
async fn open_store(path: &Path) -> Arc<dyn DocumentStore> {
    match JsonlStore::open(path).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            tracing::error!(
                "Failed to open document store {}: {}; documents from this run will not be kept",
                path.display(),
                e
            );
            Arc::new(MemoryStore::new())
        }
    }
}

/// Write `relay` to stdout until it terminates or Ctrl-C is pressed.
async fn emit(relay: RelayStream) -> Result<()> {
    let mut stdout = tokio::io::stdout();
    let outcome = tokio::select! {
        outcome = write_frames(relay, &mut stdout) => Some(outcome),
        _ = tokio::signal::ctrl_c() => None,
    };

    match outcome {
        Some(RelayOutcome::Completed { data_chunks }) => {
            tracing::debug!("Stream completed with {} data chunks", data_chunks);
            Ok(())
        }
        Some(RelayOutcome::Failed { data_chunks }) => {
            anyhow::bail!("Stream ended with an error after {} data chunks", data_chunks)
        }
        Some(RelayOutcome::Cancelled { .. }) => Ok(()),
        None => {
            let frame = StreamChunk::Error("Cancelled".to_string()).encode();
            stdout.write_all(frame.as_bytes()).await.ok();
            stdout.flush().await.ok();
            anyhow::bail!("Interrupted")
        }
    }
}

/// Map CLI args to `StreamConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<StreamConfig> {
    let idle_timeout = (cli.idle_timeout > 0).then_some(cli.idle_timeout);

    let mut builder = StreamConfig::builder()
        .native_text_threshold(cli.native_threshold)
        .ocr_languages(cli.languages.iter().map(|l| l.trim().to_string()))
        .dpi(cli.dpi)
        .concurrency(cli.concurrency)
        .tesseract_cmd(cli.tesseract.clone())
        .max_prompt_chars(cli.max_prompt_chars)
        .max_tokens(cli.max_tokens)
        .temperature(cli.temperature)
        .stream_idle_timeout_secs(idle_timeout)
        .download_timeout_secs(cli.download_timeout);

    if let Some(ref dir) = cli.tessdata_dir {
        builder = builder.tessdata_dir(dir.clone());
    }
    if let Some(ref pwd) = cli.password {
        builder = builder.pdf_password(pwd.clone());
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
