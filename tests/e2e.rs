//! End-to-end tests for edgequake-docstream.
//!
//! These tests use real documents in `./test_cases/`, the pdfium library,
//! the `tesseract` binary with the `ara` and `tur` models, and live LLM API
//! calls. They are gated behind the `E2E_ENABLED` environment variable so
//! they do not run in CI unless explicitly requested.
//!
//! Run with:
//!   E2E_ENABLED=1 PDFIUM_LIB_PATH=/path/to/libpdfium.so cargo test --test e2e -- --nocapture
//!
//! To restrict to a specific test:
//!   E2E_ENABLED=1 cargo test --test e2e test_scanned_pdf -- --nocapture

use edgequake_docstream::{
    resolve_upload, DocumentService, ExtractionMethod, Extractor, MemoryStore,
    NoopProgressCallback, PdfiumBackend, ProviderTokenSource, StreamChunk, StreamConfig,
};
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::Arc;

// ── Test helpers ─────────────────────────────────────────────────────────────

fn test_cases_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("test_cases")
}

/// Skip this test if E2E_ENABLED is not set *or* no file at `path`.
macro_rules! e2e_skip_unless_ready {
    ($path:expr) => {{
        if std::env::var("E2E_ENABLED").is_err() {
            println!("SKIP — set E2E_ENABLED=1 to run e2e tests");
            return;
        }
        let p: PathBuf = $path;
        if !p.exists() {
            println!("SKIP — test file not found: {}", p.display());
            return;
        }
        p
    }};
}

/// Skip unless E2E_ENABLED is set and some LLM key is configured.
macro_rules! e2e_skip_unless_llm {
    () => {{
        if std::env::var("E2E_ENABLED").is_err() {
            println!("SKIP — set E2E_ENABLED=1 to run e2e tests");
            return;
        }
        let has_key = ["OPENAI_API_KEY", "ANTHROPIC_API_KEY", "GEMINI_API_KEY"]
            .iter()
            .any(|k| std::env::var(k).map(|v| !v.is_empty()).unwrap_or(false));
        if !has_key && std::env::var("EDGEQUAKE_LLM_PROVIDER").is_err() {
            println!("SKIP — no LLM provider configured");
            return;
        }
    }};
}

fn assert_terminated_with_done(chunks: &[StreamChunk], context: &str) {
    assert!(!chunks.is_empty(), "[{context}] no chunks");
    assert_eq!(
        chunks.last(),
        Some(&StreamChunk::Done),
        "[{context}] last chunk must be Done, got {:?}",
        chunks.last()
    );
    assert_eq!(
        chunks.iter().filter(|c| c.is_terminal()).count(),
        1,
        "[{context}] exactly one terminal chunk"
    );
    assert!(
        chunks.len() > 1,
        "[{context}] expected at least one data chunk"
    );
}

// ── Extraction with real backends ────────────────────────────────────────────

#[tokio::test]
async fn test_digital_pdf_uses_native_text() {
    let path = e2e_skip_unless_ready!(test_cases_dir().join("digital.pdf"));

    let extractor = Extractor::with_pdfium(StreamConfig::default()).expect("pdfium");
    let upload = resolve_upload(path.to_str().unwrap(), None, extractor.config())
        .await
        .unwrap();
    let result = extractor.extract(&upload).await.expect("extraction");

    println!("native: {} pages, {} chars", result.page_count, result.text.len());
    assert_eq!(result.method, ExtractionMethod::Native);
    assert!(result.text.trim().chars().count() >= 50);
}

#[tokio::test]
async fn test_scanned_pdf_falls_back_to_ocr() {
    let path = e2e_skip_unless_ready!(test_cases_dir().join("scanned.pdf"));

    let config = StreamConfig::builder().concurrency(2).build().unwrap();
    let extractor = Extractor::with_pdfium(config).expect("pdfium");
    let upload = resolve_upload(path.to_str().unwrap(), None, extractor.config())
        .await
        .unwrap();
    let result = extractor.extract(&upload).await.expect("extraction");

    println!("ocr: {} pages\n{}", result.page_count, result.text);
    assert_eq!(result.method, ExtractionMethod::Ocr);
    assert!(result.page_count >= 1);
    assert!(!result.text.trim().is_empty());
}

#[tokio::test]
async fn test_photo_is_recognised() {
    let path = e2e_skip_unless_ready!(test_cases_dir().join("page.png"));

    let extractor = Extractor::with_pdfium(StreamConfig::default()).expect("pdfium");
    let upload = resolve_upload(path.to_str().unwrap(), None, extractor.config())
        .await
        .unwrap();
    let result = extractor.extract(&upload).await.expect("extraction");

    assert_eq!(result.method, ExtractionMethod::Ocr);
    assert_eq!(result.page_count, 1);
    assert!(!result.text.trim().is_empty());
}

// ── Live streaming ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_translate_plain_text_live() {
    e2e_skip_unless_llm!();

    let config = StreamConfig::default();
    let source = Arc::new(ProviderTokenSource::from_config(&config).expect("provider"));
    let extractor = Extractor::from_backend(config, PdfiumBackend::default());
    let store = Arc::new(MemoryStore::new());
    let service = DocumentService::new(extractor, store.clone(), source);

    let upload = edgequake_docstream::UploadedFile::new(
        "Merhaba, nasılsınız? Bugün hava çok güzel.".into(),
        "text/plain",
        "greeting.txt",
    );
    let chunks: Vec<StreamChunk> = service.upload(upload).await.collect().await;

    assert_terminated_with_done(&chunks, "translate");
    let translated: String = chunks
        .iter()
        .filter_map(|c| match c {
            StreamChunk::Data(t) => Some(t.as_str()),
            _ => None,
        })
        .collect();
    println!("translation: {translated}");
    let lower = translated.to_lowercase();
    assert!(lower.contains("hello") || lower.contains("weather"));
}

#[tokio::test]
async fn test_ask_after_upload_live() {
    e2e_skip_unless_llm!();

    let config = StreamConfig::default();
    let source = Arc::new(ProviderTokenSource::from_config(&config).expect("provider"));
    let extractor = Extractor::from_backend(config, PdfiumBackend::default());
    let service = DocumentService::new(extractor, Arc::new(MemoryStore::new()), source);

    let upload = edgequake_docstream::UploadedFile::new(
        "Fatura toplamı 1250 TL'dir.".into(),
        "text/plain",
        "invoice.txt",
    );
    let _: Vec<StreamChunk> = service.upload(upload).await.collect().await;

    let chunks: Vec<StreamChunk> = service.ask("What is the invoice total?").await.collect().await;
    assert_terminated_with_done(&chunks, "ask");
}

// ── Compile-time guarantees ──────────────────────────────────────────────────

#[test]
fn test_noop_callback_is_send_sync() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<NoopProgressCallback>();
}
