//! Upload construction: turn bytes, a local path, or a URL into an
//! [`UploadedFile`].
//!
//! The declared content type is what the classifier trusts. For local files
//! it comes from the extension, for URLs from the `Content-Type` response
//! header; callers can always override it.

use crate::config::StreamConfig;
use crate::error::DocStreamError;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// An uploaded document: immutable once received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    bytes: Vec<u8>,
    content_type: String,
    filename: String,
}

impl UploadedFile {
    pub fn new(
        bytes: Vec<u8>,
        content_type: impl Into<String>,
        filename: impl Into<String>,
    ) -> Self {
        Self {
            bytes,
            content_type: content_type.into(),
            filename: filename.into(),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Check if the input string names a URL scheme we cannot fetch
/// (`ftp://`, `s3://`, `file://`, ...).
fn has_foreign_scheme(input: &str) -> bool {
    match input.split_once("://") {
        Some((scheme, _)) => {
            !scheme.is_empty()
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        None => false,
    }
}

/// Read `input` (local path or HTTP/HTTPS URL) into an [`UploadedFile`].
///
/// `content_type` overrides whatever type would otherwise be inferred.
/// Downloads are bounded by `config.download_timeout_secs`.
pub async fn resolve_upload(
    input: &str,
    content_type: Option<&str>,
    config: &StreamConfig,
) -> Result<UploadedFile, DocStreamError> {
    let mut upload = if is_url(input) {
        download_url(input, config.download_timeout_secs).await?
    } else if input.trim().is_empty() || has_foreign_scheme(input) {
        return Err(DocStreamError::InvalidInput {
            input: input.to_string(),
        });
    } else {
        read_local(input).await?
    };
    if let Some(ct) = content_type {
        upload.content_type = ct.to_string();
    }
    debug!(
        "Resolved upload '{}' ({}, {} bytes)",
        upload.filename,
        upload.content_type,
        upload.bytes.len()
    );
    Ok(upload)
}

/// Guess a MIME type from a file extension.
///
/// Unknown extensions map to `application/octet-stream`, which the
/// classifier rejects.
pub fn content_type_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "txt" | "text" => "text/plain",
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        _ => "application/octet-stream",
    }
}

async fn read_local(path_str: &str) -> Result<UploadedFile, DocStreamError> {
    let path = PathBuf::from(path_str);
    let bytes = match tokio::fs::read(&path).await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(DocStreamError::PermissionDenied { path });
        }
        Err(_) => return Err(DocStreamError::FileNotFound { path }),
    };

    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path_str.to_string());

    Ok(UploadedFile::new(bytes, content_type_for_path(&path), filename))
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<UploadedFile, DocStreamError> {
    info!("Downloading upload from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| DocStreamError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            DocStreamError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            DocStreamError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(DocStreamError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let filename = filename_from_url(url);
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| content_type_for_path(Path::new(&filename)).to_string());

    let bytes = response
        .bytes()
        .await
        .map_err(|e| DocStreamError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    info!("Downloaded {} bytes ({})", bytes.len(), content_type);
    Ok(UploadedFile::new(bytes.to_vec(), content_type, filename))
}

/// Last non-empty path segment of the URL, or `download`.
fn filename_from_url(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() {
                    return last.to_string();
                }
            }
        }
    }
    "download".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> StreamConfig {
        StreamConfig::builder().download_timeout_secs(5).build().unwrap()
    }

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/doc.pdf"));
        assert!(is_url("http://example.com/doc.pdf"));
        assert!(!is_url("/tmp/doc.pdf"));
        assert!(!is_url("doc.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn foreign_schemes_are_detected() {
        assert!(has_foreign_scheme("ftp://example.com/doc.pdf"));
        assert!(has_foreign_scheme("file:///tmp/doc.pdf"));
        assert!(!has_foreign_scheme("/tmp/doc.pdf"));
        assert!(!has_foreign_scheme("notes/a://b.txt"));
    }

    #[test]
    fn content_type_from_extension() {
        assert_eq!(content_type_for_path(Path::new("a.PDF")), "application/pdf");
        assert_eq!(content_type_for_path(Path::new("scan.jpeg")), "image/jpeg");
        assert_eq!(content_type_for_path(Path::new("notes.txt")), "text/plain");
        assert_eq!(
            content_type_for_path(Path::new("archive.zip")),
            "application/octet-stream"
        );
        assert_eq!(content_type_for_path(Path::new("README")), "application/octet-stream");
    }

    #[test]
    fn filename_from_url_uses_last_segment() {
        assert_eq!(filename_from_url("https://x.org/files/scan.png"), "scan.png");
        assert_eq!(filename_from_url("https://x.org/"), "download");
    }

    #[tokio::test]
    async fn local_file_is_read_with_inferred_type() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("letter.txt");
        std::fs::write(&path, "Merhaba").unwrap();

        let upload = resolve_upload(path.to_str().unwrap(), None, &config()).await.unwrap();
        assert_eq!(upload.bytes(), b"Merhaba");
        assert_eq!(upload.content_type(), "text/plain");
        assert_eq!(upload.filename(), "letter.txt");
    }

    #[tokio::test]
    async fn explicit_content_type_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob.bin");
        std::fs::write(&path, "x").unwrap();

        let upload = resolve_upload(path.to_str().unwrap(), Some("image/png"), &config())
            .await
            .unwrap();
        assert_eq!(upload.content_type(), "image/png");
    }

    #[tokio::test]
    async fn missing_file_is_reported() {
        let err = resolve_upload("/definitely/not/here.pdf", None, &config())
            .await
            .unwrap_err();
        assert!(matches!(err, DocStreamError::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn unfetchable_inputs_are_invalid() {
        for input in ["ftp://example.com/scan.pdf", "", "   "] {
            let err = resolve_upload(input, None, &config()).await.unwrap_err();
            assert!(
                matches!(err, DocStreamError::InvalidInput { .. }),
                "{input:?} gave {err:?}"
            );
        }
    }
}
