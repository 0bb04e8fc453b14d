//! Document persistence.
//!
//! The service saves every successfully extracted document and lists them
//! all to build question-answering context. Stores only need append and
//! read-all; documents are never updated or deleted.
//!
//! * [`MemoryStore`] keeps documents for the lifetime of the process.
//! * [`JsonlStore`] appends one JSON object per line to a file, so separate
//!   CLI runs see each other's uploads. A line that cannot be parsed (for
//!   example one cut short by a crash) is skipped with a warning; it never
//!   hides the documents around it.

use crate::error::DocStreamError;
use crate::output::PersistedDocument;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Append/read-all persistence for extracted documents.
///
/// Implementations are shared between concurrent requests and must make a
/// saved document visible to every later `list`.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Persist a new document and return it with its assigned id.
    async fn save(
        &self,
        name: &str,
        content: &str,
        uploaded_at: DateTime<Utc>,
    ) -> Result<PersistedDocument, DocStreamError>;

    /// Every stored document, in the order it was saved.
    async fn list(&self) -> Result<Vec<PersistedDocument>, DocStreamError>;
}

/// Sort documents for display: most recent upload first.
///
/// Ties keep their relative order.
pub fn newest_first(mut docs: Vec<PersistedDocument>) -> Vec<PersistedDocument> {
    docs.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
    docs
}

// ── In-memory ────────────────────────────────────────────────────────────

/// Process-local store. Ids start at 1.
#[derive(Debug, Default)]
pub struct MemoryStore {
    docs: RwLock<Vec<PersistedDocument>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn save(
        &self,
        name: &str,
        content: &str,
        uploaded_at: DateTime<Utc>,
    ) -> Result<PersistedDocument, DocStreamError> {
        let mut docs = self.docs.write().await;
        let doc = PersistedDocument {
            id: docs.len() as u64 + 1,
            name: name.to_string(),
            content: content.to_string(),
            uploaded_at,
        };
        docs.push(doc.clone());
        Ok(doc)
    }

    async fn list(&self) -> Result<Vec<PersistedDocument>, DocStreamError> {
        Ok(self.docs.read().await.clone())
    }
}

// ── JSON lines ───────────────────────────────────────────────────────────

/// File-backed store: one serialised [`PersistedDocument`] per line.
///
/// An internal read/write lock, which also tracks the next id, keeps a
/// `list` from reading a line that a concurrent `save` is still writing.
#[derive(Debug)]
pub struct JsonlStore {
    path: PathBuf,
    next_id: RwLock<u64>,
}

impl JsonlStore {
    /// Open (or lazily create) the store at `path`.
    ///
    /// Existing documents are read once to continue the id sequence.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, DocStreamError> {
        let path = path.into();
        let existing = read_documents(&path).await?;
        let next_id = existing.iter().map(|d| d.id).max().unwrap_or(0) + 1;
        debug!(
            "Opened document store {} ({} documents)",
            path.display(),
            existing.len()
        );
        Ok(Self {
            path,
            next_id: RwLock::new(next_id),
        })
    }
}

#[async_trait]
impl DocumentStore for JsonlStore {
    async fn save(
        &self,
        name: &str,
        content: &str,
        uploaded_at: DateTime<Utc>,
    ) -> Result<PersistedDocument, DocStreamError> {
        let mut next_id = self.next_id.write().await;
        let doc = PersistedDocument {
            id: *next_id,
            name: name.to_string(),
            content: content.to_string(),
            uploaded_at,
        };

        let mut line = serde_json::to_string(&doc).map_err(|e| store_error(&self.path, e))?;
        line.push('\n');

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| store_error(&self.path, e))?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| store_error(&self.path, e))?;
        if !ends_with_newline(&mut file)
            .await
            .map_err(|e| store_error(&self.path, e))?
        {
            // Terminate a partial last line so the new document starts on
            // its own line.
            warn!("{} ends mid-line; starting a new line", self.path.display());
            line.insert(0, '\n');
        }
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| store_error(&self.path, e))?;
        file.flush().await.map_err(|e| store_error(&self.path, e))?;

        *next_id += 1;
        debug!("Saved document {} ('{}')", doc.id, doc.name);
        Ok(doc)
    }

    async fn list(&self) -> Result<Vec<PersistedDocument>, DocStreamError> {
        let _writer = self.next_id.read().await;
        read_documents(&self.path).await
    }
}

/// `true` when the file is empty or its last byte is `\n`.
async fn ends_with_newline(file: &mut tokio::fs::File) -> std::io::Result<bool> {
    let len = file.metadata().await?.len();
    if len == 0 {
        return Ok(true);
    }
    file.seek(std::io::SeekFrom::Start(len - 1)).await?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last).await?;
    Ok(last[0] == b'\n')
}

async fn read_documents(path: &Path) -> Result<Vec<PersistedDocument>, DocStreamError> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(store_error(path, e)),
    };

    let mut docs = Vec::new();
    for (line_num, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<PersistedDocument>(line) {
            Ok(doc) => docs.push(doc),
            Err(e) => warn!(
                "Skipping unreadable document at {} line {}: {}",
                path.display(),
                line_num + 1,
                e
            ),
        }
    }
    Ok(docs)
}

fn store_error(path: &Path, e: impl std::fmt::Display) -> DocStreamError {
    DocStreamError::StoreUnavailable {
        detail: format!("{}: {}", path.display(), e),
    }
}
