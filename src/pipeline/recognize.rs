//! Character recognition over a normalised page image.
//!
//! The production engine shells out to the `tesseract` CLI:
//!
//! ```text
//! tesseract <image> stdout -l ara+tur [--tessdata-dir <dir>]
//! ```
//!
//! Running it as a child process keeps a native dependency out of the
//! build and lets several pages recognise in parallel without sharing
//! engine state.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::debug;

/// Recognises the text in a single image.
#[async_trait]
pub trait Recognizer: Send + Sync {
    /// Recognise `image` using the given language models, in priority order.
    ///
    /// Returns a human-readable failure reason on error.
    async fn recognize(&self, image: &Path, languages: &[String]) -> Result<String, String>;
}

/// [`Recognizer`] backed by the tesseract command-line tool.
#[derive(Debug, Clone)]
pub struct TesseractEngine {
    cmd: String,
    tessdata_dir: Option<PathBuf>,
}

impl TesseractEngine {
    pub fn new(cmd: impl Into<String>, tessdata_dir: Option<PathBuf>) -> Self {
        Self {
            cmd: cmd.into(),
            tessdata_dir,
        }
    }

    fn command(&self, image: &Path, languages: &[String]) -> Command {
        let mut command = Command::new(&self.cmd);
        command
            .arg(image)
            .arg("stdout")
            .arg("-l")
            .arg(languages.join("+"));
        if let Some(ref dir) = self.tessdata_dir {
            command.arg("--tessdata-dir").arg(dir);
        }
        command.kill_on_drop(true);
        command
    }
}

#[async_trait]
impl Recognizer for TesseractEngine {
    async fn recognize(&self, image: &Path, languages: &[String]) -> Result<String, String> {
        let output = self
            .command(image, languages)
            .output()
            .await
            .map_err(|e| format!("could not run '{}': {}", self.cmd, e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!(
                "'{}' exited with {}: {}",
                self.cmd,
                output.status,
                stderr.trim()
            ));
        }

        let text = clean_output(&String::from_utf8_lossy(&output.stdout));
        debug!(
            "Recognised {} chars from {}",
            text.chars().count(),
            image.display()
        );
        Ok(text)
    }
}

/// Drop the page-break form feed tesseract appends and trailing blank lines.
fn clean_output(raw: &str) -> String {
    raw.replace('\x0c', "").trim_end().to_string()
}
