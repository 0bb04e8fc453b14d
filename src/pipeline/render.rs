//! PDF rasterisation: render every page to a PNG artefact via pdfium.
//!
//! Runs inside `spawn_blocking` (pdfium is CPU-bound and not async-safe).
//! Pages are written as `page-0001.png`, `page-0002.png`, … into a scratch
//! directory owned by the caller, which deletes it when extraction ends.
//!
//! ## Why cap pixels as well as DPI?
//!
//! 300 DPI is what the recogniser wants for body text, but an A0 poster at
//! 300 DPI is ~10 000 × 14 000 px. `max_rendered_pixels` caps the longest
//! edge regardless of physical size.

use crate::error::{DocStreamError, ExtractionError};
use image::ImageFormat;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Rendering parameters for one document.
#[derive(Debug, Clone)]
pub struct RasterOptions {
    pub dpi: u32,
    pub max_rendered_pixels: u32,
    pub password: Option<String>,
}

/// One rendered page on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterPage {
    /// 0-based page index.
    pub index: usize,
    pub path: PathBuf,
}

/// Converts every page of a PDF into a raster image.
pub trait Rasterizer: Send + Sync {
    /// Render all pages in document order into `out_dir`.
    ///
    /// Blocking; call from `spawn_blocking`.
    fn rasterize(
        &self,
        pdf: &[u8],
        options: &RasterOptions,
        out_dir: &Path,
    ) -> Result<Vec<RasterPage>, ExtractionError>;
}

/// Locates the pdfium shared library and binds to it on demand.
///
/// Resolution order: explicit path, `PDFIUM_LIB_PATH`, the working
/// directory, then the system loader path.
#[derive(Debug, Clone, Default)]
pub struct PdfiumBackend {
    library_path: Option<PathBuf>,
}

impl PdfiumBackend {
    /// Bind once to verify pdfium is loadable, so a missing library is a
    /// startup error instead of a per-request extraction failure.
    pub fn new(library_path: Option<PathBuf>) -> Result<Self, DocStreamError> {
        let backend = Self { library_path };
        backend.bind().map_err(DocStreamError::PdfiumBindingFailed)?;
        Ok(backend)
    }

    pub(crate) fn bind(&self) -> Result<Pdfium, String> {
        let explicit = self
            .library_path
            .clone()
            .or_else(|| std::env::var_os("PDFIUM_LIB_PATH").map(PathBuf::from));

        let bindings = match explicit {
            Some(path) => Pdfium::bind_to_library(&path)
                .map_err(|e| format!("{}: {:?}", path.display(), e))?,
            None => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
                .or_else(|_| Pdfium::bind_to_system_library())
                .map_err(|e| format!("{:?}", e))?,
        };
        Ok(Pdfium::new(bindings))
    }
}

impl Rasterizer for PdfiumBackend {
    fn rasterize(
        &self,
        pdf: &[u8],
        options: &RasterOptions,
        out_dir: &Path,
    ) -> Result<Vec<RasterPage>, ExtractionError> {
        let pdfium = self
            .bind()
            .map_err(|detail| ExtractionError::RasterDocumentFailed { detail })?;

        let document = pdfium
            .load_pdf_from_byte_slice(pdf, options.password.as_deref())
            .map_err(|e| ExtractionError::RasterDocumentFailed {
                detail: format!("could not open document: {:?}", e),
            })?;

        let pages = document.pages();
        let total_pages = pages.len() as usize;
        info!("Rasterising {} pages at {} DPI", total_pages, options.dpi);

        let render_config = PdfRenderConfig::new()
            .scale_page_by_factor(options.dpi as f32 / 72.0)
            .set_maximum_width(options.max_rendered_pixels as i32)
            .set_maximum_height(options.max_rendered_pixels as i32);

        let mut results = Vec::with_capacity(total_pages);
        for (index, page) in pages.iter().enumerate() {
            let bitmap = page.render_with_config(&render_config).map_err(|e| {
                ExtractionError::RasterisationFailed {
                    page: index,
                    detail: format!("{:?}", e),
                }
            })?;

            let image = bitmap.as_image();
            let path = out_dir.join(format!("page-{:04}.png", index + 1));
            image
                .save_with_format(&path, ImageFormat::Png)
                .map_err(|e| ExtractionError::RasterisationFailed {
                    page: index,
                    detail: format!("could not write {}: {}", path.display(), e),
                })?;

            debug!(
                "Rendered page {} → {}x{} px",
                index + 1,
                image.width(),
                image.height()
            );
            results.push(RasterPage { index, path });
        }

        Ok(results)
    }
}
