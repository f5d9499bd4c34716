//! Document engine used by the thumbnail pipeline.
//!
//! A [`PdfEngine`] opens a document, reports its page geometry and rasterizes
//! a page into an RGBA bitmap. Documents are addressed through opaque
//! [`DocumentHandle`]s and must be closed again; [`ScopedDocument`] ties the
//! close to a guard so callers cannot leak a handle on an error path.
//!
//! The default backend ([`LopdfEngine`]) is pure Rust. Real page content is
//! rendered by the `pdfium` backend, available behind the feature of the same
//! name.

mod lopdf_backend;
#[cfg(feature = "pdfium")]
mod pdfium_backend;

#[cfg(any(test, feature = "test-fixtures"))]
pub mod fixtures;

use image::{ImageBuffer, Rgba};
use std::path::{Path, PathBuf};

pub use lopdf_backend::LopdfEngine;
#[cfg(feature = "pdfium")]
pub use pdfium_backend::PdfiumEngine;

pub type RgbaImage = ImageBuffer<Rgba<u8>, Vec<u8>>;

/// US Letter, used when a page carries no usable `MediaBox`.
pub const DEFAULT_PAGE_SIZE: PageSize = PageSize { width_pt: 612.0, height_pt: 792.0 };

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DocumentHandle(u64);

impl DocumentHandle {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Page size in points (1/72 inch).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSize {
    pub width_pt: f32,
    pub height_pt: f32,
}

impl PageSize {
    pub fn new(width_pt: f32, height_pt: f32) -> Self {
        Self { width_pt, height_pt }
    }

    /// Size after applying a page `/Rotate` value (multiples of 90 degrees).
    pub fn rotated(self, degrees: i64) -> Self {
        if degrees.rem_euclid(180) == 90 {
            Self { width_pt: self.height_pt, height_pt: self.width_pt }
        } else {
            self
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderRequest {
    pub page_index: u32,
    pub scale: f32,
}

impl Default for RenderRequest {
    fn default() -> Self {
        Self { page_index: 0, scale: 1.0 }
    }
}

impl RenderRequest {
    /// Output bitmap size for a page of the given size.
    pub fn output_size(&self, page: PageSize) -> (u32, u32) {
        let scale = if self.scale > 0.0 && self.scale.is_finite() { self.scale } else { 1.0 };
        let width = (page.width_pt * scale).round().max(1.0) as u32;
        let height = (page.height_pt * scale).round().max(1.0) as u32;
        (width, height)
    }
}

#[derive(Debug, Clone)]
pub enum OpenSource {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

impl From<PathBuf> for OpenSource {
    fn from(value: PathBuf) -> Self {
        Self::Path(value)
    }
}

impl From<&Path> for OpenSource {
    fn from(value: &Path) -> Self {
        Self::Path(value.to_path_buf())
    }
}

impl From<Vec<u8>> for OpenSource {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

impl OpenSource {
    pub(crate) fn into_bytes(self) -> Result<Vec<u8>, PdfEngineError> {
        match self {
            OpenSource::Path(path) => Ok(std::fs::read(path)?),
            OpenSource::Bytes(bytes) => Ok(bytes),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PdfEngineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("PDF parse error: {0}")]
    Parse(#[from] lopdf::Error),
    #[error("invalid handle {0}")]
    InvalidHandle(u64),
    #[error("page {page} out of range (page_count={page_count})")]
    PageOutOfRange { page: u32, page_count: u32 },
    #[error("encrypted PDFs are not supported in the default backend")]
    EncryptedUnsupported,
    #[error("document has no pages")]
    NoPages,
    #[error("backend error: {0}")]
    Backend(String),
}

pub trait PdfEngine: Send {
    fn open(&mut self, source: OpenSource) -> Result<DocumentHandle, PdfEngineError>;
    fn page_count(&self, handle: DocumentHandle) -> Result<u32, PdfEngineError>;
    fn page_size(
        &self,
        handle: DocumentHandle,
        page_index: u32,
    ) -> Result<PageSize, PdfEngineError>;
    fn render_page(
        &self,
        handle: DocumentHandle,
        request: RenderRequest,
    ) -> Result<RgbaImage, PdfEngineError>;
    fn close(&mut self, handle: DocumentHandle) -> Result<(), PdfEngineError>;
}

impl<E: PdfEngine + ?Sized> PdfEngine for Box<E> {
    fn open(&mut self, source: OpenSource) -> Result<DocumentHandle, PdfEngineError> {
        (**self).open(source)
    }

    fn page_count(&self, handle: DocumentHandle) -> Result<u32, PdfEngineError> {
        (**self).page_count(handle)
    }

    fn page_size(
        &self,
        handle: DocumentHandle,
        page_index: u32,
    ) -> Result<PageSize, PdfEngineError> {
        (**self).page_size(handle, page_index)
    }

    fn render_page(
        &self,
        handle: DocumentHandle,
        request: RenderRequest,
    ) -> Result<RgbaImage, PdfEngineError> {
        (**self).render_page(handle, request)
    }

    fn close(&mut self, handle: DocumentHandle) -> Result<(), PdfEngineError> {
        (**self).close(handle)
    }
}

/// An open document that is closed when the guard is dropped.
pub struct ScopedDocument<'e, E: PdfEngine + ?Sized> {
    engine: &'e mut E,
    handle: DocumentHandle,
}

impl<'e, E: PdfEngine + ?Sized> ScopedDocument<'e, E> {
    pub fn open(engine: &'e mut E, source: OpenSource) -> Result<Self, PdfEngineError> {
        let handle = engine.open(source)?;
        Ok(Self { engine, handle })
    }

    pub fn handle(&self) -> DocumentHandle {
        self.handle
    }

    pub fn page_count(&self) -> Result<u32, PdfEngineError> {
        self.engine.page_count(self.handle)
    }

    pub fn page_size(&self, page_index: u32) -> Result<PageSize, PdfEngineError> {
        self.engine.page_size(self.handle, page_index)
    }

    pub fn render_page(&self, request: RenderRequest) -> Result<RgbaImage, PdfEngineError> {
        self.engine.render_page(self.handle, request)
    }
}

impl<E: PdfEngine + ?Sized> Drop for ScopedDocument<'_, E> {
    fn drop(&mut self) {
        if let Err(err) = self.engine.close(self.handle) {
            tracing::warn!(handle = self.handle.raw(), error = %err, "failed to close document");
        }
    }
}

/// Backend selection for [`create_engine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineKind {
    #[default]
    Lopdf,
    #[cfg(feature = "pdfium")]
    Pdfium,
}

pub fn create_engine(kind: EngineKind) -> Result<Box<dyn PdfEngine>, PdfEngineError> {
    match kind {
        EngineKind::Lopdf => Ok(Box::new(LopdfEngine::new())),
        #[cfg(feature = "pdfium")]
        EngineKind::Pdfium => Ok(Box::new(PdfiumEngine::bind()?)),
    }
}

pub fn default_engine() -> LopdfEngine {
    LopdfEngine::new()
}
