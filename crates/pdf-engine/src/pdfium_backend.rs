//! PDFium-backed engine.
//!
//! Documents are kept as bytes per handle and loaded into PDFium only for the
//! duration of a call, so no PDFium document outlives the method that used it.

use crate::{
    DocumentHandle, OpenSource, PageSize, PdfEngine, PdfEngineError, RenderRequest, RgbaImage,
};
use pdfium_render::prelude::*;
use std::collections::HashMap;

struct PdfiumRecord {
    bytes: Vec<u8>,
    page_sizes: Vec<PageSize>,
}

pub struct PdfiumEngine {
    pdfium: Pdfium,
    next_handle: u64,
    docs: HashMap<DocumentHandle, PdfiumRecord>,
}

fn backend(err: PdfiumError) -> PdfEngineError {
    PdfEngineError::Backend(err.to_string())
}

impl PdfiumEngine {
    /// Binds the PDFium library.
    ///
    /// Search order:
    /// 1. Executable's directory (for app bundles)
    /// 2. Current working directory
    /// 3. System library paths
    pub fn bind() -> Result<Self, PdfEngineError> {
        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()));

        let bindings = exe_dir
            .and_then(|dir| {
                Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(&dir)).ok()
            })
            .map(Ok)
            .unwrap_or_else(|| {
                Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
                    .or_else(|_| Pdfium::bind_to_system_library())
            })
            .map_err(|err| {
                PdfEngineError::Backend(format!("failed to bind pdfium library: {err}"))
            })?;

        Ok(Self { pdfium: Pdfium::new(bindings), next_handle: 0, docs: HashMap::new() })
    }

    fn record(&self, handle: DocumentHandle) -> Result<&PdfiumRecord, PdfEngineError> {
        self.docs.get(&handle).ok_or(PdfEngineError::InvalidHandle(handle.raw()))
    }
}

impl PdfEngine for PdfiumEngine {
    fn open(&mut self, source: OpenSource) -> Result<DocumentHandle, PdfEngineError> {
        let bytes = source.into_bytes()?;

        let page_sizes: Vec<PageSize> = {
            let document = self.pdfium.load_pdf_from_byte_slice(&bytes, None).map_err(backend)?;
            document
                .pages()
                .iter()
                .map(|page| PageSize::new(page.width().value, page.height().value))
                .collect()
        };

        if page_sizes.is_empty() {
            return Err(PdfEngineError::NoPages);
        }

        self.next_handle += 1;
        let handle = DocumentHandle::new(self.next_handle);
        self.docs.insert(handle, PdfiumRecord { bytes, page_sizes });

        Ok(handle)
    }

    fn page_count(&self, handle: DocumentHandle) -> Result<u32, PdfEngineError> {
        Ok(self.record(handle)?.page_sizes.len() as u32)
    }

    fn page_size(
        &self,
        handle: DocumentHandle,
        page_index: u32,
    ) -> Result<PageSize, PdfEngineError> {
        let record = self.record(handle)?;
        record.page_sizes.get(page_index as usize).copied().ok_or(PdfEngineError::PageOutOfRange {
            page: page_index,
            page_count: record.page_sizes.len() as u32,
        })
    }

    fn render_page(
        &self,
        handle: DocumentHandle,
        request: RenderRequest,
    ) -> Result<RgbaImage, PdfEngineError> {
        let page_size = self.page_size(handle, request.page_index)?;
        let (width, height) = request.output_size(page_size);
        let record = self.record(handle)?;

        let index = u16::try_from(request.page_index).map_err(|_| {
            PdfEngineError::PageOutOfRange {
                page: request.page_index,
                page_count: record.page_sizes.len() as u32,
            }
        })?;

        let document = self.pdfium.load_pdf_from_byte_slice(&record.bytes, None).map_err(backend)?;
        let page = document.pages().get(index).map_err(backend)?;

        let config = PdfRenderConfig::new()
            .set_target_width(width as i32)
            .set_target_height(height as i32);
        let bitmap = page.render_with_config(&config).map_err(backend)?;

        RgbaImage::from_raw(bitmap.width() as u32, bitmap.height() as u32, bitmap.as_rgba_bytes())
            .ok_or_else(|| PdfEngineError::Backend("bitmap size mismatch".to_owned()))
    }

    fn close(&mut self, handle: DocumentHandle) -> Result<(), PdfEngineError> {
        self.docs.remove(&handle).map(|_| ()).ok_or(PdfEngineError::InvalidHandle(handle.raw()))
    }
}
