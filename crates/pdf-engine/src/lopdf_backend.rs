use crate::{
    DocumentHandle, OpenSource, PageSize, PdfEngine, PdfEngineError, RenderRequest, RgbaImage,
    DEFAULT_PAGE_SIZE,
};
use image::Rgba;
use lopdf::{Document, Object, ObjectId};
use std::collections::HashMap;

/// Guards against cyclic `/Parent` chains in malformed page trees.
const MAX_TREE_DEPTH: usize = 32;

const PAPER: Rgba<u8> = Rgba([255, 255, 255, 255]);
const FRAME: Rgba<u8> = Rgba([220, 220, 220, 255]);

#[derive(Debug, Clone)]
struct DocumentRecord {
    page_sizes: Vec<PageSize>,
}

/// Pure-Rust backend. Reads the page tree with `lopdf` and rasterizes a
/// blank framed page of the right geometry.
#[derive(Debug, Default)]
pub struct LopdfEngine {
    next_handle: u64,
    docs: HashMap<DocumentHandle, DocumentRecord>,
}

impl LopdfEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents currently open.
    pub fn open_documents(&self) -> usize {
        self.docs.len()
    }

    fn parse_sizes(bytes: &[u8]) -> Result<Vec<PageSize>, PdfEngineError> {
        if bytes.windows("/Encrypt".len()).any(|window| window == b"/Encrypt") {
            return Err(PdfEngineError::EncryptedUnsupported);
        }

        let doc = Document::load_mem(bytes)?;
        if doc.trailer.get(b"Encrypt").is_ok() {
            return Err(PdfEngineError::EncryptedUnsupported);
        }

        let sizes: Vec<PageSize> = doc
            .get_pages()
            .into_values()
            .map(|page_id| {
                let size = inherited(&doc, page_id, b"MediaBox")
                    .and_then(|obj| rect_size(&doc, obj))
                    .unwrap_or(DEFAULT_PAGE_SIZE);
                let rotation = inherited(&doc, page_id, b"Rotate")
                    .and_then(|obj| obj.as_i64().ok())
                    .unwrap_or(0);
                size.rotated(rotation)
            })
            .collect();

        if sizes.is_empty() {
            return Err(PdfEngineError::NoPages);
        }

        Ok(sizes)
    }

    fn record(&self, handle: DocumentHandle) -> Result<&DocumentRecord, PdfEngineError> {
        self.docs.get(&handle).ok_or(PdfEngineError::InvalidHandle(handle.raw()))
    }
}

/// Looks up a page attribute, walking up the page tree for inheritable keys.
fn inherited<'a>(doc: &'a Document, page_id: ObjectId, key: &[u8]) -> Option<&'a Object> {
    let mut current = page_id;
    for _ in 0..MAX_TREE_DEPTH {
        let dict = doc.get_dictionary(current).ok()?;
        if let Ok(value) = dict.get(key) {
            return Some(value);
        }
        current = dict.get(b"Parent").ok()?.as_reference().ok()?;
    }
    None
}

fn rect_size(doc: &Document, obj: &Object) -> Option<PageSize> {
    let obj = match obj.as_reference() {
        Ok(id) => doc.get_object(id).ok()?,
        Err(_) => obj,
    };
    let array = obj.as_array().ok()?;
    if array.len() != 4 {
        return None;
    }

    let coords = array.iter().map(|value| value.as_float().ok()).collect::<Option<Vec<f32>>>()?;
    let size = PageSize::new((coords[2] - coords[0]).abs(), (coords[3] - coords[1]).abs());

    (size.width_pt > 0.0 && size.height_pt > 0.0).then_some(size)
}

impl PdfEngine for LopdfEngine {
    fn open(&mut self, source: OpenSource) -> Result<DocumentHandle, PdfEngineError> {
        let bytes = source.into_bytes()?;
        let page_sizes = Self::parse_sizes(&bytes)?;

        self.next_handle += 1;
        let handle = DocumentHandle::new(self.next_handle);
        self.docs.insert(handle, DocumentRecord { page_sizes });

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

        let mut image = RgbaImage::from_pixel(width, height, PAPER);

        if width >= 4 && height >= 4 {
            for x in 0..width {
                image.put_pixel(x, 0, FRAME);
                image.put_pixel(x, height - 1, FRAME);
            }
            for y in 0..height {
                image.put_pixel(0, y, FRAME);
                image.put_pixel(width - 1, y, FRAME);
            }
        }

        Ok(image)
    }

    fn close(&mut self, handle: DocumentHandle) -> Result<(), PdfEngineError> {
        self.docs.remove(&handle).map(|_| ()).ok_or(PdfEngineError::InvalidHandle(handle.raw()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    #[test]
    fn opens_pdf_and_reads_page_geometry() {
        let mut engine = LopdfEngine::new();
        let handle = engine
            .open(OpenSource::Bytes(fixtures::pdf_with_pages(&[(595.0, 842.0), (842.0, 595.0)])))
            .expect("open should succeed");

        assert_eq!(engine.page_count(handle).unwrap(), 2);
        assert_eq!(engine.page_size(handle, 0).unwrap(), PageSize::new(595.0, 842.0));
        assert_eq!(engine.page_size(handle, 1).unwrap(), PageSize::new(842.0, 595.0));
    }

    #[test]
    fn opens_pdf_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cover.pdf");
        std::fs::write(&path, fixtures::single_page_pdf(300.0, 400.0)).unwrap();

        let mut engine = LopdfEngine::new();
        let handle = engine.open(OpenSource::from(path.as_path())).expect("open should succeed");
        assert_eq!(engine.page_size(handle, 0).unwrap(), PageSize::new(300.0, 400.0));
    }

    #[test]
    fn media_box_is_inherited_from_page_tree() {
        let mut engine = LopdfEngine::new();
        let handle = engine
            .open(OpenSource::Bytes(fixtures::pdf_with_inherited_media_box(400.0, 300.0)))
            .unwrap();

        assert_eq!(engine.page_size(handle, 0).unwrap(), PageSize::new(400.0, 300.0));
    }

    #[test]
    fn rotated_page_reports_swapped_size() {
        let mut engine = LopdfEngine::new();
        let handle =
            engine.open(OpenSource::Bytes(fixtures::rotated_page_pdf(200.0, 500.0, 90))).unwrap();

        assert_eq!(engine.page_size(handle, 0).unwrap(), PageSize::new(500.0, 200.0));
    }

    #[test]
    fn document_without_pages_is_rejected() {
        let mut engine = LopdfEngine::new();
        let err = engine.open(OpenSource::Bytes(fixtures::empty_pdf())).unwrap_err();

        assert!(matches!(err, PdfEngineError::NoPages));
        assert_eq!(engine.open_documents(), 0);
    }

    #[test]
    fn malformed_bytes_are_a_parse_error() {
        let mut engine = LopdfEngine::new();
        let err = engine.open(OpenSource::Bytes(b"%PDF-1.4 garbage".to_vec())).unwrap_err();

        assert!(matches!(err, PdfEngineError::Parse(_)));
    }

    #[test]
    fn encrypted_marker_is_refused() {
        let mut engine = LopdfEngine::new();
        let mut bytes = fixtures::single_page_pdf(100.0, 100.0);
        bytes.extend_from_slice(b"\n% /Encrypt\n");

        let err = engine.open(OpenSource::Bytes(bytes)).unwrap_err();
        assert!(matches!(err, PdfEngineError::EncryptedUnsupported));
    }

    #[test]
    fn render_page_honors_scale() {
        let mut engine = LopdfEngine::new();
        let source = OpenSource::Bytes(fixtures::single_page_pdf(600.0, 800.0));
        let handle = engine.open(source).unwrap();

        let request = RenderRequest { page_index: 0, scale: 0.5 };
        let image = engine.render_page(handle, request).unwrap();

        assert_eq!(image.dimensions(), (300, 400));
        assert_eq!(*image.get_pixel(0, 0), FRAME);
        assert_eq!(*image.get_pixel(150, 200), PAPER);
    }

    #[test]
    fn render_out_of_range_page_fails() {
        let mut engine = LopdfEngine::new();
        let source = OpenSource::Bytes(fixtures::single_page_pdf(100.0, 100.0));
        let handle = engine.open(source).unwrap();

        let request = RenderRequest { page_index: 4, scale: 1.0 };
        let err = engine.render_page(handle, request).unwrap_err();
        assert!(matches!(err, PdfEngineError::PageOutOfRange { page: 4, page_count: 1 }));
    }

    #[test]
    fn invalid_handle_returns_error() {
        let mut engine = LopdfEngine::new();
        let err = engine.page_count(DocumentHandle::new(999)).unwrap_err();
        assert!(matches!(err, PdfEngineError::InvalidHandle(999)));

        let err = engine.close(DocumentHandle::new(999)).unwrap_err();
        assert!(matches!(err, PdfEngineError::InvalidHandle(999)));
    }
}
