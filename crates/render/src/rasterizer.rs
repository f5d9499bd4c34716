use crate::fetch::DocumentFetcher;
use crate::thumbnail::{encode, ThumbnailFormat, ThumbnailImage};
use crate::{Rasterizer, RenderError};
use async_trait::async_trait;
use shelf_pdf_engine::{
    create_engine, EngineKind, OpenSource, PageSize, RenderRequest, ScopedDocument,
};
use std::sync::Arc;

/// Scale that fits `page` inside `max_width` x `max_height` without upscaling.
///
/// A zero bound is treated as one pixel.
pub fn fit_scale(page: PageSize, max_width: u32, max_height: u32) -> f32 {
    if page.width_pt <= 0.0 || page.height_pt <= 0.0 {
        return 1.0;
    }
    let sx = max_width.max(1) as f32 / page.width_pt;
    let sy = max_height.max(1) as f32 / page.height_pt;
    sx.min(sy).min(1.0)
}

/// [`Rasterizer`] backed by a [`shelf_pdf_engine::PdfEngine`].
///
/// Each call fetches the document, opens a fresh engine on the blocking pool,
/// renders the page and closes the document before encoding.
#[derive(Clone)]
pub struct EngineRasterizer {
    kind: EngineKind,
    format: ThumbnailFormat,
    fetcher: Arc<DocumentFetcher>,
}

impl Default for EngineRasterizer {
    fn default() -> Self {
        Self::new(EngineKind::default(), ThumbnailFormat::default())
    }
}

impl EngineRasterizer {
    pub fn new(kind: EngineKind, format: ThumbnailFormat) -> Self {
        Self { kind, format, fetcher: Arc::new(DocumentFetcher::default()) }
    }

    pub fn with_fetcher(mut self, fetcher: DocumentFetcher) -> Self {
        self.fetcher = Arc::new(fetcher);
        self
    }

    pub fn format(&self) -> ThumbnailFormat {
        self.format
    }

    fn render_blocking(
        &self,
        location: &str,
        page_index: u32,
        max_width: u32,
        max_height: u32,
    ) -> Result<ThumbnailImage, RenderError> {
        let bytes = self.fetcher.fetch(location)?;
        let mut engine = create_engine(self.kind)?;

        let bitmap = {
            let doc = ScopedDocument::open(&mut engine, OpenSource::Bytes(bytes))?;
            let page = doc.page_size(page_index)?;
            let scale = fit_scale(page, max_width, max_height);
            doc.render_page(RenderRequest { page_index, scale })?
        };

        encode(&bitmap, self.format)
    }
}

#[async_trait]
impl Rasterizer for EngineRasterizer {
    async fn render(
        &self,
        location: &str,
        page_index: u32,
        max_width: u32,
        max_height: u32,
    ) -> Result<ThumbnailImage, RenderError> {
        let this = self.clone();
        let location = location.to_owned();

        let result = tokio::task::spawn_blocking(move || {
            this.render_blocking(&location, page_index, max_width, max_height)
        })
        .await
        .map_err(|err| RenderError::Worker(err.to_string()))?;

        if let Ok(thumb) = &result {
            tracing::trace!(
                width = thumb.width(),
                height = thumb.height(),
                bytes = thumb.byte_len(),
                "rasterized page"
            );
        }
        result
    }
}
