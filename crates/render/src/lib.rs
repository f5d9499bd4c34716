//! Thumbnail rasterization.
//!
//! The [`Rasterizer`] trait is the boundary the scheduler depends on: given a
//! document location and a page, produce an encoded [`ThumbnailImage`] that
//! fits inside a bounding box, or a [`RenderError`]. [`EngineRasterizer`] is
//! the production implementation on top of a [`shelf_pdf_engine::PdfEngine`].

mod error;
mod fetch;
mod rasterizer;
mod thumbnail;

pub use error::RenderError;
pub use fetch::DocumentFetcher;
pub use rasterizer::{fit_scale, EngineRasterizer};
pub use thumbnail::{encode, ParseFormatError, ThumbnailFormat, ThumbnailImage};

use async_trait::async_trait;

/// Renders one page of a document into a thumbnail.
///
/// Implementations must release anything they open before returning, on
/// both the success and the error path, and must report every failure
/// through the returned `Result`.
#[async_trait]
pub trait Rasterizer: Send + Sync + 'static {
    async fn render(
        &self,
        location: &str,
        page_index: u32,
        max_width: u32,
        max_height: u32,
    ) -> Result<ThumbnailImage, RenderError>;
}
