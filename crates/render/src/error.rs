use shelf_pdf_engine::PdfEngineError;

/// Errors that can occur while producing a thumbnail.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("failed to read {location}: {source}")]
    Fetch {
        location: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to fetch {location}: {message}")]
    Http { location: String, message: String },

    #[error(transparent)]
    Engine(#[from] PdfEngineError),

    #[error("failed to encode thumbnail: {0}")]
    Encode(#[from] image::ImageError),

    #[error("render worker failed: {0}")]
    Worker(String),

    #[error("render panicked")]
    Panicked,

    /// The render was dropped before it could report a result.
    #[error("render was abandoned before completion")]
    Abandoned,
}
