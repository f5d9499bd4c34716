//! Encoded thumbnail images.

use crate::RenderError;
use base64::{engine::general_purpose::STANDARD, Engine};
use image::buffer::ConvertBuffer;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{DynamicImage, ExtendedColorType, ImageEncoder, RgbImage};
use serde::{Deserialize, Serialize};
use shelf_pdf_engine::RgbaImage;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

pub const DEFAULT_JPEG_QUALITY: u8 = 80;

/// Output encoding for thumbnails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ThumbnailFormat {
    Png,
    Jpeg { quality: u8 },
}

impl Default for ThumbnailFormat {
    fn default() -> Self {
        Self::Jpeg { quality: DEFAULT_JPEG_QUALITY }
    }
}

impl ThumbnailFormat {
    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg { .. } => "image/jpeg",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg { .. } => "jpg",
        }
    }

    /// Replaces the quality of a lossy format; lossless formats are unchanged.
    pub fn with_quality(self, quality: u8) -> Self {
        match self {
            Self::Png => Self::Png,
            Self::Jpeg { .. } => Self::Jpeg { quality: quality.clamp(1, 100) },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown thumbnail format `{0}` (expected `png` or `jpeg`)")]
pub struct ParseFormatError(String);

impl FromStr for ThumbnailFormat {
    type Err = ParseFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "png" => Ok(Self::Png),
            "jpeg" | "jpg" => Ok(Self::default()),
            _ => Err(ParseFormatError(s.to_owned())),
        }
    }
}

impl fmt::Display for ThumbnailFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Png => f.write_str("png"),
            Self::Jpeg { quality } => write!(f, "jpeg (quality {quality})"),
        }
    }
}

/// An encoded thumbnail.
///
/// Cloning is cheap: the encoded bytes are shared.
#[derive(Clone, PartialEq, Eq)]
pub struct ThumbnailImage {
    width: u32,
    height: u32,
    format: ThumbnailFormat,
    bytes: Arc<[u8]>,
}

impl ThumbnailImage {
    pub fn new(width: u32, height: u32, format: ThumbnailFormat, bytes: Vec<u8>) -> Self {
        Self { width, height, format, bytes: bytes.into() }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> ThumbnailFormat {
        self.format
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn byte_len(&self) -> usize {
        self.bytes.len()
    }

    /// `data:` URI suitable for an `<img src>`.
    pub fn to_data_uri(&self) -> String {
        format!("data:{};base64,{}", self.format.mime_type(), STANDARD.encode(&self.bytes))
    }

    pub fn decode(&self) -> Result<DynamicImage, RenderError> {
        Ok(image::load_from_memory(&self.bytes)?)
    }
}

impl fmt::Debug for ThumbnailImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThumbnailImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

/// Encodes an RGBA bitmap. JPEG output drops the alpha channel.
pub fn encode(bitmap: &RgbaImage, format: ThumbnailFormat) -> Result<ThumbnailImage, RenderError> {
    let (width, height) = bitmap.dimensions();
    let mut bytes = Vec::new();

    match format {
        ThumbnailFormat::Png => {
            PngEncoder::new(&mut bytes).write_image(
                bitmap.as_raw(),
                width,
                height,
                ExtendedColorType::Rgba8,
            )?;
        }
        ThumbnailFormat::Jpeg { quality } => {
            let rgb: RgbImage = bitmap.convert();
            JpegEncoder::new_with_quality(&mut bytes, quality.clamp(1, 100)).write_image(
                rgb.as_raw(),
                width,
                height,
                ExtendedColorType::Rgb8,
            )?;
        }
    }

    Ok(ThumbnailImage::new(width, height, format, bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, Rgba};

    fn bitmap(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255]))
    }

    #[test]
    fn png_thumbnail_decodes_to_same_size() {
        let thumb = encode(&bitmap(30, 40), ThumbnailFormat::Png).unwrap();

        assert_eq!((thumb.width(), thumb.height()), (30, 40));
        assert!(thumb.bytes().starts_with(b"\x89PNG"));
        assert_eq!(thumb.decode().unwrap().dimensions(), (30, 40));
    }

    #[test]
    fn jpeg_thumbnail_is_smaller_than_raw_pixels() {
        let raw = bitmap(300, 400);
        let thumb = encode(&raw, ThumbnailFormat::default()).unwrap();

        assert!(thumb.bytes().starts_with(&[0xFF, 0xD8]));
        assert!(thumb.byte_len() < raw.as_raw().len());
        assert_eq!(thumb.decode().unwrap().dimensions(), (300, 400));
    }

    #[test]
    fn data_uri_carries_mime_type() {
        let thumb = encode(&bitmap(4, 4), ThumbnailFormat::Png).unwrap();
        let uri = thumb.to_data_uri();

        assert!(uri.starts_with("data:image/png;base64,"));
        let payload = uri.trim_start_matches("data:image/png;base64,");
        assert_eq!(STANDARD.decode(payload).unwrap(), thumb.bytes());
    }

    #[test]
    fn format_parsing() {
        assert_eq!("png".parse::<ThumbnailFormat>().unwrap(), ThumbnailFormat::Png);
        assert_eq!(" JPG ".parse::<ThumbnailFormat>().unwrap(), ThumbnailFormat::default());
        assert!("webp".parse::<ThumbnailFormat>().is_err());
    }

    #[test]
    fn quality_only_applies_to_jpeg() {
        assert_eq!(ThumbnailFormat::Png.with_quality(10), ThumbnailFormat::Png);
        assert_eq!(
            ThumbnailFormat::default().with_quality(0),
            ThumbnailFormat::Jpeg { quality: 1 }
        );
    }

    #[test]
    fn debug_does_not_dump_bytes() {
        let thumb = ThumbnailImage::new(1, 1, ThumbnailFormat::Png, vec![7; 64]);
        assert_eq!(
            format!("{thumb:?}"),
            "ThumbnailImage { width: 1, height: 1, format: Png, bytes: 64 }"
        );
    }
}
