//! Image transcoding seam
//!
//! Upload needs two WebP renditions of each source: the original clamped to a
//! maximum dimension, and a fixed-height preview. Decoding, resizing and
//! encoding are delegated to the `image` crate.

use std::io::Cursor;

use bytes::Bytes;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};

/// Content type of everything the transcoder produces
pub const WEBP_CONTENT_TYPE: &str = "image/webp";

#[derive(Debug, thiserror::Error)]
pub enum TranscodeError {
    #[error("Unsupported or corrupt image: {0}")]
    Decode(String),

    #[error("Failed to encode image: {0}")]
    Encode(String),
}

/// Target sizes for one upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranscodeOptions {
    /// Longest edge of the stored original
    pub max_dimension: u32,
    /// Height of the generated preview
    pub preview_height: u32,
}

/// Result of transcoding one source image
#[derive(Debug, Clone)]
pub struct Transcoded {
    pub original: Bytes,
    pub width: u32,
    pub height: u32,
    pub preview: Bytes,
}

/// Opaque image transcoder
pub trait ImageTranscoder: Send + Sync {
    fn transcode(&self, source: &[u8], options: TranscodeOptions) -> Result<Transcoded, TranscodeError>;
}

/// Transcoder backed by the `image` crate (lossless WebP output)
#[derive(Debug, Default, Clone, Copy)]
pub struct WebpTranscoder;

impl WebpTranscoder {
    fn encode(image: &DynamicImage) -> Result<Bytes, TranscodeError> {
        let mut out = Cursor::new(Vec::new());
        // The WebP encoder only accepts 8-bit RGB(A)
        DynamicImage::ImageRgba8(image.to_rgba8())
            .write_to(&mut out, ImageFormat::WebP)
            .map_err(|e| TranscodeError::Encode(e.to_string()))?;
        Ok(Bytes::from(out.into_inner()))
    }
}

impl ImageTranscoder for WebpTranscoder {
    fn transcode(&self, source: &[u8], options: TranscodeOptions) -> Result<Transcoded, TranscodeError> {
        let decoded =
            image::load_from_memory(source).map_err(|e| TranscodeError::Decode(e.to_string()))?;

        let max = options.max_dimension.max(1);
        let original = if decoded.width() > max || decoded.height() > max {
            decoded.resize(max, max, FilterType::Lanczos3)
        } else {
            decoded
        };

        let preview_height = options.preview_height.max(1);
        let preview_width = ((u64::from(original.width()) * u64::from(preview_height))
            / u64::from(original.height().max(1)))
        .max(1) as u32;
        let preview = original.resize_exact(preview_width, preview_height, FilterType::Triangle);

        Ok(Transcoded {
            width: original.width(),
            height: original.height(),
            original: Self::encode(&original)?,
            preview: Self::encode(&preview)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img: ImageBuffer<Rgb<u8>, Vec<u8>> =
            ImageBuffer::from_fn(width, height, |x, y| Rgb([(x % 255) as u8, (y % 255) as u8, 90]));
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    #[test]
    fn test_clamps_original_and_sizes_preview() {
        let options = TranscodeOptions {
            max_dimension: 100,
            preview_height: 20,
        };
        let result = WebpTranscoder.transcode(&png(400, 200), options).unwrap();
        assert_eq!((result.width, result.height), (100, 50));

        let preview = image::load_from_memory(&result.preview).unwrap();
        assert_eq!((preview.width(), preview.height()), (40, 20));
        assert_eq!(
            image::guess_format(&result.original).unwrap(),
            ImageFormat::WebP
        );
    }

    #[test]
    fn test_small_original_untouched() {
        let options = TranscodeOptions {
            max_dimension: 2048,
            preview_height: 8,
        };
        let result = WebpTranscoder.transcode(&png(32, 16), options).unwrap();
        assert_eq!((result.width, result.height), (32, 16));
    }

    #[test]
    fn test_garbage_rejected() {
        let options = TranscodeOptions {
            max_dimension: 10,
            preview_height: 10,
        };
        assert!(matches!(
            WebpTranscoder.transcode(b"not an image", options),
            Err(TranscodeError::Decode(_))
        ));
    }
}
