//! Decoder backed by the `image` crate.

use std::io::Cursor;

use image::metadata::Orientation;
use image::{DynamicImage, ImageDecoder as _, ImageError, ImageReader, Limits};
use tracing::trace;

use crate::domain::entities::Request;
use crate::domain::errors::HuntError;
use crate::domain::ports::{Decoded, Decoder};

/// Decodes PNG, JPEG and WebP payloads, sniffing the format from the bytes.
#[derive(Debug, Clone, Default)]
pub struct ImageDecoder {
    limits: Option<Limits>,
}

impl ImageDecoder {
    /// Creates a decoder with the `image` crate's default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a decoder that refuses allocations above `max_alloc` bytes.
    #[must_use]
    pub fn with_max_alloc(max_alloc: u64) -> Self {
        let mut limits = Limits::default();
        limits.max_alloc = Some(max_alloc);
        Self {
            limits: Some(limits),
        }
    }
}

impl Decoder for ImageDecoder {
    fn decode(&self, bytes: &[u8], request: &Request) -> Result<Decoded, HuntError> {
        let mut reader = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| HuntError::decode(e.to_string()))?;
        if let Some(limits) = &self.limits {
            reader.limits(limits.clone());
        }

        let mut decoder = reader.into_decoder().map_err(map_image_error)?;
        if let Some(mut limits) = self.limits.clone() {
            limits
                .reserve(decoder.total_bytes())
                .map_err(map_image_error)?;
        }
        let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);
        let image = DynamicImage::from_decoder(decoder).map_err(map_image_error)?;

        trace!(
            request = %request.name(),
            width = image.width(),
            height = image.height(),
            ?orientation,
            "decoded image"
        );
        Ok(Decoded { image, orientation })
    }
}

fn map_image_error(error: ImageError) -> HuntError {
    match error {
        ImageError::Limits(e) => HuntError::exhausted(e.to_string()),
        other => HuntError::decode(other.to_string()),
    }
}
