//! Ports for the CPU-bound decode and transform steps.

use image::DynamicImage;
use image::metadata::Orientation;

use crate::domain::entities::Request;
use crate::domain::errors::HuntError;

/// A decoded image plus the orientation recorded in its metadata.
#[derive(Debug)]
pub struct Decoded {
    /// The decoded pixels.
    pub image: DynamicImage,
    /// EXIF orientation.
    pub orientation: Orientation,
}

/// Turns encoded bytes into an image. Called on a blocking thread.
pub trait Decoder: Send + Sync {
    /// Decodes `bytes`.
    ///
    /// # Errors
    /// Returns [`HuntError::Decode`] when no image can be produced and
    /// [`HuntError::ResourceExhausted`] when decoding exceeds memory limits.
    fn decode(&self, bytes: &[u8], request: &Request) -> Result<Decoded, HuntError>;
}

/// Applies the geometric part of a request. Called on a blocking thread
/// while the global transform lock is held.
pub trait ImageTransformer: Send + Sync {
    /// Applies orientation, rotation, resize and crop.
    fn transform(
        &self,
        request: &Request,
        image: DynamicImage,
        orientation: Orientation,
    ) -> DynamicImage;
}
