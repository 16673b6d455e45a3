//! Caller-supplied image transformations.

use image::DynamicImage;

/// A custom transformation applied after the geometric transform.
pub trait Transformation: Send + Sync {
    /// Stable identity of the transformation, part of the cache key.
    fn key(&self) -> String;

    /// Transforms `source`.
    ///
    /// Returning `None` or an empty image breaks the contract and fails the
    /// request.
    fn transform(&self, source: DynamicImage) -> Option<DynamicImage>;
}
