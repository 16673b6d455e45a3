//! Results produced by the pipeline.

use std::sync::Arc;

use super::action::Action;
use super::image_key::{ImageKey, LoadedFrom};
use crate::domain::errors::HuntError;

/// The terminal result of one hunter, delivered in a batch.
#[derive(Debug)]
pub struct HuntOutcome {
    /// Key the hunter loaded.
    pub key: ImageKey,
    /// Actions attached when the hunter finished.
    pub actions: Vec<Action>,
    /// The image, or why there is none.
    pub result: Result<Arc<image::DynamicImage>, HuntError>,
    /// Source of the image, when known.
    pub loaded_from: Option<LoadedFrom>,
}

impl HuntOutcome {
    /// Returns true if an image was produced.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}
