//! Port for delivering results to callers.

use std::sync::Arc;

use image::DynamicImage;

use crate::domain::entities::LoadedFrom;
use crate::domain::errors::HuntError;

/// Receives the outcome of a request.
///
/// The pipeline only keeps weak references to targets; a target that has
/// been dropped simply receives nothing.
#[cfg_attr(test, mockall::automock)]
pub trait Target: Send + Sync {
    /// Called with the loaded image.
    fn on_success(&self, image: Arc<DynamicImage>, loaded_from: LoadedFrom);

    /// Called when loading failed.
    ///
    /// `will_replay` is true when the request is kept and will be retried
    /// once connectivity returns, so this is not its final outcome.
    fn on_error(&self, error: &HuntError, will_replay: bool);
}
