//! Port for the fetch capability.

use bytes::Bytes;
use image::DynamicImage;
use image::metadata::Orientation;

use crate::domain::entities::{LoadedFrom, NetworkPolicy, Request};
use crate::domain::errors::HuntError;

/// Content returned by a handler.
#[derive(Debug)]
pub enum FetchPayload {
    /// An already decoded image.
    Image(DynamicImage),
    /// Raw encoded bytes that still need decoding.
    Bytes(Bytes),
}

/// Result of a successful fetch.
#[derive(Debug)]
pub struct FetchResult {
    /// Fetched content.
    pub payload: FetchPayload,
    /// Where the content came from.
    pub loaded_from: LoadedFrom,
    /// Orientation known by the handler, if any.
    pub orientation: Option<Orientation>,
}

impl FetchResult {
    /// Wraps raw bytes.
    #[must_use]
    pub const fn bytes(bytes: Bytes, loaded_from: LoadedFrom) -> Self {
        Self {
            payload: FetchPayload::Bytes(bytes),
            loaded_from,
            orientation: None,
        }
    }

    /// Wraps a decoded image.
    #[must_use]
    pub const fn image(image: DynamicImage, loaded_from: LoadedFrom) -> Self {
        Self {
            payload: FetchPayload::Image(image),
            loaded_from,
            orientation: None,
        }
    }
}

/// Loads the content for requests it recognizes.
#[async_trait::async_trait]
pub trait RequestHandler: Send + Sync {
    /// Returns true if this handler can load `request`.
    fn can_handle(&self, request: &Request) -> bool;

    /// Fetches the content for `request`.
    ///
    /// May block on I/O. Transient failures should be reported as
    /// [`HuntError::Io`] so the dispatcher can retry.
    async fn load(&self, request: &Request, network_policy: NetworkPolicy)
    -> Result<FetchResult, HuntError>;

    /// Number of transient failures tolerated before a hunter fails.
    fn retry_count(&self) -> u32 {
        0
    }

    /// Returns true if a retry makes sense under the given connectivity.
    fn should_retry(&self, _airplane_mode: bool, _connected: bool) -> bool {
        false
    }

    /// Returns true if failed requests may be replayed when connectivity returns.
    fn supports_replay(&self) -> bool {
        false
    }
}

/// Fallback used when no handler recognizes a request.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnrecognizedRequestHandler;

#[async_trait::async_trait]
impl RequestHandler for UnrecognizedRequestHandler {
    fn can_handle(&self, _request: &Request) -> bool {
        true
    }

    async fn load(
        &self,
        request: &Request,
        _network_policy: NetworkPolicy,
    ) -> Result<FetchResult, HuntError> {
        Err(HuntError::unrecognized(request.name()))
    }
}
