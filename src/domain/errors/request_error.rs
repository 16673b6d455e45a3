//! Request construction errors.

use thiserror::Error;

/// Errors raised while building a request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[allow(missing_docs)]
pub enum RequestError {
    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },
}

impl RequestError {
    /// Creates an invalid request error.
    #[must_use]
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            reason: reason.into(),
        }
    }
}
