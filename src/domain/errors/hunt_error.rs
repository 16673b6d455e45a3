//! Errors produced while hunting for an image.

use thiserror::Error;

use crate::domain::entities::NetworkPolicy;

/// Failure of a single hunt attempt.
///
/// The variant decides whether the dispatcher retries the hunter or fails it.
#[derive(Debug, Clone, Error)]
#[allow(missing_docs)]
pub enum HuntError {
    #[error("i/o error: {message}")]
    Io { message: String },

    #[error("failed to decode image: {message}")]
    Decode { message: String },

    #[error("received {received} bytes, expected {expected:?}")]
    ContentLength {
        expected: Option<u64>,
        received: u64,
    },

    #[error("HTTP {code}")]
    Response {
        code: u16,
        network_policy: NetworkPolicy,
    },

    #[error("unrecognized type of request: {request}")]
    UnrecognizedRequest { request: String },

    #[error("resource exhausted: {message}\n{context}")]
    ResourceExhausted { message: String, context: String },

    #[error("transformation {key} {reason}")]
    TransformContract { key: String, reason: String },

    #[error("no image was produced")]
    NoResult,

    #[error("pipeline is shut down")]
    ShutDown,

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl HuntError {
    /// Creates an I/O error.
    #[must_use]
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    /// Creates a decode error.
    #[must_use]
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Creates an HTTP response error.
    #[must_use]
    pub const fn response(code: u16, network_policy: NetworkPolicy) -> Self {
        Self::Response {
            code,
            network_policy,
        }
    }

    /// Creates an unrecognized request error.
    #[must_use]
    pub fn unrecognized(request: impl Into<String>) -> Self {
        Self::UnrecognizedRequest {
            request: request.into(),
        }
    }

    /// Creates a resource exhaustion error without context.
    #[must_use]
    pub fn exhausted(message: impl Into<String>) -> Self {
        Self::ResourceExhausted {
            message: message.into(),
            context: String::new(),
        }
    }

    /// Creates a transformation contract violation.
    #[must_use]
    pub fn transform_contract(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::TransformContract {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Attaches diagnostic context to a resource exhaustion error.
    #[must_use]
    pub fn with_context(self, context: impl Into<String>) -> Self {
        match self {
            Self::ResourceExhausted { message, .. } => Self::ResourceExhausted {
                message,
                context: context.into(),
            },
            other => other,
        }
    }

    /// Returns true if the failure is believed recoverable and may be retried.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Io { .. } | Self::Decode { .. } | Self::ContentLength { .. }
        )
    }

    /// Returns true for an offline-only gateway timeout, which yields no error payload.
    #[must_use]
    pub fn is_offline_miss(&self) -> bool {
        matches!(
            self,
            Self::Response { code: 504, network_policy } if network_policy.is_offline_only()
        )
    }
}

impl From<std::io::Error> for HuntError {
    fn from(error: std::io::Error) -> Self {
        Self::io(error.to_string())
    }
}
