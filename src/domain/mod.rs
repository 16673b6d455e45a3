//! Domain layer with core entities, errors and port definitions.

/// Entity definitions.
pub mod entities;
/// Error types.
pub mod errors;
/// Network connectivity model.
pub mod network;
/// Port definitions.
pub mod ports;

pub use entities::{Action, HuntOutcome, ImageKey, LoadedFrom, Priority, Request, Tag};
pub use errors::{HuntError, RequestError};
pub use network::{NetworkCapabilities, Transport};
pub use ports::{RequestHandler, Target, Transformation};
