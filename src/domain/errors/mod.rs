//! Domain error types.

mod hunt_error;
mod request_error;

pub use hunt_error::HuntError;
pub use request_error::RequestError;
