//! Domain entities.

mod action;
mod image_key;
mod outcome;
mod policy;
mod priority;
mod request;

pub use action::{Action, ActionId, Tag, TargetId};
pub use image_key::{ImageKey, LoadedFrom};
pub use outcome::HuntOutcome;
pub use policy::{MemoryPolicy, NetworkPolicy};
pub use priority::{Priority, SharedPriority};
pub use request::{CropMode, Gravity, Request, RequestBuilder, ResourceId, Rotation};
