//! Hunter - an asynchronous image fetch pipeline.
//!
//! Requests for the same image are coalesced into a single fetch, scheduled
//! on a priority-ordered worker pool, decoded and transformed, cached in
//! memory and delivered to their targets in short batches. Transient
//! failures are retried with backoff and failed requests can be replayed
//! once connectivity returns.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Application layer containing the dispatcher, hunters and the pipeline facade.
pub mod application;
/// Domain layer containing entities, errors, and port definitions.
pub mod domain;
/// Infrastructure layer containing caches, handlers and configuration.
pub mod infrastructure;

/// Current version of the library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name.
pub const NAME: &str = "hunter";
