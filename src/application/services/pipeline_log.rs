//! Structured verb logging for the request pipeline.
//!
//! Every event carries an `owner` (who acted), a `verb` (what happened) and
//! the ids involved. Emission is gated by the pipeline's logging flag.

use tracing::debug;

pub const OWNER_MAIN: &str = "Main";
pub const OWNER_DISPATCHER: &str = "Dispatcher";
pub const OWNER_HUNTER: &str = "Hunter";

pub const VERB_CREATED: &str = "created";
pub const VERB_CHANGED: &str = "changed";
pub const VERB_IGNORED: &str = "ignored";
pub const VERB_ENQUEUED: &str = "enqueued";
pub const VERB_CANCELED: &str = "canceled";
pub const VERB_BATCHED: &str = "batched";
pub const VERB_RETRYING: &str = "retrying";
pub const VERB_EXECUTING: &str = "executing";
pub const VERB_DECODED: &str = "decoded";
pub const VERB_TRANSFORMED: &str = "transformed";
pub const VERB_JOINED: &str = "joined";
pub const VERB_REMOVED: &str = "removed";
pub const VERB_DELIVERED: &str = "delivered";
pub const VERB_REPLAYING: &str = "replaying";
pub const VERB_COMPLETED: &str = "completed";
pub const VERB_ERRORED: &str = "errored";
pub const VERB_PAUSED: &str = "paused";
pub const VERB_RESUMED: &str = "resumed";

/// Emits one pipeline event when logging is enabled.
pub fn log_event(enabled: bool, owner: &str, verb: &str, ids: &str, extras: &str) {
    if enabled {
        debug!(owner, verb, ids, extras, "pipeline event");
    }
}
