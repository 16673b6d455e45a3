//! Scheduling services: the dispatcher actor, hunters and the worker pool.

pub(crate) mod dispatcher;
pub(crate) mod hunter;
pub(crate) mod pipeline_log;
pub(crate) mod priority_executor;
pub(crate) mod stats;

pub use dispatcher::{
    DEFAULT_BATCH_DELAY, DEFAULT_RETRY_DELAY, DispatchEvent, Dispatcher, DispatcherConfig,
    DispatcherHandle,
};
pub use hunter::HuntContext;
pub use priority_executor::{DEFAULT_THREAD_COUNT, PriorityExecutor, RejectedExecution, TaskHandle};
pub use stats::{Stats, StatsSnapshot};
