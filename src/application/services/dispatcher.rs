//! The single-writer coordinator of all scheduling state.
//!
//! Every state change arrives as a [`DispatcherMessage`] and is applied one
//! at a time by the task running [`Dispatcher::run`]. Workers, timers and
//! callers only ever talk to it through its channel.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use image::DynamicImage;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::hunter::{HuntContext, Hunter};
use super::pipeline_log::{
    OWNER_DISPATCHER, VERB_BATCHED, VERB_CANCELED, VERB_DELIVERED, VERB_ENQUEUED, VERB_ERRORED,
    VERB_IGNORED, VERB_PAUSED, VERB_REPLAYING, VERB_RESUMED, VERB_RETRYING,
};
use super::priority_executor::{PriorityExecutor, RejectedExecution, TaskHandle};
use crate::domain::entities::{Action, HuntOutcome, ImageKey, LoadedFrom, Request, Tag, TargetId};
use crate::domain::errors::HuntError;
use crate::domain::network::NetworkCapabilities;
use crate::domain::ports::{RequestHandler, UnrecognizedRequestHandler};

/// Delay before a batch of completed hunters is delivered.
pub const DEFAULT_BATCH_DELAY: Duration = Duration::from_millis(200);
/// Delay before a hunter that failed transiently is retried.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Tunables of the dispatcher.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Window in which completions are collected into one delivery.
    pub batch_delay: Duration,
    /// Backoff before resubmitting after a transient failure.
    pub retry_delay: Duration,
    /// Whether connectivity is observed. Without it failed requests are
    /// never replayed and retries assume a connection.
    pub scans_network_changes: bool,
    /// Enables verbose verb logging.
    pub logging_enabled: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            batch_delay: DEFAULT_BATCH_DELAY,
            retry_delay: DEFAULT_RETRY_DELAY,
            scans_network_changes: true,
            logging_enabled: false,
        }
    }
}

/// Events produced for the delivery side.
#[derive(Debug)]
pub enum DispatchEvent {
    /// Outcomes of every hunter finished during one batch window.
    BatchComplete(Vec<HuntOutcome>),
    /// Actions released by a resumed tag, to be submitted again.
    ResumeBatch(Vec<Action>),
}

/// Messages processed by the dispatcher, in arrival order.
#[derive(Debug)]
pub enum DispatcherMessage {
    Submit(Action),
    Cancel(Action),
    PauseTag(Tag),
    ResumeTag(Tag),
    HunterCompleted {
        hunter_id: u64,
        key: ImageKey,
        image: Arc<DynamicImage>,
        loaded_from: LoadedFrom,
    },
    HunterFailed {
        hunter_id: u64,
        key: ImageKey,
        error: HuntError,
    },
    HunterTransientFailure {
        hunter_id: u64,
        key: ImageKey,
        error: HuntError,
    },
    HunterRetry {
        hunter_id: u64,
        key: ImageKey,
    },
    NetworkChanged(Option<NetworkCapabilities>),
    AirplaneModeChanged(bool),
    FlushBatch,
    Shutdown,
}

/// Cloneable sender side of the dispatcher.
#[derive(Debug, Clone)]
pub struct DispatcherHandle {
    tx: UnboundedSender<DispatcherMessage>,
    shut_down: Arc<AtomicBool>,
}

impl DispatcherHandle {
    /// Creates a handle whose messages land in the returned receiver.
    #[cfg(test)]
    pub(crate) fn channel() -> (Self, UnboundedReceiver<DispatcherMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Self {
            tx,
            shut_down: Arc::new(AtomicBool::new(false)),
        };
        (handle, rx)
    }

    fn send(&self, message: DispatcherMessage) {
        if self.tx.send(message).is_err() {
            trace!("dispatcher is gone, message dropped");
        }
    }

    /// Submits an action.
    pub fn dispatch_submit(&self, action: Action) {
        self.send(DispatcherMessage::Submit(action));
    }

    /// Withdraws an action.
    pub fn dispatch_cancel(&self, action: Action) {
        self.send(DispatcherMessage::Cancel(action));
    }

    /// Pauses every action with `tag`.
    pub fn dispatch_pause_tag(&self, tag: Tag) {
        self.send(DispatcherMessage::PauseTag(tag));
    }

    /// Resumes every action with `tag`.
    pub fn dispatch_resume_tag(&self, tag: Tag) {
        self.send(DispatcherMessage::ResumeTag(tag));
    }

    /// Reports new network capabilities, `None` when there is no network.
    pub fn dispatch_network_state_change(&self, capabilities: Option<NetworkCapabilities>) {
        self.send(DispatcherMessage::NetworkChanged(capabilities));
    }

    /// Reports an airplane mode transition.
    pub fn dispatch_airplane_mode_change(&self, airplane_mode: bool) {
        self.send(DispatcherMessage::AirplaneModeChanged(airplane_mode));
    }

    /// Returns true once [`shutdown`](Self::shutdown) was called.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Resolves once the dispatcher task has stopped.
    pub async fn closed(&self) {
        self.tx.closed().await;
    }

    /// Stops the dispatcher. Only the first call has an effect.
    pub fn shutdown(&self) {
        if !self.shut_down.swap(true, Ordering::AcqRel) {
            self.send(DispatcherMessage::Shutdown);
        }
    }
}

/// Owner of the hunter map, pause sets, replay map and batch.
pub struct Dispatcher {
    config: DispatcherConfig,
    ctx: Arc<HuntContext>,
    handlers: Vec<Arc<dyn RequestHandler>>,
    executor: PriorityExecutor,
    tx: UnboundedSender<DispatcherMessage>,
    rx: UnboundedReceiver<DispatcherMessage>,
    events: UnboundedSender<DispatchEvent>,
    hunters: HashMap<ImageKey, Hunter>,
    paused_tags: HashSet<Tag>,
    paused_actions: HashMap<TargetId, Action>,
    failed_actions: HashMap<TargetId, Action>,
    batch: Vec<Hunter>,
    flush_scheduled: bool,
    airplane_mode: bool,
    connected: bool,
    next_hunter_id: u64,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.config)
            .field("hunters", &self.hunters.len())
            .field("paused_tags", &self.paused_tags)
            .field("paused_actions", &self.paused_actions.len())
            .field("failed_actions", &self.failed_actions.len())
            .field("batch", &self.batch.len())
            .field("airplane_mode", &self.airplane_mode)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Creates a dispatcher, its handle and the receiver of delivery events.
    ///
    /// `handlers` are tried in order; the first that can handle a request
    /// serves it.
    #[must_use]
    pub fn new(
        config: DispatcherConfig,
        ctx: Arc<HuntContext>,
        handlers: Vec<Arc<dyn RequestHandler>>,
        executor: PriorityExecutor,
    ) -> (Self, DispatcherHandle, UnboundedReceiver<DispatchEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (events, events_rx) = mpsc::unbounded_channel();
        let handle = DispatcherHandle {
            tx: tx.clone(),
            shut_down: Arc::new(AtomicBool::new(false)),
        };
        let dispatcher = Self {
            config,
            ctx,
            handlers,
            executor,
            tx,
            rx,
            events,
            hunters: HashMap::new(),
            paused_tags: HashSet::new(),
            paused_actions: HashMap::new(),
            failed_actions: HashMap::new(),
            batch: Vec::new(),
            flush_scheduled: false,
            airplane_mode: false,
            connected: true,
            next_hunter_id: 0,
        };
        (dispatcher, handle, events_rx)
    }

    /// Runs the dispatcher on its own task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Processes messages until shutdown.
    pub async fn run(mut self) {
        while let Some(message) = self.rx.recv().await {
            if !self.handle(message).await {
                break;
            }
        }
        debug!("dispatcher stopped");
    }

    async fn handle(&mut self, message: DispatcherMessage) -> bool {
        match message {
            DispatcherMessage::Submit(action) => self.perform_submit(action, true),
            DispatcherMessage::Cancel(action) => self.perform_cancel(&action),
            DispatcherMessage::PauseTag(tag) => self.perform_pause_tag(tag),
            DispatcherMessage::ResumeTag(tag) => self.perform_resume_tag(tag),
            DispatcherMessage::HunterCompleted {
                hunter_id,
                key,
                image,
                loaded_from,
            } => self.perform_complete(hunter_id, &key, image, loaded_from).await,
            DispatcherMessage::HunterFailed {
                hunter_id,
                key,
                error,
            } => self.perform_failed(hunter_id, &key, error),
            DispatcherMessage::HunterTransientFailure {
                hunter_id,
                key,
                error,
            } => self.perform_transient_failure(hunter_id, key, error),
            DispatcherMessage::HunterRetry { hunter_id, key } => {
                self.perform_retry(hunter_id, key);
            }
            DispatcherMessage::NetworkChanged(capabilities) => {
                self.perform_network_state_change(capabilities);
            }
            DispatcherMessage::AirplaneModeChanged(airplane_mode) => {
                self.airplane_mode = airplane_mode;
            }
            DispatcherMessage::FlushBatch => self.perform_batch_complete(),
            DispatcherMessage::Shutdown => {
                self.perform_shutdown();
                return false;
            }
        }
        true
    }

    fn log(&self, verb: &str, ids: &str, extras: &str) {
        self.ctx.log(OWNER_DISPATCHER, verb, ids, extras);
    }

    fn send_later(&self, delay: Duration, message: DispatcherMessage) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(message);
        });
    }

    fn select_handler(&self, request: &Request) -> Arc<dyn RequestHandler> {
        self.handlers
            .iter()
            .find(|handler| handler.can_handle(request))
            .cloned()
            .unwrap_or_else(|| Arc::new(UnrecognizedRequestHandler))
    }

    fn schedule(&self, hunter: &mut Hunter) -> Result<(), RejectedExecution> {
        let job = hunter.next_job(self.ctx.clone());
        let handle = self
            .executor
            .submit(hunter.priority_cell(), job.run(self.tx.clone()))?;
        hunter.set_handle(handle);
        Ok(())
    }

    /// Removes the hunter for `key` if it is still the one with `hunter_id`.
    fn take_hunter(&mut self, key: &ImageKey, hunter_id: u64) -> Option<Hunter> {
        if self.hunters.get(key).is_some_and(|h| h.id() == hunter_id) {
            self.hunters.remove(key)
        } else {
            None
        }
    }

    pub(crate) fn perform_submit(&mut self, action: Action, dismiss_failed: bool) {
        if self.paused_tags.contains(action.tag()) {
            self.log(
                VERB_PAUSED,
                &action.id().to_string(),
                &format!("because tag '{}' is paused", action.tag()),
            );
            self.paused_actions.retain(|_, parked| !parked.is_target_gone());
            self.paused_actions.insert(action.target_id(), action);
            return;
        }

        if let Some(hunter) = self.hunters.get_mut(action.key()) {
            hunter.attach(action, &self.ctx);
            return;
        }

        if self.executor.is_shutdown() {
            self.log(
                VERB_IGNORED,
                &action.id().to_string(),
                "because executor is shut down",
            );
            return;
        }

        let target_id = action.target_id();
        let key = action.key().clone();
        let handler = self.select_handler(action.request());
        self.next_hunter_id += 1;
        let mut hunter = Hunter::new(self.next_hunter_id, action, handler);
        if self.schedule(&mut hunter).is_err() {
            self.log(VERB_IGNORED, &hunter.log_ids(), "because executor rejected it");
            return;
        }
        self.log(VERB_ENQUEUED, &hunter.log_ids(), "");
        self.hunters.insert(key, hunter);

        if dismiss_failed {
            self.failed_actions.remove(&target_id);
        }
    }

    pub(crate) fn perform_cancel(&mut self, action: &Action) {
        let key = action.key();
        if let Some(hunter) = self.hunters.get_mut(key) {
            if hunter.detach(action.id(), &self.ctx).is_some() && hunter.cancel() {
                self.hunters.remove(key);
                self.log(VERB_CANCELED, &action.id().to_string(), "");
            }
        }

        let target_id = action.target_id();
        if self.paused_tags.contains(action.tag())
            && self
                .paused_actions
                .get(&target_id)
                .is_some_and(|paused| paused.id() == action.id())
        {
            self.paused_actions.remove(&target_id);
            self.log(
                VERB_CANCELED,
                &action.id().to_string(),
                "because paused request got canceled",
            );
        }

        if self
            .failed_actions
            .get(&target_id)
            .is_some_and(|failed| failed.id() == action.id())
        {
            self.failed_actions.remove(&target_id);
            self.log(
                VERB_CANCELED,
                &action.id().to_string(),
                "from replaying",
            );
        }
    }

    pub(crate) fn perform_pause_tag(&mut self, tag: Tag) {
        if !self.paused_tags.insert(tag.clone()) {
            return;
        }

        let mut order: Vec<(u64, ImageKey)> = self
            .hunters
            .values()
            .map(|hunter| (hunter.id(), hunter.key().clone()))
            .collect();
        order.sort();

        for (_, key) in order {
            let Some(hunter) = self.hunters.get_mut(&key) else {
                continue;
            };
            let paused = hunter.detach_matching(|action| action.tag() == &tag, &self.ctx);
            let cancelled = !paused.is_empty() && hunter.cancel();

            for action in paused {
                self.ctx.log(
                    OWNER_DISPATCHER,
                    VERB_PAUSED,
                    &action.id().to_string(),
                    &format!("because tag '{tag}' was paused"),
                );
                self.paused_actions.insert(action.target_id(), action);
            }
            if cancelled {
                self.hunters.remove(&key);
                self.log(VERB_CANCELED, &key.to_string(), "all actions paused");
            }
        }
    }

    pub(crate) fn perform_resume_tag(&mut self, tag: Tag) {
        if !self.paused_tags.remove(&tag) {
            return;
        }

        let targets: Vec<TargetId> = self
            .paused_actions
            .iter()
            .filter(|(_, action)| action.tag() == &tag)
            .map(|(target_id, _)| *target_id)
            .collect();
        let mut batch: Vec<Action> = targets
            .into_iter()
            .filter_map(|target_id| self.paused_actions.remove(&target_id))
            .collect();
        batch.sort_by_key(Action::id);

        if batch.is_empty() {
            return;
        }
        let ids: Vec<String> = batch.iter().map(|a| a.id().to_string()).collect();
        self.log(VERB_RESUMED, &ids.join(", "), &format!("tag '{tag}'"));
        let _ = self.events.send(DispatchEvent::ResumeBatch(batch));
    }

    pub(crate) async fn perform_complete(
        &mut self,
        hunter_id: u64,
        key: &ImageKey,
        image: Arc<DynamicImage>,
        loaded_from: LoadedFrom,
    ) {
        let Some(mut hunter) = self.take_hunter(key, hunter_id) else {
            return;
        };
        if hunter.memory_policy().should_write() {
            self.ctx.cache.put(key.clone(), image.clone()).await;
        }
        hunter.set_result(image, loaded_from);
        self.batch(hunter);
    }

    pub(crate) fn perform_failed(&mut self, hunter_id: u64, key: &ImageKey, error: HuntError) {
        let Some(mut hunter) = self.take_hunter(key, hunter_id) else {
            return;
        };
        hunter.set_error(error);
        self.perform_error(hunter, false);
    }

    pub(crate) fn perform_transient_failure(
        &mut self,
        hunter_id: u64,
        key: ImageKey,
        error: HuntError,
    ) {
        let Some(hunter) = self.hunters.get_mut(&key).filter(|h| h.id() == hunter_id) else {
            return;
        };
        // Every action left while the attempt was running.
        if !hunter.has_actions() {
            self.hunters.remove(&key);
            self.log(VERB_CANCELED, &key.to_string(), "no actions left to retry for");
            return;
        }
        hunter.set_error(error);
        // The backoff is cancellable like a queued job.
        hunter.set_handle(TaskHandle::detached());
        self.send_later(
            self.config.retry_delay,
            DispatcherMessage::HunterRetry { hunter_id, key },
        );
    }

    pub(crate) fn perform_retry(&mut self, hunter_id: u64, key: ImageKey) {
        let Some(mut hunter) = self.take_hunter(&key, hunter_id) else {
            return;
        };
        if hunter.is_cancelled() || !hunter.has_actions() {
            return;
        }
        if self.executor.is_shutdown() {
            self.perform_error(hunter, false);
            return;
        }

        let connected = !self.config.scans_network_changes || self.connected;
        if hunter.should_retry(self.airplane_mode, connected) {
            self.log(VERB_RETRYING, &hunter.log_ids(), "");
            if matches!(hunter.error(), Some(HuntError::ContentLength { .. })) {
                hunter.bypass_disk_cache();
            }
            if self.schedule(&mut hunter).is_ok() {
                self.hunters.insert(key, hunter);
            } else {
                self.perform_error(hunter, false);
            }
            return;
        }

        let will_replay = self.config.scans_network_changes && hunter.supports_replay();
        self.perform_error(hunter, will_replay);
    }

    fn perform_error(&mut self, mut hunter: Hunter, will_replay: bool) {
        let reason = hunter
            .error()
            .map(ToString::to_string)
            .unwrap_or_default();
        self.log(VERB_ERRORED, &hunter.log_ids(), &reason);
        if will_replay {
            self.failed_actions.retain(|_, failed| !failed.is_target_gone());
            for action in hunter.mark_for_replay() {
                self.failed_actions.insert(action.target_id(), action);
            }
        }
        self.batch(hunter);
    }

    pub(crate) fn perform_network_state_change(
        &mut self,
        capabilities: Option<NetworkCapabilities>,
    ) {
        self.executor.adjust_thread_count(capabilities.as_ref());
        self.connected = capabilities.is_some_and(|caps| caps.is_connected());
        if self.connected {
            self.flush_failed_actions();
        }
    }

    fn flush_failed_actions(&mut self) {
        if self.failed_actions.is_empty() {
            return;
        }
        let mut replay: Vec<Action> = self.failed_actions.drain().map(|(_, a)| a).collect();
        replay.sort_by_key(Action::id);
        for mut action in replay {
            if action.is_cancelled() || action.is_target_gone() {
                continue;
            }
            action.set_will_replay(false);
            self.log(VERB_REPLAYING, &action.id().to_string(), "");
            self.perform_submit(action, false);
        }
    }

    fn batch(&mut self, hunter: Hunter) {
        if hunter.is_cancelled() {
            return;
        }
        self.log(VERB_BATCHED, &hunter.log_ids(), "for completion");
        self.batch.push(hunter);
        if !self.flush_scheduled {
            self.flush_scheduled = true;
            self.send_later(self.config.batch_delay, DispatcherMessage::FlushBatch);
        }
    }

    pub(crate) fn perform_batch_complete(&mut self) {
        self.flush_scheduled = false;
        if self.batch.is_empty() {
            return;
        }
        let outcomes: Vec<HuntOutcome> = std::mem::take(&mut self.batch)
            .into_iter()
            .map(Hunter::into_outcome)
            .collect();
        let keys: Vec<String> = outcomes.iter().map(|o| o.key.to_string()).collect();
        self.log(VERB_DELIVERED, &keys.join(", "), "");
        let _ = self.events.send(DispatchEvent::BatchComplete(outcomes));
    }

    fn perform_shutdown(&mut self) {
        self.executor.shutdown();
        for hunter in self.hunters.values_mut() {
            hunter.take_actions();
            hunter.cancel();
        }
        self.hunters.clear();
        self.batch.clear();
        self.paused_actions.clear();
        self.failed_actions.clear();
        debug!("dispatcher shut down");
    }
}
