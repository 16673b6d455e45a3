//! Caller-facing entry point of the image pipeline.
//!
//! A [`Pipeline`] owns the dispatcher task, the worker pool and the delivery
//! loop that applies batched outcomes to targets.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::services::pipeline_log::{
    OWNER_MAIN, VERB_CANCELED, VERB_COMPLETED, VERB_CREATED, VERB_ERRORED, VERB_IGNORED, log_event,
};
use super::services::{
    DEFAULT_THREAD_COUNT, DispatchEvent, Dispatcher, DispatcherConfig, DispatcherHandle,
    HuntContext, PriorityExecutor, Stats, StatsSnapshot,
};
use crate::domain::entities::{Action, ActionId, HuntOutcome, LoadedFrom, Request, Tag, TargetId};
use crate::domain::network::NetworkCapabilities;
use crate::domain::ports::{Decoder, ImageCachePort, ImageTransformer, RequestHandler, Target};

/// Errors raised while assembling a pipeline.
#[derive(Debug, Clone, Error)]
pub enum BuildError {
    /// A required collaborator was not provided.
    #[error("pipeline is missing a {0}")]
    MissingComponent(&'static str),
    /// No tokio runtime is running on the current thread.
    #[error("a pipeline must be built inside a tokio runtime")]
    NoRuntime,
}

/// Builder for [`Pipeline`].
pub struct PipelineBuilder {
    config: DispatcherConfig,
    thread_count: usize,
    cache: Option<Arc<dyn ImageCachePort>>,
    decoder: Option<Arc<dyn Decoder>>,
    transformer: Option<Arc<dyn ImageTransformer>>,
    handlers: Vec<Arc<dyn RequestHandler>>,
}

impl std::fmt::Debug for PipelineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("config", &self.config)
            .field("thread_count", &self.thread_count)
            .field("handlers", &self.handlers.len())
            .finish_non_exhaustive()
    }
}

impl PipelineBuilder {
    /// Sets the baseline number of workers.
    #[must_use]
    pub const fn thread_count(mut self, thread_count: usize) -> Self {
        self.thread_count = thread_count;
        self
    }

    /// Sets the memory cache.
    #[must_use]
    pub fn memory_cache(mut self, cache: Arc<dyn ImageCachePort>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Sets the decoder for raw payloads.
    #[must_use]
    pub fn decoder(mut self, decoder: Arc<dyn Decoder>) -> Self {
        self.decoder = Some(decoder);
        self
    }

    /// Sets the geometric transformer.
    #[must_use]
    pub fn transformer(mut self, transformer: Arc<dyn ImageTransformer>) -> Self {
        self.transformer = Some(transformer);
        self
    }

    /// Adds a request handler. Handlers are tried in the order added.
    #[must_use]
    pub fn handler(mut self, handler: Arc<dyn RequestHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Starts the dispatcher and delivery tasks.
    ///
    /// # Errors
    /// Returns [`BuildError`] if a collaborator is missing or no runtime is
    /// available.
    pub fn build(self) -> Result<Pipeline, BuildError> {
        let runtime = Handle::try_current().map_err(|_| BuildError::NoRuntime)?;
        let cache = self.cache.ok_or(BuildError::MissingComponent("memory cache"))?;
        let decoder = self.decoder.ok_or(BuildError::MissingComponent("decoder"))?;
        let transformer = self
            .transformer
            .ok_or(BuildError::MissingComponent("transformer"))?;

        let stats = Arc::new(Stats::new());
        let logging_enabled = self.config.logging_enabled;
        let ctx = Arc::new(HuntContext {
            cache: cache.clone(),
            decoder,
            transformer,
            stats: stats.clone(),
            logging_enabled,
        });
        let executor = PriorityExecutor::new(self.thread_count, runtime.clone());
        let (dispatcher, handle, events) =
            Dispatcher::new(self.config, ctx, self.handlers, executor.clone());
        let dispatcher_task = runtime.spawn(dispatcher.run());

        let shared = Arc::new(Shared {
            dispatcher: handle,
            cache,
            stats,
            targets: Mutex::new(HashMap::new()),
            logging_enabled,
        });
        let delivery_task = runtime.spawn(deliver(events, shared.clone()));
        debug!(thread_count = executor.thread_count(), "pipeline started");

        Ok(Pipeline {
            shared,
            executor,
            next_action_id: AtomicU64::new(0),
            tasks: Mutex::new(vec![dispatcher_task, delivery_task]),
        })
    }
}

/// State shared between the pipeline and its delivery loop.
struct Shared {
    dispatcher: DispatcherHandle,
    cache: Arc<dyn ImageCachePort>,
    stats: Arc<Stats>,
    /// The one outstanding action per target.
    targets: Mutex<HashMap<TargetId, Action>>,
    logging_enabled: bool,
}

impl Shared {
    fn log(&self, verb: &str, ids: &str, extras: &str) {
        log_event(self.logging_enabled, OWNER_MAIN, verb, ids, extras);
    }

    /// Forgets `action` as its target's outstanding action, unless a newer
    /// one has replaced it.
    fn release_target(&self, action: &Action) {
        let mut targets = self.targets.lock();
        if targets
            .get(&action.target_id())
            .is_some_and(|current| current.id() == action.id())
        {
            targets.remove(&action.target_id());
        }
    }

    /// Applies one outcome to one action's target.
    fn deliver_action(&self, action: &Action, outcome: &HuntOutcome) {
        if action.is_cancelled() {
            return;
        }
        if !action.will_replay() {
            self.release_target(action);
        }
        let Some(target) = action.target() else {
            return;
        };
        match &outcome.result {
            Ok(image) => {
                let loaded_from = outcome.loaded_from.unwrap_or(LoadedFrom::Network);
                self.log(
                    VERB_COMPLETED,
                    &action.id().to_string(),
                    &format!("from {loaded_from}"),
                );
                target.on_success(image.clone(), loaded_from);
            }
            Err(error) => {
                self.log(VERB_ERRORED, &action.id().to_string(), &error.to_string());
                target.on_error(error, action.will_replay());
            }
        }
    }

    /// Serves a resumed action from memory or submits it again.
    async fn resume_action(&self, action: Action) {
        if action.is_cancelled() || action.is_target_gone() {
            return;
        }
        if action.request().memory_policy.should_read() {
            if let Some(image) = self.cache.get(action.key()).await {
                self.stats.cache_hit();
                self.release_target(&action);
                if let Some(target) = action.target() {
                    self.log(VERB_COMPLETED, &action.id().to_string(), "from Memory");
                    target.on_success(image, LoadedFrom::Memory);
                }
                return;
            }
        }
        self.dispatcher.dispatch_submit(action);
    }
}

async fn deliver(mut events: UnboundedReceiver<DispatchEvent>, shared: Arc<Shared>) {
    while let Some(event) = events.recv().await {
        match event {
            DispatchEvent::BatchComplete(outcomes) => {
                for outcome in &outcomes {
                    for action in &outcome.actions {
                        shared.deliver_action(action, outcome);
                    }
                }
            }
            DispatchEvent::ResumeBatch(actions) => {
                for action in actions {
                    shared.resume_action(action).await;
                }
            }
        }
    }
    debug!("delivery loop stopped");
}

/// An asynchronous image pipeline.
pub struct Pipeline {
    shared: Arc<Shared>,
    executor: PriorityExecutor,
    next_action_id: AtomicU64,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("executor", &self.executor)
            .field("outstanding", &self.shared.targets.lock().len())
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Starts building a pipeline.
    #[must_use]
    pub fn builder(config: DispatcherConfig) -> PipelineBuilder {
        PipelineBuilder {
            config,
            thread_count: DEFAULT_THREAD_COUNT,
            cache: None,
            decoder: None,
            transformer: None,
            handlers: Vec::new(),
        }
    }

    /// Loads `request` into `target`.
    ///
    /// A memory cache hit is delivered before this returns. Otherwise the
    /// outcome arrives later through the batched delivery. A target has at
    /// most one outstanding request: a previous one is cancelled.
    pub async fn load(&self, request: Request, target: &Arc<dyn Target>) {
        if self.is_shut_down() {
            warn!(request = %request.name(), "load after shutdown ignored");
            return;
        }
        self.cancel_request(target);

        let request = Arc::new(request);
        if request.memory_policy.should_read() {
            let key = request.key();
            if let Some(image) = self.shared.cache.get(&key).await {
                self.shared.stats.cache_hit();
                self.shared
                    .log(VERB_COMPLETED, &key.to_string(), "from Memory");
                target.on_success(image, LoadedFrom::Memory);
                return;
            }
        }

        let id = ActionId(self.next_action_id.fetch_add(1, Ordering::Relaxed) + 1);
        let action = Action::new(id, request, target);
        self.shared
            .log(VERB_CREATED, &id.to_string(), &action.key().to_string());
        self.shared
            .targets
            .lock()
            .insert(action.target_id(), action.clone());
        self.shared.dispatcher.dispatch_submit(action);
    }

    /// Withdraws the outstanding request of `target`, if any. The target
    /// receives nothing for it.
    pub fn cancel_request(&self, target: &Arc<dyn Target>) {
        let target_id = TargetId::of(&Arc::downgrade(target));
        let Some(action) = self.shared.targets.lock().remove(&target_id) else {
            return;
        };
        action.cancel();
        self.shared
            .log(VERB_CANCELED, &action.id().to_string(), "");
        self.shared.dispatcher.dispatch_cancel(action);
    }

    /// Pauses every request with `tag`, including future ones.
    pub fn pause_tag(&self, tag: Tag) {
        self.shared.dispatcher.dispatch_pause_tag(tag);
    }

    /// Resumes requests paused under `tag`.
    pub fn resume_tag(&self, tag: Tag) {
        self.shared.dispatcher.dispatch_resume_tag(tag);
    }

    /// Reports new network capabilities, `None` when there is no network.
    pub fn network_changed(&self, capabilities: Option<NetworkCapabilities>) {
        self.shared
            .dispatcher
            .dispatch_network_state_change(capabilities);
    }

    /// Reports an airplane mode transition.
    pub fn airplane_mode_changed(&self, airplane_mode: bool) {
        self.shared
            .dispatcher
            .dispatch_airplane_mode_change(airplane_mode);
    }

    /// Returns a snapshot of the pipeline counters.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.shared
            .stats
            .snapshot(self.shared.cache.len(), self.shared.cache.capacity())
    }

    /// Returns the dispatcher handle, for wiring external event sources.
    #[must_use]
    pub fn dispatcher(&self) -> &DispatcherHandle {
        &self.shared.dispatcher
    }

    /// Returns the current worker limit.
    #[must_use]
    pub fn thread_count(&self) -> usize {
        self.executor.thread_count()
    }

    /// Returns true once [`shutdown`](Self::shutdown) was called.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shared.dispatcher.is_shut_down()
    }

    /// Stops accepting requests and releases the workers. In-flight work is
    /// abandoned. Calling it again has no effect.
    pub fn shutdown(&self) {
        if self.is_shut_down() {
            return;
        }
        let outstanding: Vec<Action> = self.shared.targets.lock().drain().map(|(_, a)| a).collect();
        for action in &outstanding {
            action.cancel();
        }
        self.shared.dispatcher.shutdown();
        self.shared.log(
            VERB_IGNORED,
            &format!("{} outstanding", outstanding.len()),
            "because pipeline shut down",
        );
        debug!("pipeline shut down");
    }

    /// Shuts down and waits for the background tasks to stop.
    pub async fn shutdown_and_wait(&self) {
        self.shutdown();
        let tasks = std::mem::take(&mut *self.tasks.lock());
        futures_util::future::join_all(tasks).await;
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use image::DynamicImage;
    use tokio::sync::{Semaphore, mpsc};

    use super::*;
    use crate::application::services::hunter::tests::{IdentityTransformer, PassthroughDecoder};
    use crate::domain::errors::HuntError;
    use crate::domain::ports::MockTarget;
    use crate::domain::ports::mocks::{InMemoryCache, ScriptedHandler, Step};

    const WAIT: Duration = Duration::from_secs(5);

    #[derive(Debug, PartialEq)]
    enum Delivery {
        Success(LoadedFrom),
        Error(bool),
    }

    /// Forwards deliveries to a channel. Dropping it closes the channel.
    struct RecordingTarget(mpsc::UnboundedSender<Delivery>);

    impl Target for RecordingTarget {
        fn on_success(&self, _image: Arc<DynamicImage>, loaded_from: LoadedFrom) {
            let _ = self.0.send(Delivery::Success(loaded_from));
        }

        fn on_error(&self, _error: &HuntError, will_replay: bool) {
            let _ = self.0.send(Delivery::Error(will_replay));
        }
    }

    fn recording() -> (Arc<dyn Target>, mpsc::UnboundedReceiver<Delivery>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(RecordingTarget(tx)), rx)
    }

    fn config() -> DispatcherConfig {
        DispatcherConfig {
            batch_delay: Duration::from_millis(10),
            retry_delay: Duration::from_millis(10),
            scans_network_changes: true,
            logging_enabled: true,
        }
    }

    fn pipeline(cache: Arc<InMemoryCache>, handler: Arc<ScriptedHandler>) -> Pipeline {
        Pipeline::builder(config())
            .thread_count(2)
            .memory_cache(cache)
            .decoder(Arc::new(PassthroughDecoder))
            .transformer(Arc::new(IdentityTransformer))
            .handler(handler)
            .build()
            .unwrap()
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<Delivery>) -> Option<Delivery> {
        tokio::time::timeout(WAIT, rx.recv()).await.unwrap()
    }

    fn uri(uri: &str) -> Request {
        Request::uri(uri).build().unwrap()
    }

    #[tokio::test]
    async fn test_memory_hit_is_delivered_before_load_returns() {
        let cache = Arc::new(InMemoryCache::default());
        let handler = Arc::new(ScriptedHandler::new([Step::pixel()]));
        let request = uri("a");
        cache
            .put(request.key(), Arc::new(DynamicImage::new_rgba8(2, 2)))
            .await;
        let pipeline = pipeline(cache, handler.clone());

        let mut mock = MockTarget::new();
        mock.expect_on_success()
            .withf(|image, loaded_from| image.width() == 2 && *loaded_from == LoadedFrom::Memory)
            .times(1)
            .return_const(());
        let target: Arc<dyn Target> = Arc::new(mock);

        pipeline.load(request, &target).await;

        assert_eq!(handler.calls(), 0);
        assert_eq!(pipeline.stats().cache_hits, 1);
    }

    #[tokio::test]
    async fn test_load_delivers_through_batch() {
        let handler = Arc::new(ScriptedHandler::new([Step::pixel()]));
        let pipeline = pipeline(Arc::new(InMemoryCache::default()), handler.clone());
        let (target, mut rx) = recording();

        pipeline.load(uri("a"), &target).await;

        assert_eq!(next(&mut rx).await, Some(Delivery::Success(LoadedFrom::Network)));
        assert_eq!(handler.calls(), 1);

        pipeline.load(uri("a"), &target).await;
        assert_eq!(next(&mut rx).await, Some(Delivery::Success(LoadedFrom::Memory)));
        assert_eq!(handler.calls(), 1);
    }

    #[tokio::test]
    async fn test_new_load_replaces_outstanding_one() {
        let gate = Arc::new(Semaphore::new(0));
        let handler = Arc::new(ScriptedHandler::new([Step::pixel()]).gated(gate.clone()));
        let pipeline = pipeline(Arc::new(InMemoryCache::default()), handler.clone());
        let (target, mut rx) = recording();

        pipeline.load(uri("first"), &target).await;
        pipeline.load(uri("second"), &target).await;
        gate.add_permits(2);

        assert_eq!(next(&mut rx).await, Some(Delivery::Success(LoadedFrom::Network)));
        assert!(
            tokio::time::timeout(Duration::from_millis(100), rx.recv())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_cancelled_request_delivers_nothing() {
        let gate = Arc::new(Semaphore::new(0));
        let handler = Arc::new(ScriptedHandler::new([Step::pixel()]).gated(gate.clone()));
        let pipeline = pipeline(Arc::new(InMemoryCache::default()), handler);
        let (target, mut rx) = recording();

        pipeline.load(uri("a"), &target).await;
        pipeline.cancel_request(&target);
        gate.add_permits(1);

        assert!(
            tokio::time::timeout(Duration::from_millis(100), rx.recv())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_pipeline_does_not_keep_target_alive() {
        let gate = Arc::new(Semaphore::new(0));
        let handler = Arc::new(ScriptedHandler::new([Step::pixel()]).gated(gate.clone()));
        let pipeline = pipeline(Arc::new(InMemoryCache::default()), handler.clone());
        let (target, mut rx) = recording();

        pipeline.load(uri("a"), &target).await;
        drop(target);
        gate.add_permits(1);

        assert_eq!(next(&mut rx).await, None);
    }

    #[tokio::test]
    async fn test_paused_tag_resumes_and_delivers() {
        let handler = Arc::new(ScriptedHandler::new([Step::pixel()]));
        let pipeline = pipeline(Arc::new(InMemoryCache::default()), handler.clone());
        let (target, mut rx) = recording();
        let tag = Tag::named("gallery");

        pipeline.pause_tag(tag.clone());
        pipeline
            .load(Request::uri("a").tag(tag.clone()).build().unwrap(), &target)
            .await;
        assert!(
            tokio::time::timeout(Duration::from_millis(50), rx.recv())
                .await
                .is_err()
        );
        assert_eq!(handler.calls(), 0);

        pipeline.resume_tag(tag);
        assert_eq!(next(&mut rx).await, Some(Delivery::Success(LoadedFrom::Network)));
    }

    #[tokio::test]
    async fn test_stale_resume_keeps_newer_outstanding_action() {
        let cache = Arc::new(InMemoryCache::default());
        let handler = Arc::new(ScriptedHandler::new([Step::pixel()]));
        let request = uri("a");
        cache
            .put(request.key(), Arc::new(DynamicImage::new_rgba8(2, 2)))
            .await;
        let pipeline = pipeline(cache, handler.clone());
        let (target, mut rx) = recording();
        let stale = Action::new(ActionId(1), Arc::new(request), &target);
        let newer = Action::new(ActionId(2), Arc::new(uri("b")), &target);
        pipeline
            .shared
            .targets
            .lock()
            .insert(newer.target_id(), newer.clone());

        pipeline.shared.resume_action(stale).await;

        assert_eq!(next(&mut rx).await, Some(Delivery::Success(LoadedFrom::Memory)));
        let targets = pipeline.shared.targets.lock();
        assert_eq!(targets.get(&newer.target_id()).map(Action::id), Some(ActionId(2)));
        assert_eq!(handler.calls(), 0);
    }

    #[tokio::test]
    async fn test_failure_is_delivered_as_error() {
        let handler = Arc::new(ScriptedHandler::new([Step::Fail(HuntError::response(
            404,
            crate::domain::entities::NetworkPolicy::empty(),
        ))]));
        let pipeline = pipeline(Arc::new(InMemoryCache::default()), handler);
        let (target, mut rx) = recording();

        pipeline.load(uri("a"), &target).await;

        assert_eq!(next(&mut rx).await, Some(Delivery::Error(false)));
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent_and_stops_loads() {
        let handler = Arc::new(ScriptedHandler::new([Step::pixel()]));
        let pipeline = pipeline(Arc::new(InMemoryCache::default()), handler.clone());
        let (target, _rx) = recording();

        pipeline.shutdown_and_wait().await;
        pipeline.shutdown();
        assert!(pipeline.is_shut_down());

        pipeline.load(uri("a"), &target).await;
        assert_eq!(handler.calls(), 0);
    }

    #[tokio::test]
    async fn test_network_change_resizes_pool() {
        let pipeline = pipeline(
            Arc::new(InMemoryCache::default()),
            Arc::new(ScriptedHandler::new([Step::pixel()])),
        );

        pipeline.network_changed(Some(NetworkCapabilities::connected(
            crate::domain::network::Transport::WIFI,
        )));
        tokio::time::timeout(WAIT, async {
            while pipeline.thread_count() != 4 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[test]
    fn test_build_requires_collaborators() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let _guard = runtime.enter();

        let error = Pipeline::builder(DispatcherConfig::default())
            .build()
            .unwrap_err();
        assert!(matches!(error, BuildError::MissingComponent("memory cache")));
    }

    #[test]
    fn test_build_requires_runtime() {
        let error = Pipeline::builder(DispatcherConfig::default())
            .memory_cache(Arc::new(InMemoryCache::default()))
            .build()
            .unwrap_err();
        assert!(matches!(error, BuildError::NoRuntime));
    }
}
