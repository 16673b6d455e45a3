//! The coalescing unit of work for one cache key.
//!
//! A [`Hunter`] lives in the dispatcher's map and is only touched by the
//! dispatcher task. The work it submits to the executor is a [`HuntJob`],
//! which owns copies of everything it needs and reports back through the
//! dispatcher's message channel.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use image::DynamicImage;
use image::metadata::Orientation;
use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedSender;
use tracing::error;

use super::dispatcher::DispatcherMessage;
use super::pipeline_log::{
    OWNER_HUNTER, VERB_DECODED, VERB_EXECUTING, VERB_JOINED, VERB_REMOVED, VERB_TRANSFORMED,
    log_event,
};
use super::priority_executor::TaskHandle;
use super::stats::Stats;
use crate::domain::entities::{
    Action, ActionId, ImageKey, LoadedFrom, MemoryPolicy, NetworkPolicy, Priority, Request,
    SharedPriority,
};
use crate::domain::errors::HuntError;
use crate::domain::ports::{Decoder, FetchPayload, ImageCachePort, ImageTransformer, RequestHandler};

/// Serializes the transform phase across all workers to bound peak memory.
static DECODE_LOCK: Mutex<()> = parking_lot::const_mutex(());

/// Collaborators shared by every hunt.
pub struct HuntContext {
    /// Memory cache consulted before fetching and written on completion.
    pub cache: Arc<dyn ImageCachePort>,
    /// Decoder for raw payloads.
    pub decoder: Arc<dyn Decoder>,
    /// Geometric transformer.
    pub transformer: Arc<dyn ImageTransformer>,
    /// Counters.
    pub stats: Arc<Stats>,
    /// Enables verbose verb logging.
    pub logging_enabled: bool,
}

impl HuntContext {
    pub(crate) fn log(&self, owner: &str, verb: &str, ids: &str, extras: &str) {
        log_event(self.logging_enabled, owner, verb, ids, extras);
    }
}

/// One unique key being loaded on behalf of one or more actions.
pub struct Hunter {
    id: u64,
    key: ImageKey,
    request: Arc<Request>,
    memory_policy: MemoryPolicy,
    network_policy: NetworkPolicy,
    handler: Arc<dyn RequestHandler>,
    retry_count: u32,
    attempts: u32,
    priority: SharedPriority,
    action: Option<Action>,
    actions: Vec<Action>,
    handle: Option<TaskHandle>,
    result: Option<Arc<DynamicImage>>,
    loaded_from: Option<LoadedFrom>,
    error: Option<HuntError>,
}

impl std::fmt::Debug for Hunter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hunter")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("priority", &self.priority.get())
            .field("retry_count", &self.retry_count)
            .field("actions", &self.log_ids())
            .finish_non_exhaustive()
    }
}

impl Hunter {
    /// Creates a hunter for `action` served by `handler`.
    pub fn new(id: u64, action: Action, handler: Arc<dyn RequestHandler>) -> Self {
        let request = action.request().clone();
        Self {
            id,
            key: action.key().clone(),
            memory_policy: request.memory_policy,
            network_policy: request.network_policy,
            retry_count: handler.retry_count(),
            attempts: 0,
            priority: SharedPriority::new(action.priority()),
            request,
            handler,
            action: Some(action),
            actions: Vec::new(),
            handle: None,
            result: None,
            loaded_from: None,
            error: None,
        }
    }

    pub const fn id(&self) -> u64 {
        self.id
    }

    pub const fn key(&self) -> &ImageKey {
        &self.key
    }

    pub const fn memory_policy(&self) -> MemoryPolicy {
        self.memory_policy
    }

    pub const fn network_policy(&self) -> NetworkPolicy {
        self.network_policy
    }

    pub fn priority(&self) -> Priority {
        self.priority.get()
    }

    /// The live priority cell read by the executor.
    pub fn priority_cell(&self) -> SharedPriority {
        self.priority.clone()
    }

    pub const fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Attached actions, primary first.
    pub fn actions(&self) -> impl Iterator<Item = &Action> {
        self.action.iter().chain(self.actions.iter())
    }

    fn actions_mut(&mut self) -> impl Iterator<Item = &mut Action> {
        self.action.iter_mut().chain(self.actions.iter_mut())
    }

    /// Flags every attached action for replay and returns copies of them.
    pub fn mark_for_replay(&mut self) -> Vec<Action> {
        self.actions_mut()
            .map(|action| {
                action.set_will_replay(true);
                action.clone()
            })
            .collect()
    }

    pub fn has_actions(&self) -> bool {
        self.action.is_some() || !self.actions.is_empty()
    }

    /// Removes and returns all attached actions, primary first.
    pub fn take_actions(&mut self) -> Vec<Action> {
        let mut taken: Vec<Action> = self.action.take().into_iter().collect();
        taken.append(&mut self.actions);
        self.priority.set(Priority::Low);
        taken
    }

    /// Joins another action for the same key and raises the priority if needed.
    pub fn attach(&mut self, action: Action, ctx: &HuntContext) {
        ctx.log(
            OWNER_HUNTER,
            VERB_JOINED,
            &action.id().to_string(),
            &format!("to {}", self.log_ids()),
        );
        if self.action.is_none() {
            self.action = Some(action);
        } else {
            self.actions.push(action);
        }
        self.priority.set(self.compute_priority());
    }

    /// Removes the action with `id`. Returns it if it was attached.
    pub fn detach(&mut self, id: ActionId, ctx: &HuntContext) -> Option<Action> {
        let detached = if self.action.as_ref().is_some_and(|a| a.id() == id) {
            self.action.take()
        } else {
            self.actions
                .iter()
                .position(|a| a.id() == id)
                .map(|index| self.actions.remove(index))
        }?;

        if detached.priority() == self.priority.get() {
            self.priority.set(self.compute_priority());
        }
        ctx.log(
            OWNER_HUNTER,
            VERB_REMOVED,
            &id.to_string(),
            &format!("from {}", self.log_ids()),
        );
        Some(detached)
    }

    /// Removes every attached action matching `predicate`.
    pub fn detach_matching(
        &mut self,
        predicate: impl Fn(&Action) -> bool,
        ctx: &HuntContext,
    ) -> Vec<Action> {
        let ids: Vec<ActionId> = self.actions().filter(|a| predicate(a)).map(Action::id).collect();
        ids.into_iter()
            .filter_map(|id| self.detach(id, ctx))
            .collect()
    }

    fn compute_priority(&self) -> Priority {
        self.actions()
            .map(Action::priority)
            .max()
            .unwrap_or(Priority::Low)
    }

    /// Cancels the scheduled work, allowed only once no action is attached.
    ///
    /// Returns false if actions remain or the work already started.
    pub fn cancel(&self) -> bool {
        !self.has_actions() && self.handle.as_ref().is_some_and(TaskHandle::cancel)
    }

    pub fn is_cancelled(&self) -> bool {
        self.handle.as_ref().is_some_and(TaskHandle::is_cancelled)
    }

    pub fn set_handle(&mut self, handle: TaskHandle) {
        self.handle = Some(handle);
    }

    /// Consumes one unit of the retry budget.
    ///
    /// A budget of N makes the Nth transient failure terminal.
    pub fn should_retry(&mut self, airplane_mode: bool, connected: bool) -> bool {
        self.retry_count = self.retry_count.saturating_sub(1);
        self.retry_count > 0 && self.handler.should_retry(airplane_mode, connected)
    }

    pub fn supports_replay(&self) -> bool {
        self.handler.supports_replay()
    }

    /// Forces the next attempt past the disk cache.
    pub fn bypass_disk_cache(&mut self) {
        self.network_policy |= NetworkPolicy::NO_CACHE;
    }

    pub fn error(&self) -> Option<&HuntError> {
        self.error.as_ref()
    }

    pub fn set_error(&mut self, error: HuntError) {
        self.error = Some(error);
    }

    pub fn set_result(&mut self, image: Arc<DynamicImage>, loaded_from: LoadedFrom) {
        self.result = Some(image);
        self.loaded_from = Some(loaded_from);
        self.error = None;
    }

    /// Splits the hunter into its delivery parts.
    pub fn into_outcome(mut self) -> crate::domain::entities::HuntOutcome {
        let actions = self.take_actions();
        let result = match (self.result, self.error) {
            (Some(image), _) => Ok(image),
            (None, Some(error)) => Err(error),
            (None, None) => Err(HuntError::NoResult),
        };
        crate::domain::entities::HuntOutcome {
            key: self.key,
            actions,
            result,
            loaded_from: self.loaded_from,
        }
    }

    /// Ids of the attached actions for logging.
    pub fn log_ids(&self) -> String {
        let ids: Vec<String> = self.actions().map(|a| a.id().to_string()).collect();
        ids.join(", ")
    }

    /// Builds the work item for the next attempt.
    ///
    /// The final allowed attempt after a failure runs offline-only so local
    /// caches get one last chance.
    pub fn next_job(&mut self, ctx: Arc<HuntContext>) -> HuntJob {
        let network_policy = if self.attempts > 0 && self.retry_count == 1 {
            NetworkPolicy::OFFLINE
        } else {
            self.network_policy
        };
        self.attempts += 1;
        HuntJob {
            hunter_id: self.id,
            key: self.key.clone(),
            request: self.request.clone(),
            memory_policy: self.memory_policy,
            network_policy,
            handler: self.handler.clone(),
            ctx,
        }
    }
}

/// One execution attempt of a hunter, run on an executor worker.
pub struct HuntJob {
    hunter_id: u64,
    key: ImageKey,
    request: Arc<Request>,
    memory_policy: MemoryPolicy,
    network_policy: NetworkPolicy,
    handler: Arc<dyn RequestHandler>,
    ctx: Arc<HuntContext>,
}

impl HuntJob {
    /// Runs the attempt and reports the outcome to the dispatcher.
    pub async fn run(self, dispatcher: UnboundedSender<DispatcherMessage>) {
        self.ctx
            .log(OWNER_HUNTER, VERB_EXECUTING, &self.key.to_string(), "");

        let hunter_id = self.hunter_id;
        let message = match self.hunt().await {
            Ok((image, loaded_from)) => DispatcherMessage::HunterCompleted {
                hunter_id,
                key: self.key,
                image,
                loaded_from,
            },
            Err(error) if error.is_offline_miss() => DispatcherMessage::HunterFailed {
                hunter_id,
                key: self.key,
                error: HuntError::NoResult,
            },
            Err(error) if error.is_transient() => DispatcherMessage::HunterTransientFailure {
                hunter_id,
                key: self.key,
                error,
            },
            Err(error @ HuntError::ResourceExhausted { .. }) => {
                let snapshot = self
                    .ctx
                    .stats
                    .snapshot(self.ctx.cache.len(), self.ctx.cache.capacity());
                DispatcherMessage::HunterFailed {
                    hunter_id,
                    key: self.key,
                    error: error.with_context(snapshot.to_string()),
                }
            }
            Err(error) => DispatcherMessage::HunterFailed {
                hunter_id,
                key: self.key,
                error,
            },
        };
        let _ = dispatcher.send(message);
    }

    async fn hunt(&self) -> Result<(Arc<DynamicImage>, LoadedFrom), HuntError> {
        let ctx = &self.ctx;
        if self.memory_policy.should_read() {
            if let Some(image) = ctx.cache.get(&self.key).await {
                ctx.stats.cache_hit();
                return Ok((image, LoadedFrom::Memory));
            }
            ctx.stats.cache_miss();
        }

        let fetched = self.handler.load(&self.request, self.network_policy).await?;
        let loaded_from = fetched.loaded_from;

        let (image, orientation) = match fetched.payload {
            FetchPayload::Image(image) => (
                image,
                fetched.orientation.unwrap_or(Orientation::NoTransforms),
            ),
            FetchPayload::Bytes(bytes) => {
                if loaded_from == LoadedFrom::Network {
                    ctx.stats.download_finished(bytes.len() as u64);
                }
                let decoder = ctx.decoder.clone();
                let request = self.request.clone();
                let decoded = tokio::task::spawn_blocking(move || decoder.decode(&bytes, &request))
                    .await
                    .map_err(|e| HuntError::internal(format!("decoder task failed: {e}")))??;
                (
                    decoded.image,
                    fetched.orientation.unwrap_or(decoded.orientation),
                )
            }
        };
        ctx.stats.image_decoded(&image);
        ctx.log(OWNER_HUNTER, VERB_DECODED, &self.key.to_string(), "");

        if !self.request.needs_transformation() && orientation == Orientation::NoTransforms {
            return Ok((Arc::new(image), loaded_from));
        }

        let transformer = ctx.transformer.clone();
        let request = self.request.clone();
        let image = tokio::task::spawn_blocking(move || {
            let _guard = DECODE_LOCK.lock();
            let image = transformer.transform(&request, image, orientation);
            apply_custom_transformations(&request, image)
        })
        .await
        .map_err(|e| HuntError::internal(format!("transform task failed: {e}")))??;

        ctx.stats.image_transformed(&image);
        ctx.log(OWNER_HUNTER, VERB_TRANSFORMED, &self.key.to_string(), "");
        Ok((Arc::new(image), loaded_from))
    }
}

/// Runs the request's custom transformations in order, enforcing their contract.
fn apply_custom_transformations(
    request: &Request,
    mut image: DynamicImage,
) -> Result<DynamicImage, HuntError> {
    for transformation in &request.transformations {
        let key = transformation.key();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| transformation.transform(image)));
        let violation = match outcome {
            Ok(Some(next)) if next.width() > 0 && next.height() > 0 => {
                image = next;
                continue;
            }
            Ok(Some(_)) => "returned an empty image",
            Ok(None) => "returned no image",
            Err(_) => "crashed",
        };
        error!(
            transformation = %key,
            request = %request.name(),
            "transformation {violation}"
        );
        return Err(HuntError::transform_contract(key, violation));
    }
    Ok(image)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::ports::mocks::{InMemoryCache, ScriptedHandler, Step};
    use crate::domain::ports::{Decoded, MockTarget, Target, Transformation};

    pub struct PassthroughDecoder;

    impl Decoder for PassthroughDecoder {
        fn decode(&self, bytes: &[u8], _request: &Request) -> Result<Decoded, HuntError> {
            if bytes.is_empty() {
                return Err(HuntError::decode("empty payload"));
            }
            Ok(Decoded {
                image: DynamicImage::new_rgba8(u32::try_from(bytes.len()).unwrap(), 1),
                orientation: Orientation::NoTransforms,
            })
        }
    }

    pub struct IdentityTransformer;

    impl ImageTransformer for IdentityTransformer {
        fn transform(
            &self,
            _request: &Request,
            image: DynamicImage,
            _orientation: Orientation,
        ) -> DynamicImage {
            image
        }
    }

    pub fn context(cache: Arc<InMemoryCache>) -> Arc<HuntContext> {
        Arc::new(HuntContext {
            cache,
            decoder: Arc::new(PassthroughDecoder),
            transformer: Arc::new(IdentityTransformer),
            stats: Arc::new(Stats::new()),
            logging_enabled: true,
        })
    }

    pub fn target() -> Arc<dyn Target> {
        Arc::new(MockTarget::new())
    }

    pub fn action(id: u64, request: Request, target: &Arc<dyn Target>) -> Action {
        Action::new(ActionId(id), Arc::new(request), target)
    }

    fn request(priority: Priority) -> Request {
        Request::uri("https://example.com/a.png")
            .priority(priority)
            .build()
            .unwrap()
    }

    struct Named(&'static str, Option<DynamicImage>);

    impl Transformation for Named {
        fn key(&self) -> String {
            self.0.to_string()
        }

        fn transform(&self, _source: DynamicImage) -> Option<DynamicImage> {
            self.1.clone()
        }
    }

    struct Exploding;

    impl Transformation for Exploding {
        fn key(&self) -> String {
            "boom".to_string()
        }

        fn transform(&self, _source: DynamicImage) -> Option<DynamicImage> {
            panic!("transformation bug")
        }
    }

    fn handler() -> Arc<dyn RequestHandler> {
        Arc::new(ScriptedHandler::new([Step::pixel()]).with_retries(3))
    }

    #[test]
    fn test_attach_raises_priority() {
        let ctx = context(Arc::new(InMemoryCache::default()));
        let (t1, t2) = (target(), target());
        let mut hunter = Hunter::new(1, action(1, request(Priority::Normal), &t1), handler());
        assert_eq!(hunter.priority(), Priority::Normal);

        hunter.attach(action(2, request(Priority::High), &t2), &ctx);
        assert_eq!(hunter.priority(), Priority::High);
        assert_eq!(hunter.actions().count(), 2);
    }

    #[test]
    fn test_detach_max_recomputes_from_remaining() {
        let ctx = context(Arc::new(InMemoryCache::default()));
        let targets: Vec<_> = (0..3).map(|_| target()).collect();
        let mut hunter = Hunter::new(1, action(1, request(Priority::Low), &targets[0]), handler());
        hunter.attach(action(2, request(Priority::High), &targets[1]), &ctx);
        hunter.attach(action(3, request(Priority::Normal), &targets[2]), &ctx);

        assert!(hunter.detach(ActionId(2), &ctx).is_some());
        assert_eq!(hunter.priority(), Priority::Normal);

        assert!(hunter.detach(ActionId(3), &ctx).is_some());
        assert_eq!(hunter.priority(), Priority::Low);

        assert!(hunter.detach(ActionId(1), &ctx).is_some());
        assert_eq!(hunter.priority(), Priority::Low);
        assert!(!hunter.has_actions());
    }

    #[test]
    fn test_detach_unknown_action_is_noop() {
        let ctx = context(Arc::new(InMemoryCache::default()));
        let t = target();
        let mut hunter = Hunter::new(1, action(1, request(Priority::High), &t), handler());

        assert!(hunter.detach(ActionId(9), &ctx).is_none());
        assert_eq!(hunter.priority(), Priority::High);
    }

    #[test]
    fn test_cancel_requires_no_actions() {
        let ctx = context(Arc::new(InMemoryCache::default()));
        let t = target();
        let mut hunter = Hunter::new(1, action(1, request(Priority::Normal), &t), handler());
        hunter.set_handle(TaskHandle::detached());

        assert!(!hunter.cancel());
        hunter.detach(ActionId(1), &ctx);
        assert!(hunter.cancel());
        assert!(hunter.is_cancelled());
    }

    #[test]
    fn test_retry_budget_counts_failures() {
        let t = target();
        let mut hunter = Hunter::new(1, action(1, request(Priority::Normal), &t), handler());

        assert!(hunter.should_retry(false, true));
        assert!(hunter.should_retry(false, true));
        assert!(!hunter.should_retry(false, true));
        assert!(!hunter.should_retry(false, true));
    }

    #[test]
    fn test_final_attempt_is_offline() {
        let ctx = context(Arc::new(InMemoryCache::default()));
        let t = target();
        let mut hunter = Hunter::new(1, action(1, request(Priority::Normal), &t), handler());

        assert_eq!(hunter.next_job(ctx.clone()).network_policy, NetworkPolicy::empty());
        assert!(hunter.should_retry(false, true));
        assert_eq!(hunter.next_job(ctx.clone()).network_policy, NetworkPolicy::empty());
        assert!(hunter.should_retry(false, true));
        assert_eq!(hunter.next_job(ctx).network_policy, NetworkPolicy::OFFLINE);
    }

    #[tokio::test]
    async fn test_hunt_memory_hit_skips_handler() {
        let cache = Arc::new(InMemoryCache::default());
        let ctx = context(cache.clone());
        let scripted = Arc::new(ScriptedHandler::new([Step::pixel()]));
        let t = target();
        let action = action(1, request(Priority::Normal), &t);
        cache
            .put(action.key().clone(), Arc::new(DynamicImage::new_rgb8(3, 3)))
            .await;

        let mut hunter = Hunter::new(1, action, scripted.clone());
        let (image, loaded_from) = hunter.next_job(ctx.clone()).hunt().await.unwrap();

        assert_eq!(loaded_from, LoadedFrom::Memory);
        assert_eq!(image.width(), 3);
        assert_eq!(scripted.calls(), 0);
        assert_eq!(ctx.stats.snapshot(0, 0).cache_hits, 1);
    }

    #[tokio::test]
    async fn test_hunt_decodes_bytes() {
        let ctx = context(Arc::new(InMemoryCache::default()));
        let scripted = Arc::new(ScriptedHandler::new([Step::Bytes(bytes::Bytes::from_static(
            b"four",
        ))]));
        let t = target();
        let mut hunter = Hunter::new(1, action(1, request(Priority::Normal), &t), scripted);

        let (image, loaded_from) = hunter.next_job(ctx.clone()).hunt().await.unwrap();
        assert_eq!(image.width(), 4);
        assert_eq!(loaded_from, LoadedFrom::Network);

        let snapshot = ctx.stats.snapshot(0, 0);
        assert_eq!(snapshot.download_count, 1);
        assert_eq!(snapshot.total_download_size, 4);
        assert_eq!(snapshot.decoded_count, 1);
    }

    #[tokio::test]
    async fn test_hunt_undecodable_bytes_is_transient() {
        let ctx = context(Arc::new(InMemoryCache::default()));
        let scripted = Arc::new(ScriptedHandler::new([Step::Bytes(bytes::Bytes::new())]));
        let t = target();
        let mut hunter = Hunter::new(1, action(1, request(Priority::Normal), &t), scripted);

        let error = hunter.next_job(ctx).hunt().await.unwrap_err();
        assert!(error.is_transient());
    }

    #[tokio::test]
    async fn test_hunt_applies_custom_transformations() {
        let ctx = context(Arc::new(InMemoryCache::default()));
        let t = target();
        let request = Request::uri("a")
            .transform(Arc::new(Named("grow", Some(DynamicImage::new_rgba8(7, 7)))))
            .build()
            .unwrap();
        let mut hunter = Hunter::new(
            1,
            action(1, request, &t),
            Arc::new(ScriptedHandler::new([Step::pixel()])),
        );

        let (image, _) = hunter.next_job(ctx.clone()).hunt().await.unwrap();
        assert_eq!(image.width(), 7);
        assert_eq!(ctx.stats.snapshot(0, 0).transformed_count, 1);
    }

    #[test]
    fn test_transformation_returning_nothing_breaks_contract() {
        let request = Request::uri("a")
            .transform(Arc::new(Named("void", None)))
            .build()
            .unwrap();

        let error = apply_custom_transformations(&request, DynamicImage::new_rgba8(1, 1)).unwrap_err();
        assert!(matches!(error, HuntError::TransformContract { ref key, .. } if key == "void"));
    }

    #[test]
    fn test_transformation_returning_empty_image_breaks_contract() {
        let request = Request::uri("a")
            .transform(Arc::new(Named("shrink", Some(DynamicImage::new_rgba8(0, 0)))))
            .build()
            .unwrap();

        let error = apply_custom_transformations(&request, DynamicImage::new_rgba8(1, 1)).unwrap_err();
        assert!(matches!(error, HuntError::TransformContract { .. }));
    }

    #[test]
    fn test_panicking_transformation_breaks_contract() {
        let request = Request::uri("a")
            .transform(Arc::new(Exploding))
            .build()
            .unwrap();

        let error = apply_custom_transformations(&request, DynamicImage::new_rgba8(1, 1)).unwrap_err();
        assert!(matches!(error, HuntError::TransformContract { ref reason, .. } if reason == "crashed"));
    }

    #[tokio::test]
    async fn test_run_reports_offline_miss_as_no_result() {
        let ctx = context(Arc::new(InMemoryCache::default()));
        let scripted = Arc::new(ScriptedHandler::new([Step::Fail(HuntError::response(
            504,
            NetworkPolicy::OFFLINE,
        ))]));
        let t = target();
        let mut hunter = Hunter::new(5, action(1, request(Priority::Normal), &t), scripted);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        hunter.next_job(ctx).run(tx).await;

        match rx.recv().await {
            Some(DispatcherMessage::HunterFailed { hunter_id, error, .. }) => {
                assert_eq!(hunter_id, 5);
                assert!(matches!(error, HuntError::NoResult));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_run_attaches_stats_to_exhaustion() {
        let ctx = context(Arc::new(InMemoryCache::default()));
        let scripted = Arc::new(ScriptedHandler::new([Step::Fail(HuntError::exhausted(
            "allocation failed",
        ))]));
        let t = target();
        let mut hunter = Hunter::new(1, action(1, request(Priority::Normal), &t), scripted);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        hunter.next_job(ctx).run(tx).await;

        match rx.recv().await {
            Some(DispatcherMessage::HunterFailed {
                error: HuntError::ResourceExhausted { context, .. },
                ..
            }) => assert!(context.contains("BEGIN HUNTER STATS")),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_run_reports_transient_failure() {
        let ctx = context(Arc::new(InMemoryCache::default()));
        let scripted = Arc::new(ScriptedHandler::new([Step::Fail(HuntError::io("reset"))]));
        let t = target();
        let mut hunter = Hunter::new(1, action(1, request(Priority::Normal), &t), scripted);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        hunter.next_job(ctx).run(tx).await;

        assert!(matches!(
            rx.recv().await,
            Some(DispatcherMessage::HunterTransientFailure { .. })
        ));
    }
}
