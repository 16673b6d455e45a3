//! A single caller's request bound to a delivery target.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use super::image_key::ImageKey;
use super::priority::Priority;
use super::request::Request;
use crate::domain::ports::Target;

/// Identity of a target, derived from its allocation.
///
/// The owning [`Action`] keeps a weak reference to the target, which pins
/// the allocation address for as long as the id is in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(usize);

impl TargetId {
    /// Returns the id of the target behind `target`.
    #[must_use]
    pub fn of(target: &Weak<dyn Target>) -> Self {
        Self(target.as_ptr().cast::<()>() as usize)
    }
}

impl std::fmt::Display for TargetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Grouping identity used to pause and resume many actions at once.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Tag {
    /// A caller-chosen name.
    Named(Arc<str>),
    /// The default tag: the action's own target.
    Target(TargetId),
}

impl Tag {
    /// Creates a named tag.
    #[must_use]
    pub fn named(name: impl Into<Arc<str>>) -> Self {
        Self::Named(name.into())
    }
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Named(name) => write!(f, "{name}"),
            Self::Target(id) => write!(f, "target@{id}"),
        }
    }
}

/// Sequence number identifying an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActionId(pub u64);

impl std::fmt::Display for ActionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[R{}]", self.0)
    }
}

/// One caller's in-flight request.
///
/// Clones share the cancellation flag, so a clone parked in the dispatcher
/// observes a cancellation made through the caller's copy.
#[derive(Clone)]
pub struct Action {
    id: ActionId,
    key: ImageKey,
    request: Arc<Request>,
    tag: Tag,
    target: Weak<dyn Target>,
    target_id: TargetId,
    cancelled: Arc<AtomicBool>,
    will_replay: bool,
}

impl std::fmt::Debug for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Action")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("priority", &self.request.priority)
            .field("tag", &self.tag)
            .field("target_id", &self.target_id)
            .field("cancelled", &self.is_cancelled())
            .field("will_replay", &self.will_replay)
            .finish()
    }
}

impl PartialEq for Action {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Action {}

impl Action {
    /// Creates an action delivering `request` to `target`.
    ///
    /// Only a weak reference to the target is kept.
    #[must_use]
    pub fn new(id: ActionId, request: Arc<Request>, target: &Arc<dyn Target>) -> Self {
        let target = Arc::downgrade(target);
        let target_id = TargetId::of(&target);
        let tag = request.tag.clone().unwrap_or(Tag::Target(target_id));
        Self {
            id,
            key: request.key(),
            request,
            tag,
            target,
            target_id,
            cancelled: Arc::new(AtomicBool::new(false)),
            will_replay: false,
        }
    }

    /// Returns the action id.
    #[must_use]
    pub const fn id(&self) -> ActionId {
        self.id
    }

    /// Returns the derived cache key.
    #[must_use]
    pub const fn key(&self) -> &ImageKey {
        &self.key
    }

    /// Returns the request.
    #[must_use]
    pub fn request(&self) -> &Arc<Request> {
        &self.request
    }

    /// Returns the request priority.
    #[must_use]
    pub fn priority(&self) -> Priority {
        self.request.priority
    }

    /// Returns the grouping tag.
    #[must_use]
    pub const fn tag(&self) -> &Tag {
        &self.tag
    }

    /// Returns the target identity.
    #[must_use]
    pub const fn target_id(&self) -> TargetId {
        self.target_id
    }

    /// Returns the target if it is still alive.
    #[must_use]
    pub fn target(&self) -> Option<Arc<dyn Target>> {
        self.target.upgrade()
    }

    /// Returns true if the target has been dropped.
    #[must_use]
    pub fn is_target_gone(&self) -> bool {
        self.target.strong_count() == 0
    }

    /// Marks the action as withdrawn by the caller.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Returns true if the caller withdrew the action.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Returns true if the action is kept for replay after a failure.
    #[must_use]
    pub const fn will_replay(&self) -> bool {
        self.will_replay
    }

    /// Sets the replay flag.
    pub fn set_will_replay(&mut self, will_replay: bool) {
        self.will_replay = will_replay;
    }
}
