//! Immutable description of what to load and how to transform it.

use std::fmt::Write as _;
use std::sync::Arc;

use super::action::Tag;
use super::image_key::ImageKey;
use super::policy::{MemoryPolicy, NetworkPolicy};
use super::priority::Priority;
use crate::domain::errors::RequestError;
use crate::domain::ports::Transformation;

const KEY_SEPARATOR: char = '\n';
const KEY_PADDING: usize = 50;
const RESOURCE_KEY_PREFIX: &str = "res:";

/// Identity of the underlying resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceId {
    /// A URI such as `https://...` or `file:///...`.
    Uri(String),
    /// A numeric resource bundled with the application.
    Resource(u32),
}

impl ResourceId {
    /// Returns the URI if this resource is addressed by one.
    #[must_use]
    pub fn uri(&self) -> Option<&str> {
        match self {
            Self::Uri(uri) => Some(uri),
            Self::Resource(_) => None,
        }
    }

    /// Identity used in cache keys. Bundled resources carry a prefix so
    /// `42` and the URI `"42"` stay apart.
    fn key_identity(&self) -> String {
        match self {
            Self::Uri(uri) => uri.clone(),
            Self::Resource(id) => format!("{RESOURCE_KEY_PREFIX}{id}"),
        }
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uri(uri) => write!(f, "{uri}"),
            Self::Resource(id) => write!(f, "{id}"),
        }
    }
}

/// Anchor used when center-cropping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum Gravity {
    /// Keep the middle of the image.
    #[default]
    Center,
    /// Keep the top edge.
    Top,
    /// Keep the bottom edge.
    Bottom,
    /// Keep the leading edge.
    Start,
    /// Keep the trailing edge.
    End,
}

impl Gravity {
    /// Stable numeric code used in cache keys.
    #[must_use]
    pub const fn code(self) -> u32 {
        match self {
            Self::Center => 17,
            Self::Top => 48,
            Self::Bottom => 80,
            Self::Start => 0x0080_0003,
            Self::End => 0x0080_0005,
        }
    }
}

/// How the decoded image is fitted into the target size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum CropMode {
    /// Scale to the exact target size.
    #[default]
    None,
    /// Scale to fill the target and crop the overflow.
    CenterCrop(Gravity),
    /// Scale to fit inside the target.
    CenterInside,
}

/// Rotation applied to the decoded image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rotation {
    /// Clockwise degrees.
    pub degrees: f32,
    /// Optional pivot point.
    pub pivot: Option<(f32, f32)>,
}

/// An immutable image request.
#[derive(Clone, Default)]
pub struct Request {
    /// The resource to load.
    pub resource: Option<ResourceId>,
    /// Explicit cache identity overriding the resource for keying.
    pub stable_key: Option<String>,
    /// Target width, 0 when unset.
    pub target_width: u32,
    /// Target height, 0 when unset.
    pub target_height: u32,
    /// Fit mode.
    pub crop: CropMode,
    /// Never scale up.
    pub only_scale_down: bool,
    /// Rotation, if any.
    pub rotation: Option<Rotation>,
    /// Custom transformations in application order.
    pub transformations: Vec<Arc<dyn Transformation>>,
    /// Scheduling priority.
    pub priority: Priority,
    /// Grouping tag, defaults to the target.
    pub tag: Option<Tag>,
    /// Memory cache policy.
    pub memory_policy: MemoryPolicy,
    /// Network policy.
    pub network_policy: NetworkPolicy,
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let transformations: Vec<String> = self.transformations.iter().map(|t| t.key()).collect();
        f.debug_struct("Request")
            .field("resource", &self.resource)
            .field("stable_key", &self.stable_key)
            .field("target_width", &self.target_width)
            .field("target_height", &self.target_height)
            .field("crop", &self.crop)
            .field("only_scale_down", &self.only_scale_down)
            .field("rotation", &self.rotation)
            .field("transformations", &transformations)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

impl Request {
    /// Starts building a request for a URI.
    #[must_use]
    pub fn uri(uri: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(ResourceId::Uri(uri.into()))
    }

    /// Starts building a request for a bundled resource.
    #[must_use]
    pub fn resource(id: u32) -> RequestBuilder {
        RequestBuilder::new(ResourceId::Resource(id))
    }

    /// Returns true if a target size is set.
    #[must_use]
    pub const fn has_size(&self) -> bool {
        self.target_width != 0 || self.target_height != 0
    }

    /// Returns true if geometric work is required.
    #[must_use]
    pub fn needs_matrix_transform(&self) -> bool {
        self.has_size() || self.rotation.is_some_and(|r| r.degrees != 0.0)
    }

    /// Returns true if custom transformations are attached.
    #[must_use]
    pub fn has_custom_transformations(&self) -> bool {
        !self.transformations.is_empty()
    }

    /// Returns true if any transform step is required.
    #[must_use]
    pub fn needs_transformation(&self) -> bool {
        self.needs_matrix_transform() || self.has_custom_transformations()
    }

    /// Short human-readable name used in logs.
    #[must_use]
    pub fn name(&self) -> String {
        match (&self.stable_key, &self.resource) {
            (Some(key), _) => key.clone(),
            (None, Some(resource)) => resource.to_string(),
            (None, None) => "<empty>".to_string(),
        }
    }

    /// Derives the cache key.
    ///
    /// The resource identity comes first, followed by one line per
    /// non-default modifier and one line per custom transformation.
    #[must_use]
    pub fn key(&self) -> ImageKey {
        let identity = match (&self.stable_key, &self.resource) {
            (Some(key), _) => key.clone(),
            (None, Some(resource)) => resource.key_identity(),
            (None, None) => String::new(),
        };

        let mut key = String::with_capacity(identity.len() + KEY_PADDING);
        key.push_str(&identity);
        key.push(KEY_SEPARATOR);

        if let Some(rotation) = self.rotation.filter(|r| r.degrees != 0.0) {
            let _ = write!(key, "rotation:{}", rotation.degrees);
            if let Some((x, y)) = rotation.pivot {
                let _ = write!(key, "@{x}x{y}");
            }
            key.push(KEY_SEPARATOR);
        }
        if self.has_size() {
            let _ = write!(key, "resize:{}x{}", self.target_width, self.target_height);
            key.push(KEY_SEPARATOR);
        }
        match self.crop {
            CropMode::CenterCrop(gravity) => {
                let _ = write!(key, "centerCrop:{}", gravity.code());
                key.push(KEY_SEPARATOR);
            }
            CropMode::CenterInside => {
                key.push_str("centerInside");
                key.push(KEY_SEPARATOR);
            }
            CropMode::None => {}
        }
        for transformation in &self.transformations {
            key.push_str(&transformation.key());
            key.push(KEY_SEPARATOR);
        }

        ImageKey::new(key)
    }
}

/// Builder for [`Request`].
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    request: Request,
}

impl RequestBuilder {
    fn new(resource: ResourceId) -> Self {
        Self {
            request: Request {
                resource: Some(resource),
                ..Request::default()
            },
        }
    }

    /// Uses `key` as the cache identity instead of the resource.
    #[must_use]
    pub fn stable_key(mut self, key: impl Into<String>) -> Self {
        self.request.stable_key = Some(key.into());
        self
    }

    /// Resizes to `width` x `height`. A zero dimension keeps the aspect ratio.
    #[must_use]
    pub const fn resize(mut self, width: u32, height: u32) -> Self {
        self.request.target_width = width;
        self.request.target_height = height;
        self
    }

    /// Fills the target size and crops the overflow around `gravity`.
    #[must_use]
    pub const fn center_crop(mut self, gravity: Gravity) -> Self {
        self.request.crop = CropMode::CenterCrop(gravity);
        self
    }

    /// Fits the image inside the target size.
    #[must_use]
    pub const fn center_inside(mut self) -> Self {
        self.request.crop = CropMode::CenterInside;
        self
    }

    /// Only resize when the image is larger than the target.
    #[must_use]
    pub const fn only_scale_down(mut self) -> Self {
        self.request.only_scale_down = true;
        self
    }

    /// Rotates clockwise by `degrees`.
    #[must_use]
    pub const fn rotate(mut self, degrees: f32) -> Self {
        self.request.rotation = Some(Rotation {
            degrees,
            pivot: None,
        });
        self
    }

    /// Rotates clockwise by `degrees` around a pivot point.
    #[must_use]
    pub const fn rotate_about(mut self, degrees: f32, pivot_x: f32, pivot_y: f32) -> Self {
        self.request.rotation = Some(Rotation {
            degrees,
            pivot: Some((pivot_x, pivot_y)),
        });
        self
    }

    /// Appends a custom transformation.
    #[must_use]
    pub fn transform(mut self, transformation: Arc<dyn Transformation>) -> Self {
        self.request.transformations.push(transformation);
        self
    }

    /// Sets the scheduling priority.
    #[must_use]
    pub const fn priority(mut self, priority: Priority) -> Self {
        self.request.priority = priority;
        self
    }

    /// Groups the request under `tag`.
    #[must_use]
    pub fn tag(mut self, tag: Tag) -> Self {
        self.request.tag = Some(tag);
        self
    }

    /// Adds memory cache policy flags.
    #[must_use]
    pub fn memory_policy(mut self, policy: MemoryPolicy) -> Self {
        self.request.memory_policy |= policy;
        self
    }

    /// Adds network policy flags.
    #[must_use]
    pub fn network_policy(mut self, policy: NetworkPolicy) -> Self {
        self.request.network_policy |= policy;
        self
    }

    /// Validates and returns the request.
    ///
    /// # Errors
    /// Returns `RequestError` if the fit options are inconsistent.
    pub fn build(self) -> Result<Request, RequestError> {
        let request = self.request;
        match request.crop {
            CropMode::CenterCrop(_) if !request.has_size() => {
                return Err(RequestError::invalid(
                    "center crop requires a target width or height",
                ));
            }
            CropMode::CenterInside if !request.has_size() => {
                return Err(RequestError::invalid(
                    "center inside requires a target width or height",
                ));
            }
            _ => {}
        }
        if request.only_scale_down && !request.has_size() {
            return Err(RequestError::invalid(
                "only scale down requires a target width or height",
            ));
        }
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::DynamicImage;
    use test_case::test_case;

    struct Named(&'static str);

    impl Transformation for Named {
        fn key(&self) -> String {
            self.0.to_string()
        }

        fn transform(&self, source: DynamicImage) -> Option<DynamicImage> {
            Some(source)
        }
    }

    fn base() -> RequestBuilder {
        Request::uri("https://example.com/cat.png")
    }

    #[test]
    fn test_plain_key() {
        let request = base().build().unwrap();
        assert_eq!(request.key().as_str(), "https://example.com/cat.png\n");
    }

    #[test]
    fn test_full_key_order() {
        let request = base()
            .rotate_about(90.0, 5.0, 6.0)
            .resize(100, 50)
            .center_crop(Gravity::Top)
            .transform(Arc::new(Named("blur")))
            .transform(Arc::new(Named("round")))
            .build()
            .unwrap();

        assert_eq!(
            request.key().as_str(),
            "https://example.com/cat.png\nrotation:90@5x6\nresize:100x50\ncenterCrop:48\nblur\nround\n"
        );
    }

    #[test]
    fn test_stable_key_overrides_uri() {
        let request = base().stable_key("cat").build().unwrap();
        assert_eq!(request.key().as_str(), "cat\n");
    }

    #[test]
    fn test_resource_id_key() {
        let request = Request::resource(42).center_inside().resize(10, 0).build();
        assert_eq!(
            request.unwrap().key().as_str(),
            "res:42\nresize:10x0\ncenterInside\n"
        );
    }

    #[test]
    fn test_resource_id_and_uri_keys_differ() {
        let resource = Request::resource(42).build().unwrap();
        let uri = Request::uri("42").build().unwrap();
        assert_ne!(resource.key(), uri.key());
    }

    #[test]
    fn test_zero_rotation_is_default() {
        let rotated = base().rotate(0.0).build().unwrap();
        let plain = base().build().unwrap();
        assert_eq!(rotated.key(), plain.key());
    }

    #[test]
    fn test_equivalent_requests_share_key() {
        let a = base()
            .resize(10, 20)
            .center_crop(Gravity::Center)
            .priority(Priority::High)
            .build()
            .unwrap();
        let b = base()
            .center_crop(Gravity::Center)
            .resize(10, 20)
            .priority(Priority::Low)
            .memory_policy(MemoryPolicy::NO_STORE)
            .build()
            .unwrap();
        assert_eq!(a.key(), b.key());
    }

    #[test_case(base().rotate(90.0) ; "rotation")]
    #[test_case(base().rotate_about(90.0, 1.0, 1.0) ; "pivot")]
    #[test_case(base().resize(10, 10) ; "resize")]
    #[test_case(base().resize(10, 10).center_crop(Gravity::Center) ; "center_crop")]
    #[test_case(base().resize(10, 10).center_crop(Gravity::Bottom) ; "center_crop_gravity")]
    #[test_case(base().resize(10, 10).center_inside() ; "center_inside")]
    #[test_case(base().transform(Arc::new(Named("x"))) ; "custom")]
    #[test_case(base().stable_key("other") ; "stable_key")]
    fn test_modifier_changes_key(builder: RequestBuilder) {
        let plain = base().build().unwrap();
        let modified = builder.build().unwrap();
        assert_ne!(plain.key(), modified.key());
    }

    #[test]
    fn test_center_crop_requires_size() {
        let err = base().center_crop(Gravity::Center).build().unwrap_err();
        assert!(matches!(err, RequestError::InvalidRequest { .. }));
    }

    #[test]
    fn test_only_scale_down_requires_size() {
        assert!(base().only_scale_down().build().is_err());
        assert!(base().resize(5, 5).only_scale_down().build().is_ok());
    }

    #[test]
    fn test_needs_transformation() {
        assert!(!base().build().unwrap().needs_transformation());
        assert!(base().rotate(180.0).build().unwrap().needs_matrix_transform());
        let custom = base().transform(Arc::new(Named("x"))).build().unwrap();
        assert!(!custom.needs_matrix_transform());
        assert!(custom.needs_transformation());
    }
}
