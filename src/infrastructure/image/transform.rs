//! Geometric transforms: orientation, rotation, resize and crop.

use image::DynamicImage;
use image::imageops::FilterType;
use image::metadata::Orientation;
use tracing::trace;

use crate::domain::entities::{CropMode, Gravity, Request};
use crate::domain::ports::ImageTransformer;

/// Applies the geometric part of a [`Request`].
///
/// Steps run in this order: EXIF orientation, rotation snapped to the
/// nearest quarter turn, then resize or crop against the target size.
#[derive(Debug, Clone, Copy)]
pub struct GeometryTransformer {
    filter: FilterType,
}

impl Default for GeometryTransformer {
    fn default() -> Self {
        Self {
            filter: FilterType::Triangle,
        }
    }
}

impl GeometryTransformer {
    /// Creates a transformer using bilinear filtering.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a transformer using `filter` for resampling.
    #[must_use]
    pub const fn with_filter(filter: FilterType) -> Self {
        Self { filter }
    }

    fn fit(&self, request: &Request, image: DynamicImage) -> DynamicImage {
        let (width, height) = (image.width(), image.height());
        if width == 0 || height == 0 {
            return image;
        }
        let (target_w, target_h) = target_size(request, width, height);

        match request.crop {
            CropMode::CenterCrop(gravity) => {
                let scale = f64::max(
                    f64::from(target_w) / f64::from(width),
                    f64::from(target_h) / f64::from(height),
                );
                let scaled = if request.only_scale_down && scale > 1.0 {
                    image
                } else {
                    self.scale(&image, scale)
                };
                crop(&scaled, target_w, target_h, gravity)
            }
            CropMode::CenterInside => {
                let scale = f64::min(
                    f64::from(target_w) / f64::from(width),
                    f64::from(target_h) / f64::from(height),
                );
                if request.only_scale_down && scale > 1.0 {
                    image
                } else {
                    self.scale(&image, scale)
                }
            }
            CropMode::None => {
                let unchanged = (target_w, target_h) == (width, height);
                if unchanged || (request.only_scale_down && target_w >= width && target_h >= height) {
                    image
                } else {
                    image.resize_exact(target_w, target_h, self.filter)
                }
            }
        }
    }

    fn scale(&self, image: &DynamicImage, scale: f64) -> DynamicImage {
        let width = scaled_dimension(image.width(), scale);
        let height = scaled_dimension(image.height(), scale);
        if (width, height) == (image.width(), image.height()) {
            return image.clone();
        }
        image.resize_exact(width, height, self.filter)
    }
}

impl ImageTransformer for GeometryTransformer {
    fn transform(
        &self,
        request: &Request,
        mut image: DynamicImage,
        orientation: Orientation,
    ) -> DynamicImage {
        image.apply_orientation(orientation);

        if let Some(rotation) = request.rotation {
            image = match quarter_turns(rotation.degrees) {
                1 => image.rotate90(),
                2 => image.rotate180(),
                3 => image.rotate270(),
                _ => image,
            };
        }

        if request.has_size() {
            image = self.fit(request, image);
        }

        trace!(
            request = %request.name(),
            width = image.width(),
            height = image.height(),
            "applied geometry"
        );
        image
    }
}

/// Resolves a zero target dimension from the other one, keeping the aspect ratio.
fn target_size(request: &Request, width: u32, height: u32) -> (u32, u32) {
    match (request.target_width, request.target_height) {
        (0, h) => (
            scaled_dimension(width, f64::from(h) / f64::from(height)),
            h,
        ),
        (w, 0) => (
            w,
            scaled_dimension(height, f64::from(w) / f64::from(width)),
        ),
        (w, h) => (w, h),
    }
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    reason = "clamped to at least one pixel and bounded by u32 inputs"
)]
fn scaled_dimension(dimension: u32, scale: f64) -> u32 {
    ((f64::from(dimension) * scale).round() as u32).max(1)
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    reason = "rem_euclid keeps the value in 0..4"
)]
fn quarter_turns(degrees: f32) -> u8 {
    ((degrees / 90.0).round() as i64).rem_euclid(4) as u8
}

fn crop(image: &DynamicImage, target_w: u32, target_h: u32, gravity: Gravity) -> DynamicImage {
    let crop_w = target_w.min(image.width());
    let crop_h = target_h.min(image.height());
    let spare_x = image.width() - crop_w;
    let spare_y = image.height() - crop_h;

    let (x, y) = match gravity {
        Gravity::Center => (spare_x / 2, spare_y / 2),
        Gravity::Top => (spare_x / 2, 0),
        Gravity::Bottom => (spare_x / 2, spare_y),
        Gravity::Start => (0, spare_y / 2),
        Gravity::End => (spare_x, spare_y / 2),
    };
    image.crop_imm(x, y, crop_w, crop_h)
}
