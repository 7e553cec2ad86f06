// THEORY:
// The `Frame` is the unit of acquisition: one RGB picture plus the moment it was
// taken. Everything downstream works on 8-bit luma planes derived from it, so this
// module also carries the small set of plane operations the motion detector needs:
// grayscale conversion, a Gaussian blur sized like an odd pixel kernel, absolute
// difference, binarization and dilation. The heavy lifting is done by `image` and
// `imageproc`; this module only fixes the conventions the detector relies on.
//
// Key principles:
// 1.  **Shared pixels**: the RGB buffer sits behind an `Arc`, so a frame can be kept
//     in a capture burst and handed to the notification worker without copying.
// 2.  **Timestamp travels with the frame**: the core never reads the wall clock;
//     whoever acquires the frame stamps it. This keeps every tick reproducible.
// 3.  **Plane ops are stateless**: the `luma` functions know nothing about history.
//     Temporal reasoning (the reference frame) lives in `MotionDetector`.

use chrono::NaiveDateTime;
use image::{GrayImage, RgbImage};
use std::sync::Arc;

/// One acquired picture and the moment it was captured.
#[derive(Debug, Clone)]
pub struct Frame {
    image: Arc<RgbImage>,
    captured_at: NaiveDateTime,
}

impl Frame {
    pub fn new(image: RgbImage, captured_at: NaiveDateTime) -> Self {
        Self {
            image: Arc::new(image),
            captured_at,
        }
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn captured_at(&self) -> NaiveDateTime {
        self.captured_at
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Rec. 601 luma plane of this frame.
    pub fn to_grayscale(&self) -> GrayImage {
        image::imageops::grayscale(self.image.as_ref())
    }
}

pub mod luma {
    use image::{GrayImage, Luma};
    use imageproc::contrast::ThresholdType;
    use imageproc::distance_transform::Norm;

    pub const FOREGROUND: u8 = 255;
    pub const BACKGROUND: u8 = 0;

    /// Sigma for a Gaussian kernel of the given odd size, using the usual
    /// "derive from size" rule, so 21 taps give sigma = 3.5.
    pub fn blur_sigma(kernel_size: u32) -> f32 {
        0.3 * ((kernel_size.max(1) as f32 - 1.0) * 0.5 - 1.0) + 0.8
    }

    pub fn gaussian_blur(plane: &GrayImage, kernel_size: u32) -> GrayImage {
        if kernel_size <= 1 {
            return plane.clone();
        }
        image::imageops::blur(plane, blur_sigma(kernel_size))
    }

    /// Per-pixel `|a - b|`. Both planes must share dimensions.
    pub fn abs_diff(a: &GrayImage, b: &GrayImage) -> GrayImage {
        debug_assert_eq!(a.dimensions(), b.dimensions());
        imageproc::map::map_colors2(a, b, |pa: Luma<u8>, pb: Luma<u8>| {
            Luma([pa.0[0].abs_diff(pb.0[0])])
        })
    }

    /// Binarize: strictly brighter than `threshold` becomes foreground.
    pub fn threshold(plane: &GrayImage, threshold: u8) -> GrayImage {
        imageproc::contrast::threshold(plane, threshold, ThresholdType::Binary)
    }

    /// Morphological dilation with a 3x3 square, applied `iterations` times.
    /// An L-infinity radius of `iterations` covers the same neighbourhood.
    pub fn dilate(mask: &GrayImage, iterations: u32) -> GrayImage {
        if iterations == 0 {
            return mask.clone();
        }
        let radius = u8::try_from(iterations).unwrap_or(u8::MAX);
        imageproc::morphology::dilate(mask, Norm::LInf, radius)
    }
}
