// THEORY:
// The `MotionDetector` turns consecutive frames into a binary motion signal. It is a
// first-order background model: the reference is simply the previous blurred frame,
// replaced unconditionally on every tick after the difference has been computed.
//
// Pipeline per tick:
// 1.  grayscale -> Gaussian blur (sensor noise suppression)
// 2.  no reference yet (or the resolution changed): store and report a warm-up tick
// 3.  |current - reference| -> binarize with the tick's sensitivity threshold
// 4.  dilate, then group into connected regions; drop regions below `min_area`
// 5.  the blurred current frame becomes the new reference
//
// A consequence of step 5 is that an object which arrives and then stops moving is
// reported once and then fades back into the background. Sustained motion keeps
// triggering only while the picture keeps changing between ticks.

use crate::config::DetectorConfig;
use crate::core_modules::frame::{Frame, luma};
use crate::core_modules::region_detector::{MotionRegion, region_detector};
use chrono::NaiveDateTime;
use image::GrayImage;

/// The detector's verdict for one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct MotionObservation {
    pub detected: bool,
    /// Regions at or above `min_area`, in raster order.
    pub regions: Vec<MotionRegion>,
    pub timestamp: NaiveDateTime,
}

impl MotionObservation {
    pub fn quiet(timestamp: NaiveDateTime) -> Self {
        Self {
            detected: false,
            regions: Vec::new(),
            timestamp,
        }
    }

    pub fn with_regions(regions: Vec<MotionRegion>, timestamp: NaiveDateTime) -> Self {
        Self {
            detected: !regions.is_empty(),
            regions,
            timestamp,
        }
    }

    /// The largest region of this tick, if any.
    pub fn dominant_region(&self) -> Option<&MotionRegion> {
        region_detector::largest(&self.regions)
    }
}

pub struct MotionDetector {
    config: DetectorConfig,
    reference: Option<GrayImage>,
}

impl MotionDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            config,
            reference: None,
        }
    }

    pub fn has_reference(&self) -> bool {
        self.reference.is_some()
    }

    /// Forgets the reference frame; the next observation is a warm-up.
    pub fn reset(&mut self) {
        self.reference = None;
    }

    pub fn observe(&mut self, frame: &Frame, threshold: u8) -> MotionObservation {
        let timestamp = frame.captured_at();
        let current = luma::gaussian_blur(&frame.to_grayscale(), self.config.blur_kernel);

        let reference = match self.reference.take() {
            Some(reference) if reference.dimensions() == current.dimensions() => reference,
            Some(_) => {
                log::warn!(
                    "frame size changed to {}x{}, restarting motion reference",
                    current.width(),
                    current.height()
                );
                self.reference = Some(current);
                return MotionObservation::quiet(timestamp);
            }
            None => {
                self.reference = Some(current);
                return MotionObservation::quiet(timestamp);
            }
        };

        let delta = luma::abs_diff(&reference, &current);
        let binary = luma::threshold(&delta, threshold);
        let mask = luma::dilate(&binary, self.config.dilate_iterations);
        let regions: Vec<MotionRegion> = region_detector::find_regions(&mask)
            .into_iter()
            .filter(|region| region.area >= self.config.min_area)
            .collect();

        self.reference = Some(current);
        MotionObservation::with_regions(regions, timestamp)
    }
}
