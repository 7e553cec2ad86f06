// THEORY:
// Tunable behaviour of the monitor. Every field has a default matching the stock
// camera setup, so a JSON file only needs to mention what it changes.
// Configuration is validated once, before any component is built from it.

use crate::core_modules::schedule::ScheduleWindow;
use crate::error::ConfigurationError;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Settings for the frame-differencing detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Side of the square Gaussian smoothing kernel, in pixels. Must be odd.
    pub blur_kernel: u32,
    /// Regions with fewer changed pixels than this are treated as noise.
    pub min_area: u32,
    /// Number of 3x3 dilation passes over the binary mask before grouping.
    pub dilate_iterations: u32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            blur_kernel: 21,
            min_area: 3000,
            dilate_iterations: 2,
        }
    }
}

/// Settings for a capture burst.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub total_captures: usize,
    /// How many of the captured images, taken from the middle, get forwarded.
    pub images_to_send: usize,
    /// Minimum spacing between two captures of the same burst.
    pub capture_interval_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            total_captures: 10,
            images_to_send: 4,
            capture_interval_ms: 1000,
        }
    }
}

impl CaptureConfig {
    pub fn capture_interval(&self) -> Duration {
        Duration::milliseconds(self.capture_interval_ms as i64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Finalized bursts waiting for delivery beyond this many are dropped.
    pub queue_capacity: usize,
    /// Delete persisted frames once their notification has been delivered.
    pub cleanup_after_delivery: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 8,
            cleanup_after_delivery: true,
        }
    }
}

/// Top-level configuration for a `Monitor`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub detector: DetectorConfig,
    /// Continuous quiet time required before the next motion is captured.
    pub inactivity_timeout_secs: u64,
    pub capture: CaptureConfig,
    /// Initial schedule; replaced at runtime through the `SettingsStore`.
    pub schedule: ScheduleWindow,
    pub dispatch: DispatchConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            detector: DetectorConfig::default(),
            inactivity_timeout_secs: 60,
            capture: CaptureConfig::default(),
            schedule: ScheduleWindow::default(),
            dispatch: DispatchConfig::default(),
        }
    }
}

impl MonitorConfig {
    pub fn from_json_str(text: &str) -> Result<Self, ConfigurationError> {
        let config: MonitorConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigurationError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    pub fn inactivity_timeout(&self) -> Duration {
        Duration::seconds(self.inactivity_timeout_secs as i64)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let kernel = self.detector.blur_kernel;
        if kernel == 0 || kernel % 2 == 0 || kernel > 99 {
            return Err(ConfigurationError::InvalidKernel(kernel));
        }
        if self.detector.dilate_iterations > 16 {
            return Err(ConfigurationError::InvalidValue(format!(
                "dilate_iterations must be at most 16, got {}",
                self.detector.dilate_iterations
            )));
        }

        let capture = &self.capture;
        if capture.total_captures == 0
            || capture.images_to_send == 0
            || capture.images_to_send > capture.total_captures
        {
            return Err(ConfigurationError::InvalidCapture {
                total: capture.total_captures,
                to_send: capture.images_to_send,
            });
        }

        if self.inactivity_timeout_secs > i32::MAX as u64 {
            return Err(ConfigurationError::InvalidValue(format!(
                "inactivity_timeout_secs is too large: {}",
                self.inactivity_timeout_secs
            )));
        }
        if capture.capture_interval_ms > i32::MAX as u64 {
            return Err(ConfigurationError::InvalidValue(format!(
                "capture_interval_ms is too large: {}",
                capture.capture_interval_ms
            )));
        }

        if self.dispatch.queue_capacity == 0 {
            return Err(ConfigurationError::InvalidValue(
                "dispatch.queue_capacity must be at least 1".to_string(),
            ));
        }

        self.schedule.validate()
    }
}
