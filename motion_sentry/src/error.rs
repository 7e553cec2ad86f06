// THEORY:
// Every boundary between the detection loop and the outside world has its own
// error type. Collaborator failures are translated into these enums at the
// boundary, and the loop turns them into its existing transitions (abandon the
// burst, stay idle) instead of letting them leak into state-machine state.

use std::path::PathBuf;
use thiserror::Error;

/// Raised by a `FrameSource` when it cannot hand out the next frame.
#[derive(Debug, Error)]
pub enum AcquisitionError {
    /// The stream ended normally (file replay finished, device closed on purpose).
    #[error("frame source exhausted")]
    EndOfStream,
    /// The device or decoder failed and did not recover on its own.
    #[error("frame acquisition failed: {0}")]
    Failed(String),
}

/// Raised by a `NotificationSink` when a finalized burst could not be delivered.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("notification transport failed: {0}")]
    Transport(String),
    #[error("notification rejected by receiver: {0}")]
    Rejected(String),
}

/// Raised by a `PersistenceSink` while saving or cleaning up captured frames.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to encode frame to {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Invalid settings or configuration. Always rejected at the update boundary;
/// the previously accepted configuration stays in force.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("invalid time of day {0:?}, expected HH:MM")]
    InvalidTime(String),
    #[error("{name} threshold must be within 1..=254, got {value}")]
    InvalidThreshold { name: &'static str, value: i64 },
    #[error("day period {start}..{end} is not a valid hour range")]
    InvalidDayPeriod { start: u32, end: u32 },
    #[error("blur kernel must be odd and within 1..=99, got {0}")]
    InvalidKernel(u32),
    #[error("images_to_send ({to_send}) must be within 1..={total} (total_captures)")]
    InvalidCapture { total: usize, to_send: usize },
    #[error("{0}")]
    InvalidValue(String),
    #[error("could not read configuration {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Terminal outcome of a monitoring session.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error(transparent)]
    Acquisition(#[from] AcquisitionError),
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
}
