// THEORY:
// The monitor talks to the outside world only through the traits in this file.
// Cameras, notification transports, disks and face detectors are all
// collaborators, supplied by the embedding application.
//
// The async traits return `BoxFuture` so they stay object safe: the dispatcher
// holds its sinks as `Arc<dyn ...>` and moves them into a spawned worker task.
// Persistence is plain blocking file I/O; the dispatcher runs it on the
// blocking pool.

use crate::core_modules::capture::{FinalizedBurst, MotionDirection};
use crate::core_modules::frame::Frame;
use crate::core_modules::region_detector::MotionRegion;
use crate::error::{AcquisitionError, DeliveryError, PersistenceError};
use chrono::NaiveDateTime;
use futures::future::BoxFuture;
use serde::Serialize;
use std::path::PathBuf;

/// Supplies frames in acquisition order.
pub trait FrameSource: Send {
    /// The next frame, `EndOfStream` once the source is exhausted, or `Failed`.
    fn next_frame(&mut self) -> BoxFuture<'_, Result<Frame, AcquisitionError>>;
}

/// Receives a finalized burst. Delivery is best effort and never retried by the core.
pub trait NotificationSink: Send + Sync {
    fn deliver<'a>(&'a self, alert: &'a Alert) -> BoxFuture<'a, Result<(), DeliveryError>>;
}

/// Durable storage for captured frames.
pub trait PersistenceSink: Send + Sync {
    fn save(&self, frame: &Frame) -> Result<PathBuf, PersistenceError>;

    /// Removes the given files. Files that are already gone are not an error.
    /// Returns how many files were actually removed.
    fn delete_all(&self, paths: &[PathBuf]) -> Result<usize, PersistenceError>;
}

/// Optional face detector used to refine the position of the moving subject.
pub trait FaceLocator: Send {
    /// Bounding boxes of the faces found in `frame`, most confident first.
    fn locate(&mut self, frame: &Frame) -> Vec<MotionRegion>;
}

/// What a notification says about the burst it carries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertMetadata {
    /// Time the burst was finalized.
    pub timestamp: NaiveDateTime,
    pub motion_direction: Option<MotionDirection>,
    pub face_detected: bool,
    pub burst_started_at: NaiveDateTime,
    pub images_captured: usize,
}

impl From<&FinalizedBurst> for AlertMetadata {
    fn from(burst: &FinalizedBurst) -> Self {
        Self {
            timestamp: burst.completed_at,
            motion_direction: burst.direction,
            face_detected: burst.face_detected,
            burst_started_at: burst.started_at,
            images_captured: burst.total_captured,
        }
    }
}

/// The payload handed to a `NotificationSink`.
#[derive(Debug, Clone)]
pub struct Alert {
    /// The selected images, in capture order.
    pub images: Vec<Frame>,
    pub metadata: AlertMetadata,
    /// Where each of `images` was persisted, when persistence succeeded.
    pub saved_paths: Vec<PathBuf>,
}

impl Alert {
    pub fn from_burst(burst: FinalizedBurst) -> Self {
        let metadata = AlertMetadata::from(&burst);
        Self {
            images: burst.selected,
            metadata,
            saved_paths: Vec::new(),
        }
    }
}
