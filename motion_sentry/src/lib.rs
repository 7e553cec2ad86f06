// THEORY:
// This file is the entry point for the `motion_sentry` library crate.
//
// The crate is a motion monitor: it watches a stream of frames, waits for the scene
// to be quiet long enough to arm, and answers the first motion after that with a
// burst of captures. A centered subset of the burst is persisted and handed to a
// notifier together with the inferred direction of travel.
//
// `pipeline::Monitor` is the high-level interface. The per-tick components live in
// `core_modules` and can be driven directly; cameras, notifiers, disks and face
// detectors plug in through the traits in `interfaces`.

pub mod config;
pub mod core_modules;
pub mod dispatch;
pub mod error;
pub mod interfaces;
pub mod pipeline;
pub mod storage;

// Re-export the types an embedding application needs.
pub use crate::config::{CaptureConfig, DetectorConfig, DispatchConfig, MonitorConfig};
pub use crate::core_modules::capture::{CaptureEvent, CapturePhase, FinalizedBurst, MotionDirection};
pub use crate::core_modules::frame::Frame;
pub use crate::core_modules::schedule::{ScheduleGate, ScheduleWindow, SettingsStore};
pub use crate::dispatch::DispatchStats;
pub use crate::error::{
    AcquisitionError, ConfigurationError, DeliveryError, MonitorError, PersistenceError,
};
pub use crate::interfaces::{
    Alert, AlertMetadata, FaceLocator, FrameSource, NotificationSink, PersistenceSink,
};
pub use crate::pipeline::{Monitor, MonitorPipeline, RunSummary, TickReport};
pub use crate::storage::DirectoryStore;
