// THEORY:
// The `pipeline` module is the top-level API of the monitor. It wires the per-tick
// components into one state machine and drives it from a `FrameSource`.
//
// Two layers:
// - `MonitorPipeline` is purely synchronous. Given a frame and a schedule snapshot
//   it runs one tick: gate -> detect -> track inactivity -> step the capture
//   controller. It owns no channels and no clock, so it can be tested frame by frame.
// - `Monitor` adds the outside world: the live `ScheduleGate`, the notification
//   dispatcher, and the cooperative `run` loop that stops on cancellation, on end of
//   stream, or on an acquisition failure.
//
// Everything on the tick path is owned by the single loop task. The only state
// shared with other tasks is the settings snapshot (read once per tick) and the
// dispatcher queue (written with a non-blocking send).

use crate::config::MonitorConfig;
use crate::core_modules::capture::{CaptureController, CaptureEvent, CapturePhase};
use crate::core_modules::frame::Frame;
use crate::core_modules::inactivity::{InactivityState, InactivityTracker};
use crate::core_modules::motion_detector::{MotionDetector, MotionObservation};
use crate::core_modules::region_detector::Position;
use crate::core_modules::schedule::{ScheduleGate, ScheduleWindow, SettingsStore};
use crate::dispatch::{DispatchStats, NotificationDispatcher};
use crate::error::{AcquisitionError, ConfigurationError, MonitorError};
use crate::interfaces::{Alert, FaceLocator, FrameSource, NotificationSink, PersistenceSink};
use chrono::NaiveDateTime;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Everything that happened during one tick.
#[derive(Debug, Clone)]
pub struct TickReport {
    pub timestamp: NaiveDateTime,
    /// The schedule was closed; nothing was analysed.
    pub gated: bool,
    /// Threshold used for this tick, when it was analysed.
    pub sensitivity: Option<u8>,
    pub observation: Option<MotionObservation>,
    /// Tracker state at the end of the tick.
    pub inactivity: InactivityState,
    pub capture: CaptureEvent,
}

pub struct MonitorPipeline {
    detector: MotionDetector,
    tracker: InactivityTracker,
    controller: CaptureController,
    face_locator: Option<Box<dyn FaceLocator>>,
    gated: bool,
}

impl MonitorPipeline {
    pub fn new(config: &MonitorConfig) -> Result<Self, ConfigurationError> {
        config.validate()?;
        Ok(Self {
            detector: MotionDetector::new(config.detector.clone()),
            tracker: InactivityTracker::new(config.inactivity_timeout()),
            controller: CaptureController::new(config.capture.clone()),
            face_locator: None,
            gated: false,
        })
    }

    pub fn with_face_locator(mut self, locator: Box<dyn FaceLocator>) -> Self {
        self.face_locator = Some(locator);
        self
    }

    pub fn capture_phase(&self) -> CapturePhase {
        self.controller.phase()
    }

    pub fn inactivity_state(&self) -> InactivityState {
        self.tracker.state()
    }

    pub fn process_frame(&mut self, frame: &Frame, schedule: &ScheduleWindow) -> TickReport {
        let timestamp = frame.captured_at();
        let time_of_day = timestamp.time();

        // --- 1. Schedule gate ---
        if !schedule.is_active(time_of_day) {
            let capture = self.close_gate();
            return TickReport {
                timestamp,
                gated: true,
                sensitivity: None,
                observation: None,
                inactivity: self.tracker.state(),
                capture,
            };
        }
        if self.gated {
            log::info!("monitoring window opened at {timestamp}");
            self.gated = false;
        }

        // --- 2. Motion detection ---
        let sensitivity = schedule.sensitivity(time_of_day);
        let observation = self.detector.observe(frame, sensitivity);

        // --- 3. Inactivity tracking ---
        let inactivity = if self.controller.is_idle() {
            self.tracker.update(&observation, timestamp)
        } else {
            self.tracker.track(&observation, timestamp)
        };

        // --- 4. Capture ---
        let face = self.locate_face(frame, &observation, inactivity.armed);
        let capture = self.controller.step(frame, &observation, face, &mut self.tracker);

        TickReport {
            timestamp,
            gated: false,
            sensitivity: Some(sensitivity),
            observation: Some(observation),
            inactivity: self.tracker.state(),
            capture,
        }
    }

    /// Drops an in-progress burst, e.g. because the frame source went away.
    pub fn abandon_burst(&mut self) -> CaptureEvent {
        self.controller.abandon()
    }

    /// The face locator only runs on ticks whose frame joins a burst.
    fn locate_face(
        &mut self,
        frame: &Frame,
        observation: &MotionObservation,
        armed: bool,
    ) -> Option<Position> {
        let locator = self.face_locator.as_mut()?;
        let triggered = armed && observation.detected;
        if !self.controller.takes_frame(frame.captured_at(), triggered) {
            return None;
        }
        locator.locate(frame).first().map(|face| face.center())
    }

    fn close_gate(&mut self) -> CaptureEvent {
        if !self.gated {
            log::info!("outside monitoring hours, detection paused");
            self.gated = true;
        }
        self.detector.reset();
        self.tracker.reset();
        self.controller.abandon()
    }
}

/// Totals for one `Monitor::run` session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub ticks: u64,
    pub gated_ticks: u64,
    pub bursts_completed: u64,
    pub bursts_abandoned: u64,
}

impl RunSummary {
    fn record(&mut self, report: &TickReport) {
        self.ticks += 1;
        if report.gated {
            self.gated_ticks += 1;
        }
        self.record_event(&report.capture);
    }

    fn record_event(&mut self, event: &CaptureEvent) {
        match event {
            CaptureEvent::Completed(_) => self.bursts_completed += 1,
            CaptureEvent::Abandoned { .. } => self.bursts_abandoned += 1,
            _ => {}
        }
    }
}

/// A running monitor: pipeline, live settings and notification dispatch.
pub struct Monitor {
    pipeline: MonitorPipeline,
    gate: ScheduleGate,
    dispatcher: NotificationDispatcher,
}

impl Monitor {
    /// Builds the monitor and starts its notification worker. Must be called from
    /// within a tokio runtime.
    pub fn new(
        config: &MonitorConfig,
        settings: &SettingsStore,
        notifier: Arc<dyn NotificationSink>,
        store: Arc<dyn PersistenceSink>,
    ) -> Result<Self, ConfigurationError> {
        let pipeline = MonitorPipeline::new(config)?;
        Ok(Self {
            pipeline,
            gate: settings.gate(),
            dispatcher: NotificationDispatcher::spawn(&config.dispatch, notifier, store),
        })
    }

    pub fn with_face_locator(mut self, locator: Box<dyn FaceLocator>) -> Self {
        self.pipeline = self.pipeline.with_face_locator(locator);
        self
    }

    pub fn pipeline(&self) -> &MonitorPipeline {
        &self.pipeline
    }

    pub fn dispatch_stats(&self) -> DispatchStats {
        self.dispatcher.stats()
    }

    /// Runs one tick against the current settings snapshot and forwards a
    /// finalized burst to the dispatcher.
    pub fn tick(&mut self, frame: &Frame) -> TickReport {
        let schedule = self.gate.snapshot();
        let report = self.pipeline.process_frame(frame, &schedule);
        if let CaptureEvent::Completed(burst) = &report.capture {
            self.dispatcher.submit(Alert::from_burst(burst.clone()));
        }
        report
    }

    /// Pulls frames until `cancel` fires or the source ends. An acquisition failure
    /// abandons any active burst and ends the session with an error.
    pub async fn run<S>(
        &mut self,
        source: &mut S,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, MonitorError>
    where
        S: FrameSource + ?Sized,
    {
        let mut summary = RunSummary::default();
        log::info!("monitor started");

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    log::info!("monitor stopping on request after {} ticks", summary.ticks);
                    summary.record_event(&self.pipeline.abandon_burst());
                    return Ok(summary);
                }
                next = source.next_frame() => next,
            };

            match next {
                Ok(frame) => {
                    let report = self.tick(&frame);
                    summary.record(&report);
                }
                Err(AcquisitionError::EndOfStream) => {
                    log::info!("frame source exhausted after {} ticks", summary.ticks);
                    summary.record_event(&self.pipeline.abandon_burst());
                    return Ok(summary);
                }
                Err(err) => {
                    log::error!("{err}");
                    summary.record_event(&self.pipeline.abandon_burst());
                    return Err(err.into());
                }
            }
        }
    }

    /// Stops accepting alerts and waits for pending deliveries and cleanups.
    pub async fn shutdown(self) -> DispatchStats {
        self.dispatcher.shutdown().await
    }
}
