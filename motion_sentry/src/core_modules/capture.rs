// THEORY:
// The `CaptureController` is the state machine that decides which frames are kept and
// reported. It sits on top of the per-tick `MotionObservation` and the
// `InactivityTracker`, and owns at most one `CaptureBurst` at a time.
//
// States:
// - `Idle`: waiting. An armed tracker plus a motion tick opens a burst, disarms the
//   tracker on the spot and keeps the current frame as the first image.
// - `BurstActive`: one frame is appended per capture interval, together with the
//   position used for direction inference (face centre first, else the centre of
//   the largest motion region). Reaching `total_captures` moves to finalizing.
// - `BurstFinalizing`: the direction is inferred from the first and last recorded
//   positions, the centered run of `images_to_send` images is cut out, and the
//   controller returns to `Idle` with a `FinalizedBurst` for the caller to dispatch.
//
// A burst that loses its frame source is abandoned, never finalized short.

use crate::config::CaptureConfig;
use crate::core_modules::frame::Frame;
use crate::core_modules::inactivity::InactivityTracker;
use crate::core_modules::motion_detector::MotionObservation;
use crate::core_modules::region_detector::Position;
use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MotionDirection {
    Up,
    Down,
    Left,
    Right,
}

impl fmt::Display for MotionDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MotionDirection::Up => "up",
            MotionDirection::Down => "down",
            MotionDirection::Left => "left",
            MotionDirection::Right => "right",
        };
        f.write_str(name)
    }
}

/// Dominant direction between the first and last recorded positions. Image
/// coordinates grow downwards. Equal magnitudes count as horizontal; no
/// displacement at all, or fewer than two positions, yields `None`.
pub fn infer_direction(positions: &[Position]) -> Option<MotionDirection> {
    let (first, last) = match positions {
        [first, .., last] => (first, last),
        _ => return None,
    };
    let dx = last.x - first.x;
    let dy = last.y - first.y;

    if dx.abs() >= dy.abs() {
        if dx > 0.0 {
            Some(MotionDirection::Right)
        } else if dx < 0.0 {
            Some(MotionDirection::Left)
        } else {
            None
        }
    } else if dy > 0.0 {
        Some(MotionDirection::Down)
    } else {
        Some(MotionDirection::Up)
    }
}

/// Centered contiguous run of `count` items: starts at `(len - count) / 2`.
pub fn select_centered<T: Clone>(items: &[T], count: usize) -> (usize, Vec<T>) {
    let count = count.min(items.len());
    let start = (items.len() - count) / 2;
    (start, items[start..start + count].to_vec())
}

/// Frames collected since an armed motion trigger.
#[derive(Debug, Clone)]
pub struct CaptureBurst {
    images: Vec<Frame>,
    positions: Vec<Position>,
    started_at: NaiveDateTime,
    last_capture_at: NaiveDateTime,
    face_detected: bool,
}

impl CaptureBurst {
    fn open(frame: &Frame, position: Option<Position>, face_detected: bool) -> Self {
        let mut burst = Self {
            images: Vec::new(),
            positions: Vec::new(),
            started_at: frame.captured_at(),
            last_capture_at: frame.captured_at(),
            face_detected: false,
        };
        burst.append(frame, position, face_detected);
        burst
    }

    fn append(&mut self, frame: &Frame, position: Option<Position>, face_detected: bool) {
        self.images.push(frame.clone());
        if let Some(position) = position {
            self.positions.push(position);
        }
        self.face_detected |= face_detected;
        self.last_capture_at = frame.captured_at();
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn started_at(&self) -> NaiveDateTime {
        self.started_at
    }
}

/// A completed burst, reduced to what gets forwarded for notification.
#[derive(Debug, Clone)]
pub struct FinalizedBurst {
    /// The centered run of images to send, in capture order.
    pub selected: Vec<Frame>,
    /// Index of the first selected image within the full burst.
    pub selection_start: usize,
    pub total_captured: usize,
    pub started_at: NaiveDateTime,
    pub completed_at: NaiveDateTime,
    pub direction: Option<MotionDirection>,
    pub face_detected: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapturePhase {
    Idle,
    BurstActive,
    BurstFinalizing,
}

enum CaptureState {
    Idle,
    BurstActive(CaptureBurst),
    BurstFinalizing(CaptureBurst),
}

/// What the controller did on a tick.
#[derive(Debug, Clone)]
pub enum CaptureEvent {
    /// Idle, nothing triggered.
    None,
    /// A burst opened with this tick's frame as its first image.
    Started,
    /// The frame was appended; `count` images so far.
    Captured { count: usize },
    /// Burst active but the capture interval has not elapsed yet.
    Waiting,
    Completed(FinalizedBurst),
    Abandoned { captured: usize },
}

pub struct CaptureController {
    config: CaptureConfig,
    capture_interval: Duration,
    state: CaptureState,
}

impl CaptureController {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            capture_interval: config.capture_interval(),
            config,
            state: CaptureState::Idle,
        }
    }

    pub fn phase(&self) -> CapturePhase {
        match self.state {
            CaptureState::Idle => CapturePhase::Idle,
            CaptureState::BurstActive(_) => CapturePhase::BurstActive,
            CaptureState::BurstFinalizing(_) => CapturePhase::BurstFinalizing,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.state, CaptureState::Idle)
    }

    /// The burst being collected, if any.
    pub fn active_burst(&self) -> Option<&CaptureBurst> {
        match &self.state {
            CaptureState::BurstActive(burst) | CaptureState::BurstFinalizing(burst) => Some(burst),
            CaptureState::Idle => None,
        }
    }

    /// Whether `step` would keep this tick's frame: it opens a burst when
    /// `triggered` (armed and moving), or appends once the capture interval has
    /// elapsed.
    pub fn takes_frame(&self, now: NaiveDateTime, triggered: bool) -> bool {
        match &self.state {
            CaptureState::Idle => triggered,
            CaptureState::BurstActive(burst) => {
                now - burst.last_capture_at >= self.capture_interval
            }
            CaptureState::BurstFinalizing(_) => false,
        }
    }

    /// Advances the state machine by one tick. `face` is the centre of a detected
    /// face in `frame`, when a face locator is in use and found one.
    pub fn step(
        &mut self,
        frame: &Frame,
        observation: &MotionObservation,
        face: Option<Position>,
        tracker: &mut InactivityTracker,
    ) -> CaptureEvent {
        let position =
            face.or_else(|| observation.dominant_region().map(|region| region.center()));
        let face_detected = face.is_some();

        match std::mem::replace(&mut self.state, CaptureState::Idle) {
            CaptureState::Idle => {
                if !(tracker.state().armed && observation.detected) {
                    return CaptureEvent::None;
                }
                tracker.disarm();
                let burst = CaptureBurst::open(frame, position, face_detected);
                log::info!("capture burst started at {}", burst.started_at());
                self.collect(burst, CaptureEvent::Started)
            }
            CaptureState::BurstActive(mut burst) => {
                if frame.captured_at() - burst.last_capture_at < self.capture_interval {
                    self.state = CaptureState::BurstActive(burst);
                    return CaptureEvent::Waiting;
                }
                burst.append(frame, position, face_detected);
                let count = burst.len();
                self.collect(burst, CaptureEvent::Captured { count })
            }
            CaptureState::BurstFinalizing(burst) => {
                self.state = CaptureState::BurstFinalizing(burst);
                self.finalize().map_or(CaptureEvent::None, CaptureEvent::Completed)
            }
        }
    }

    fn collect(&mut self, burst: CaptureBurst, event: CaptureEvent) -> CaptureEvent {
        if burst.len() < self.config.total_captures {
            self.state = CaptureState::BurstActive(burst);
            return event;
        }
        self.state = CaptureState::BurstFinalizing(burst);
        self.finalize().map_or(event, CaptureEvent::Completed)
    }

    /// Turns a full burst into its forwarded form and returns to `Idle`.
    fn finalize(&mut self) -> Option<FinalizedBurst> {
        let burst = match std::mem::replace(&mut self.state, CaptureState::Idle) {
            CaptureState::BurstFinalizing(burst) => burst,
            other => {
                self.state = other;
                return None;
            }
        };

        let direction = infer_direction(&burst.positions);
        let (selection_start, selected) =
            select_centered(&burst.images, self.config.images_to_send);
        log::info!(
            "capture burst finalized: {} images, sending {} from index {}, direction {}",
            burst.len(),
            selected.len(),
            selection_start,
            direction.map_or_else(|| "unknown".to_string(), |d| d.to_string())
        );

        Some(FinalizedBurst {
            selected,
            selection_start,
            total_captured: burst.len(),
            started_at: burst.started_at,
            completed_at: burst.last_capture_at,
            direction,
            face_detected: burst.face_detected,
        })
    }

    /// Drops the active burst without finalizing it.
    pub fn abandon(&mut self) -> CaptureEvent {
        match std::mem::replace(&mut self.state, CaptureState::Idle) {
            CaptureState::Idle => CaptureEvent::None,
            CaptureState::BurstActive(burst) | CaptureState::BurstFinalizing(burst) => {
                log::warn!(
                    "capture burst abandoned after {} of {} images",
                    burst.len(),
                    self.config.total_captures
                );
                CaptureEvent::Abandoned {
                    captured: burst.len(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::motion_detector::test_frames::{at, blank};
    use crate::core_modules::region_detector::MotionRegion;

    fn quiet(second: i64) -> MotionObservation {
        MotionObservation::quiet(at(second))
    }

    fn motion_at(second: i64, x: u32, y: u32) -> MotionObservation {
        let region = MotionRegion {
            x,
            y,
            width: 60,
            height: 60,
            area: 3600,
        };
        MotionObservation::with_regions(vec![region], at(second))
    }

    fn armed_tracker() -> InactivityTracker {
        let mut tracker = InactivityTracker::new(Duration::seconds(5));
        for second in 0..=5 {
            tracker.update(&quiet(second), at(second));
        }
        assert!(tracker.state().armed);
        tracker
    }

    fn controller() -> CaptureController {
        CaptureController::new(CaptureConfig::default())
    }

    #[test]
    fn direction_follows_dominant_axis() {
        use MotionDirection::{Down, Left, Right, Up};
        let p = Position::new;
        let origin = p(0.0, 0.0);
        assert_eq!(infer_direction(&[origin, p(10.0, 0.0)]), Some(Right));
        assert_eq!(infer_direction(&[origin, p(0.0, 10.0)]), Some(Down));
        assert_eq!(infer_direction(&[origin, p(-5.0, -20.0)]), Some(Up));
        assert_eq!(infer_direction(&[origin, p(-9.0, 3.0)]), Some(Left));
    }

    #[test]
    fn direction_ties_go_horizontal() {
        use MotionDirection::{Left, Right};
        let p = Position::new;
        let origin = p(0.0, 0.0);
        assert_eq!(infer_direction(&[origin, p(7.0, 7.0)]), Some(Right));
        assert_eq!(infer_direction(&[origin, p(-7.0, 7.0)]), Some(Left));
    }

    #[test]
    fn direction_needs_two_distinct_positions() {
        let p = Position::new;
        assert_eq!(infer_direction(&[]), None);
        assert_eq!(infer_direction(&[p(3.0, 3.0)]), None);
        let there_and_back = [p(3.0, 3.0), p(9.0, 1.0), p(3.0, 3.0)];
        assert_eq!(infer_direction(&there_and_back), None);
    }

    #[test]
    fn selection_is_the_middle_run() {
        let items: Vec<usize> = (0..10).collect();
        assert_eq!(select_centered(&items, 4), (3, vec![3, 4, 5, 6]));
        assert_eq!(select_centered(&items, 10), (0, items.clone()));
        assert_eq!(select_centered(&items, 3), (3, vec![3, 4, 5]));
        // Asking for more than was captured sends everything.
        assert_eq!(select_centered(&items, 12), (0, items.clone()));
        assert_eq!(select_centered(&items[..2], 4), (0, vec![0, 1]));
    }

    #[test]
    fn idle_without_arming_ignores_motion() {
        let mut controller = controller();
        let mut tracker = InactivityTracker::new(Duration::seconds(60));
        let event = controller.step(&blank(1), &motion_at(1, 0, 0), None, &mut tracker);
        assert!(matches!(event, CaptureEvent::None));
        assert_eq!(controller.phase(), CapturePhase::Idle);
    }

    #[test]
    fn armed_motion_opens_a_burst_and_disarms() {
        let mut controller = controller();
        let mut tracker = armed_tracker();
        let event = controller.step(&blank(6), &motion_at(6, 0, 0), None, &mut tracker);
        assert!(matches!(event, CaptureEvent::Started));
        assert_eq!(controller.phase(), CapturePhase::BurstActive);
        assert!(!tracker.state().armed);
        assert_eq!(controller.active_burst().map(CaptureBurst::len), Some(1));
    }

    #[test]
    fn full_burst_finalizes_with_centered_selection_and_direction() {
        let mut controller = controller();
        let mut tracker = armed_tracker();
        controller.step(&blank(6), &motion_at(6, 0, 40), None, &mut tracker);

        let mut completed = None;
        for i in 1..10i64 {
            let second = 6 + i;
            let observation = motion_at(second, 10 * i as u32, 40);
            let event = controller.step(&blank(second), &observation, None, &mut tracker);
            match event {
                CaptureEvent::Captured { count } => assert_eq!(count, i as usize + 1),
                CaptureEvent::Completed(burst) => completed = Some(burst),
                other => panic!("unexpected event {other:?}"),
            }
        }

        let burst = completed.expect("burst should complete on the tenth image");
        assert_eq!(burst.total_captured, 10);
        assert_eq!(burst.selected.len(), 4);
        assert_eq!(burst.selection_start, 3);
        assert_eq!(burst.selected[0].captured_at(), at(9));
        assert_eq!(burst.selected[3].captured_at(), at(12));
        assert_eq!(burst.direction, Some(MotionDirection::Right));
        assert_eq!(burst.started_at, at(6));
        assert_eq!(burst.completed_at, at(15));
        assert!(!burst.face_detected);
        assert_eq!(controller.phase(), CapturePhase::Idle);
    }

    #[test]
    fn faces_take_precedence_for_direction() {
        let mut controller = CaptureController::new(CaptureConfig {
            total_captures: 2,
            images_to_send: 1,
            capture_interval_ms: 1000,
        });
        let mut tracker = armed_tracker();
        let high_face = Some(Position::new(50.0, 10.0));
        let low_face = Some(Position::new(50.0, 80.0));
        controller.step(&blank(6), &motion_at(6, 0, 0), high_face, &mut tracker);
        let event = controller.step(&blank(7), &motion_at(7, 100, 0), low_face, &mut tracker);
        let CaptureEvent::Completed(burst) = event else {
            panic!("expected the second image to complete the burst");
        };
        assert_eq!(burst.direction, Some(MotionDirection::Down));
        assert!(burst.face_detected);
    }

    #[test]
    fn takes_frame_matches_what_step_keeps() {
        let mut controller = controller();
        assert!(!controller.takes_frame(at(6), false));
        assert!(controller.takes_frame(at(6), true));

        let mut tracker = armed_tracker();
        controller.step(&blank(6), &motion_at(6, 0, 0), None, &mut tracker);
        let too_soon = at(6) + Duration::milliseconds(999);
        assert!(!controller.takes_frame(too_soon, true));
        assert!(controller.takes_frame(at(7), false));
    }

    #[test]
    fn captures_respect_the_interval() {
        let mut controller = controller();
        let mut tracker = armed_tracker();
        controller.step(&blank(6), &motion_at(6, 0, 0), None, &mut tracker);

        let half_second_later = crate::core_modules::frame::Frame::new(
            image::RgbImage::new(4, 4),
            at(6) + Duration::milliseconds(500),
        );
        let event = controller.step(&half_second_later, &quiet(6), None, &mut tracker);
        assert!(matches!(event, CaptureEvent::Waiting));
        assert_eq!(controller.active_burst().map(CaptureBurst::len), Some(1));

        let event = controller.step(&blank(7), &quiet(7), None, &mut tracker);
        assert!(matches!(event, CaptureEvent::Captured { count: 2 }));
    }

    #[test]
    fn abandoning_returns_to_idle_without_output() {
        let mut controller = controller();
        let mut tracker = armed_tracker();
        controller.step(&blank(6), &motion_at(6, 0, 0), None, &mut tracker);
        controller.step(&blank(7), &quiet(7), None, &mut tracker);
        controller.step(&blank(8), &quiet(8), None, &mut tracker);

        let event = controller.abandon();
        assert!(matches!(event, CaptureEvent::Abandoned { captured: 3 }));
        assert_eq!(controller.phase(), CapturePhase::Idle);
        assert!(matches!(controller.abandon(), CaptureEvent::None));
    }

    #[test]
    fn single_image_bursts_complete_immediately() {
        let mut controller = CaptureController::new(CaptureConfig {
            total_captures: 1,
            images_to_send: 1,
            capture_interval_ms: 1000,
        });
        let mut tracker = armed_tracker();
        let event = controller.step(&blank(6), &motion_at(6, 0, 0), None, &mut tracker);
        let CaptureEvent::Completed(burst) = event else {
            panic!("a one-image burst completes on its first frame");
        };
        assert_eq!(burst.selected.len(), 1);
        assert!(controller.is_idle());
    }
}
