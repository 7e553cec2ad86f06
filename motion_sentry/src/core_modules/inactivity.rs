// THEORY:
// The `InactivityTracker` measures how long the scene has been free of motion and
// raises an "armed" flag once the quiet window reaches the configured timeout. Only a
// transition from a long quiet period into motion is newsworthy; something that keeps
// moving in frame (foliage, a screen) never re-arms the system.
//
// Transition rules, applied once per tick in this order:
// 1.  not armed, quiet window open, and `now - quiet_since >= timeout`: arm.
//     The window is measured up to the current tick, so a motion frame that
//     arrives exactly at the timeout both arms and gets captured.
// 2.  motion: `last_motion_at = now`; if still not armed the quiet window closes.
// 3.  no motion and no open window: the window opens at `now`.
//
// Arming is monotonic: once armed, nothing but `disarm` (burst started) or `reset`
// (schedule closed) clears it.

use crate::core_modules::motion_detector::MotionObservation;
use chrono::{Duration, NaiveDateTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InactivityState {
    pub last_motion_at: Option<NaiveDateTime>,
    /// Start of the current quiet window, if one is open.
    pub quiet_since: Option<NaiveDateTime>,
    pub armed: bool,
}

pub struct InactivityTracker {
    timeout: Duration,
    state: InactivityState,
}

impl InactivityTracker {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            state: InactivityState::default(),
        }
    }

    pub fn state(&self) -> InactivityState {
        self.state
    }

    /// Regular per-tick update while no burst is running.
    pub fn update(
        &mut self,
        observation: &MotionObservation,
        now: NaiveDateTime,
    ) -> InactivityState {
        self.advance(observation.detected, now, true)
    }

    /// Per-tick update while a burst is running: timing is kept current but the
    /// tracker never arms.
    pub fn track(
        &mut self,
        observation: &MotionObservation,
        now: NaiveDateTime,
    ) -> InactivityState {
        self.advance(observation.detected, now, false)
    }

    fn advance(&mut self, detected: bool, now: NaiveDateTime, may_arm: bool) -> InactivityState {
        if may_arm && !self.state.armed {
            if let Some(since) = self.state.quiet_since {
                if now - since >= self.timeout {
                    self.state.armed = true;
                    log::info!("armed after {}s of inactivity", (now - since).num_seconds());
                }
            }
        }

        if detected {
            self.state.last_motion_at = Some(now);
            if !self.state.armed {
                self.state.quiet_since = None;
            }
        } else if self.state.quiet_since.is_none() {
            self.state.quiet_since = Some(now);
        }

        self.state
    }

    /// Clears the armed flag and the quiet window; called the instant a burst opens.
    pub fn disarm(&mut self) {
        self.state.armed = false;
        self.state.quiet_since = None;
    }

    pub fn reset(&mut self) {
        self.state = InactivityState::default();
    }
}
