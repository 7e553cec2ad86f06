// THEORY:
// The schedule decides whether detection runs at all on a given tick and which
// binarization threshold (sensitivity) it uses.
//
// - `ScheduleWindow` is an immutable snapshot: active hours, day/night thresholds
//   and the hour range that counts as "day".
// - `SettingsStore` is the single writer. An update is merged into the current
//   snapshot, validated and published in one step under the channel lock; a rejected
//   update leaves the previous snapshot in force.
// - `ScheduleGate` is the detection loop's read side. It takes one snapshot per tick,
//   so a concurrent update can never be observed half-applied within a tick.

use crate::error::ConfigurationError;
use chrono::{NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;

const TIME_FORMAT: &str = "%H:%M";

/// `NaiveTime` as "HH:MM", the format the settings payload uses.
mod hhmm {
    use super::TIME_FORMAT;
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        let text = time.format(TIME_FORMAT).to_string();
        serializer.serialize_str(&text)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let text = String::deserialize(deserializer)?;
        NaiveTime::parse_from_str(&text, TIME_FORMAT)
            .map_err(serde::de::Error::custom)
    }
}

fn parse_time_of_day(text: &str) -> Result<NaiveTime, ConfigurationError> {
    NaiveTime::parse_from_str(text.trim(), TIME_FORMAT)
        .map_err(|_| ConfigurationError::InvalidTime(text.to_string()))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleWindow {
    #[serde(with = "hhmm")]
    pub start: NaiveTime,
    #[serde(with = "hhmm")]
    pub end: NaiveTime,
    /// Binarization threshold during the day period.
    pub day_sensitivity: u8,
    /// Binarization threshold outside the day period.
    pub night_sensitivity: u8,
    /// First hour (inclusive) of the day period.
    pub day_start_hour: u32,
    /// Last hour (exclusive) of the day period.
    pub day_end_hour: u32,
}

impl Default for ScheduleWindow {
    fn default() -> Self {
        Self {
            start: NaiveTime::MIN,
            end: NaiveTime::from_hms_opt(23, 59, 0).unwrap_or(NaiveTime::MIN),
            day_sensitivity: 60,
            night_sensitivity: 40,
            day_start_hour: 6,
            day_end_hour: 20,
        }
    }
}

impl ScheduleWindow {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let levels = [
            ("day", self.day_sensitivity),
            ("night", self.night_sensitivity),
        ];
        for (name, value) in levels {
            if !(1..=254).contains(&value) {
                return Err(ConfigurationError::InvalidThreshold {
                    name,
                    value: value as i64,
                });
            }
        }
        if self.day_start_hour >= self.day_end_hour || self.day_end_hour > 24 {
            return Err(ConfigurationError::InvalidDayPeriod {
                start: self.day_start_hour,
                end: self.day_end_hour,
            });
        }
        Ok(())
    }

    /// Whether detection runs at `now`. The window is inclusive at minute
    /// resolution on both ends; `start > end` spans midnight.
    pub fn is_active(&self, now: NaiveTime) -> bool {
        let now = truncate_to_minute(now);
        let (start, end) = (truncate_to_minute(self.start), truncate_to_minute(self.end));
        if start <= end {
            start <= now && now <= end
        } else {
            now >= start || now <= end
        }
    }

    /// Binarization threshold for `now`.
    pub fn sensitivity(&self, now: NaiveTime) -> u8 {
        if (self.day_start_hour..self.day_end_hour).contains(&now.hour()) {
            self.day_sensitivity
        } else {
            self.night_sensitivity
        }
    }
}

fn truncate_to_minute(time: NaiveTime) -> NaiveTime {
    NaiveTime::from_hms_opt(time.hour(), time.minute(), 0).unwrap_or(time)
}

/// Dashboard payload for a settings change. Either section may be omitted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsUpdate {
    pub monitoring_hours: Option<MonitoringHours>,
    pub sensitivity: Option<SensitivityLevels>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoringHours {
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensitivityLevels {
    pub day: i64,
    pub night: i64,
}

impl SettingsUpdate {
    /// Applies this update on top of `base`, returning the new validated window.
    pub fn apply_to(&self, base: &ScheduleWindow) -> Result<ScheduleWindow, ConfigurationError> {
        let mut window = base.clone();
        if let Some(hours) = &self.monitoring_hours {
            window.start = parse_time_of_day(&hours.start)?;
            window.end = parse_time_of_day(&hours.end)?;
        }
        if let Some(levels) = self.sensitivity {
            window.day_sensitivity = threshold_from("day", levels.day)?;
            window.night_sensitivity = threshold_from("night", levels.night)?;
        }
        window.validate()?;
        Ok(window)
    }
}

fn threshold_from(name: &'static str, value: i64) -> Result<u8, ConfigurationError> {
    u8::try_from(value)
        .ok()
        .filter(|threshold| (1..=254).contains(threshold))
        .ok_or(ConfigurationError::InvalidThreshold { name, value })
}

impl From<&ScheduleWindow> for SettingsUpdate {
    fn from(window: &ScheduleWindow) -> Self {
        Self {
            monitoring_hours: Some(MonitoringHours {
                start: window.start.format(TIME_FORMAT).to_string(),
                end: window.end.format(TIME_FORMAT).to_string(),
            }),
            sensitivity: Some(SensitivityLevels {
                day: window.day_sensitivity as i64,
                night: window.night_sensitivity as i64,
            }),
        }
    }
}

/// Owner of the current schedule. Cloning yields another handle to the same store.
#[derive(Clone)]
pub struct SettingsStore {
    sender: Arc<watch::Sender<Arc<ScheduleWindow>>>,
}

impl SettingsStore {
    pub fn new(initial: ScheduleWindow) -> Result<Self, ConfigurationError> {
        initial.validate()?;
        let (sender, _) = watch::channel(Arc::new(initial));
        Ok(Self {
            sender: Arc::new(sender),
        })
    }

    pub fn get(&self) -> Arc<ScheduleWindow> {
        self.sender.borrow().clone()
    }

    pub fn set(&self, window: ScheduleWindow) -> Result<(), ConfigurationError> {
        self.modify(|_| {
            window.validate()?;
            Ok(window)
        })
        .map(drop)
    }

    pub fn apply(
        &self,
        update: &SettingsUpdate,
    ) -> Result<Arc<ScheduleWindow>, ConfigurationError> {
        self.modify(|current| update.apply_to(current))
    }

    /// Reads, replaces and publishes the window as one step under the channel
    /// lock, so concurrent updates to different fields cannot lose each other.
    fn modify<F>(&self, change: F) -> Result<Arc<ScheduleWindow>, ConfigurationError>
    where
        F: FnOnce(&ScheduleWindow) -> Result<ScheduleWindow, ConfigurationError>,
    {
        let mut outcome = Err(ConfigurationError::InvalidValue(
            "settings were not updated".to_string(),
        ));
        self.sender.send_if_modified(|current| match change(&**current) {
            Ok(window) => {
                log::info!(
                    "schedule set to {}-{}, sensitivity day={} night={}",
                    window.start.format(TIME_FORMAT),
                    window.end.format(TIME_FORMAT),
                    window.day_sensitivity,
                    window.night_sensitivity
                );
                *current = Arc::new(window);
                outcome = Ok(current.clone());
                true
            }
            Err(err) => {
                outcome = Err(err);
                false
            }
        });
        outcome
    }

    /// Applies a JSON settings payload such as
    /// `{"monitoring_hours": {"start": "22:00", "end": "06:00"}}` or
    /// `{"sensitivity": {"day": 60, "night": 40}}`, or both sections at once.
    pub fn apply_json(&self, payload: &str) -> Result<Arc<ScheduleWindow>, ConfigurationError> {
        let update: SettingsUpdate = serde_json::from_str(payload)?;
        self.apply(&update)
            .inspect_err(|err| log::warn!("settings update rejected: {err}"))
    }

    /// The current settings in the same shape `apply_json` accepts.
    pub fn to_json(&self) -> Result<String, ConfigurationError> {
        let update = SettingsUpdate::from(self.get().as_ref());
        Ok(serde_json::to_string(&update)?)
    }

    pub fn gate(&self) -> ScheduleGate {
        ScheduleGate {
            receiver: self.sender.subscribe(),
        }
    }
}

/// Read side of the schedule, owned by the detection loop.
pub struct ScheduleGate {
    receiver: watch::Receiver<Arc<ScheduleWindow>>,
}

impl ScheduleGate {
    /// The snapshot to use for one whole tick.
    pub fn snapshot(&mut self) -> Arc<ScheduleWindow> {
        if self.receiver.has_changed().unwrap_or(false) {
            log::debug!("detection loop picked up new schedule settings");
        }
        self.receiver.borrow_and_update().clone()
    }

    pub fn is_active(&mut self, now: NaiveTime) -> bool {
        self.snapshot().is_active(now)
    }

    pub fn sensitivity(&mut self, now: NaiveTime) -> u8 {
        self.snapshot().sensitivity(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn time(hour: u32, minute: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(hour, minute, 0).unwrap()
    }

    fn window(start: (u32, u32), end: (u32, u32)) -> ScheduleWindow {
        ScheduleWindow {
            start: time(start.0, start.1),
            end: time(end.0, end.1),
            ..ScheduleWindow::default()
        }
    }

    #[test]
    fn overnight_window_wraps_midnight() {
        let overnight = window((22, 0), (6, 0));
        assert!(overnight.is_active(time(23, 0)));
        assert!(overnight.is_active(time(2, 30)));
        assert!(overnight.is_active(time(6, 0)));
        assert!(!overnight.is_active(time(12, 0)));
        assert!(!overnight.is_active(time(21, 59)));
    }

    #[test]
    fn daytime_window_is_inclusive() {
        let office = window((9, 0), (17, 30));
        assert!(office.is_active(time(9, 0)));
        assert!(office.is_active(time(17, 30)));
        assert!(!office.is_active(time(8, 59)));
        assert!(!office.is_active(time(17, 31)));
    }

    #[test]
    fn end_minute_is_covered_entirely() {
        let all_day = ScheduleWindow::default();
        let late = NaiveTime::from_hms_opt(23, 59, 45).unwrap();
        assert!(all_day.is_active(late));
        assert!(all_day.is_active(time(0, 0)));
    }

    #[test]
    fn sensitivity_switches_at_day_boundaries() {
        let schedule = ScheduleWindow::default();
        assert_eq!(schedule.sensitivity(time(5, 59)), 40);
        assert_eq!(schedule.sensitivity(time(6, 0)), 60);
        assert_eq!(schedule.sensitivity(time(19, 59)), 60);
        assert_eq!(schedule.sensitivity(time(20, 0)), 40);
    }

    #[test]
    fn window_round_trips_through_hhmm_json() {
        let overnight = window((22, 0), (6, 15));
        let json = serde_json::to_value(&overnight).unwrap();
        assert_eq!(json["start"], "22:00");
        assert_eq!(json["end"], "06:15");
    }

    #[test]
    fn store_applies_dashboard_payload() {
        let store = SettingsStore::new(ScheduleWindow::default()).unwrap();
        let payload = r#"{
            "monitoring_hours": {"start": "22:00", "end": "06:00"},
            "sensitivity": {"day": 70, "night": 30}
        }"#;
        let updated = store.apply_json(payload).unwrap();
        assert_eq!(updated.start, time(22, 0));
        assert_eq!(updated.end, time(6, 0));
        assert_eq!(updated.day_sensitivity, 70);
        assert_eq!(updated.night_sensitivity, 30);
        assert_eq!(*store.get(), *updated);
    }

    #[test]
    fn partial_payload_keeps_other_settings() {
        let store = SettingsStore::new(ScheduleWindow::default()).unwrap();
        store
            .apply_json(r#"{"sensitivity": {"day": 50, "night": 25}}"#)
            .unwrap();
        let current = store.get();
        assert_eq!(current.start, NaiveTime::MIN);
        assert_eq!(current.day_sensitivity, 50);
    }

    #[test]
    fn rejected_update_keeps_previous_snapshot() {
        let store = SettingsStore::new(ScheduleWindow::default()).unwrap();
        let before = store.get();

        let bad_time = r#"{"monitoring_hours": {"start": "25:00", "end": "06:00"}}"#;
        assert!(matches!(
            store.apply_json(bad_time),
            Err(ConfigurationError::InvalidTime(_))
        ));

        let bad_level = r#"{"sensitivity": {"day": 3000, "night": 2000}}"#;
        assert!(matches!(
            store.apply_json(bad_level),
            Err(ConfigurationError::InvalidThreshold {
                name: "day",
                value: 3000,
            })
        ));

        let truncated = store.apply_json("{");
        assert!(matches!(truncated, Err(ConfigurationError::Parse(_))));
        assert_eq!(store.get(), before);
    }

    #[test]
    fn set_rejects_invalid_window_and_keeps_snapshot() {
        let store = SettingsStore::new(window((22, 0), (6, 0))).unwrap();
        let before = store.get();

        let inverted_day = ScheduleWindow {
            day_start_hour: 20,
            day_end_hour: 6,
            ..ScheduleWindow::default()
        };
        assert!(matches!(
            store.set(inverted_day),
            Err(ConfigurationError::InvalidDayPeriod { start: 20, end: 6 })
        ));

        for value in [0, 255] {
            let extreme = ScheduleWindow {
                night_sensitivity: value,
                ..ScheduleWindow::default()
            };
            assert!(matches!(
                store.set(extreme),
                Err(ConfigurationError::InvalidThreshold { name: "night", .. })
            ));
        }
        assert_eq!(store.get(), before);
    }

    #[test]
    fn concurrent_updates_to_different_fields_both_land() {
        const HOURS: &str = r#"{"monitoring_hours": {"start": "22:00", "end": "06:00"}}"#;
        const LEVELS: &str = r#"{"sensitivity": {"day": 90, "night": 20}}"#;
        for _ in 0..50 {
            let store = SettingsStore::new(ScheduleWindow::default()).unwrap();
            let hours = store.clone();
            let levels = store.clone();
            let first = std::thread::spawn(move || hours.apply_json(HOURS).map(drop));
            let second = std::thread::spawn(move || levels.apply_json(LEVELS).map(drop));
            first.join().unwrap().unwrap();
            second.join().unwrap().unwrap();

            let current = store.get();
            assert_eq!(current.start, time(22, 0));
            assert_eq!(current.end, time(6, 0));
            assert_eq!(current.day_sensitivity, 90);
            assert_eq!(current.night_sensitivity, 20);
        }
    }

    #[test]
    fn gate_sees_last_write() {
        let store = SettingsStore::new(ScheduleWindow::default()).unwrap();
        let mut gate = store.gate();
        assert!(gate.is_active(time(12, 0)));

        store.set(window((22, 0), (6, 0))).unwrap();
        store.set(window((23, 0), (5, 0))).unwrap();
        let snapshot = gate.snapshot();
        assert_eq!(snapshot.start, time(23, 0));
        assert!(!gate.is_active(time(12, 0)));
    }

    #[test]
    fn json_view_matches_payload_shape() {
        let store = SettingsStore::new(ScheduleWindow::default()).unwrap();
        let json: serde_json::Value = serde_json::from_str(&store.to_json().unwrap()).unwrap();
        assert_eq!(json["monitoring_hours"]["start"], "00:00");
        assert_eq!(json["monitoring_hours"]["end"], "23:59");
        assert_eq!(json["sensitivity"]["day"], 60);
        assert_eq!(json["sensitivity"]["night"], 40);
    }
}
