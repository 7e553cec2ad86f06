// THEORY:
// Stand-in for a chat or push notifier. Each delivered alert becomes
// `alert_<stamp>.json` in the output directory, next to copies of the persisted
// frames (`alert_<stamp>_<n>.png`). The copies outlive the post-delivery cleanup of
// the capture directory, the way an uploaded photo outlives the local file.

use futures::future::BoxFuture;
use motion_sentry::{Alert, AlertMetadata, DeliveryError, NotificationSink};
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Serialize)]
struct AlertReport<'a> {
    #[serde(flatten)]
    metadata: &'a AlertMetadata,
    images: Vec<PathBuf>,
}

pub struct JsonReportNotifier {
    dir: PathBuf,
}

impl JsonReportNotifier {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    async fn write_report(&self, alert: &Alert) -> Result<PathBuf, DeliveryError> {
        let stem = format!("alert_{}", alert.metadata.timestamp.format("%Y%m%d_%H%M%S"));

        let mut images = Vec::with_capacity(alert.saved_paths.len());
        for (index, saved) in alert.saved_paths.iter().enumerate() {
            let copy = self.dir.join(format!("{stem}_{index}.png"));
            tokio::fs::copy(saved, &copy).await.map_err(|err| transport(saved, err))?;
            images.push(copy);
        }
        if images.len() < alert.images.len() {
            log::warn!(
                "{stem}: only {} of {} frames were persisted",
                images.len(),
                alert.images.len()
            );
        }

        let report = AlertReport {
            metadata: &alert.metadata,
            images,
        };
        let body = serde_json::to_vec_pretty(&report)
            .map_err(|err| DeliveryError::Rejected(err.to_string()))?;
        let path = self.dir.join(format!("{stem}.json"));
        tokio::fs::write(&path, body).await.map_err(|err| transport(&path, err))?;
        Ok(path)
    }

    async fn announce(&self, alert: &Alert) -> Result<(), DeliveryError> {
        let path = self.write_report(alert).await?;
        log::info!(
            "ALERT motion {} at {} ({} frames, face: {}) -> {}",
            alert
                .metadata
                .motion_direction
                .map_or_else(|| "in view".to_string(), |direction| format!("moving {direction}")),
            alert.metadata.timestamp,
            alert.images.len(),
            alert.metadata.face_detected,
            path.display()
        );
        Ok(())
    }
}

fn transport(path: &Path, err: std::io::Error) -> DeliveryError {
    DeliveryError::Transport(format!("{}: {err}", path.display()))
}

impl NotificationSink for JsonReportNotifier {
    fn deliver<'a>(&'a self, alert: &'a Alert) -> BoxFuture<'a, Result<(), DeliveryError>> {
        Box::pin(self.announce(alert))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use image::RgbImage;
    use motion_sentry::{DirectoryStore, FinalizedBurst, Frame, MotionDirection, PersistenceSink};

    fn alert(store: &DirectoryStore) -> Alert {
        let day = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let at = |second| day.and_hms_opt(23, 10, second).unwrap();
        let frames: Vec<Frame> = (3..5)
            .map(|second| Frame::new(RgbImage::new(4, 4), at(second)))
            .collect();
        let mut alert = Alert::from_burst(FinalizedBurst {
            selected: frames.clone(),
            selection_start: 3,
            total_captured: 10,
            started_at: at(0),
            completed_at: at(9),
            direction: Some(MotionDirection::Up),
            face_detected: false,
        });
        alert.saved_paths = frames
            .iter()
            .map(|frame| store.save(frame).unwrap())
            .collect();
        alert
    }

    #[tokio::test]
    async fn writes_report_and_frame_copies() {
        let out = tempfile::tempdir().unwrap();
        let store = DirectoryStore::create(out.path().join("captures")).unwrap();
        let notifier = JsonReportNotifier::new(out.path());

        notifier.deliver(&alert(&store)).await.unwrap();

        let report_path = out.path().join("alert_20240501_231009.json");
        let body = std::fs::read(&report_path).unwrap();
        let report: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(report["motion_direction"], "up");
        assert_eq!(report["images_captured"], 10);
        assert_eq!(report["images"].as_array().unwrap().len(), 2);
        assert!(out.path().join("alert_20240501_231009_0.png").exists());
        assert!(out.path().join("alert_20240501_231009_1.png").exists());
    }

    #[tokio::test]
    async fn missing_capture_fails_delivery() {
        let out = tempfile::tempdir().unwrap();
        let store = DirectoryStore::create(out.path().join("captures")).unwrap();
        let alert = alert(&store);
        store.delete_all(&alert.saved_paths).unwrap();

        let result = JsonReportNotifier::new(out.path()).deliver(&alert).await;
        assert!(matches!(result, Err(DeliveryError::Transport(_))));
    }
}
