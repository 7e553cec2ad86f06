// THEORY:
// `DirectoryFrameSource` turns a folder of still images into a camera. Files are
// played in name order, optionally several times over, and each frame is stamped
// `start + n / fps` so the monitor sees a steady clock regardless of how fast the
// replay actually runs. With pacing enabled a tokio interval releases frames at
// the same rate in real time.

use anyhow::{Context, bail};
use chrono::NaiveDateTime;
use futures::future::BoxFuture;
use motion_sentry::{AcquisitionError, Frame, FrameSource};
use std::path::{Path, PathBuf};
use tokio::time::{Interval, MissedTickBehavior};

const EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

#[derive(Debug, Clone, Copy)]
pub struct ReplayTiming {
    pub start: NaiveDateTime,
    pub fps: f64,
    /// Release frames in real time instead of as fast as they decode.
    pub paced: bool,
    /// Passes over the directory; 0 repeats forever.
    pub loop_count: u32,
}

pub struct DirectoryFrameSource {
    paths: Vec<PathBuf>,
    next_index: usize,
    passes_done: u32,
    timing: ReplayTiming,
    produced: u64,
    pacer: Option<Interval>,
}

impl DirectoryFrameSource {
    pub fn open(dir: &Path, timing: ReplayTiming) -> anyhow::Result<Self> {
        if !(timing.fps.is_finite() && timing.fps > 0.0) {
            bail!("fps must be a positive number, got {}", timing.fps);
        }
        let paths = list_images(dir)?;
        if paths.is_empty() {
            bail!("no image files found in {}", dir.display());
        }
        log::info!(
            "replaying {} frames from {} at {} fps",
            paths.len(),
            dir.display(),
            timing.fps
        );

        let pacer = timing.paced.then(|| {
            let period = std::time::Duration::from_secs_f64(1.0 / timing.fps);
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        Ok(Self {
            paths,
            next_index: 0,
            passes_done: 0,
            timing,
            produced: 0,
            pacer,
        })
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    fn advance(&mut self) -> Option<PathBuf> {
        if self.next_index == self.paths.len() {
            self.passes_done += 1;
            if self.timing.loop_count != 0 && self.passes_done >= self.timing.loop_count {
                return None;
            }
            self.next_index = 0;
        }
        let path = self.paths[self.next_index].clone();
        self.next_index += 1;
        Some(path)
    }

    fn stamp(&self) -> NaiveDateTime {
        let offset_us = self.produced as f64 * 1_000_000.0 / self.timing.fps;
        let offset_us = offset_us.round() as i64;
        self.timing.start + chrono::Duration::microseconds(offset_us)
    }

    async fn read_next(&mut self) -> Result<Frame, AcquisitionError> {
        let path = self.advance().ok_or(AcquisitionError::EndOfStream)?;
        if let Some(pacer) = self.pacer.as_mut() {
            pacer.tick().await;
        }

        let captured_at = self.stamp();
        let image = tokio::task::spawn_blocking(move || {
            image::open(&path)
                .map(|image| image.to_rgb8())
                .map_err(|err| AcquisitionError::Failed(format!("{}: {err}", path.display())))
        })
        .await
        .map_err(|err| AcquisitionError::Failed(format!("decoder task failed: {err}")))??;

        self.produced += 1;
        Ok(Frame::new(image, captured_at))
    }
}

fn list_images(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("cannot read input directory {}", dir.display()))?;
    let mut paths = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let is_image = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
        if is_image && path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

impl FrameSource for DirectoryFrameSource {
    fn next_frame(&mut self) -> BoxFuture<'_, Result<Frame, AcquisitionError>> {
        Box::pin(self.read_next())
    }
}
