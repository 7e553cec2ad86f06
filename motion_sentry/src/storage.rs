// THEORY:
// `DirectoryStore` is the stock `PersistenceSink`: every frame becomes one PNG
// under a root directory. File names combine the capture timestamp with a
// per-store sequence number, so frames captured within the same millisecond
// never overwrite each other and a directory listing sorts in capture order.

use crate::core_modules::frame::Frame;
use crate::error::PersistenceError;
use crate::interfaces::PersistenceSink;
use image::ImageEncoder;
use std::io::{BufWriter, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

pub struct DirectoryStore {
    root: PathBuf,
    sequence: AtomicU64,
}

impl DirectoryStore {
    /// Opens (and creates if needed) the directory frames are written to.
    pub fn create(root: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|source| PersistenceError::Io {
            path: root.clone(),
            source,
        })?;
        Ok(Self {
            root,
            sequence: AtomicU64::new(0),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn next_path(&self, frame: &Frame) -> PathBuf {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let stamp = frame.captured_at().format("%Y%m%d_%H%M%S_%3f");
        self.root.join(format!("capture_{stamp}_{sequence:05}.png"))
    }
}

mod png_writer {
    use super::*;

    pub fn save(path: &Path, frame: &Frame) -> Result<(), PersistenceError> {
        let file = std::fs::File::create(path).map_err(|source| PersistenceError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let encoder = image::codecs::png::PngEncoder::new(BufWriter::new(file));
        let image = frame.image();
        encoder
            .write_image(
                image.as_raw(),
                image.width(),
                image.height(),
                image::ExtendedColorType::Rgb8,
            )
            .map_err(|source| PersistenceError::Encode {
                path: path.to_path_buf(),
                source,
            })
    }
}

impl PersistenceSink for DirectoryStore {
    fn save(&self, frame: &Frame) -> Result<PathBuf, PersistenceError> {
        let path = self.next_path(frame);
        png_writer::save(&path, frame)?;
        log::debug!("saved frame to {}", path.display());
        Ok(path)
    }

    fn delete_all(&self, paths: &[PathBuf]) -> Result<usize, PersistenceError> {
        let mut removed = 0;
        for path in paths {
            match std::fs::remove_file(path) {
                Ok(()) => removed += 1,
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    log::debug!("{} already removed", path.display());
                }
                Err(source) => {
                    return Err(PersistenceError::Io {
                        path: path.clone(),
                        source,
                    });
                }
            }
        }
        Ok(removed)
    }
}
