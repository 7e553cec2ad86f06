// THEORY:
// The region detector is the spatial grouping step of the motion detector. It takes
// the binary "changed pixels" mask of a single tick and groups foreground pixels into
// connected regions, each summarized by its bounding box and area.
//
// Algorithm:
// 1.  **Seeding**: scan the mask in raster order; every unvisited foreground pixel
//     seeds a new region.
// 2.  **Region Growing**: from the seed, grow over 8-connected foreground neighbours
//     (diagonals included) with an explicit stack.
// 3.  **Aggregation**: track min/max coordinates and the pixel count while growing,
//     then package them into a `MotionRegion`.
//
// Like the rest of the per-tick analysis this is a stateless utility: it has no
// memory of previous masks.

use serde::{Deserialize, Serialize};

/// A point in pixel space, used for region centres and motion direction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// An axis-aligned box around one connected group of changed pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotionRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// Number of foreground pixels in the region (not the box area).
    pub area: u32,
}

impl MotionRegion {
    pub fn center(&self) -> Position {
        Position {
            x: self.x as f64 + self.width as f64 / 2.0,
            y: self.y as f64 + self.height as f64 / 2.0,
        }
    }
}

pub mod region_detector {
    use super::MotionRegion;
    use crate::core_modules::frame::luma::BACKGROUND;
    use image::GrayImage;

    /// Finds every 8-connected foreground region in `mask`, in raster order of
    /// each region's first pixel.
    pub fn find_regions(mask: &GrayImage) -> Vec<MotionRegion> {
        let (width, height) = mask.dimensions();
        let pixels = mask.as_raw();
        let mut visited = vec![false; pixels.len()];
        let mut regions = Vec::new();

        for index in 0..pixels.len() {
            if visited[index] || pixels[index] == BACKGROUND {
                continue;
            }
            regions.push(grow_region(index, pixels, &mut visited, width, height));
        }

        regions
    }

    fn grow_region(
        seed: usize,
        pixels: &[u8],
        visited: &mut [bool],
        width: u32,
        height: u32,
    ) -> MotionRegion {
        let (w, h) = (width as i64, height as i64);
        let mut stack = vec![seed];
        visited[seed] = true;

        let mut min_x = u32::MAX;
        let mut min_y = u32::MAX;
        let mut max_x = 0;
        let mut max_y = 0;
        let mut area = 0u32;

        while let Some(current) = stack.pop() {
            let x = (current % width as usize) as u32;
            let y = (current / width as usize) as u32;
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
            area += 1;

            for dy in -1i64..=1 {
                for dx in -1i64..=1 {
                    if dx == 0 && dy == 0 {
                        continue;
                    }
                    let nx = x as i64 + dx;
                    let ny = y as i64 + dy;
                    if nx < 0 || nx >= w || ny < 0 || ny >= h {
                        continue;
                    }
                    let neighbour = (ny * w + nx) as usize;
                    if !visited[neighbour] && pixels[neighbour] != BACKGROUND {
                        visited[neighbour] = true;
                        stack.push(neighbour);
                    }
                }
            }
        }

        MotionRegion {
            x: min_x,
            y: min_y,
            width: max_x - min_x + 1,
            height: max_y - min_y + 1,
            area,
        }
    }

    /// The region with the greatest area. Equal areas resolve to the region that
    /// comes first in raster order.
    pub fn largest(regions: &[MotionRegion]) -> Option<&MotionRegion> {
        regions.iter().fold(None, |best: Option<&MotionRegion>, candidate| match best {
            Some(current) if current.area >= candidate.area => Some(current),
            _ => Some(candidate),
        })
    }
}
