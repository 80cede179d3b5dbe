//! Block-grid motion detection with an exponentially decayed background
//! reference.
//!
//! Frames are reduced to a grid of per-block luma means. Each observation
//! diffs the grid against the running reference, thresholds by the
//! configured sensitivity, and blends the reference a small step toward
//! the new frame so slow lighting drift never triggers while a moving
//! object does. One instance per camera stream; the reference is updated
//! only by `observe` and only in frame order.

use chrono::{DateTime, Utc};
use image::RgbImage;
use tracing::{debug, warn};

use crate::frame::{Frame, Rect};

/// Edge length of an averaging block in pixels.
const BLOCK: u32 = 8;

/// Fraction of the old reference kept on each update.
const LEARNING_RATE: f32 = 0.05;

/// Per-frame motion verdict.
#[derive(Debug, Clone)]
pub struct MotionSample {
    pub timestamp: DateTime<Utc>,
    pub motion: bool,
    /// Bounding box of the largest contiguous changed region, present
    /// only when motion was detected.
    pub region: Option<Rect>,
    /// Fraction of blocks that changed, 0.0 ..= 1.0.
    pub score: f32,
}

struct Grid {
    cols: usize,
    rows: usize,
    width: u32,
    height: u32,
    cells: Vec<f32>,
}

impl Grid {
    fn from_image(image: &RgbImage) -> Self {
        let (width, height) = image.dimensions();
        let cols = (width / BLOCK).max(1) as usize;
        let rows = (height / BLOCK).max(1) as usize;
        let mut cells = vec![0.0f32; cols * rows];

        for by in 0..rows {
            for bx in 0..cols {
                let x0 = bx as u32 * BLOCK;
                let y0 = by as u32 * BLOCK;
                let bw = BLOCK.min(width - x0);
                let bh = BLOCK.min(height - y0);
                let mut sum = 0.0f32;
                for y in y0..y0 + bh {
                    for x in x0..x0 + bw {
                        let [r, g, b] = image.get_pixel(x, y).0;
                        sum += 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
                    }
                }
                cells[by * cols + bx] = sum / (bw * bh) as f32;
            }
        }

        Self {
            cols,
            rows,
            width,
            height,
            cells,
        }
    }
}

pub struct MotionDetector {
    sensitivity: u8,
    diff_threshold: f32,
    min_fraction: f32,
    reference: Option<Grid>,
    resets: u64,
}

impl MotionDetector {
    pub fn new(sensitivity: u8) -> Self {
        let sensitivity = sensitivity.min(100);
        let mut detector = Self {
            sensitivity,
            diff_threshold: 0.0,
            min_fraction: 1.0,
            reference: None,
            resets: 0,
        };
        detector.derive_thresholds();
        detector
    }

    /// Re-derives thresholds for a new sensitivity without dropping the
    /// background reference.
    pub fn set_sensitivity(&mut self, sensitivity: u8) {
        let sensitivity = sensitivity.min(100);
        if sensitivity != self.sensitivity {
            self.sensitivity = sensitivity;
            self.derive_thresholds();
        }
    }

    /// Number of times the reference was reset by a resolution change.
    pub fn resets(&self) -> u64 {
        self.resets
    }

    fn derive_thresholds(&mut self) {
        let s = self.sensitivity as f32;
        // Luma delta a block must exceed: 50 at sensitivity 0, 10 at 100.
        self.diff_threshold = 50.0 - 0.4 * s;
        // Changed-area floor as a fraction of the grid: ~18% down to 0.2%.
        self.min_fraction = 0.002 + (100.0 - s) * 0.0018;
    }

    /// Observes the next frame in timestamp order and reports whether it
    /// contains motion relative to the running background reference.
    ///
    /// The first call seeds the reference and reports no motion. A frame
    /// with a different resolution resets the reference (non-fatal) and
    /// likewise reports no motion while reseeding.
    pub fn observe(&mut self, frame: &Frame) -> MotionSample {
        let grid = Grid::from_image(&frame.image);

        let quiet = |timestamp| MotionSample {
            timestamp,
            motion: false,
            region: None,
            score: 0.0,
        };

        let mut reference = match self.reference.take() {
            None => {
                debug!("Seeding motion reference ({}x{})", grid.width, grid.height);
                self.reference = Some(grid);
                return quiet(frame.timestamp);
            }
            Some(r) if r.cols != grid.cols || r.rows != grid.rows => {
                warn!(
                    "Frame resolution changed {}x{} -> {}x{}, resetting motion reference",
                    r.width, r.height, grid.width, grid.height
                );
                self.resets += 1;
                self.reference = Some(grid);
                return quiet(frame.timestamp);
            }
            Some(r) => r,
        };

        let total = grid.cells.len();
        let mut changed = vec![false; total];
        let mut changed_count = 0usize;
        for i in 0..total {
            if (grid.cells[i] - reference.cells[i]).abs() > self.diff_threshold {
                changed[i] = true;
                changed_count += 1;
            }
            // Blend toward the new frame so gradual drift is absorbed.
            reference.cells[i] += LEARNING_RATE * (grid.cells[i] - reference.cells[i]);
        }
        self.reference = Some(reference);

        let min_blocks = ((total as f32 * self.min_fraction).round() as usize).max(1);
        let motion = changed_count >= min_blocks;
        let region = if motion {
            largest_region(&changed, grid.cols, grid.rows, grid.width, grid.height)
        } else {
            None
        };

        MotionSample {
            timestamp: frame.timestamp,
            motion,
            region,
            score: changed_count as f32 / total as f32,
        }
    }
}

/// Bounding box of the largest 4-connected component of changed blocks,
/// scaled back to pixel coordinates.
fn largest_region(
    changed: &[bool],
    cols: usize,
    rows: usize,
    width: u32,
    height: u32,
) -> Option<Rect> {
    let mut visited = vec![false; changed.len()];
    let mut best: Option<(usize, usize, usize, usize, usize)> = None; // size, x1, y1, x2, y2

    for start in 0..changed.len() {
        if !changed[start] || visited[start] {
            continue;
        }
        let mut stack = vec![start];
        visited[start] = true;
        let (mut size, mut x1, mut y1, mut x2, mut y2) =
            (0usize, cols, rows, 0usize, 0usize);

        while let Some(i) = stack.pop() {
            size += 1;
            let (bx, by) = (i % cols, i / cols);
            x1 = x1.min(bx);
            y1 = y1.min(by);
            x2 = x2.max(bx);
            y2 = y2.max(by);

            let mut neighbors = Vec::with_capacity(4);
            if bx > 0 {
                neighbors.push(i - 1);
            }
            if bx + 1 < cols {
                neighbors.push(i + 1);
            }
            if by > 0 {
                neighbors.push(i - cols);
            }
            if by + 1 < rows {
                neighbors.push(i + cols);
            }
            for n in neighbors {
                if changed[n] && !visited[n] {
                    visited[n] = true;
                    stack.push(n);
                }
            }
        }

        if best.map_or(true, |(s, ..)| size > s) {
            best = Some((size, x1, y1, x2, y2));
        }
    }

    best.map(|(_, x1, y1, x2, y2)| {
        let px1 = x1 as u32 * BLOCK;
        let py1 = y1 as u32 * BLOCK;
        let px2 = ((x2 as u32 + 1) * BLOCK).min(width);
        let py2 = ((y2 as u32 + 1) * BLOCK).min(height);
        Rect {
            x: px1,
            y: py1,
            w: px2 - px1,
            h: py2 - py1,
        }
    })
}
