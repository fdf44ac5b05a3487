// THEORY:
// The `HeatmapRenderer` turns a set of historical centroids into a picture of where the animal
// spends its time. It is a pure function of its inputs: no caches and no clock, so the same
// points, range and grid always produce byte-identical PNGs.
//
// Pipeline:
// 1.  **Accumulate**: centroids inside the time range and the frame are binned into a
//     `grid_width x grid_height` count grid.
// 2.  **Smooth**: a separable Gaussian (radius `ceil(3 * sigma)` cells, zero outside the grid)
//     diffuses the counts into a continuous density.
// 3.  **Normalize**: density is scaled so the densest cell is 1.0.
// 4.  **Colorize**: each cell is mapped through the configured color scale and blown up to
//     `pixels_per_cell` output pixels.
//
// Caller-supplied sizes are bounded: the grid to 4096 cells per side, the output image to
// 4096 pixels per side (by shrinking `pixels_per_cell`), and the time range to `max_query_days`.
//
// An empty input is not an error. It renders a gray checkerboard crossed in red, which no real
// density map can look like, and the result is flagged `is_placeholder`.

use crate::config::{ColorScale, HeatmapConfig};
use crate::core_modules::motion_event::Point;
use crate::error::VisionResult;
use crate::store::{EventStore, TimeRange};
use chrono::NaiveDateTime;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder, Rgb, RgbImage};
use tracing::{debug, warn};

/// Largest grid, in cells per side.
const MAX_GRID_SIDE: u32 = 4096;
/// Largest output image, in pixels per side.
const MAX_IMAGE_SIDE: u32 = 4096;

/// A rendered density map.
#[derive(Debug, Clone)]
pub struct Heatmap {
    pub grid_width: u32,
    pub grid_height: u32,
    /// Row-major normalized density in `[0, 1]`. All zeros for a placeholder.
    pub density: Vec<f64>,
    /// Number of points that landed in the grid.
    pub point_count: usize,
    pub image: RgbImage,
    pub is_placeholder: bool,
}

impl Heatmap {
    /// Encodes the image as PNG.
    pub fn to_png(&self) -> VisionResult<Vec<u8>> {
        let mut bytes = Vec::new();
        PngEncoder::new(&mut bytes).write_image(
            self.image.as_raw(),
            self.image.width(),
            self.image.height(),
            ExtendedColorType::Rgb8,
        )?;
        Ok(bytes)
    }

    pub fn density_at(&self, gx: u32, gy: u32) -> Option<f64> {
        if gx >= self.grid_width || gy >= self.grid_height {
            return None;
        }
        self.density
            .get(gy as usize * self.grid_width as usize + gx as usize)
            .copied()
    }
}

pub struct HeatmapRenderer {
    config: HeatmapConfig,
    frame_width: u32,
    frame_height: u32,
}

impl HeatmapRenderer {
    pub fn new(config: HeatmapConfig, frame_width: u32, frame_height: u32) -> Self {
        Self {
            config,
            frame_width,
            frame_height,
        }
    }

    /// Renders at the configured grid resolution.
    pub fn render(&self, points: &[(NaiveDateTime, Point)], range: &TimeRange) -> Heatmap {
        self.render_with_grid(points, range, self.config.grid_width, self.config.grid_height)
    }

    /// Renders every persisted event centroid of `range`.
    pub fn render_from_store<S: EventStore>(&self, store: &S, range: &TimeRange) -> VisionResult<Heatmap> {
        let range = self.cap(range);
        let points: Vec<(NaiveDateTime, Point)> = store
            .events_in_range(&range)?
            .into_iter()
            .map(|r| (r.timestamp(), r.event.centroid))
            .collect();
        Ok(self.render(&points, &range))
    }

    pub fn render_with_grid(
        &self,
        points: &[(NaiveDateTime, Point)],
        range: &TimeRange,
        grid_width: u32,
        grid_height: u32,
    ) -> Heatmap {
        let range = &self.cap(range);
        let (gw, gh) = (grid_width.clamp(1, MAX_GRID_SIDE), grid_height.clamp(1, MAX_GRID_SIDE));
        if (gw, gh) != (grid_width, grid_height) {
            debug!(grid_width, grid_height, gw, gh, "grid resolution clamped");
        }

        // --- 1. Accumulate ---
        let mut grid = vec![0.0f64; gw as usize * gh as usize];
        let mut point_count = 0;
        for (timestamp, point) in points {
            if !range.contains(*timestamp) {
                continue;
            }
            if let Some(index) = self.cell_index(point, gw, gh) {
                grid[index] += 1.0;
                point_count += 1;
            }
        }

        if point_count == 0 {
            debug!(grid_width = gw, grid_height = gh, "no points in range, rendering placeholder");
            return Heatmap {
                grid_width: gw,
                grid_height: gh,
                density: grid,
                point_count,
                image: self.placeholder(gw, gh),
                is_placeholder: true,
            };
        }

        // --- 2. Smooth ---
        if self.config.gaussian_sigma > 0.0 {
            grid = gaussian_blur(&grid, gw as usize, gh as usize, self.config.gaussian_sigma);
        }

        // --- 3. Normalize ---
        let peak = grid.iter().copied().fold(0.0f64, f64::max);
        if peak > 0.0 {
            grid.iter_mut().for_each(|v| *v /= peak);
        }

        // --- 4. Colorize ---
        let scale = self.cell_scale(gw, gh);
        let color_scale = self.config.color_scale;
        let image = RgbImage::from_fn(gw * scale, gh * scale, |x, y| {
            colorize(color_scale, grid[(y / scale) as usize * gw as usize + (x / scale) as usize])
        });

        Heatmap {
            grid_width: gw,
            grid_height: gh,
            density: grid,
            point_count,
            image,
            is_placeholder: false,
        }
    }

    fn cell_index(&self, point: &Point, gw: u32, gh: u32) -> Option<usize> {
        let inside = point.is_finite()
            && point.x >= 0.0
            && point.y >= 0.0
            && point.x < self.frame_width as f64
            && point.y < self.frame_height as f64;
        if !inside {
            return None;
        }
        let gx = ((point.x / self.frame_width as f64) * gw as f64) as u32;
        let gy = ((point.y / self.frame_height as f64) * gh as f64) as u32;
        Some(gy.min(gh - 1) as usize * gw as usize + gx.min(gw - 1) as usize)
    }

    /// Output pixels per grid cell, shrunk so neither image side exceeds `MAX_IMAGE_SIDE`.
    fn cell_scale(&self, gw: u32, gh: u32) -> u32 {
        let fit = (MAX_IMAGE_SIDE / gw.max(gh)).max(1);
        self.config.pixels_per_cell.clamp(1, fit)
    }

    fn cap(&self, range: &TimeRange) -> TimeRange {
        let (capped, cut) = range.capped(self.config.max_query_days);
        if cut {
            warn!(
                start = %range.start,
                requested_end = %range.end,
                capped_end = %capped.end,
                max_days = self.config.max_query_days,
                "heatmap range capped"
            );
        }
        capped
    }

    fn placeholder(&self, gw: u32, gh: u32) -> RgbImage {
        let scale = self.cell_scale(gw, gh);
        let (w, h) = (gw * scale, gh * scale);
        let tile = (scale * 2).max(8);
        RgbImage::from_fn(w, h, |x, y| {
            // Red diagonals from corner to corner.
            let on_diagonal = |a: u32, b: u32| (a as i64 * h as i64 - b as i64 * w as i64).abs() <= w.max(h) as i64;
            if on_diagonal(x, y) || on_diagonal(w - 1 - x, y) {
                Rgb([220, 30, 30])
            } else if (x / tile + y / tile) % 2 == 0 {
                Rgb([96, 96, 96])
            } else {
                Rgb([64, 64, 64])
            }
        })
    }
}

/// Separable Gaussian blur with zero padding.
fn gaussian_blur(grid: &[f64], w: usize, h: usize, sigma: f64) -> Vec<f64> {
    // Taps farther than the grid is wide never land on a cell.
    let radius = ((3.0 * sigma).ceil() as isize).min(w.max(h) as isize);
    let kernel: Vec<f64> = (-radius..=radius)
        .map(|i| (-((i * i) as f64) / (2.0 * sigma * sigma)).exp())
        .collect();
    let norm: f64 = kernel.iter().sum();
    let kernel: Vec<f64> = kernel.into_iter().map(|k| k / norm).collect();

    let mut horizontal = vec![0.0; grid.len()];
    for y in 0..h {
        for x in 0..w {
            horizontal[y * w + x] = (-radius..=radius)
                .filter_map(|o| {
                    let sx = x as isize + o;
                    (sx >= 0 && sx < w as isize).then(|| grid[y * w + sx as usize] * kernel[(o + radius) as usize])
                })
                .sum();
        }
    }

    let mut out = vec![0.0; grid.len()];
    for y in 0..h {
        for x in 0..w {
            out[y * w + x] = (-radius..=radius)
                .filter_map(|o| {
                    let sy = y as isize + o;
                    (sy >= 0 && sy < h as isize).then(|| horizontal[sy as usize * w + x] * kernel[(o + radius) as usize])
                })
                .sum();
        }
    }
    out
}

fn colorize(scale: ColorScale, value: f64) -> Rgb<u8> {
    let v = value.clamp(0.0, 1.0);
    let (r, g, b) = match scale {
        // Blue -> cyan -> yellow -> red.
        ColorScale::Jet => (
            (1.5 - (4.0 * v - 3.0).abs()).clamp(0.0, 1.0),
            (1.5 - (4.0 * v - 2.0).abs()).clamp(0.0, 1.0),
            (1.5 - (4.0 * v - 1.0).abs()).clamp(0.0, 1.0),
        ),
        // Black -> red -> yellow -> white.
        ColorScale::Hot => (
            (3.0 * v).clamp(0.0, 1.0),
            (3.0 * v - 1.0).clamp(0.0, 1.0),
            (3.0 * v - 2.0).clamp(0.0, 1.0),
        ),
        ColorScale::Grayscale => (v, v, v),
    };
    Rgb([to_u8(r), to_u8(g), to_u8(b)])
}

#[inline]
fn to_u8(channel: f64) -> u8 {
    (channel * 255.0).round() as u8
}
