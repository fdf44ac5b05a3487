// THEORY:
// The blob detector is the spatial grouping layer. It takes the binary foreground mask produced
// by the background model for one frame and turns it into a list of connected regions ("blobs").
//
// Algorithm:
// 1.  **Mask cleanup** (optional): a 3x3 morphological open removes isolated speckle, then a
//     3x3 close fills pinholes inside real bodies.
// 2.  **Region growing**: the mask is scanned in row-major order. Every unvisited foreground
//     pixel seeds a flood fill over its 8-connected neighbors, guarded by a `visited` grid so no
//     pixel is claimed twice.
// 3.  **Aggregation**: each region is reduced to its area, the mean of its pixel coordinates
//     (the centroid) and its bounding box.
//
// The detector is stateless. Blob order is the row-major order of each blob's first pixel,
// which makes the output deterministic for a given mask.

use crate::core_modules::motion_event::{BoundingBox, Point};

/// A connected foreground region found in a single mask.
#[derive(Debug, Clone, PartialEq)]
pub struct Blob {
    /// Number of pixels in the region.
    pub area: u32,
    /// Mean (x, y) of the region's pixels.
    pub centroid: Point,
    pub bounding_box: BoundingBox,
}

pub mod blob_detector {
    use super::*;

    /// Finds every 8-connected region of `true` pixels in a row-major mask.
    pub fn find_blobs(mask: &[bool], width: u32, height: u32) -> Vec<Blob> {
        let (w, h) = (width as usize, height as usize);
        debug_assert_eq!(mask.len(), w * h);

        let mut visited = vec![false; mask.len()];
        let mut blobs = Vec::new();

        for seed in 0..mask.len() {
            if !mask[seed] || visited[seed] {
                continue;
            }
            blobs.push(grow_region(seed, mask, &mut visited, w, h));
        }

        blobs
    }

    /// Flood fill from `seed`, marking pixels visited and aggregating the region.
    fn grow_region(seed: usize, mask: &[bool], visited: &mut [bool], w: usize, h: usize) -> Blob {
        let mut stack = vec![seed];
        visited[seed] = true;

        let mut area = 0u32;
        let (mut sum_x, mut sum_y) = (0u64, 0u64);
        let (mut min_x, mut min_y) = (usize::MAX, usize::MAX);
        let (mut max_x, mut max_y) = (0usize, 0usize);

        while let Some(index) = stack.pop() {
            let (x, y) = (index % w, index / w);
            area += 1;
            sum_x += x as u64;
            sum_y += y as u64;
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);

            for dy in -1i64..=1 {
                for dx in -1i64..=1 {
                    if dx == 0 && dy == 0 {
                        continue;
                    }
                    let nx = x as i64 + dx;
                    let ny = y as i64 + dy;
                    if nx < 0 || ny < 0 || nx >= w as i64 || ny >= h as i64 {
                        continue;
                    }
                    let neighbor = ny as usize * w + nx as usize;
                    if mask[neighbor] && !visited[neighbor] {
                        visited[neighbor] = true;
                        stack.push(neighbor);
                    }
                }
            }
        }

        Blob {
            area,
            centroid: Point::new(sum_x as f64 / area as f64, sum_y as f64 / area as f64),
            bounding_box: BoundingBox {
                x: min_x as u32,
                y: min_y as u32,
                width: (max_x - min_x + 1) as u32,
                height: (max_y - min_y + 1) as u32,
            },
        }
    }

    /// 3x3 open (erode, dilate) followed by 3x3 close (dilate, erode).
    pub fn open_close(mask: &[bool], width: u32, height: u32) -> Vec<bool> {
        let (w, h) = (width as usize, height as usize);
        let opened = dilate(&erode(mask, w, h), w, h);
        erode(&dilate(&opened, w, h), w, h)
    }

    /// A pixel survives erosion when every in-bounds 3x3 neighbor is set.
    fn erode(mask: &[bool], w: usize, h: usize) -> Vec<bool> {
        neighborhood(mask, w, h, |values| values.iter().all(|&v| v))
    }

    /// A pixel is set after dilation when any in-bounds 3x3 neighbor is set.
    fn dilate(mask: &[bool], w: usize, h: usize) -> Vec<bool> {
        neighborhood(mask, w, h, |values| values.iter().any(|&v| v))
    }

    fn neighborhood(mask: &[bool], w: usize, h: usize, rule: impl Fn(&[bool]) -> bool) -> Vec<bool> {
        let mut out = vec![false; mask.len()];
        let mut window = Vec::with_capacity(9);
        for y in 0..h {
            for x in 0..w {
                window.clear();
                for ny in y.saturating_sub(1)..=(y + 1).min(h - 1) {
                    for nx in x.saturating_sub(1)..=(x + 1).min(w - 1) {
                        window.push(mask[ny * w + nx]);
                    }
                }
                out[y * w + x] = rule(&window);
            }
        }
        out
    }
}
