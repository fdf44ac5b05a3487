// THEORY:
// The `MotionDetector` is the per-frame front end of the engine. It owns the `BackgroundModel`
// and runs a frame through every spatial stage, turning pixels into a short list of scored
// `MotionEvent`s.
//
// Stages, in order:
// 1.  **Preprocess**: the frame is reduced to one intensity plane and optionally box-blurred to
//     damp sensor noise, which is heavy on IR footage.
// 2.  **Subtract**: the background model classifies every pixel and learns from the frame.
//     Shadows and anything outside the region of interest are dropped from the mask.
// 3.  **Clean**: an optional 3x3 open + close removes speckle and fills pinholes.
// 4.  **Group**: 8-connected regions become blobs.
// 5.  **Filter & score**: blobs outside `[min_area, max_area]` are discarded. Survivors are
//     scored by how close their area is to the middle of that band, then the `min_confidence`
//     floor is applied.
//
// Detection is deterministic: the same model state and the same frame always give the same
// events in the same (row-major) order.

use crate::config::{MotionConfig, RegionOfInterest};
use crate::core_modules::background_model::{BackgroundModel, PixelClass};
use crate::core_modules::blob_detector::{Blob, blob_detector};
use crate::core_modules::frame::Frame;
use crate::core_modules::motion_event::MotionEvent;
use crate::error::VisionResult;
use serde::Serialize;
use tracing::debug;

/// Running counters for one detector instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MotionStatistics {
    pub frames_processed: u64,
    pub motions_detected: u64,
    /// Fraction of processed frames that produced at least one event.
    pub detection_rate: f64,
}

pub struct MotionDetector {
    background: BackgroundModel,
    config: MotionConfig,
    frames_processed: u64,
    frames_with_motion: u64,
    motions_detected: u64,
}

impl MotionDetector {
    pub fn new(config: MotionConfig) -> Self {
        Self {
            background: BackgroundModel::new(&config),
            config,
            frames_processed: 0,
            frames_with_motion: 0,
            motions_detected: 0,
        }
    }

    /// Runs one frame through the detector. A frame whose shape disagrees with the background
    /// model is rejected and leaves the model untouched.
    pub fn detect(&mut self, frame: &Frame) -> VisionResult<Vec<MotionEvent>> {
        self.background.check_shape(frame)?;
        let (width, height) = (frame.width(), frame.height());

        // Stage 1: Preprocess
        let mut plane = frame.luminance_plane();
        if self.config.blur_radius > 0 {
            plane = box_blur(&plane, width as usize, height as usize, self.config.blur_radius as usize);
        }

        // Stage 2: Subtract
        let classes = self.background.apply(frame, &plane)?;
        let roi = self.config.region_of_interest;
        let mut mask: Vec<bool> = classes
            .iter()
            .enumerate()
            .map(|(i, class)| {
                *class == PixelClass::Foreground
                    && in_region(roi, (i % width as usize) as u32, (i / width as usize) as u32)
            })
            .collect();

        // Stage 3: Clean
        if self.config.morphology {
            mask = blob_detector::open_close(&mask, width, height);
        }

        // Stage 4: Group
        let blobs = blob_detector::find_blobs(&mask, width, height);
        let raw_count = blobs.len();

        // Stage 5: Filter & score
        let events: Vec<MotionEvent> = blobs
            .into_iter()
            .filter_map(|blob| self.score(blob, frame))
            .collect();

        self.frames_processed += 1;
        if !events.is_empty() {
            self.frames_with_motion += 1;
        }
        self.motions_detected += events.len() as u64;

        debug!(
            timestamp = %frame.timestamp(),
            blobs = raw_count,
            events = events.len(),
            "frame analysed"
        );
        Ok(events)
    }

    fn score(&self, blob: Blob, frame: &Frame) -> Option<MotionEvent> {
        if blob.area < self.config.min_area || blob.area > self.config.max_area {
            return None;
        }
        let confidence = area_confidence(blob.area, self.config.min_area, self.config.max_area);
        if confidence < self.config.min_confidence {
            return None;
        }
        let centroid = blob.centroid;
        let inside = centroid.is_finite()
            && centroid.x >= 0.0
            && centroid.y >= 0.0
            && centroid.x < frame.width() as f64
            && centroid.y < frame.height() as f64;
        if !inside {
            return None;
        }
        Some(MotionEvent {
            timestamp: frame.timestamp(),
            centroid,
            area: blob.area,
            confidence,
            bounding_box: blob.bounding_box,
        })
    }

    /// Drops the learned background, e.g. after the stream was interrupted. Counters survive.
    pub fn reset(&mut self) {
        debug!(frames_seen = self.background.frames_seen(), "background model reset");
        self.background.reset();
    }

    pub fn region_of_interest(&self) -> Option<RegionOfInterest> {
        self.config.region_of_interest
    }

    pub fn background(&self) -> &BackgroundModel {
        &self.background
    }

    pub fn statistics(&self) -> MotionStatistics {
        let detection_rate = if self.frames_processed == 0 {
            0.0
        } else {
            self.frames_with_motion as f64 / self.frames_processed as f64
        };
        MotionStatistics {
            frames_processed: self.frames_processed,
            motions_detected: self.motions_detected,
            detection_rate,
        }
    }
}

fn in_region(roi: Option<RegionOfInterest>, x: u32, y: u32) -> bool {
    roi.is_none_or(|roi| roi.contains(x, y))
}

/// 1.0 at the middle of `[min_area, max_area]`, falling linearly to 0.0 at either edge.
pub fn area_confidence(area: u32, min_area: u32, max_area: u32) -> f64 {
    let half_band = (max_area as f64 - min_area as f64) / 2.0;
    if half_band <= 0.0 {
        return 1.0;
    }
    let midpoint = min_area as f64 + half_band;
    (1.0 - (area as f64 - midpoint).abs() / half_band).clamp(0.0, 1.0)
}

/// Separable box blur with edge clamping.
fn box_blur(plane: &[f32], w: usize, h: usize, radius: usize) -> Vec<f32> {
    let horizontal = blur_pass(plane, radius, w, |x, y| y * w + x);
    blur_pass(&horizontal, radius, h, |y, x| y * w + x)
}

/// One 1-D averaging pass. `index(along, across)` maps a position on the blurred axis (of
/// length `len`) and the perpendicular axis to a plane index.
fn blur_pass(
    plane: &[f32],
    radius: usize,
    len: usize,
    index: impl Fn(usize, usize) -> usize,
) -> Vec<f32> {
    let mut out = vec![0.0; plane.len()];
    let across = plane.len() / len;
    for a in 0..across {
        for i in 0..len {
            let lo = i.saturating_sub(radius);
            let hi = (i + radius).min(len - 1);
            let sum: f32 = (lo..=hi).map(|j| plane[index(j, a)]).sum();
            out[index(i, a)] = sum / (hi - lo + 1) as f32;
        }
    }
    out
}
