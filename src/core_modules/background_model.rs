// THEORY:
// The `BackgroundModel` is the temporal memory of the motion layer. It learns what the empty
// enclosure looks like for every pixel: a running mean and a running variance, both updated
// with an exponential-decay rule so the model slowly follows lighting drift.
//
// Key principles:
// 1.  **Statistical test, not a fixed threshold**: a pixel is foreground when its squared
//     distance from the learned mean exceeds `sensitivity` times the learned variance. Noisy
//     pixels earn a wide band; quiet ones a narrow band.
// 2.  **Shadow suppression**: a foreground pixel that is a uniformly darker copy of the
//     background (intensity ratio in `[shadow_threshold, 1)`) is classified as a shadow and is
//     not reported as motion.
// 3.  **Fixed shape**: the first frame fixes width, height and channel count. A frame of any
//     other shape is rejected instead of silently corrupting the statistics.
// 4.  **Externally reset**: after a gap in the stream the statistics are stale; `reset` drops
//     them and the next frame re-seeds the model.

use crate::config::MotionConfig;
use crate::core_modules::frame::Frame;
use crate::error::{VisionError, VisionResult};

/// Variance assigned to every pixel when the model is seeded.
const INITIAL_VARIANCE: f32 = 15.0;
/// Variance floor. Keeps perfectly static pixels from becoming infinitely sensitive.
const MIN_VARIANCE: f32 = 4.0;
/// Variance ceiling. Keeps a pixel that saw motion from going blind for long.
const MAX_VARIANCE: f32 = 75.0;

/// The per-pixel verdict produced by the model for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelClass {
    Background,
    Foreground,
    Shadow,
}

/// Adaptive per-pixel mean/variance model of the static scene.
#[derive(Debug, Clone)]
pub struct BackgroundModel {
    /// (width, height, channels) fixed by the first frame. `None` until seeded.
    shape: Option<(u32, u32, u8)>,
    mean: Vec<f32>,
    variance: Vec<f32>,
    learning_rate: f32,
    sensitivity: f32,
    detect_shadows: bool,
    shadow_threshold: f32,
    frames_seen: u64,
}

impl BackgroundModel {
    pub fn new(config: &MotionConfig) -> Self {
        Self {
            shape: None,
            mean: Vec::new(),
            variance: Vec::new(),
            learning_rate: config.learning_rate as f32,
            sensitivity: config.sensitivity as f32,
            detect_shadows: config.detect_shadows,
            shadow_threshold: config.shadow_threshold as f32,
            frames_seen: 0,
        }
    }

    pub fn is_seeded(&self) -> bool {
        self.shape.is_some()
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }

    /// Learned mean intensity at a pixel, if the model has been seeded.
    pub fn mean_at(&self, x: u32, y: u32) -> Option<f32> {
        let (width, height, _) = self.shape?;
        if x >= width || y >= height {
            return None;
        }
        self.mean.get((y * width + x) as usize).copied()
    }

    /// Rejects frames whose shape differs from the one the model was seeded with.
    pub fn check_shape(&self, frame: &Frame) -> VisionResult<()> {
        match self.shape {
            Some((width, height, channels))
                if (width, height, channels)
                    != (frame.width(), frame.height(), frame.channels()) =>
            {
                Err(VisionError::FrameShapeMismatch {
                    expected_width: width,
                    expected_height: height,
                    expected_channels: channels,
                    width: frame.width(),
                    height: frame.height(),
                    channels: frame.channels(),
                })
            }
            _ => Ok(()),
        }
    }

    /// Classifies every pixel of `intensities` (the preprocessed plane of `frame`) and then folds
    /// the frame into the statistics. The first frame after construction or `reset` only seeds
    /// the model and is reported as all background.
    pub fn apply(&mut self, frame: &Frame, intensities: &[f32]) -> VisionResult<Vec<PixelClass>> {
        self.check_shape(frame)?;
        if intensities.len() != frame.pixel_count() {
            return Err(VisionError::InvalidFrame(format!(
                "intensity plane has {} values, frame has {} pixels",
                intensities.len(),
                frame.pixel_count()
            )));
        }

        self.frames_seen += 1;

        if self.shape.is_none() {
            self.shape = Some((frame.width(), frame.height(), frame.channels()));
            self.mean = intensities.to_vec();
            self.variance = vec![INITIAL_VARIANCE; intensities.len()];
            return Ok(vec![PixelClass::Background; intensities.len()]);
        }

        let rate = self.learning_rate;
        let mut classes = Vec::with_capacity(intensities.len());
        for ((&value, mean), variance) in intensities
            .iter()
            .zip(self.mean.iter_mut())
            .zip(self.variance.iter_mut())
        {
            let diff = value - *mean;
            let distance_sq = diff * diff;

            let class = if distance_sq > self.sensitivity * *variance {
                if self.detect_shadows && is_shadow(value, *mean, self.shadow_threshold) {
                    PixelClass::Shadow
                } else {
                    PixelClass::Foreground
                }
            } else {
                PixelClass::Background
            };
            classes.push(class);

            *mean += rate * diff;
            *variance = (*variance + rate * (distance_sq - *variance)).clamp(MIN_VARIANCE, MAX_VARIANCE);
        }

        Ok(classes)
    }

    /// Drops all learned statistics. The next frame re-seeds the model, whatever its shape.
    pub fn reset(&mut self) {
        self.shape = None;
        self.mean.clear();
        self.variance.clear();
        self.frames_seen = 0;
    }
}

/// A shadow is the background, only darker by a bounded factor.
fn is_shadow(value: f32, mean: f32, threshold: f32) -> bool {
    if mean <= f32::EPSILON {
        return false;
    }
    let ratio = value / mean;
    ratio >= threshold && ratio < 1.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveDateTime};

    fn ts() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 2, 3)
            .and_then(|d| d.and_hms_opt(22, 30, 0))
            .expect("valid timestamp")
    }

    fn frame(width: u32, height: u32, value: u8) -> Frame {
        Frame::from_luma(width, height, vec![value; (width * height) as usize], ts())
            .expect("valid frame")
    }

    fn apply(model: &mut BackgroundModel, frame: &Frame) -> Vec<PixelClass> {
        let plane = frame.luminance_plane();
        model.apply(frame, &plane).expect("frame should apply")
    }

    #[test]
    fn first_frame_only_seeds() {
        let mut model = BackgroundModel::new(&MotionConfig::default());
        let classes = apply(&mut model, &frame(4, 4, 100));
        assert!(model.is_seeded());
        assert!(classes.iter().all(|c| *c == PixelClass::Background));
        assert_eq!(model.mean_at(1, 1), Some(100.0));
    }

    #[test]
    fn bright_change_is_foreground() {
        let mut model = BackgroundModel::new(&MotionConfig::default());
        apply(&mut model, &frame(2, 1, 20));
        let bright = Frame::from_luma(2, 1, vec![20, 220], ts()).expect("valid frame");
        let classes = apply(&mut model, &bright);
        assert_eq!(classes, vec![PixelClass::Background, PixelClass::Foreground]);
    }

    #[test]
    fn darker_copy_is_a_shadow_only_when_enabled() {
        let darker = Frame::from_luma(1, 1, vec![140], ts()).expect("valid frame");

        let mut with_shadows = BackgroundModel::new(&MotionConfig::default());
        apply(&mut with_shadows, &frame(1, 1, 200));
        assert_eq!(apply(&mut with_shadows, &darker), vec![PixelClass::Shadow]);

        let config = MotionConfig {
            detect_shadows: false,
            ..MotionConfig::default()
        };
        let mut without_shadows = BackgroundModel::new(&config);
        apply(&mut without_shadows, &frame(1, 1, 200));
        assert_eq!(apply(&mut without_shadows, &darker), vec![PixelClass::Foreground]);
    }

    #[test]
    fn static_scene_stays_background() {
        let mut model = BackgroundModel::new(&MotionConfig::default());
        for _ in 0..50 {
            let classes = apply(&mut model, &frame(3, 3, 77));
            assert!(classes.iter().all(|c| *c == PixelClass::Background));
        }
        assert_eq!(model.frames_seen(), 50);
    }

    #[test]
    fn shape_change_is_rejected_until_reset() {
        let mut model = BackgroundModel::new(&MotionConfig::default());
        apply(&mut model, &frame(4, 4, 10));

        let other = frame(8, 4, 10);
        let err = model
            .apply(&other, &other.luminance_plane())
            .expect_err("shape mismatch");
        assert!(matches!(err, VisionError::FrameShapeMismatch { .. }));

        model.reset();
        assert!(!model.is_seeded());
        apply(&mut model, &other);
        assert_eq!(model.mean_at(7, 3), Some(10.0));
    }
}
