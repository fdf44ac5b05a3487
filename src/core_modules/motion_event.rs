// THEORY:
// `MotionEvent` is the output contract of the motion layer: one blob that survived filtering,
// summarized into its position, size, confidence and capture time. It is a stateless snapshot
// of a single frame with no memory of the past. Giving it an identity over time is the
// tracker's job.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// A position in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: &Point) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Axis-aligned box enclosing a blob, top-left corner plus size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// A filtered, scored blob observed in one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionEvent {
    pub timestamp: NaiveDateTime,
    /// Mean position of the blob's pixels. Always inside the frame.
    pub centroid: Point,
    /// Number of foreground pixels in the blob.
    pub area: u32,
    /// 1.0 at the middle of the configured area band, falling to 0.0 at its edges.
    pub confidence: f64,
    pub bounding_box: BoundingBox,
}
