// THEORY:
// `PipelineConfig` is the single, explicit list of every tunable the engine understands. It is
// deserialized from JSON and validated eagerly: an unknown key, a missing zone field or an
// out-of-range value fails `load` before a single frame is processed. Nothing downstream
// re-checks these ranges; the rest of the crate relies on a validated config.

use crate::core_modules::zone::ZoneCatalog;
use crate::error::ConfigError;
use chrono::{NaiveTime, TimeDelta};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Top-level configuration for the vision pipeline and its consumers.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Width of incoming frames in pixels. Also the spatial domain for heatmaps and hotspots.
    pub frame_width: u32,
    /// Height of incoming frames in pixels.
    pub frame_height: u32,
    pub motion: MotionConfig,
    pub tracking: TrackingConfig,
    /// Ordered zone definitions. Order is priority: the first matching zone wins.
    pub zones: Vec<ZoneConfig>,
    pub heatmap: HeatmapConfig,
    pub analytics: AnalyticsConfig,
    pub runtime: RuntimeConfig,
    pub detection_publishing: PublishingConfig,
    pub snapshots: SnapshotConfig,
}

/// Background subtraction and blob filtering parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MotionConfig {
    /// Squared-distance threshold in units of the per-pixel variance. Lower is more sensitive.
    pub sensitivity: f64,
    /// Exponential-decay rate used to adapt the background model, in (0, 1].
    pub learning_rate: f64,
    /// Smallest blob area (pixels) that is reported.
    pub min_area: u32,
    /// Largest blob area (pixels) that is reported.
    pub max_area: u32,
    /// Suppress pixels that look like shadows cast on the background.
    pub detect_shadows: bool,
    /// Lowest intensity ratio (pixel / background) still considered a shadow.
    pub shadow_threshold: f64,
    /// Radius of the box blur applied before subtraction. 0 disables it.
    pub blur_radius: u32,
    /// Apply a 3x3 open + close to the foreground mask.
    pub morphology: bool,
    /// Events below this confidence are dropped.
    pub min_confidence: f64,
    /// Restrict detection to this rectangle. Coordinates stay in full-frame space.
    pub region_of_interest: Option<RegionOfInterest>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegionOfInterest {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl RegionOfInterest {
    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x && y >= self.y && x < self.x + self.width && y < self.y + self.height
    }
}

/// Track association and lifecycle parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrackingConfig {
    /// Maximum centroid distance (pixels) for an event to continue an existing track.
    pub max_association_distance: f64,
    /// Consecutive missed updates tolerated before a track is marked lost.
    pub miss_tolerance: u32,
    /// Seconds a lost track is kept for re-matching before it expires.
    pub expiry_timeout_secs: f64,
    /// Seconds of low displacement required before a track becomes stationary.
    pub stationary_duration_secs: f64,
    /// Displacement (pixels) under which a track counts as not moving.
    pub stationary_threshold: f64,
    /// Maximum number of entries kept in a track's position history.
    pub history_length: usize,
    /// Observations required before a new track is promoted to active.
    pub confirm_hits: u32,
}

/// Density rendering parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HeatmapConfig {
    /// Number of grid columns.
    pub grid_width: u32,
    /// Number of grid rows.
    pub grid_height: u32,
    /// Standard deviation of the smoothing kernel, in grid cells. 0 disables smoothing.
    pub gaussian_sigma: f64,
    pub color_scale: ColorScale,
    /// Side length in output pixels of one grid cell. Reduced when the image would exceed
    /// 4096 pixels on a side.
    pub pixels_per_cell: u32,
    /// Longer rendering ranges are cut to this many days.
    pub max_query_days: i64,
}

/// Color scales available to the heatmap renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorScale {
    Jet,
    Hot,
    Grayscale,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnalyticsConfig {
    /// Side length in pixels of the coarse grid used for hotspots and rest-spot clustering.
    pub hotspot_cell_size: u32,
    /// Minimum events a cell needs to qualify as a hotspot.
    pub hotspot_min_count: usize,
    /// Minimum accumulated stationary time for a rest spot to be reported.
    pub min_rest_duration_secs: f64,
    /// Queries spanning more days than this are capped.
    pub max_query_days: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Frames per second the live loop pulls from the source.
    pub fps_target: f64,
    /// Records buffered before a write to the sink.
    pub batch_size: usize,
    /// Seconds between periodic statistics log lines.
    pub stats_interval_secs: u64,
    /// Upper bound on records held while the sink is failing. Oldest are dropped first.
    pub max_buffered_records: usize,
    /// Days of history kept in the store. 0 keeps everything.
    pub retention_days: u32,
}

/// Annotated still images saved when motion is published.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SnapshotConfig {
    pub enabled: bool,
    pub directory: PathBuf,
    /// Minimum frame-time gap between two saved snapshots.
    pub save_interval_secs: f64,
    /// Oldest snapshots are deleted beyond this count.
    pub max_snapshots: usize,
    /// JPEG quality, 1 to 100.
    pub quality: u8,
}

/// Time-of-day window during which detections are published.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PublishingConfig {
    pub enabled: bool,
    /// "HH:MM" start of the active window.
    pub start: String,
    /// "HH:MM" end of the active window. May be earlier than `start` to wrap midnight.
    pub end: String,
}

/// A circular zone as written in configuration. Every field is required.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ZoneConfig {
    pub name: String,
    pub x: f64,
    pub y: f64,
    pub radius: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            frame_width: 640,
            frame_height: 480,
            motion: MotionConfig::default(),
            tracking: TrackingConfig::default(),
            zones: Vec::new(),
            heatmap: HeatmapConfig::default(),
            analytics: AnalyticsConfig::default(),
            runtime: RuntimeConfig::default(),
            detection_publishing: PublishingConfig::default(),
            snapshots: SnapshotConfig::default(),
        }
    }
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            sensitivity: 16.0,
            learning_rate: 0.002,
            min_area: 1000,
            max_area: 8000,
            detect_shadows: true,
            shadow_threshold: 0.5,
            blur_radius: 2,
            morphology: true,
            min_confidence: 0.0,
            region_of_interest: None,
        }
    }
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            max_association_distance: 100.0,
            miss_tolerance: 5,
            expiry_timeout_secs: 10.0,
            stationary_duration_secs: 300.0,
            stationary_threshold: 10.0,
            history_length: 64,
            confirm_hits: 2,
        }
    }
}

impl Default for HeatmapConfig {
    fn default() -> Self {
        Self {
            grid_width: 64,
            grid_height: 48,
            gaussian_sigma: 1.5,
            color_scale: ColorScale::Jet,
            pixels_per_cell: 10,
            max_query_days: 31,
        }
    }
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            hotspot_cell_size: 50,
            hotspot_min_count: 5,
            min_rest_duration_secs: 300.0,
            max_query_days: 31,
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            fps_target: 2.0,
            batch_size: 10,
            stats_interval_secs: 300,
            max_buffered_records: 10_000,
            retention_days: 30,
        }
    }
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            directory: PathBuf::from("snapshots"),
            save_interval_secs: 60.0,
            max_snapshots: 100,
            quality: 85,
        }
    }
}

impl SnapshotConfig {
    pub fn save_interval(&self) -> TimeDelta {
        seconds_to_delta(self.save_interval_secs)
    }
}

impl Default for PublishingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            start: "22:00".to_string(),
            end: "06:00".to_string(),
        }
    }
}

impl TrackingConfig {
    pub fn expiry_timeout(&self) -> TimeDelta {
        seconds_to_delta(self.expiry_timeout_secs)
    }

    pub fn stationary_duration(&self) -> TimeDelta {
        seconds_to_delta(self.stationary_duration_secs)
    }
}

impl AnalyticsConfig {
    pub fn min_rest_duration(&self) -> TimeDelta {
        seconds_to_delta(self.min_rest_duration_secs)
    }
}

impl PublishingConfig {
    /// Parses the window bounds. Fails on anything but a valid "HH:MM".
    pub fn window(&self) -> Result<(NaiveTime, NaiveTime), ConfigError> {
        Ok((
            parse_hh_mm("detection_publishing.start", &self.start)?,
            parse_hh_mm("detection_publishing.end", &self.end)?,
        ))
    }
}

/// Upper bound for `max_query_days` settings.
pub const MAX_QUERY_DAYS: i64 = 3650;

pub(crate) fn seconds_to_delta(seconds: f64) -> TimeDelta {
    TimeDelta::milliseconds((seconds * 1000.0).round() as i64)
}

fn parse_hh_mm(field: &str, value: &str) -> Result<NaiveTime, ConfigError> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M")
        .map_err(|e| ConfigError::invalid(field, format!("expected HH:MM, got {value:?} ({e})")))
}

fn ensure(condition: bool, field: &str, reason: &str) -> Result<(), ConfigError> {
    if condition {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, reason))
    }
}

impl PipelineConfig {
    /// Reads, parses and validates a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every option against its valid range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure(self.frame_width > 0, "frame_width", "must be positive")?;
        ensure(self.frame_height > 0, "frame_height", "must be positive")?;

        let m = &self.motion;
        ensure(
            m.sensitivity.is_finite() && m.sensitivity > 0.0,
            "motion.sensitivity",
            "must be a positive number",
        )?;
        ensure(
            m.learning_rate > 0.0 && m.learning_rate <= 1.0,
            "motion.learning_rate",
            "must be in (0, 1]",
        )?;
        ensure(m.min_area > 0, "motion.min_area", "must be positive")?;
        ensure(
            m.max_area > m.min_area,
            "motion.max_area",
            "must be greater than motion.min_area",
        )?;
        ensure(
            m.shadow_threshold > 0.0 && m.shadow_threshold < 1.0,
            "motion.shadow_threshold",
            "must be in (0, 1)",
        )?;
        ensure(m.blur_radius <= 15, "motion.blur_radius", "must be at most 15")?;
        ensure(
            (0.0..=1.0).contains(&m.min_confidence),
            "motion.min_confidence",
            "must be in [0, 1]",
        )?;
        if let Some(roi) = m.region_of_interest {
            ensure(
                roi.width > 0 && roi.height > 0,
                "motion.region_of_interest",
                "width and height must be positive",
            )?;
            ensure(
                roi.x + roi.width <= self.frame_width && roi.y + roi.height <= self.frame_height,
                "motion.region_of_interest",
                "must lie inside the frame",
            )?;
        }

        let t = &self.tracking;
        ensure(
            t.max_association_distance.is_finite() && t.max_association_distance > 0.0,
            "tracking.max_association_distance",
            "must be a positive number",
        )?;
        ensure(
            t.expiry_timeout_secs.is_finite() && t.expiry_timeout_secs > 0.0,
            "tracking.expiry_timeout_secs",
            "must be a positive number",
        )?;
        ensure(
            t.stationary_duration_secs.is_finite() && t.stationary_duration_secs > 0.0,
            "tracking.stationary_duration_secs",
            "must be a positive number",
        )?;
        ensure(
            t.stationary_threshold.is_finite() && t.stationary_threshold > 0.0,
            "tracking.stationary_threshold",
            "must be a positive number",
        )?;
        ensure(t.history_length >= 2, "tracking.history_length", "must be at least 2")?;
        ensure(t.confirm_hits >= 1, "tracking.confirm_hits", "must be at least 1")?;

        let h = &self.heatmap;
        ensure(
            (1..=4096).contains(&h.grid_width),
            "heatmap.grid_width",
            "must be in 1..=4096",
        )?;
        ensure(
            (1..=4096).contains(&h.grid_height),
            "heatmap.grid_height",
            "must be in 1..=4096",
        )?;
        ensure(
            h.gaussian_sigma.is_finite() && (0.0..=64.0).contains(&h.gaussian_sigma),
            "heatmap.gaussian_sigma",
            "must be in [0, 64]",
        )?;
        ensure(
            (1..=64).contains(&h.pixels_per_cell),
            "heatmap.pixels_per_cell",
            "must be in 1..=64",
        )?;
        ensure(
            (1..=MAX_QUERY_DAYS).contains(&h.max_query_days),
            "heatmap.max_query_days",
            "must be in 1..=3650",
        )?;

        let a = &self.analytics;
        ensure(a.hotspot_cell_size > 0, "analytics.hotspot_cell_size", "must be positive")?;
        ensure(
            a.min_rest_duration_secs.is_finite() && a.min_rest_duration_secs >= 0.0,
            "analytics.min_rest_duration_secs",
            "must be a non-negative number",
        )?;
        ensure(
            (1..=MAX_QUERY_DAYS).contains(&a.max_query_days),
            "analytics.max_query_days",
            "must be in 1..=3650",
        )?;

        let r = &self.runtime;
        ensure(
            r.fps_target.is_finite() && r.fps_target > 0.0 && r.fps_target <= 120.0,
            "runtime.fps_target",
            "must be in (0, 120]",
        )?;
        ensure(r.batch_size > 0, "runtime.batch_size", "must be positive")?;
        ensure(
            r.max_buffered_records >= r.batch_size,
            "runtime.max_buffered_records",
            "must be at least runtime.batch_size",
        )?;

        let s = &self.snapshots;
        ensure(
            s.save_interval_secs.is_finite() && s.save_interval_secs >= 0.0,
            "snapshots.save_interval_secs",
            "must be a non-negative number",
        )?;
        ensure(s.max_snapshots > 0, "snapshots.max_snapshots", "must be positive")?;
        ensure((1..=100).contains(&s.quality), "snapshots.quality", "must be in 1..=100")?;

        self.detection_publishing.window()?;
        ZoneCatalog::from_config(&self.zones)?;
        Ok(())
    }
}
