// THEORY:
// The `pipeline` module is the top-level, per-frame API of the engine. It owns the whole live
// state (the motion detector with its background model, and the tracker with its tracks) in a
// single object, so a test can build a fresh pipeline and replay frames deterministically.
// It turns one frame into a `FrameReport` holding the records ready to persist.

use crate::config::{PipelineConfig, RegionOfInterest};
use crate::core_modules::detection_filter::DetectionFilter;
use crate::core_modules::frame::Frame;
use crate::core_modules::motion_detector::{MotionDetector, MotionStatistics};
use crate::core_modules::tracker::{ObjectTracker, Track, TrackerStatistics};
use crate::core_modules::zone::{ZoneAssignment, ZoneCatalog};
use crate::error::{ConfigError, VisionError, VisionResult};
use crate::store::MotionRecord;
use chrono::NaiveDateTime;
use tracing::{debug, info};

// Re-export key data structures for the public API.
pub use crate::core_modules::motion_event::MotionEvent;
pub use crate::core_modules::tracker::{TrackState, TrackTransition, TransitionKind};

/// The primary output of the vision pipeline for a single frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Report {
    /// Nothing moved and no track changed.
    Quiet,
    Activity(ActivityData),
}

/// Everything a frame produced that is worth persisting.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityData {
    pub records: Vec<MotionRecord>,
    pub transitions: Vec<TrackTransition>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrameReport {
    pub timestamp: NaiveDateTime,
    pub report: Report,
    /// False when the frame fell outside the publishing window.
    pub publish: bool,
}

impl FrameReport {
    pub fn has_motion(&self) -> bool {
        matches!(&self.report, Report::Activity(data) if !data.records.is_empty())
    }

    /// Splits the report into the records and transitions to hand to a sink.
    pub fn into_parts(self) -> (Vec<MotionRecord>, Vec<TrackTransition>) {
        match self.report {
            Report::Quiet => (Vec::new(), Vec::new()),
            Report::Activity(data) => (data.records, data.transitions),
        }
    }
}

/// The main, top-level struct for the vision engine.
pub struct VisionPipeline {
    detector: MotionDetector,
    tracker: ObjectTracker,
    filter: DetectionFilter,
    frame_width: u32,
    frame_height: u32,
    last_timestamp: Option<NaiveDateTime>,
    gaps: u64,
}

impl VisionPipeline {
    pub fn new(config: &PipelineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let zones = ZoneCatalog::from_config(&config.zones)?;
        info!(
            zones = zones.zones().len(),
            min_area = config.motion.min_area,
            max_area = config.motion.max_area,
            "vision pipeline ready"
        );
        Ok(Self {
            detector: MotionDetector::new(config.motion.clone()),
            tracker: ObjectTracker::new(config.tracking.clone(), zones),
            filter: DetectionFilter::new(&config.detection_publishing)?,
            frame_width: config.frame_width,
            frame_height: config.frame_height,
            last_timestamp: None,
            gaps: 0,
        })
    }

    /// Replaces the publishing window, e.g. to publish everything in a replay.
    pub fn with_filter(mut self, filter: DetectionFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Runs one frame through detection and tracking. A rejected frame (bad size, timestamp
    /// not after the previous frame) leaves all live state untouched.
    pub fn process_frame(&mut self, frame: &Frame) -> VisionResult<FrameReport> {
        if (frame.width(), frame.height()) != (self.frame_width, self.frame_height) {
            return Err(VisionError::InvalidFrame(format!(
                "frame is {}x{}, pipeline is configured for {}x{}",
                frame.width(),
                frame.height(),
                self.frame_width,
                self.frame_height
            )));
        }
        let timestamp = frame.timestamp();
        if let Some(previous) = self.last_timestamp {
            if timestamp <= previous {
                return Err(VisionError::NonMonotonicTimestamp { previous, timestamp });
            }
        }

        // Stage 1: Detection
        let events = self.detector.detect(frame)?;

        // Stage 2: Tracking
        let update = self.tracker.update(&events, timestamp)?;
        self.last_timestamp = Some(timestamp);

        // Stage 3: Enrichment
        let records: Vec<MotionRecord> = events
            .into_iter()
            .zip(&update.assignments)
            .map(|(event, &track_id)| {
                let (zone, velocity) = self
                    .tracker
                    .track(track_id)
                    .map(|t| (t.zone.clone(), t.velocity))
                    .unwrap_or((ZoneAssignment::Unknown, Default::default()));
                MotionRecord {
                    event,
                    track_id,
                    zone,
                    velocity,
                }
            })
            .collect();

        let report = if records.is_empty() && update.transitions.is_empty() {
            Report::Quiet
        } else {
            Report::Activity(ActivityData {
                records,
                transitions: update.transitions,
            })
        };

        Ok(FrameReport {
            timestamp,
            report,
            publish: self.filter.should_publish(timestamp),
        })
    }

    /// Called after an interruption in the frame stream. The background statistics are stale,
    /// so the model is dropped and re-seeded by the next frame. Tracks are kept; the normal
    /// miss and expiry rules retire them if the animal moved during the gap.
    pub fn handle_gap(&mut self) {
        self.gaps += 1;
        debug!(gaps = self.gaps, "frame gap, resetting background model");
        self.detector.reset();
    }

    pub fn tracks(&self) -> &[Track] {
        self.tracker.tracks()
    }

    pub fn zones(&self) -> &ZoneCatalog {
        self.tracker.zones()
    }

    pub fn region_of_interest(&self) -> Option<RegionOfInterest> {
        self.detector.region_of_interest()
    }

    pub fn filter(&self) -> &DetectionFilter {
        &self.filter
    }

    pub fn motion_statistics(&self) -> MotionStatistics {
        self.detector.statistics()
    }

    pub fn tracker_statistics(&self) -> TrackerStatistics {
        self.tracker.statistics()
    }

    pub fn gaps(&self) -> u64 {
        self.gaps
    }
}
