// THEORY:
// The `tracker` module is the heart of the behavioral layer. It adds "object permanence" to
// the vision system: it takes the stateless `MotionEvent`s of a single frame and associates
// them with the animals it was already following.
//
// Key architectural principles:
// 1.  **Object Persistence**: a `Track` represents one subject's existence *over time*. This is
//     distinct from a `MotionEvent`, which is a snapshot in a single frame.
// 2.  **Explicit Association**: matching is delegated to `association::greedy_assign`, a
//     greedy nearest-first assignment over a distance matrix with tie-breaking by track id.
//     There is no appearance model; two animals whose paths cross may swap identities.
// 3.  **Lifecycle Management**: every track walks the state machine
//         New -> Active <-> Stationary -> Lost -> Expired
//     - **Birth**: an unmatched event becomes a `New` track, promoted to `Active` once it
//       has been observed `confirm_hits` times.
//     - **Rest**: while the track stays within `stationary_threshold` of an anchor point for
//       `stationary_duration`, it is `Stationary`. Leaving the anchor makes it `Active` again.
//     - **Occlusion**: a track that misses more than `miss_tolerance` updates is `Lost`. It
//       stays a match candidate and returns to `Active` if re-matched.
//     - **Death**: a `Lost` track unseen for longer than `expiry_timeout` is `Expired` and
//       removed.
// 4.  **Reported, not polled**: every state change and zone change is returned from `update` as
//     a `TrackTransition`, which is what gets persisted. Nobody else reads the live track set.

use crate::config::TrackingConfig;
use crate::core_modules::association::{DistanceMatrix, greedy_assign};
use crate::core_modules::motion_event::{MotionEvent, Point};
use crate::core_modules::zone::{ZoneAssignment, ZoneCatalog};
use crate::error::{VisionError, VisionResult};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use tracing::debug;

/// Lifecycle state of a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackState {
    New,
    Active,
    Stationary,
    Lost,
    Expired,
}

impl fmt::Display for TrackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A single observed position of a track.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackPoint {
    pub position: Point,
    pub timestamp: NaiveDateTime,
}

/// Movement vector in pixels per second.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Velocity {
    pub vx: f64,
    pub vy: f64,
}

impl Velocity {
    pub fn speed(&self) -> f64 {
        self.vx.hypot(self.vy)
    }

    /// Heading in degrees, 0 pointing along +x and 90 along +y (image down).
    pub fn direction_degrees(&self) -> f64 {
        self.vy.atan2(self.vx).to_degrees()
    }
}

/// Represents a subject that is being tracked across multiple frames.
#[derive(Debug, Clone)]
pub struct Track {
    /// Unique, never reused within a tracker.
    pub id: u64,
    pub state: TrackState,
    /// Most recent positions, oldest first. Strictly increasing timestamps.
    pub position_history: VecDeque<TrackPoint>,
    /// Finite difference of the two most recent positions.
    pub velocity: Velocity,
    pub first_seen: NaiveDateTime,
    pub last_seen: NaiveDateTime,
    pub zone: ZoneAssignment,
    /// Number of events matched to this track, including the one that created it.
    pub hits: u32,
    /// Consecutive updates without a match.
    pub misses: u32,
    /// Start of the current low-displacement window.
    anchor: TrackPoint,
    path_length: f64,
    position_sum: (f64, f64),
}

impl Track {
    fn new(id: u64, position: Point, timestamp: NaiveDateTime, zone: ZoneAssignment) -> Self {
        let point = TrackPoint { position, timestamp };
        Self {
            id,
            state: TrackState::New,
            position_history: VecDeque::from([point]),
            velocity: Velocity::default(),
            first_seen: timestamp,
            last_seen: timestamp,
            zone,
            hits: 1,
            misses: 0,
            anchor: point,
            path_length: 0.0,
            position_sum: (position.x, position.y),
        }
    }

    /// The most recent observed position.
    pub fn position(&self) -> Point {
        self.position_history
            .back()
            .map(|p| p.position)
            .unwrap_or(self.anchor.position)
    }

    /// Mean of every position ever observed, not only the retained history.
    pub fn average_position(&self) -> Point {
        let n = self.hits.max(1) as f64;
        Point::new(self.position_sum.0 / n, self.position_sum.1 / n)
    }

    /// Total distance travelled between consecutive observations.
    pub fn path_length(&self) -> f64 {
        self.path_length
    }

    pub fn duration(&self) -> chrono::TimeDelta {
        self.last_seen - self.first_seen
    }

    /// Folds a matched observation into the track and returns the state it should move to, if
    /// any.
    fn observe(&mut self, position: Point, timestamp: NaiveDateTime, config: &TrackingConfig) -> Option<TrackState> {
        let previous = self.position();
        let elapsed = (timestamp - self.last_seen).as_seconds_f64();
        if elapsed > 0.0 {
            self.velocity = Velocity {
                vx: (position.x - previous.x) / elapsed,
                vy: (position.y - previous.y) / elapsed,
            };
        }
        self.path_length += previous.distance_to(&position);
        self.position_sum.0 += position.x;
        self.position_sum.1 += position.y;

        self.position_history.push_back(TrackPoint { position, timestamp });
        while self.position_history.len() > config.history_length {
            self.position_history.pop_front();
        }
        self.last_seen = timestamp;
        self.hits += 1;
        self.misses = 0;

        let moved = self.anchor.position.distance_to(&position) > config.stationary_threshold;
        if moved {
            self.anchor = TrackPoint { position, timestamp };
        }
        let resting = !moved && timestamp - self.anchor.timestamp >= config.stationary_duration();

        match self.state {
            TrackState::New if self.hits >= config.confirm_hits => Some(TrackState::Active),
            TrackState::Lost => Some(TrackState::Active),
            TrackState::Active if resting => Some(TrackState::Stationary),
            TrackState::Stationary if moved => Some(TrackState::Active),
            _ => None,
        }
    }
}

/// What happened to a track during one update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransitionKind {
    Created,
    StateChanged { from: TrackState, to: TrackState },
    ZoneChanged { from: ZoneAssignment, to: ZoneAssignment },
}

/// A lifecycle or zone change of one track, as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackTransition {
    pub track_id: u64,
    pub timestamp: NaiveDateTime,
    /// Track position when the change happened.
    pub position: Point,
    /// Zone the track was in after the change.
    pub zone: ZoneAssignment,
    #[serde(flatten)]
    pub kind: TransitionKind,
}

/// Result of one `ObjectTracker::update`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackerUpdate {
    /// Every change, in the order it was applied.
    pub transitions: Vec<TrackTransition>,
    /// `assignments[i]` is the id of the track event `i` was attributed to.
    pub assignments: Vec<u64>,
}

/// Counts of live tracks by state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TrackerStatistics {
    pub total_tracks: usize,
    pub new: usize,
    pub active: usize,
    pub stationary: usize,
    pub lost: usize,
    pub next_track_id: u64,
}

/// Manages the list of `Track`s from one frame to the next.
pub struct ObjectTracker {
    tracks: Vec<Track>,
    zones: ZoneCatalog,
    config: TrackingConfig,
    next_id: u64,
    last_update: Option<NaiveDateTime>,
}

impl ObjectTracker {
    pub fn new(config: TrackingConfig, zones: ZoneCatalog) -> Self {
        Self {
            tracks: Vec::new(),
            zones,
            config,
            next_id: 1,
            last_update: None,
        }
    }

    /// Advances every track to `timestamp` using the events detected in that frame. Updates must
    /// arrive in strictly increasing time order; an out-of-order update is rejected untouched.
    pub fn update(&mut self, events: &[MotionEvent], timestamp: NaiveDateTime) -> VisionResult<TrackerUpdate> {
        if let Some(previous) = self.last_update {
            if timestamp <= previous {
                return Err(VisionError::NonMonotonicTimestamp { previous, timestamp });
            }
        }
        self.last_update = Some(timestamp);

        let mut update = TrackerUpdate {
            transitions: Vec::new(),
            assignments: vec![0; events.len()],
        };

        // --- 1. Matching ---
        let positions: Vec<Point> = self.tracks.iter().map(Track::position).collect();
        let ids: Vec<u64> = self.tracks.iter().map(|t| t.id).collect();
        let centroids: Vec<Point> = events.iter().map(|e| e.centroid).collect();
        let matrix = DistanceMatrix::between(&positions, &centroids);
        let matches = greedy_assign(&matrix, &ids, self.config.max_association_distance);

        let mut track_matched = vec![false; self.tracks.len()];
        let mut event_matched = vec![false; events.len()];

        // --- 2. Matched tracks ---
        for m in &matches {
            track_matched[m.track_index] = true;
            event_matched[m.detection_index] = true;
            let position = events[m.detection_index].centroid;
            let track = &mut self.tracks[m.track_index];
            update.assignments[m.detection_index] = track.id;

            if let Some(to) = track.observe(position, timestamp, &self.config) {
                update.transitions.push(change_state(track, to, timestamp));
            }
            let zone = self.zones.assign(&position);
            if zone != track.zone {
                let from = std::mem::replace(&mut track.zone, zone.clone());
                update.transitions.push(TrackTransition {
                    track_id: track.id,
                    timestamp,
                    position,
                    zone: zone.clone(),
                    kind: TransitionKind::ZoneChanged { from, to: zone },
                });
            }
        }

        // --- 3. Unmatched tracks (occlusion or death) ---
        for (track, matched) in self.tracks.iter_mut().zip(&track_matched) {
            if *matched {
                continue;
            }
            track.misses += 1;
            if track.misses > self.config.miss_tolerance && track.state != TrackState::Lost {
                update.transitions.push(change_state(track, TrackState::Lost, timestamp));
            }
            if track.state == TrackState::Lost && timestamp - track.last_seen > self.config.expiry_timeout() {
                update.transitions.push(change_state(track, TrackState::Expired, timestamp));
            }
        }
        self.tracks.retain(|t| t.state != TrackState::Expired);

        // --- 4. Unmatched events (birth) ---
        for (index, event) in events.iter().enumerate() {
            if event_matched[index] {
                continue;
            }
            let zone = self.zones.assign(&event.centroid);
            let mut track = Track::new(self.next_id, event.centroid, timestamp, zone.clone());
            self.next_id += 1;
            update.assignments[index] = track.id;
            debug!(track_id = track.id, zone = %zone, x = event.centroid.x, y = event.centroid.y, "track created");
            update.transitions.push(TrackTransition {
                track_id: track.id,
                timestamp,
                position: event.centroid,
                zone,
                kind: TransitionKind::Created,
            });
            if track.hits >= self.config.confirm_hits {
                update.transitions.push(change_state(&mut track, TrackState::Active, timestamp));
            }
            self.tracks.push(track);
        }

        Ok(update)
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn track(&self, id: u64) -> Option<&Track> {
        self.tracks.iter().find(|t| t.id == id)
    }

    pub fn zones(&self) -> &ZoneCatalog {
        &self.zones
    }

    pub fn statistics(&self) -> TrackerStatistics {
        let count = |state| self.tracks.iter().filter(|t| t.state == state).count();
        TrackerStatistics {
            total_tracks: self.tracks.len(),
            new: count(TrackState::New),
            active: count(TrackState::Active),
            stationary: count(TrackState::Stationary),
            lost: count(TrackState::Lost),
            next_track_id: self.next_id,
        }
    }
}

fn change_state(track: &mut Track, to: TrackState, timestamp: NaiveDateTime) -> TrackTransition {
    let from = std::mem::replace(&mut track.state, to);
    debug!(track_id = track.id, %from, %to, "track state changed");
    TrackTransition {
        track_id: track.id,
        timestamp,
        position: track.position(),
        zone: track.zone.clone(),
        kind: TransitionKind::StateChanged { from, to },
    }
}
