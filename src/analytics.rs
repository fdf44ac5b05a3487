// THEORY:
// `BehavioralAnalytics` answers questions about the past: how active was the animal on a given
// night, at what hours, where did it spend its time, where did it rest. It only ever reads
// persisted records through an `EventStore`. It never sees the live tracker, so a slow query
// cannot stall frame processing, and a query can be repeated at any time with the same answer.
//
// Key principles:
// 1.  **Idempotent and order-independent**: every query sorts its input into a canonical order
//     before aggregating, so the result does not depend on how the store returns records and
//     floating-point sums come out bit-identical on every call.
// 2.  **Empty is an answer**: a range with no data yields a zero-count result with `None` for
//     anything undefined (center of activity, first/last activity). It is never an error.
// 3.  **Corrupt history is skipped, not fatal**: a record that breaks an invariant (outside the
//     requested range, non-finite or out-of-frame centroid, confidence outside [0, 1]) is logged
//     and left out of the aggregate.
// 4.  **Bounded queries**: a range longer than `max_query_days` is cut to that length.

use crate::config::{AnalyticsConfig, MAX_QUERY_DAYS, PipelineConfig};
use crate::core_modules::motion_event::Point;
use crate::core_modules::tracker::{TrackState, TrackTransition, TransitionKind};
use crate::core_modules::zone::{ZoneActivity, ZoneAssignment, ZoneCatalog};
use crate::error::{ConfigError, VisionResult};
use crate::store::{EventStore, MotionRecord, StoreStatistics, TimeRange};
use chrono::{NaiveDate, NaiveDateTime, TimeDelta, Timelike};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::warn;

/// Aggregates for one calendar day.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailySummary {
    pub date: NaiveDate,
    pub total_events: usize,
    /// Distinct tracks that produced at least one event.
    pub unique_tracks: usize,
    pub avg_area: f64,
    pub avg_confidence: f64,
    /// Mean of all event centroids.
    pub center_of_activity: Option<Point>,
    pub first_activity: Option<NaiveDateTime>,
    pub last_activity: Option<NaiveDateTime>,
}

/// Events per hour of one day. `counts[h]` covers `h:00` to `h:59`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HourlyDistribution {
    pub date: NaiveDate,
    pub counts: [usize; 24],
}

impl HourlyDistribution {
    /// The busiest hour. Ties go to the earlier hour; `None` for an empty day.
    pub fn peak_hour(&self) -> Option<u32> {
        let (hour, count) = self
            .counts
            .iter()
            .enumerate()
            .fold((0, 0), |best, (h, &c)| if c > best.1 { (h, c) } else { best });
        (count > 0).then_some(hour as u32)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistogramBucket {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub count: usize,
}

/// One cell of the coarse spatial grid.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Hotspot {
    pub cell_x: u32,
    pub cell_y: u32,
    /// Center of the cell in frame pixels.
    pub center: Point,
    pub count: usize,
}

/// Where a rest spot is.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RestLocation {
    Zone(String),
    /// Outside every zone: the coarse grid cell, identified by its center.
    Coordinates(Point),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RestSpot {
    pub location: RestLocation,
    pub total_duration_secs: f64,
    /// Number of separate stationary periods merged into this spot.
    pub periods: usize,
}

pub struct BehavioralAnalytics<S: EventStore> {
    store: S,
    zones: ZoneCatalog,
    config: AnalyticsConfig,
    frame_width: u32,
    frame_height: u32,
}

impl<S: EventStore> BehavioralAnalytics<S> {
    pub fn new(store: S, config: &PipelineConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            store,
            zones: ZoneCatalog::from_config(&config.zones)?,
            config: config.analytics.clone(),
            frame_width: config.frame_width,
            frame_height: config.frame_height,
        })
    }

    pub fn daily_summary(&self, date: NaiveDate) -> VisionResult<DailySummary> {
        let records = self.records(&TimeRange::day(date))?;
        Ok(summarize(date, &records))
    }

    pub fn hourly_distribution(&self, date: NaiveDate) -> VisionResult<HourlyDistribution> {
        let mut counts = [0usize; 24];
        for record in self.records(&TimeRange::day(date))? {
            counts[record.timestamp().hour() as usize] += 1;
        }
        Ok(HourlyDistribution { date, counts })
    }

    /// Seven daily summaries ending with `end_date`, oldest first.
    pub fn weekly_summary(&self, end_date: NaiveDate) -> VisionResult<Vec<DailySummary>> {
        (0..7)
            .rev()
            .map(|back| self.daily_summary(end_date - TimeDelta::days(back)))
            .collect()
    }

    /// Event counts in consecutive buckets from `range.start`. A non-positive bucket size falls
    /// back to one hour; a bucket longer than `max_query_days` is shortened to that length.
    pub fn activity_histogram(&self, range: &TimeRange, bucket_minutes: i64) -> VisionResult<Vec<HistogramBucket>> {
        let range = self.cap(range);
        let max_minutes = self.config.max_query_days.clamp(1, MAX_QUERY_DAYS) * 24 * 60;
        let minutes = if bucket_minutes > 0 { bucket_minutes.min(max_minutes) } else { 60 };
        let bucket = TimeDelta::minutes(minutes);
        let bucket_secs = bucket.num_seconds();
        let bucket_count = (range.duration().num_seconds().max(0) / bucket_secs + 1) as usize;

        let offset = |t: NaiveDateTime, by: TimeDelta| t.checked_add_signed(by).unwrap_or(NaiveDateTime::MAX);
        let mut buckets: Vec<HistogramBucket> = (0..bucket_count)
            .map(|i| {
                let start = offset(range.start, bucket * i as i32);
                HistogramBucket {
                    start,
                    end: offset(start, bucket),
                    count: 0,
                }
            })
            .collect();

        for record in self.records(&range)? {
            let index = ((record.timestamp() - range.start).num_seconds() / bucket_secs) as usize;
            if let Some(b) = buckets.get_mut(index) {
                b.count += 1;
            }
        }
        Ok(buckets)
    }

    /// The densest grid cell holding at least `hotspot_min_count` events. The threshold is
    /// inclusive: a cell with exactly `hotspot_min_count` events qualifies.
    pub fn hotspot(&self, range: &TimeRange) -> VisionResult<Option<Hotspot>> {
        Ok(self.top_hotspots(range, 1)?.into_iter().next())
    }

    /// Qualifying cells by count, densest first. Equal counts keep row-major cell order.
    pub fn top_hotspots(&self, range: &TimeRange, limit: usize) -> VisionResult<Vec<Hotspot>> {
        let records = self.records(range)?;
        let mut counts: BTreeMap<(u32, u32), usize> = BTreeMap::new();
        for record in &records {
            let (cx, cy) = self.cell_of(&record.event.centroid);
            *counts.entry((cy, cx)).or_default() += 1;
        }

        let mut ranked: Vec<Hotspot> = counts
            .into_iter()
            .filter(|&(_, count)| count >= self.config.hotspot_min_count)
            .map(|((cy, cx), count)| Hotspot {
                cell_x: cx,
                cell_y: cy,
                center: self.cell_center(cx, cy),
                count,
            })
            .collect();
        // Stable sort keeps the row-major order of the BTreeMap among equal counts.
        ranked.sort_by(|a, b| b.count.cmp(&a.count));
        ranked.truncate(limit);
        Ok(ranked)
    }

    /// Places the animal stayed still, built from `Stationary` periods in the track transitions.
    /// Periods in a zone are merged per zone; periods outside every zone are merged per grid
    /// cell. Spots below `min_rest_duration` are dropped. Longest first. A rest already under
    /// way at `range.start` counts from `range.start`.
    pub fn rest_spots(&self, range: &TimeRange) -> VisionResult<Vec<RestSpot>> {
        let range = self.cap(range);
        let mut transitions: Vec<TrackTransition> = self
            .store
            .transitions_in_range(&range)?
            .into_iter()
            .filter(|t| self.valid_transition(t, &range))
            .collect();
        transitions.sort_by(|a, b| {
            a.track_id
                .cmp(&b.track_id)
                .then(a.timestamp.cmp(&b.timestamp))
        });

        let mut open: HashMap<u64, (NaiveDateTime, RestKey)> = HashMap::new();
        for t in self.resting_at(range.start)? {
            open.insert(t.track_id, (range.start, self.rest_key(&t.zone, &t.position)));
        }
        let mut totals: BTreeMap<RestKey, (TimeDelta, usize)> = BTreeMap::new();
        let mut close = |key: RestKey, from: NaiveDateTime, to: NaiveDateTime| {
            let entry = totals.entry(key).or_insert((TimeDelta::zero(), 0));
            entry.0 += to - from;
            entry.1 += 1;
        };

        for t in &transitions {
            let TransitionKind::StateChanged { from, to } = t.kind else {
                continue;
            };
            if to == TrackState::Stationary {
                let key = self.rest_key(&t.zone, &t.position);
                open.insert(t.track_id, (t.timestamp, key));
            } else if from == TrackState::Stationary {
                if let Some((since, key)) = open.remove(&t.track_id) {
                    close(key, since, t.timestamp);
                }
            }
        }
        let mut still_open: Vec<_> = open.into_values().collect();
        still_open.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        for (since, key) in still_open {
            close(key, since, range.end);
        }

        let min = self.config.min_rest_duration();
        let mut spots: Vec<RestSpot> = totals
            .into_iter()
            .filter(|(_, (total, _))| *total >= min)
            .map(|(key, (total, periods))| RestSpot {
                location: match key {
                    RestKey::Zone(name) => RestLocation::Zone(name),
                    RestKey::Cell(cx, cy) => RestLocation::Coordinates(self.cell_center(cx, cy)),
                },
                total_duration_secs: total.as_seconds_f64(),
                periods,
            })
            .collect();
        spots.sort_by(|a, b| {
            b.total_duration_secs
                .partial_cmp(&a.total_duration_secs)
                .unwrap_or(Ordering::Equal)
        });
        Ok(spots)
    }

    /// Tracks whose last state change before `instant` made them `Stationary`. Looks back at
    /// most `max_query_days`.
    fn resting_at(&self, instant: NaiveDateTime) -> VisionResult<Vec<TrackTransition>> {
        let since = TimeDelta::try_days(self.config.max_query_days)
            .and_then(|back| instant.checked_sub_signed(back))
            .unwrap_or(NaiveDateTime::MIN);
        let lookback = TimeRange::new(since, instant);

        let mut last: BTreeMap<u64, TrackTransition> = BTreeMap::new();
        for t in self.store.transitions_in_range(&lookback)? {
            if !matches!(t.kind, TransitionKind::StateChanged { .. }) || !self.valid_transition(&t, &lookback) {
                continue;
            }
            match last.get(&t.track_id) {
                Some(seen) if seen.timestamp >= t.timestamp => {}
                _ => {
                    last.insert(t.track_id, t);
                }
            }
        }
        Ok(last
            .into_values()
            .filter(|t| matches!(t.kind, TransitionKind::StateChanged { to: TrackState::Stationary, .. }))
            .collect())
    }

    /// Events per assigned zone, in catalog order, then any zone name only found in the records,
    /// then `Unknown`. Every catalog zone and `Unknown` are listed even when zero.
    pub fn zone_breakdown(&self, range: &TimeRange) -> VisionResult<Vec<ZoneActivity>> {
        let mut counts: HashMap<ZoneAssignment, usize> = HashMap::new();
        for record in self.records(range)? {
            *counts.entry(record.zone).or_default() += 1;
        }

        let mut order: Vec<ZoneAssignment> = self
            .zones
            .zones()
            .iter()
            .map(|z| ZoneAssignment::Zone(z.name.clone()))
            .collect();
        let known: HashSet<ZoneAssignment> = order.iter().cloned().collect();
        let mut extra: Vec<ZoneAssignment> = counts
            .keys()
            .filter(|z| !z.is_unknown() && !known.contains(*z))
            .cloned()
            .collect();
        extra.sort();
        order.extend(extra);
        order.push(ZoneAssignment::Unknown);

        Ok(order
            .into_iter()
            .map(|zone| ZoneActivity {
                count: counts.get(&zone).copied().unwrap_or(0),
                zone,
            })
            .collect())
    }

    pub fn store_statistics(&self) -> VisionResult<StoreStatistics> {
        Ok(self.store.statistics()?)
    }

    /// Valid records of a (capped) range in canonical order.
    fn records(&self, range: &TimeRange) -> VisionResult<Vec<MotionRecord>> {
        let range = self.cap(range);
        let mut records: Vec<MotionRecord> = self
            .store
            .events_in_range(&range)?
            .into_iter()
            .filter(|r| self.valid_record(r, &range))
            .collect();
        records.sort_by(canonical_order);
        Ok(records)
    }

    fn cap(&self, range: &TimeRange) -> TimeRange {
        let (capped, cut) = range.capped(self.config.max_query_days);
        if cut {
            warn!(
                start = %range.start,
                requested_end = %range.end,
                capped_end = %capped.end,
                max_days = self.config.max_query_days,
                "query range capped"
            );
        }
        capped
    }

    fn valid_record(&self, record: &MotionRecord, range: &TimeRange) -> bool {
        let c = &record.event.centroid;
        let reason = if !range.contains(record.timestamp()) {
            "timestamp outside requested range"
        } else if !c.is_finite()
            || c.x < 0.0
            || c.y < 0.0
            || c.x >= self.frame_width as f64
            || c.y >= self.frame_height as f64
        {
            "centroid outside frame"
        } else if !(0.0..=1.0).contains(&record.event.confidence) {
            "confidence outside [0, 1]"
        } else {
            return true;
        };
        warn!(timestamp = %record.timestamp(), track_id = record.track_id, reason, "skipping corrupt motion record");
        false
    }

    fn valid_transition(&self, transition: &TrackTransition, range: &TimeRange) -> bool {
        if range.contains(transition.timestamp) && transition.position.is_finite() {
            return true;
        }
        warn!(timestamp = %transition.timestamp, track_id = transition.track_id, "skipping corrupt transition");
        false
    }

    fn cell_of(&self, point: &Point) -> (u32, u32) {
        let cell = self.config.hotspot_cell_size as f64;
        ((point.x / cell) as u32, (point.y / cell) as u32)
    }

    fn cell_center(&self, cx: u32, cy: u32) -> Point {
        let cell = self.config.hotspot_cell_size as f64;
        Point::new((cx as f64 + 0.5) * cell, (cy as f64 + 0.5) * cell)
    }

    fn rest_key(&self, zone: &ZoneAssignment, position: &Point) -> RestKey {
        match zone {
            ZoneAssignment::Zone(name) => RestKey::Zone(name.clone()),
            ZoneAssignment::Unknown => {
                let (cx, cy) = self.cell_of(position);
                RestKey::Cell(cx, cy)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum RestKey {
    Zone(String),
    Cell(u32, u32),
}

fn canonical_order(a: &MotionRecord, b: &MotionRecord) -> Ordering {
    a.timestamp()
        .cmp(&b.timestamp())
        .then(a.track_id.cmp(&b.track_id))
        .then(a.event.centroid.x.total_cmp(&b.event.centroid.x))
        .then(a.event.centroid.y.total_cmp(&b.event.centroid.y))
        .then(a.event.area.cmp(&b.event.area))
        .then(a.event.confidence.total_cmp(&b.event.confidence))
}

fn summarize(date: NaiveDate, records: &[MotionRecord]) -> DailySummary {
    if records.is_empty() {
        return DailySummary {
            date,
            total_events: 0,
            unique_tracks: 0,
            avg_area: 0.0,
            avg_confidence: 0.0,
            center_of_activity: None,
            first_activity: None,
            last_activity: None,
        };
    }
    let n = records.len() as f64;
    let (area, confidence, x, y) = records.iter().fold((0.0, 0.0, 0.0, 0.0), |acc, r| {
        (
            acc.0 + r.event.area as f64,
            acc.1 + r.event.confidence,
            acc.2 + r.event.centroid.x,
            acc.3 + r.event.centroid.y,
        )
    });
    let unique_tracks = records.iter().map(|r| r.track_id).collect::<HashSet<_>>().len();
    DailySummary {
        date,
        total_events: records.len(),
        unique_tracks,
        avg_area: area / n,
        avg_confidence: confidence / n,
        center_of_activity: Some(Point::new(x / n, y / n)),
        first_activity: records.first().map(MotionRecord::timestamp),
        last_activity: records.last().map(MotionRecord::timestamp),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ZoneConfig;
    use crate::core_modules::motion_event::{BoundingBox, MotionEvent};
    use crate::core_modules::tracker::Velocity;
    use crate::store::{EventSink, MemoryStore};
    use crate::error::StoreError;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 2, 3).expect("valid date")
    }

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        day().and_hms_opt(h, m, s).expect("valid time")
    }

    fn record(ts: NaiveDateTime, track_id: u64, x: f64, y: f64, zone: &str) -> MotionRecord {
        MotionRecord {
            event: MotionEvent {
                timestamp: ts,
                centroid: Point::new(x, y),
                area: 1000 + (x as u32),
                confidence: 0.75,
                bounding_box: BoundingBox {
                    x: x as u32,
                    y: y as u32,
                    width: 10,
                    height: 10,
                },
            },
            track_id,
            zone: if zone.is_empty() {
                ZoneAssignment::Unknown
            } else {
                ZoneAssignment::Zone(zone.to_string())
            },
            velocity: Velocity::default(),
        }
    }

    fn state(ts: NaiveDateTime, track_id: u64, from: TrackState, to: TrackState, zone: &str, at_x: f64) -> TrackTransition {
        TrackTransition {
            track_id,
            timestamp: ts,
            position: Point::new(at_x, 60.0),
            zone: if zone.is_empty() {
                ZoneAssignment::Unknown
            } else {
                ZoneAssignment::Zone(zone.to_string())
            },
            kind: TransitionKind::StateChanged { from, to },
        }
    }

    fn config() -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.zones = vec![
            ZoneConfig {
                name: "Feeding".into(),
                x: 120.0,
                y: 100.0,
                radius: 30.0,
            },
            ZoneConfig {
                name: "Hide".into(),
                x: 500.0,
                y: 400.0,
                radius: 40.0,
            },
        ];
        config.analytics.hotspot_min_count = 2;
        config.analytics.min_rest_duration_secs = 60.0;
        config
    }

    fn sample() -> Vec<MotionRecord> {
        vec![
            record(at(22, 15, 0), 1, 110.0, 100.0, "Feeding"),
            record(at(22, 45, 0), 1, 120.0, 100.0, "Feeding"),
            record(at(23, 5, 0), 2, 300.0, 200.0, ""),
            record(at(2, 0, 0), 2, 130.0, 100.0, "Feeding"),
        ]
    }

    fn analytics(records: &[MotionRecord]) -> BehavioralAnalytics<MemoryStore> {
        let store = MemoryStore::new();
        store.append_events(records).expect("append");
        BehavioralAnalytics::new(store, &config()).expect("valid config")
    }

    #[test]
    fn daily_summary_aggregates_the_day() {
        let summary = analytics(&sample()).daily_summary(day()).expect("summary");
        assert_eq!(summary.total_events, 4);
        assert_eq!(summary.unique_tracks, 2);
        assert_eq!(summary.first_activity, Some(at(2, 0, 0)));
        assert_eq!(summary.last_activity, Some(at(23, 5, 0)));
        let center = summary.center_of_activity.expect("center");
        assert!((center.x - 165.0).abs() < 1e-9);
        assert!((center.y - 125.0).abs() < 1e-9);
    }

    #[test]
    fn empty_day_is_an_explicit_empty_summary() {
        let summary = analytics(&[]).daily_summary(day()).expect("summary");
        assert_eq!(summary.total_events, 0);
        assert!(summary.center_of_activity.is_none());
        assert!(summary.first_activity.is_none());
    }

    #[test]
    fn aggregation_ignores_storage_order() {
        let mut shuffled = sample();
        shuffled.reverse();
        shuffled.swap(0, 2);
        let a = analytics(&sample());
        let b = analytics(&shuffled);
        assert_eq!(a.daily_summary(day()).expect("a"), b.daily_summary(day()).expect("b"));
        assert_eq!(a.daily_summary(day()).expect("a"), a.daily_summary(day()).expect("again"));
        let range = TimeRange::day(day());
        assert_eq!(a.top_hotspots(&range, 5).expect("a"), b.top_hotspots(&range, 5).expect("b"));
    }

    #[test]
    fn hourly_distribution_is_zero_filled() {
        let hourly = analytics(&sample()).hourly_distribution(day()).expect("hourly");
        assert_eq!(hourly.counts[22], 2);
        assert_eq!(hourly.counts[23], 1);
        assert_eq!(hourly.counts[2], 1);
        assert_eq!(hourly.counts.iter().sum::<usize>(), 4);
        assert_eq!(hourly.peak_hour(), Some(22));
    }

    #[test]
    fn weekly_summary_covers_seven_days_oldest_first() {
        let week = analytics(&sample()).weekly_summary(day()).expect("weekly");
        assert_eq!(week.len(), 7);
        assert_eq!(week[0].date, day() - TimeDelta::days(6));
        assert_eq!(week[6].total_events, 4);
        assert!(week[..6].iter().all(|d| d.total_events == 0));
    }

    #[test]
    fn histogram_buckets_cover_the_range() {
        let analytics = analytics(&sample());
        let range = TimeRange::new(at(22, 0, 0), at(23, 30, 0));
        let buckets = analytics.activity_histogram(&range, 30).expect("histogram");
        assert_eq!(buckets.len(), 4);
        let counts: Vec<_> = buckets.iter().map(|b| b.count).collect();
        assert_eq!(counts, vec![1, 1, 1, 0]);

        let fallback = analytics.activity_histogram(&range, 0).expect("histogram");
        assert_eq!(fallback.len(), 2);
        assert_eq!(fallback[0].end - fallback[0].start, TimeDelta::hours(1));
    }

    #[test]
    fn hotspot_needs_min_count_and_breaks_ties_row_major() {
        let records = vec![
            record(at(22, 0, 0), 1, 310.0, 210.0, ""),
            record(at(22, 0, 1), 1, 320.0, 220.0, ""),
            record(at(22, 0, 2), 1, 10.0, 260.0, ""),
            record(at(22, 0, 3), 1, 20.0, 270.0, ""),
            record(at(22, 0, 4), 1, 600.0, 20.0, ""),
        ];
        let range = TimeRange::day(day());
        let analytics = analytics(&records);
        let top = analytics.top_hotspots(&range, 10).expect("hotspots");
        assert_eq!(top.len(), 2);
        assert_eq!((top[0].cell_x, top[0].cell_y), (6, 4));
        assert_eq!((top[1].cell_x, top[1].cell_y), (0, 5));
        assert_eq!(top[0].center, Point::new(325.0, 225.0));
        assert_eq!(analytics.hotspot(&range).expect("hotspot"), top.into_iter().next());
    }

    #[test]
    fn zone_breakdown_includes_unknown_and_empty_zones() {
        let breakdown = analytics(&sample()).zone_breakdown(&TimeRange::day(day())).expect("breakdown");
        let pairs: Vec<_> = breakdown.iter().map(|z| (z.zone.name().to_string(), z.count)).collect();
        assert_eq!(
            pairs,
            vec![
                ("Feeding".to_string(), 3),
                ("Hide".to_string(), 0),
                ("Unknown".to_string(), 1)
            ]
        );
    }

    #[test]
    fn rest_spots_merge_periods_per_zone_and_drop_short_rests() {
        use TrackState::*;
        let store = MemoryStore::new();
        store
            .append_transitions(&[
                state(at(22, 0, 0), 1, Active, Stationary, "Hide", 500.0),
                state(at(22, 5, 0), 1, Stationary, Active, "Hide", 500.0),
                state(at(23, 0, 0), 1, Active, Stationary, "Hide", 500.0),
                state(at(23, 2, 0), 1, Stationary, Lost, "Hide", 500.0),
                // 30 s outside every zone: below the minimum.
                state(at(23, 10, 0), 2, Active, Stationary, "", 20.0),
                state(at(23, 10, 30), 2, Stationary, Active, "", 20.0),
            ])
            .expect("append");
        let analytics = BehavioralAnalytics::new(store, &config()).expect("valid config");
        let spots = analytics.rest_spots(&TimeRange::day(day())).expect("rest spots");
        assert_eq!(spots.len(), 1);
        assert_eq!(spots[0].location, RestLocation::Zone("Hide".into()));
        assert_eq!(spots[0].total_duration_secs, 420.0);
        assert_eq!(spots[0].periods, 2);
    }

    #[test]
    fn open_rest_period_is_closed_at_range_end() {
        let store = MemoryStore::new();
        store
            .append_transitions(&[state(at(23, 50, 0), 4, TrackState::Active, TrackState::Stationary, "", 20.0)])
            .expect("append");
        let analytics = BehavioralAnalytics::new(store, &config()).expect("valid config");
        let spots = analytics
            .rest_spots(&TimeRange::new(at(23, 0, 0), at(23, 55, 0)))
            .expect("rest spots");
        assert_eq!(spots.len(), 1);
        assert_eq!(spots[0].location, RestLocation::Coordinates(Point::new(25.0, 75.0)));
        assert_eq!(spots[0].total_duration_secs, 300.0);
    }

    #[test]
    fn rest_across_midnight_counts_from_range_start() {
        use TrackState::*;
        let store = MemoryStore::new();
        store
            .append_transitions(&[
                state(at(22, 0, 0) - TimeDelta::days(1), 3, New, Active, "Hide", 500.0),
                state(at(23, 0, 0) - TimeDelta::days(1), 3, Active, Stationary, "Hide", 500.0),
                state(at(4, 0, 0), 3, Stationary, Active, "Hide", 500.0),
                // Rested and woke up before midnight: contributes nothing to the day.
                state(at(20, 0, 0) - TimeDelta::days(1), 5, Active, Stationary, "", 20.0),
                state(at(21, 0, 0) - TimeDelta::days(1), 5, Stationary, Active, "", 20.0),
            ])
            .expect("append");
        let analytics = BehavioralAnalytics::new(store, &config()).expect("valid config");

        let spots = analytics.rest_spots(&TimeRange::day(day())).expect("rest spots");
        assert_eq!(spots.len(), 1);
        assert_eq!(spots[0].location, RestLocation::Zone("Hide".into()));
        assert_eq!(spots[0].total_duration_secs, 4.0 * 3600.0);
        assert_eq!(spots[0].periods, 1);
    }

    #[test]
    fn oversized_histogram_bucket_is_shortened() {
        let analytics = analytics(&sample());
        let range = TimeRange::day(day());
        for minutes in [1_000_000_000_000, i64::MAX] {
            let buckets = analytics.activity_histogram(&range, minutes).expect("histogram");
            assert_eq!(buckets.len(), 1);
            assert_eq!(buckets[0].start, range.start);
            assert_eq!(buckets[0].end - buckets[0].start, TimeDelta::days(31));
            assert_eq!(buckets[0].count, 4);
        }
    }

    #[test]
    fn hotspot_threshold_is_inclusive() {
        // config() sets hotspot_min_count to 2.
        let records = vec![
            record(at(22, 0, 0), 1, 310.0, 210.0, ""),
            record(at(22, 0, 1), 1, 320.0, 220.0, ""),
            record(at(22, 0, 2), 1, 10.0, 10.0, ""),
        ];
        let top = analytics(&records).top_hotspots(&TimeRange::day(day()), 10).expect("hotspots");
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].count, 2);
    }

    /// A store that returns whatever it holds, ignoring the requested range.
    struct LeakyStore(Vec<MotionRecord>);

    impl EventStore for LeakyStore {
        fn events_in_range(&self, _: &TimeRange) -> Result<Vec<MotionRecord>, StoreError> {
            Ok(self.0.clone())
        }

        fn transitions_in_range(&self, _: &TimeRange) -> Result<Vec<TrackTransition>, StoreError> {
            Ok(Vec::new())
        }

        fn latest_events(&self, limit: usize) -> Result<Vec<MotionRecord>, StoreError> {
            Ok(self.0.iter().rev().take(limit).cloned().collect())
        }

        fn statistics(&self) -> Result<StoreStatistics, StoreError> {
            Ok(StoreStatistics::default())
        }
    }

    #[test]
    fn corrupt_records_are_skipped() {
        let mut bad_centroid = record(at(22, 0, 0), 1, 10.0, 10.0, "");
        bad_centroid.event.centroid = Point::new(f64::NAN, 5.0);
        let mut bad_confidence = record(at(22, 0, 1), 1, 10.0, 10.0, "");
        bad_confidence.event.confidence = 1.5;
        let wrong_day = record(at(22, 0, 2) + TimeDelta::days(3), 1, 10.0, 10.0, "");
        let good = record(at(22, 0, 3), 1, 10.0, 10.0, "");

        let analytics = BehavioralAnalytics::new(
            LeakyStore(vec![bad_centroid, bad_confidence, wrong_day, good]),
            &config(),
        )
        .expect("valid config");
        assert_eq!(analytics.daily_summary(day()).expect("summary").total_events, 1);
    }

    #[test]
    fn long_ranges_are_capped() {
        let analytics = analytics(&sample());
        let range = TimeRange::new(at(0, 0, 0), at(0, 0, 0) + TimeDelta::days(400));
        let buckets = analytics.activity_histogram(&range, 24 * 60).expect("histogram");
        assert_eq!(buckets.len(), 32);
    }
}
