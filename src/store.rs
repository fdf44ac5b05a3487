// THEORY:
// The store is the only channel between the live loop and everything that looks at history.
// The loop appends through an `EventSink`; analytics and heatmaps read through an `EventStore`.
// Neither side ever touches the other's state, so the read path needs no coordination with the
// loop beyond the store's own lock.
//
// Key principles:
// 1.  **Append-only records**: a `MotionRecord` is a `MotionEvent` enriched with the track it was
//     attributed to, that track's zone and its movement vector at that instant. Track lifecycle
//     and zone changes are stored as `TrackTransition`s.
// 2.  **Batched writes**: the `BatchWriter` buffers records and writes them in batches. A failed
//     write keeps the batch for the next attempt. The buffer is bounded; when it overflows the
//     oldest records are dropped and counted.
// 3.  **Half-open ranges**: every query takes a `TimeRange` `[start, end)`.
// 4.  **Retention**: history older than a cutoff is removed with `prune_before`; nothing else
//     ever deletes a record.

use crate::core_modules::motion_event::MotionEvent;
use crate::core_modules::tracker::{TrackTransition, Velocity};
use crate::core_modules::zone::ZoneAssignment;
use crate::error::StoreError;
use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

/// A persisted motion event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionRecord {
    #[serde(flatten)]
    pub event: MotionEvent,
    pub track_id: u64,
    pub zone: ZoneAssignment,
    pub velocity: Velocity,
}

impl MotionRecord {
    pub fn timestamp(&self) -> NaiveDateTime {
        self.event.timestamp
    }
}

/// Half-open time interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl TimeRange {
    /// Builds a range, swapping the bounds if they were given backwards.
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        if end < start {
            Self { start: end, end: start }
        } else {
            Self { start, end }
        }
    }

    /// Midnight to midnight of one calendar day.
    pub fn day(date: NaiveDate) -> Self {
        let start = date.and_time(chrono::NaiveTime::MIN);
        Self {
            start,
            end: start + TimeDelta::days(1),
        }
    }

    pub fn contains(&self, timestamp: NaiveDateTime) -> bool {
        timestamp >= self.start && timestamp < self.end
    }

    pub fn duration(&self) -> TimeDelta {
        self.end - self.start
    }

    /// Shortens the range to at most `max_days`, keeping its start. Returns whether it was cut.
    pub fn capped(&self, max_days: i64) -> (Self, bool) {
        let limit = TimeDelta::try_days(max_days.max(0)).unwrap_or(TimeDelta::MAX);
        if self.duration() > limit {
            (
                Self {
                    start: self.start,
                    end: self.start + limit,
                },
                true,
            )
        } else {
            (*self, false)
        }
    }
}

/// Record counts and time span of everything a store holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStatistics {
    pub motion_events: usize,
    pub transitions: usize,
    pub first_event: Option<NaiveDateTime>,
    pub last_event: Option<NaiveDateTime>,
}

/// Write side of the persistence boundary.
pub trait EventSink: Send + Sync {
    fn append_events(&self, records: &[MotionRecord]) -> Result<(), StoreError>;

    fn append_transitions(&self, transitions: &[TrackTransition]) -> Result<(), StoreError>;

    /// Deletes motion records and transitions stamped before `cutoff`. Returns how many went.
    fn prune_before(&self, cutoff: NaiveDateTime) -> Result<usize, StoreError>;
}

/// Read side of the persistence boundary.
pub trait EventStore: Send + Sync {
    fn events_in_range(&self, range: &TimeRange) -> Result<Vec<MotionRecord>, StoreError>;

    fn events_in_zone(&self, zone: &ZoneAssignment, range: &TimeRange) -> Result<Vec<MotionRecord>, StoreError> {
        Ok(self
            .events_in_range(range)?
            .into_iter()
            .filter(|r| &r.zone == zone)
            .collect())
    }

    fn transitions_in_range(&self, range: &TimeRange) -> Result<Vec<TrackTransition>, StoreError>;

    /// The `limit` most recent motion records, newest first.
    fn latest_events(&self, limit: usize) -> Result<Vec<MotionRecord>, StoreError>;

    fn statistics(&self) -> Result<StoreStatistics, StoreError>;
}

impl<T: EventSink + ?Sized> EventSink for Arc<T> {
    fn append_events(&self, records: &[MotionRecord]) -> Result<(), StoreError> {
        (**self).append_events(records)
    }

    fn append_transitions(&self, transitions: &[TrackTransition]) -> Result<(), StoreError> {
        (**self).append_transitions(transitions)
    }

    fn prune_before(&self, cutoff: NaiveDateTime) -> Result<usize, StoreError> {
        (**self).prune_before(cutoff)
    }
}

#[derive(Debug, Default)]
struct MemoryInner {
    events: Vec<MotionRecord>,
    transitions: Vec<TrackTransition>,
}

/// In-process store. Clones share the same underlying data.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<MemoryInner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventSink for MemoryStore {
    fn append_events(&self, records: &[MotionRecord]) -> Result<(), StoreError> {
        let mut inner = self.inner.write().map_err(|_| StoreError::Poisoned)?;
        inner.events.extend_from_slice(records);
        Ok(())
    }

    fn append_transitions(&self, transitions: &[TrackTransition]) -> Result<(), StoreError> {
        let mut inner = self.inner.write().map_err(|_| StoreError::Poisoned)?;
        inner.transitions.extend_from_slice(transitions);
        Ok(())
    }

    fn prune_before(&self, cutoff: NaiveDateTime) -> Result<usize, StoreError> {
        let mut inner = self.inner.write().map_err(|_| StoreError::Poisoned)?;
        let before = inner.events.len() + inner.transitions.len();
        inner.events.retain(|r| r.timestamp() >= cutoff);
        inner.transitions.retain(|t| t.timestamp >= cutoff);
        Ok(before - inner.events.len() - inner.transitions.len())
    }
}

impl EventStore for MemoryStore {
    fn events_in_range(&self, range: &TimeRange) -> Result<Vec<MotionRecord>, StoreError> {
        let inner = self.inner.read().map_err(|_| StoreError::Poisoned)?;
        Ok(inner
            .events
            .iter()
            .filter(|r| range.contains(r.timestamp()))
            .cloned()
            .collect())
    }

    fn transitions_in_range(&self, range: &TimeRange) -> Result<Vec<TrackTransition>, StoreError> {
        let inner = self.inner.read().map_err(|_| StoreError::Poisoned)?;
        Ok(inner
            .transitions
            .iter()
            .filter(|t| range.contains(t.timestamp))
            .cloned()
            .collect())
    }

    fn latest_events(&self, limit: usize) -> Result<Vec<MotionRecord>, StoreError> {
        let inner = self.inner.read().map_err(|_| StoreError::Poisoned)?;
        let mut latest: Vec<MotionRecord> = inner.events.clone();
        // Stable: records sharing a timestamp keep reverse insertion order.
        latest.reverse();
        latest.sort_by(|a, b| b.timestamp().cmp(&a.timestamp()));
        latest.truncate(limit);
        Ok(latest)
    }

    fn statistics(&self) -> Result<StoreStatistics, StoreError> {
        let inner = self.inner.read().map_err(|_| StoreError::Poisoned)?;
        Ok(StoreStatistics {
            motion_events: inner.events.len(),
            transitions: inner.transitions.len(),
            first_event: inner.events.iter().map(MotionRecord::timestamp).min(),
            last_event: inner.events.iter().map(MotionRecord::timestamp).max(),
        })
    }
}

/// Buffers records in front of an `EventSink`.
pub struct BatchWriter<S: EventSink> {
    sink: S,
    events: VecDeque<MotionRecord>,
    transitions: VecDeque<TrackTransition>,
    batch_size: usize,
    max_buffered: usize,
    dropped: u64,
    written: u64,
}

impl<S: EventSink> BatchWriter<S> {
    pub fn new(sink: S, batch_size: usize, max_buffered: usize) -> Self {
        Self {
            sink,
            events: VecDeque::new(),
            transitions: VecDeque::new(),
            batch_size: batch_size.max(1),
            max_buffered: max_buffered.max(batch_size),
            dropped: 0,
            written: 0,
        }
    }

    /// Queues records and flushes once a full batch is buffered.
    pub fn push(&mut self, records: Vec<MotionRecord>, transitions: Vec<TrackTransition>) -> Result<(), StoreError> {
        self.events.extend(records);
        self.transitions.extend(transitions);
        self.enforce_bound();
        if self.buffered() >= self.batch_size {
            self.flush()?;
        }
        Ok(())
    }

    /// Writes everything buffered. On failure the unwritten records stay queued.
    pub fn flush(&mut self) -> Result<(), StoreError> {
        if !self.events.is_empty() {
            let batch = self.events.make_contiguous();
            if let Err(e) = self.sink.append_events(batch) {
                warn!(buffered = self.buffered(), error = %e, "motion record write failed, keeping batch");
                return Err(e);
            }
            self.written += batch.len() as u64;
            debug!(count = batch.len(), "motion records written");
            self.events.clear();
        }
        if !self.transitions.is_empty() {
            let batch = self.transitions.make_contiguous();
            if let Err(e) = self.sink.append_transitions(batch) {
                warn!(buffered = self.buffered(), error = %e, "transition write failed, keeping batch");
                return Err(e);
            }
            self.written += batch.len() as u64;
            debug!(count = batch.len(), "transitions written");
            self.transitions.clear();
        }
        Ok(())
    }

    fn enforce_bound(&mut self) {
        let mut dropped = 0u64;
        while self.buffered() > self.max_buffered {
            let event_is_older = match (self.events.front(), self.transitions.front()) {
                (Some(e), Some(t)) => e.timestamp() <= t.timestamp,
                (Some(_), None) => true,
                _ => false,
            };
            if event_is_older {
                self.events.pop_front();
            } else {
                self.transitions.pop_front();
            }
            dropped += 1;
        }
        if dropped > 0 {
            self.dropped += dropped;
            warn!(dropped, total_dropped = self.dropped, "write buffer full, oldest records dropped");
        }
    }

    pub fn buffered(&self) -> usize {
        self.events.len() + self.transitions.len()
    }

    /// Records discarded because the buffer overflowed.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Records successfully handed to the sink.
    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }
}
