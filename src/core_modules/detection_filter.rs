// THEORY:
// The animal is nocturnal, so daytime motion is mostly keepers, cleaning and sunlight. The
// `DetectionFilter` gates *publication* of records by time of day. It never gates detection:
// frames outside the window still feed the background model and the tracker so both are warm
// when the window opens.
//
// The window is half-open, `[start, end)`. When `end <= start` it wraps midnight, and
// `start == end` means the whole day.

use crate::config::PublishingConfig;
use crate::error::ConfigError;
use chrono::{NaiveDateTime, NaiveTime, TimeDelta};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectionFilter {
    enabled: bool,
    start: NaiveTime,
    end: NaiveTime,
}

impl DetectionFilter {
    pub fn new(config: &PublishingConfig) -> Result<Self, ConfigError> {
        let (start, end) = config.window()?;
        Ok(Self {
            enabled: config.enabled,
            start,
            end,
        })
    }

    /// A filter that publishes everything.
    pub fn always() -> Self {
        Self {
            enabled: false,
            start: NaiveTime::MIN,
            end: NaiveTime::MIN,
        }
    }

    pub fn should_publish(&self, timestamp: NaiveDateTime) -> bool {
        if !self.enabled || self.start == self.end {
            return true;
        }
        let t = timestamp.time();
        if self.start < self.end {
            t >= self.start && t < self.end
        } else {
            t >= self.start || t < self.end
        }
    }

    /// The earliest instant at or after `timestamp` when records are published again.
    pub fn next_active_time(&self, timestamp: NaiveDateTime) -> NaiveDateTime {
        if self.should_publish(timestamp) {
            return timestamp;
        }
        let today_start = timestamp.date().and_time(self.start);
        if today_start > timestamp {
            today_start
        } else {
            today_start + TimeDelta::days(1)
        }
    }
}
