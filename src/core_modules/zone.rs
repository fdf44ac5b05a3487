// THEORY:
// Zones are the enclosure's functional areas (feeding station, hide, wheel) expressed as named
// circles in frame coordinates. The catalog is built once from configuration, validated, and then
// never changes for the rest of the run. Both the tracker and the analytics read from it.
//
// Key principles:
// 1.  **Priority by order**: zones may overlap. A point belongs to the first zone, in configured
//     order, whose circle contains it. A point inside no circle is `Unknown`.
// 2.  **Closed circles**: a point exactly `radius` away from the center is inside.
// 3.  **Fail before the loop**: a bad zone (non-positive radius, empty or duplicate name,
//     non-finite coordinates) is a configuration error, never a runtime one.

use crate::config::ZoneConfig;
use crate::core_modules::motion_event::Point;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// A named circular region of the enclosure.
#[derive(Debug, Clone, PartialEq)]
pub struct Zone {
    pub name: String,
    pub center: Point,
    /// Always strictly positive.
    pub radius: f64,
}

impl Zone {
    pub fn contains(&self, point: &Point) -> bool {
        self.center.distance_to(point) <= self.radius
    }
}

/// The zone a position was classified into.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneAssignment {
    Zone(String),
    Unknown,
}

impl ZoneAssignment {
    pub fn name(&self) -> &str {
        match self {
            Self::Zone(name) => name,
            Self::Unknown => "Unknown",
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown)
    }
}

impl fmt::Display for ZoneAssignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Event count for one zone, as reported by `ZoneCatalog::activity_by_zone`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZoneActivity {
    pub zone: ZoneAssignment,
    pub count: usize,
}

/// The fixed, ordered set of zones for a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ZoneCatalog {
    zones: Vec<Zone>,
}

impl ZoneCatalog {
    /// Validates and builds the catalog. The error names the first offending entry.
    pub fn from_config(entries: &[ZoneConfig]) -> Result<Self, ConfigError> {
        let mut seen = HashSet::new();
        let mut zones = Vec::with_capacity(entries.len());

        for (index, entry) in entries.iter().enumerate() {
            let reject = |reason: &str| ConfigError::InvalidZone {
                index,
                reason: reason.to_string(),
            };
            let name = entry.name.trim();
            if name.is_empty() {
                return Err(reject("name must not be empty"));
            }
            if name == "Unknown" {
                return Err(reject("`Unknown` is reserved"));
            }
            if !seen.insert(name.to_string()) {
                return Err(reject(&format!("duplicate zone name `{name}`")));
            }
            if !entry.x.is_finite() || !entry.y.is_finite() {
                return Err(reject("center must be finite"));
            }
            if !entry.radius.is_finite() || entry.radius <= 0.0 {
                return Err(reject("radius must be a positive number"));
            }
            zones.push(Zone {
                name: name.to_string(),
                center: Point::new(entry.x, entry.y),
                radius: entry.radius,
            });
        }

        Ok(Self { zones })
    }

    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    /// First zone in configured order containing `point`, else `Unknown`.
    pub fn assign(&self, point: &Point) -> ZoneAssignment {
        self.zones
            .iter()
            .find(|zone| zone.contains(point))
            .map(|zone| ZoneAssignment::Zone(zone.name.clone()))
            .unwrap_or(ZoneAssignment::Unknown)
    }

    /// Counts points per zone. Every configured zone is listed in catalog order, followed by
    /// `Unknown`, even when a count is zero.
    pub fn activity_by_zone<'a>(&self, points: impl IntoIterator<Item = &'a Point>) -> Vec<ZoneActivity> {
        let mut counts = vec![0usize; self.zones.len() + 1];
        for point in points {
            let slot = self
                .zones
                .iter()
                .position(|zone| zone.contains(point))
                .unwrap_or(self.zones.len());
            counts[slot] += 1;
        }

        self.zones
            .iter()
            .map(|zone| ZoneAssignment::Zone(zone.name.clone()))
            .chain(std::iter::once(ZoneAssignment::Unknown))
            .zip(counts)
            .map(|(zone, count)| ZoneActivity { zone, count })
            .collect()
    }

    /// The configured zone with the most points. `Unknown` never wins; ties go to the earlier
    /// zone. `None` when no point fell in any zone.
    pub fn most_visited_zone<'a>(&self, points: impl IntoIterator<Item = &'a Point>) -> Option<ZoneActivity> {
        self.activity_by_zone(points)
            .into_iter()
            .filter(|activity| !activity.zone.is_unknown() && activity.count > 0)
            .fold(None, |best: Option<ZoneActivity>, candidate| match best {
                Some(best) if best.count >= candidate.count => Some(best),
                _ => Some(candidate),
            })
    }
}
