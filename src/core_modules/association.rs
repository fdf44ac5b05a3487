// THEORY:
// Association answers one question per frame: which new detection continues which existing
// track? It is solved as a greedy bipartite assignment over an explicit distance matrix.
//
// Algorithm:
// 1.  Build the matrix of Euclidean distances between every track's last known position (rows)
//     and every detection centroid (columns).
// 2.  Keep only pairs strictly closer than the gate distance.
// 3.  Sort the surviving pairs by (distance, track id, detection index) and walk them once,
//     accepting a pair when neither its track nor its detection has been claimed yet.
//
// The sort key makes the result independent of the order tracks are stored in: equal distances
// always resolve to the older (lower id) track, then to the earlier detection.

use crate::core_modules::motion_event::Point;

/// Row-major `tracks x detections` distance matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct DistanceMatrix {
    rows: usize,
    cols: usize,
    values: Vec<f64>,
}

impl DistanceMatrix {
    pub fn between(tracks: &[Point], detections: &[Point]) -> Self {
        let values = tracks
            .iter()
            .flat_map(|track| detections.iter().map(move |det| track.distance_to(det)))
            .collect();
        Self {
            rows: tracks.len(),
            cols: detections.len(),
            values,
        }
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.values[row * self.cols + col]
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }
}

/// One accepted pairing of a track row with a detection column.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Match {
    pub track_index: usize,
    pub detection_index: usize,
    pub distance: f64,
}

/// Greedy nearest-first assignment. `track_ids[row]` is the id of the track in that row and is
/// only used for tie-breaking.
pub fn greedy_assign(matrix: &DistanceMatrix, track_ids: &[u64], max_distance: f64) -> Vec<Match> {
    debug_assert_eq!(track_ids.len(), matrix.rows());

    let mut candidates: Vec<Match> = (0..matrix.rows())
        .flat_map(|row| (0..matrix.cols()).map(move |col| (row, col)))
        .map(|(track_index, detection_index)| Match {
            track_index,
            detection_index,
            distance: matrix.get(track_index, detection_index),
        })
        .filter(|m| m.distance < max_distance)
        .collect();

    candidates.sort_by(|a, b| {
        a.distance
            .total_cmp(&b.distance)
            .then_with(|| track_ids[a.track_index].cmp(&track_ids[b.track_index]))
            .then_with(|| a.detection_index.cmp(&b.detection_index))
    });

    let mut track_taken = vec![false; matrix.rows()];
    let mut detection_taken = vec![false; matrix.cols()];
    let mut matches = Vec::new();
    for candidate in candidates {
        if track_taken[candidate.track_index] || detection_taken[candidate.detection_index] {
            continue;
        }
        track_taken[candidate.track_index] = true;
        detection_taken[candidate.detection_index] = true;
        matches.push(candidate);
    }
    matches
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(matches: &[Match]) -> Vec<(usize, usize)> {
        let mut out: Vec<_> = matches.iter().map(|m| (m.track_index, m.detection_index)).collect();
        out.sort();
        out
    }

    #[test]
    fn nearest_pairs_win() {
        let tracks = [Point::new(0.0, 0.0), Point::new(100.0, 0.0)];
        let detections = [Point::new(98.0, 0.0), Point::new(3.0, 0.0)];
        let matrix = DistanceMatrix::between(&tracks, &detections);
        assert_eq!(pairs(&greedy_assign(&matrix, &[1, 2], 50.0)), vec![(0, 1), (1, 0)]);
    }

    #[test]
    fn gate_is_strict() {
        let matrix = DistanceMatrix::between(&[Point::new(0.0, 0.0)], &[Point::new(10.0, 0.0)]);
        assert!(greedy_assign(&matrix, &[7], 10.0).is_empty());
        assert_eq!(greedy_assign(&matrix, &[7], 10.001).len(), 1);
    }

    #[test]
    fn equal_distances_go_to_the_lower_track_id() {
        // Both tracks are 5px from the single detection; row order is the reverse of id order.
        let tracks = [Point::new(10.0, 0.0), Point::new(0.0, 0.0)];
        let detections = [Point::new(5.0, 0.0)];
        let matrix = DistanceMatrix::between(&tracks, &detections);
        let matches = greedy_assign(&matrix, &[9, 4], 50.0);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].track_index, 1);
    }

    #[test]
    fn greedy_takes_the_globally_closest_pair_first() {
        // Track 0 is closest to detection 0, but track 1 is even closer to it.
        let tracks = [Point::new(0.0, 0.0), Point::new(12.0, 0.0)];
        let detections = [Point::new(10.0, 0.0), Point::new(-20.0, 0.0)];
        let matrix = DistanceMatrix::between(&tracks, &detections);
        assert_eq!(pairs(&greedy_assign(&matrix, &[1, 2], 50.0)), vec![(0, 1), (1, 0)]);
    }

    #[test]
    fn empty_inputs_match_nothing() {
        let matrix = DistanceMatrix::between(&[], &[Point::new(1.0, 1.0)]);
        assert!(greedy_assign(&matrix, &[], 50.0).is_empty());
    }
}
