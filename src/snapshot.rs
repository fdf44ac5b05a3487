// THEORY:
// The `SnapshotManager` keeps a visual record of what the pipeline saw. When a published frame
// carries motion, it may save an annotated JPEG of that frame plus a JSON sidecar listing the
// detections drawn on it.
//
// Key principles:
// 1.  **Frame-time rate limit**: at most one snapshot per `save_interval_secs`, measured on
//     frame timestamps, so replays and live capture save the same stills.
// 2.  **Bounded disk use**: only the newest `max_snapshots` stills are kept. Files already in
//     the directory at startup count toward the bound.
// 3.  **Plain drawing**: overlays are drawn pixel by pixel on an `RgbImage`. Zones are green
//     rings, detections green boxes with a red centroid dot, the region of interest a blue
//     frame.

use crate::config::{RegionOfInterest, SnapshotConfig};
use crate::core_modules::frame::Frame;
use crate::core_modules::zone::Zone;
use crate::error::{VisionError, VisionResult};
use crate::store::MotionRecord;
use chrono::NaiveDateTime;
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageEncoder, Rgb, RgbImage};
use serde::Serialize;
use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const ZONE_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const CENTROID_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const ROI_COLOR: Rgb<u8> = Rgb([0, 0, 255]);
const ZONE_THICKNESS: u32 = 2;
const CENTROID_RADIUS: f64 = 5.0;
const FILE_PREFIX: &str = "detection_";

/// Sidecar written next to every still.
#[derive(Debug, Serialize)]
struct SnapshotMetadata<'a> {
    timestamp: NaiveDateTime,
    image: &'a str,
    detections: &'a [MotionRecord],
}

pub struct SnapshotManager {
    config: SnapshotConfig,
    last_saved: Option<NaiveDateTime>,
    /// Saved stills, oldest first.
    saved: VecDeque<PathBuf>,
}

impl SnapshotManager {
    /// Creates the output directory and adopts any stills already in it.
    pub fn new(config: SnapshotConfig) -> VisionResult<Self> {
        let dir = &config.directory;
        fs::create_dir_all(dir).map_err(|source| VisionError::Snapshot {
            path: dir.clone(),
            source,
        })?;
        let saved = existing_snapshots(dir)?;
        info!(directory = %dir.display(), existing = saved.len(), "snapshot directory ready");

        let mut manager = Self {
            config,
            last_saved: None,
            saved,
        };
        manager.prune();
        Ok(manager)
    }

    pub fn should_save(&self, timestamp: NaiveDateTime) -> bool {
        match self.last_saved {
            None => true,
            Some(last) => timestamp - last >= self.config.save_interval(),
        }
    }

    /// Saves an annotated still of `frame` unless one was saved too recently.
    /// Returns the image path when a still was written.
    pub fn save(
        &mut self,
        frame: &Frame,
        records: &[MotionRecord],
        zones: &[Zone],
        roi: Option<RegionOfInterest>,
    ) -> VisionResult<Option<PathBuf>> {
        let timestamp = frame.timestamp();
        if !self.should_save(timestamp) {
            return Ok(None);
        }

        let image = annotate(frame, records, zones, roi);
        let name = format!("{FILE_PREFIX}{}.jpg", timestamp.format("%Y%m%d_%H%M%S_%3f"));
        let path = self.config.directory.join(&name);

        let file = create(&path)?;
        let mut writer = BufWriter::new(file);
        JpegEncoder::new_with_quality(&mut writer, self.config.quality).write_image(
            image.as_raw(),
            image.width(),
            image.height(),
            ExtendedColorType::Rgb8,
        )?;
        writer.flush().map_err(|source| VisionError::Snapshot {
            path: path.clone(),
            source,
        })?;

        let metadata = SnapshotMetadata {
            timestamp,
            image: &name,
            detections: records,
        };
        let sidecar = path.with_extension("json");
        let mut writer = BufWriter::new(create(&sidecar)?);
        serde_json::to_writer_pretty(&mut writer, &metadata)?;
        writer.flush().map_err(|source| VisionError::Snapshot { path: sidecar, source })?;

        debug!(path = %path.display(), detections = records.len(), "snapshot saved");
        self.last_saved = Some(timestamp);
        self.saved.push_back(path.clone());
        self.prune();
        Ok(Some(path))
    }

    /// Paths of the newest stills, newest first.
    pub fn recent(&self, limit: usize) -> Vec<PathBuf> {
        self.saved.iter().rev().take(limit).cloned().collect()
    }

    fn prune(&mut self) {
        while self.saved.len() > self.config.max_snapshots {
            let Some(oldest) = self.saved.pop_front() else {
                break;
            };
            for path in [oldest.with_extension("json"), oldest] {
                if let Err(e) = fs::remove_file(&path) {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        warn!(path = %path.display(), error = %e, "failed to remove old snapshot");
                    }
                }
            }
        }
    }
}

fn create(path: &Path) -> VisionResult<File> {
    File::create(path).map_err(|source| VisionError::Snapshot {
        path: path.to_path_buf(),
        source,
    })
}

/// Stills named by this module, oldest first. Names sort chronologically.
fn existing_snapshots(dir: &Path) -> VisionResult<VecDeque<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(|source| VisionError::Snapshot {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut found: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(FILE_PREFIX) && n.ends_with(".jpg"))
        })
        .collect();
    found.sort();
    Ok(found.into())
}

/// Draws zones, detections and the region of interest over an RGB copy of `frame`.
pub fn annotate(
    frame: &Frame,
    records: &[MotionRecord],
    zones: &[Zone],
    roi: Option<RegionOfInterest>,
) -> RgbImage {
    let mut image = to_rgb(frame);

    if let Some(roi) = roi {
        draw_rect(
            &mut image,
            roi.x as i64,
            roi.y as i64,
            roi.x as i64 + roi.width as i64 - 1,
            roi.y as i64 + roi.height as i64 - 1,
            ROI_COLOR,
        );
    }
    for zone in zones {
        draw_ring(&mut image, zone.center.x, zone.center.y, zone.radius, ZONE_THICKNESS, ZONE_COLOR);
    }
    for record in records {
        let b = &record.event.bounding_box;
        draw_rect(
            &mut image,
            b.x as i64,
            b.y as i64,
            b.x as i64 + b.width as i64 - 1,
            b.y as i64 + b.height as i64 - 1,
            BOX_COLOR,
        );
    }
    for record in records {
        let c = &record.event.centroid;
        fill_disc(&mut image, c.x, c.y, CENTROID_RADIUS, CENTROID_COLOR);
    }
    image
}

fn to_rgb(frame: &Frame) -> RgbImage {
    let data = frame.data();
    let channels = frame.channels() as usize;
    let width = frame.width() as usize;
    RgbImage::from_fn(frame.width(), frame.height(), |x, y| {
        let i = (y as usize * width + x as usize) * channels;
        match channels {
            1 => Rgb([data[i]; 3]),
            _ => Rgb([data[i], data[i + 1], data[i + 2]]),
        }
    })
}

fn put(image: &mut RgbImage, x: i64, y: i64, color: Rgb<u8>) {
    if x >= 0 && y >= 0 && x < image.width() as i64 && y < image.height() as i64 {
        image.put_pixel(x as u32, y as u32, color);
    }
}

/// One-pixel outline with inclusive corners.
fn draw_rect(image: &mut RgbImage, x0: i64, y0: i64, x1: i64, y1: i64, color: Rgb<u8>) {
    let (w, h) = (image.width() as i64, image.height() as i64);
    for x in x0.max(0)..=x1.min(w - 1) {
        put(image, x, y0, color);
        put(image, x, y1, color);
    }
    for y in y0.max(0)..=y1.min(h - 1) {
        put(image, x0, y, color);
        put(image, x1, y, color);
    }
}

/// Pixels within `[radius - thickness, radius]` of the center, limited to the image.
fn draw_ring(image: &mut RgbImage, cx: f64, cy: f64, radius: f64, thickness: u32, color: Rgb<u8>) {
    let inner = radius - thickness as f64;
    for_each_near(image, cx, cy, radius, |image, x, y, d| {
        if d > inner {
            put(image, x, y, color);
        }
    });
}

fn fill_disc(image: &mut RgbImage, cx: f64, cy: f64, radius: f64, color: Rgb<u8>) {
    for_each_near(image, cx, cy, radius, |image, x, y, _| put(image, x, y, color));
}

/// Visits every in-image pixel whose distance to the center is at most `radius`.
fn for_each_near(
    image: &mut RgbImage,
    cx: f64,
    cy: f64,
    radius: f64,
    mut visit: impl FnMut(&mut RgbImage, i64, i64, f64),
) {
    let (w, h) = (image.width() as f64, image.height() as f64);
    let x0 = (cx - radius).floor().max(0.0) as i64;
    let x1 = (cx + radius).ceil().min(w - 1.0) as i64;
    let y0 = (cy - radius).floor().max(0.0) as i64;
    let y1 = (cy + radius).ceil().min(h - 1.0) as i64;
    for y in y0..=y1 {
        for x in x0..=x1 {
            let d = (x as f64 - cx).hypot(y as f64 - cy);
            if d <= radius {
                visit(image, x, y, d);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::motion_event::{BoundingBox, MotionEvent, Point};
    use crate::core_modules::tracker::Velocity;
    use crate::core_modules::zone::ZoneAssignment;
    use chrono::{NaiveDate, TimeDelta};

    fn at(seconds: i64) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 2, 3)
            .and_then(|d| d.and_hms_opt(23, 0, 0))
            .expect("valid timestamp")
            + TimeDelta::seconds(seconds)
    }

    fn frame(seconds: i64) -> Frame {
        Frame::from_luma(40, 30, vec![50; 40 * 30], at(seconds)).expect("valid frame")
    }

    fn record(seconds: i64) -> MotionRecord {
        MotionRecord {
            event: MotionEvent {
                timestamp: at(seconds),
                centroid: Point::new(20.0, 15.0),
                area: 120,
                confidence: 0.8,
                bounding_box: BoundingBox {
                    x: 10,
                    y: 8,
                    width: 20,
                    height: 14,
                },
            },
            track_id: 1,
            zone: ZoneAssignment::Zone("Feeding".into()),
            velocity: Velocity::default(),
        }
    }

    fn zone() -> Zone {
        Zone {
            name: "Feeding".into(),
            center: Point::new(20.0, 15.0),
            radius: 12.0,
        }
    }

    fn manager(dir: &Path, interval: f64, max: usize) -> SnapshotManager {
        SnapshotManager::new(SnapshotConfig {
            enabled: true,
            directory: dir.to_path_buf(),
            save_interval_secs: interval,
            max_snapshots: max,
            quality: 85,
        })
        .expect("snapshot manager")
    }

    #[test]
    fn annotation_draws_every_overlay() {
        let roi = RegionOfInterest {
            x: 1,
            y: 1,
            width: 38,
            height: 28,
        };
        let image = annotate(&frame(0), &[record(0)], &[zone()], Some(roi));

        assert_eq!(image.dimensions(), (40, 30));
        assert_eq!(*image.get_pixel(20, 15), CENTROID_COLOR);
        assert_eq!(*image.get_pixel(10, 8), BOX_COLOR);
        assert_eq!(*image.get_pixel(32, 15), ZONE_COLOR);
        assert_eq!(*image.get_pixel(1, 1), ROI_COLOR);
        assert_eq!(*image.get_pixel(3, 20), Rgb([50, 50, 50]));
    }

    #[test]
    fn rgb_frames_keep_their_colors() {
        let data = [10u8, 20, 30].repeat(4 * 3);
        let frame = Frame::new(4, 3, 3, data, at(0)).expect("valid frame");
        let image = annotate(&frame, &[], &[], None);
        assert!(image.pixels().all(|p| *p == Rgb([10, 20, 30])));
    }

    #[test]
    fn saves_are_rate_limited_by_frame_time() {
        let dir = tempfile::tempdir().expect("temp dir");
        let mut snapshots = manager(dir.path(), 60.0, 10);

        let first = snapshots
            .save(&frame(0), &[record(0)], &[zone()], None)
            .expect("save")
            .expect("first still is saved");
        assert!(first.exists());
        assert!(snapshots.save(&frame(30), &[record(30)], &[], None).expect("save").is_none());
        assert!(snapshots.save(&frame(60), &[record(60)], &[], None).expect("save").is_some());

        let sidecar = fs::read_to_string(first.with_extension("json")).expect("sidecar");
        let value: serde_json::Value = serde_json::from_str(&sidecar).expect("valid json");
        assert_eq!(value["detections"].as_array().map(Vec::len), Some(1));
        assert_eq!(value["detections"][0]["track_id"], 1);
    }

    #[test]
    fn oldest_stills_are_removed_beyond_the_cap() {
        let dir = tempfile::tempdir().expect("temp dir");
        let mut snapshots = manager(dir.path(), 0.0, 2);

        let paths: Vec<PathBuf> = (0..4)
            .map(|s| {
                snapshots
                    .save(&frame(s), &[record(s)], &[], None)
                    .expect("save")
                    .expect("saved")
            })
            .collect();

        assert!(!paths[0].exists());
        assert!(!paths[0].with_extension("json").exists());
        assert!(!paths[1].exists());
        assert_eq!(snapshots.recent(10), vec![paths[3].clone(), paths[2].clone()]);

        // A restarted manager adopts the survivors.
        let reopened = manager(dir.path(), 0.0, 2);
        assert_eq!(reopened.recent(10), vec![paths[3].clone(), paths[2].clone()]);
    }
}
