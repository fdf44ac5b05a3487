// THEORY:
// The `LiveLoop` is the single owner of the live state. Once per tick it pulls one frame from a
// `FrameSource`, runs it through the `VisionPipeline`, and hands whatever should be published
// to a `BatchWriter`. Nothing else in the process touches the pipeline.
//
// Key principles:
// 1.  **Best-effort throttle**: ticks come from a `tokio::time::interval` at `fps_target`. When
//     a tick overruns, the missed ticks are skipped, never replayed in a burst, so the loop
//     always works on the freshest frame the source can give.
// 2.  **Nothing in a tick is fatal**: a rejected frame is logged and counted; a failed write
//     stays buffered for the next flush; a gap in the stream resets the background model.
// 3.  **Cooperative shutdown**: the shutdown signal is only observed between ticks. The current
//     tick completes, the write buffer is flushed, then `run` returns.
// 4.  **Housekeeping on frame time**: history older than `retention_days` is pruned at most
//     once per hour of frame time, and annotated snapshots follow their own frame-time limit.

use crate::core_modules::frame::Frame;
use crate::config::RuntimeConfig;
use crate::pipeline::VisionPipeline;
use crate::snapshot::SnapshotManager;
use crate::store::{BatchWriter, EventSink, MotionRecord};
use chrono::{NaiveDateTime, TimeDelta};
use serde::Serialize;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// What a frame source produced for one pull.
#[derive(Debug)]
pub enum FrameResult {
    Frame(Frame),
    /// The stream was interrupted since the last frame (reconnect, dropped frames).
    Gap,
    EndOfStream,
}

/// Pull-based frame supplier. Acquisition and reconnection live behind this trait.
pub trait FrameSource: Send {
    fn next_frame(&mut self) -> FrameResult;
}

/// Per-loop counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LoopStats {
    pub ticks: u64,
    pub frames_processed: u64,
    pub frames_rejected: u64,
    pub gaps: u64,
    /// Records the sink accepted. Records still buffered or dropped are not counted.
    pub records_published: u64,
    pub snapshots_saved: u64,
    /// Ticks whose work took longer than the frame budget.
    pub deadline_misses: u64,
    pub worst_tick: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TickOutcome {
    Continue,
    EndOfStream,
}

pub struct LiveLoop<S: EventSink> {
    pipeline: VisionPipeline,
    writer: BatchWriter<S>,
    frame_budget: Duration,
    stats_interval: Duration,
    stats: LoopStats,
    retention: Option<TimeDelta>,
    last_prune: Option<NaiveDateTime>,
    snapshots: Option<SnapshotManager>,
}

impl<S: EventSink> LiveLoop<S> {
    pub fn new(pipeline: VisionPipeline, sink: S, config: &RuntimeConfig) -> Self {
        Self {
            pipeline,
            writer: BatchWriter::new(sink, config.batch_size, config.max_buffered_records),
            frame_budget: Duration::from_secs_f64(1.0 / config.fps_target),
            stats_interval: Duration::from_secs(config.stats_interval_secs.max(1)),
            stats: LoopStats::default(),
            retention: (config.retention_days > 0)
                .then(|| TimeDelta::try_days(i64::from(config.retention_days)))
                .flatten(),
            last_prune: None,
            snapshots: None,
        }
    }

    /// Saves annotated stills of published motion through `snapshots`.
    pub fn with_snapshots(mut self, snapshots: SnapshotManager) -> Self {
        self.snapshots = Some(snapshots);
        self
    }

    /// Runs until the source ends or `shutdown` flips to `true`, then flushes pending writes.
    pub async fn run<F: FrameSource>(&mut self, source: &mut F, mut shutdown: watch::Receiver<bool>) -> LoopStats {
        let mut ticker = tokio::time::interval(self.frame_budget);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_report = Instant::now();

        info!(fps = 1.0 / self.frame_budget.as_secs_f64(), "live loop started");

        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    // A dropped sender also means stop.
                    if changed.is_err() || *shutdown.borrow() {
                        info!("shutdown requested");
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if self.tick(source) == TickOutcome::EndOfStream {
                        info!("frame source ended");
                        break;
                    }
                    if last_report.elapsed() >= self.stats_interval {
                        self.log_statistics();
                        last_report = Instant::now();
                    }
                }
            }
        }

        self.shutdown();
        self.stats
    }

    /// One pull-process-publish cycle.
    fn tick<F: FrameSource>(&mut self, source: &mut F) -> TickOutcome {
        let started = Instant::now();
        self.stats.ticks += 1;

        match source.next_frame() {
            FrameResult::Frame(frame) => self.process(&frame),
            FrameResult::Gap => {
                self.stats.gaps += 1;
                self.pipeline.handle_gap();
            }
            FrameResult::EndOfStream => return TickOutcome::EndOfStream,
        }

        let elapsed = started.elapsed();
        if elapsed > self.frame_budget {
            self.stats.deadline_misses += 1;
            debug!(elapsed_ms = elapsed.as_millis() as u64, "tick overran frame budget");
        }
        self.stats.worst_tick = self.stats.worst_tick.max(elapsed);
        TickOutcome::Continue
    }

    fn process(&mut self, frame: &Frame) {
        let report = match self.pipeline.process_frame(frame) {
            Ok(report) => report,
            Err(e) => {
                self.stats.frames_rejected += 1;
                warn!(timestamp = %frame.timestamp(), category = ?e.category(), error = %e, "frame rejected");
                return;
            }
        };
        self.stats.frames_processed += 1;
        self.enforce_retention(frame.timestamp());

        if !report.publish {
            return;
        }
        let (records, transitions) = report.into_parts();
        if records.is_empty() && transitions.is_empty() {
            return;
        }
        if !records.is_empty() {
            self.save_snapshot(frame, &records);
        }
        // A failed flush keeps the batch buffered; the writer already logged it.
        let _ = self.writer.push(records, transitions);
        self.stats.records_published = self.writer.written();
    }

    fn save_snapshot(&mut self, frame: &Frame, records: &[MotionRecord]) {
        let Some(snapshots) = self.snapshots.as_mut() else {
            return;
        };
        let zones = self.pipeline.zones().zones();
        match snapshots.save(frame, records, zones, self.pipeline.region_of_interest()) {
            Ok(Some(_)) => self.stats.snapshots_saved += 1,
            Ok(None) => {}
            Err(e) => warn!(timestamp = %frame.timestamp(), error = %e, "failed to save snapshot"),
        }
    }

    /// Prunes history older than the retention window, at most once per hour of frame time.
    fn enforce_retention(&mut self, now: NaiveDateTime) {
        let Some(retention) = self.retention else {
            return;
        };
        if self.last_prune.is_some_and(|last| now - last < TimeDelta::hours(1)) {
            return;
        }
        self.last_prune = Some(now);
        let Some(cutoff) = now.checked_sub_signed(retention) else {
            return;
        };
        match self.writer.sink().prune_before(cutoff) {
            Ok(0) => {}
            Ok(removed) => info!(removed, %cutoff, "expired history pruned"),
            Err(e) => warn!(%cutoff, error = %e, "failed to prune expired history"),
        }
    }

    fn shutdown(&mut self) {
        if let Err(e) = self.writer.flush() {
            warn!(error = %e, unwritten = self.writer.buffered(), "final flush failed");
        }
        self.stats.records_published = self.writer.written();
        self.log_statistics();
    }

    fn log_statistics(&self) {
        let motion = self.pipeline.motion_statistics();
        let tracks = self.pipeline.tracker_statistics();
        info!(
            frames = self.stats.frames_processed,
            rejected = self.stats.frames_rejected,
            gaps = self.stats.gaps,
            deadline_misses = self.stats.deadline_misses,
            worst_tick_ms = self.stats.worst_tick.as_millis() as u64,
            motions = motion.motions_detected,
            detection_rate = motion.detection_rate,
            live_tracks = tracks.total_tracks,
            published = self.writer.written(),
            buffered = self.writer.buffered(),
            dropped = self.writer.dropped(),
            "live loop statistics"
        );
    }

    pub fn pipeline(&self) -> &VisionPipeline {
        &self.pipeline
    }

    pub fn stats(&self) -> LoopStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PipelineConfig, SnapshotConfig};
    use crate::core_modules::detection_filter::DetectionFilter;
    use crate::core_modules::motion_event::{BoundingBox, MotionEvent, Point};
    use crate::core_modules::tracker::{TrackTransition, Velocity};
    use crate::core_modules::zone::ZoneAssignment;
    use crate::error::StoreError;
    use crate::store::{EventStore, MemoryStore};
    use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
    use std::collections::VecDeque;

    fn at(frame: i64) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 2, 3)
            .and_then(|d| d.and_hms_opt(23, 0, 0))
            .expect("valid timestamp")
            + TimeDelta::milliseconds(500 * frame)
    }

    /// Replays a fixed script of pulls, then reports end of stream.
    struct ScriptedSource(VecDeque<FrameResult>);

    impl FrameSource for ScriptedSource {
        fn next_frame(&mut self) -> FrameResult {
            self.0.pop_front().unwrap_or(FrameResult::EndOfStream)
        }
    }

    /// Never ends; used to exercise shutdown.
    struct EndlessSource(i64);

    impl FrameSource for EndlessSource {
        fn next_frame(&mut self) -> FrameResult {
            self.0 += 1;
            FrameResult::Frame(frame(self.0, None))
        }
    }

    fn frame(index: i64, square_x: Option<u32>) -> Frame {
        let (w, h) = (60u32, 40u32);
        let mut data = vec![12u8; (w * h) as usize];
        if let Some(sx) = square_x {
            for y in 15..25 {
                for x in sx..sx + 10 {
                    data[(y * w + x) as usize] = 240;
                }
            }
        }
        Frame::from_luma(w, h, data, at(index)).expect("valid frame")
    }

    fn config() -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.frame_width = 60;
        config.frame_height = 40;
        config.motion.min_area = 50;
        config.motion.max_area = 150;
        config.motion.blur_radius = 0;
        config.motion.morphology = false;
        config.runtime.fps_target = 100.0;
        config.runtime.batch_size = 4;
        config
    }

    fn live_loop(store: MemoryStore) -> LiveLoop<MemoryStore> {
        live_loop_with(&config(), store)
    }

    fn live_loop_with<S: EventSink>(config: &PipelineConfig, sink: S) -> LiveLoop<S> {
        let pipeline = VisionPipeline::new(config)
            .expect("valid config")
            .with_filter(DetectionFilter::always());
        LiveLoop::new(pipeline, sink, &config.runtime)
    }

    fn moving_square() -> ScriptedSource {
        ScriptedSource(
            vec![
                FrameResult::Frame(frame(0, None)),
                FrameResult::Frame(frame(1, Some(10))),
                FrameResult::Frame(frame(2, Some(12))),
                FrameResult::Frame(frame(3, Some(14))),
            ]
            .into(),
        )
    }

    fn stored_record(timestamp: NaiveDateTime) -> MotionRecord {
        MotionRecord {
            event: MotionEvent {
                timestamp,
                centroid: Point::new(30.0, 20.0),
                area: 100,
                confidence: 0.9,
                bounding_box: BoundingBox {
                    x: 25,
                    y: 15,
                    width: 10,
                    height: 10,
                },
            },
            track_id: 9,
            zone: ZoneAssignment::Unknown,
            velocity: Velocity::default(),
        }
    }

    /// Rejects every write.
    struct DownSink;

    impl EventSink for DownSink {
        fn append_events(&self, _: &[MotionRecord]) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }

        fn append_transitions(&self, _: &[TrackTransition]) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }

        fn prune_before(&self, _: NaiveDateTime) -> Result<usize, StoreError> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn runs_to_end_of_stream_and_flushes() {
        let store = MemoryStore::new();
        let mut live = live_loop(store.clone());
        let mut source = ScriptedSource(
            vec![
                FrameResult::Frame(frame(0, None)),
                FrameResult::Frame(frame(1, Some(10))),
                FrameResult::Frame(frame(2, Some(12))),
                FrameResult::Frame(frame(3, Some(14))),
            ]
            .into(),
        );
        let (_tx, rx) = watch::channel(false);

        let stats = live.run(&mut source, rx).await;
        assert_eq!(stats.frames_processed, 4);
        assert_eq!(stats.frames_rejected, 0);

        let stored = store.statistics().expect("stats");
        assert_eq!(stored.motion_events, 3);
        assert_eq!(stats.records_published as usize, stored.motion_events + stored.transitions);
    }

    #[tokio::test]
    async fn unwritten_records_are_not_counted_as_published() {
        let mut live = live_loop_with(&config(), DownSink);
        let (_tx, rx) = watch::channel(false);

        let stats = live.run(&mut moving_square(), rx).await;
        assert_eq!(stats.frames_processed, 4);
        assert_eq!(stats.records_published, 0);
    }

    #[tokio::test]
    async fn history_past_retention_is_pruned() {
        let store = MemoryStore::new();
        store
            .append_events(&[
                stored_record(at(0) - TimeDelta::days(3)),
                stored_record(at(0) - TimeDelta::hours(2)),
            ])
            .expect("append");
        let mut config = config();
        config.runtime.retention_days = 1;
        let mut live = live_loop_with(&config, store.clone());
        let mut source = ScriptedSource(vec![FrameResult::Frame(frame(0, None))].into());
        let (_tx, rx) = watch::channel(false);

        live.run(&mut source, rx).await;
        let kept = store.latest_events(10).expect("query");
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].timestamp(), at(0) - TimeDelta::hours(2));
    }

    #[tokio::test]
    async fn zero_retention_keeps_everything() {
        let store = MemoryStore::new();
        store
            .append_events(&[stored_record(at(0) - TimeDelta::days(400))])
            .expect("append");
        let mut config = config();
        config.runtime.retention_days = 0;
        let mut live = live_loop_with(&config, store.clone());
        let mut source = ScriptedSource(vec![FrameResult::Frame(frame(0, None))].into());
        let (_tx, rx) = watch::channel(false);

        live.run(&mut source, rx).await;
        assert_eq!(store.statistics().expect("stats").motion_events, 1);
    }

    #[tokio::test]
    async fn published_motion_is_snapshotted_once_per_interval() {
        let dir = tempfile::tempdir().expect("temp dir");
        let snapshots = SnapshotManager::new(SnapshotConfig {
            enabled: true,
            directory: dir.path().to_path_buf(),
            ..SnapshotConfig::default()
        })
        .expect("snapshot manager");
        let mut live = live_loop(MemoryStore::new()).with_snapshots(snapshots);
        let (_tx, rx) = watch::channel(false);

        let stats = live.run(&mut moving_square(), rx).await;
        assert_eq!(stats.snapshots_saved, 1);
        let stills = std::fs::read_dir(dir.path())
            .expect("snapshot dir")
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "jpg"))
            .count();
        assert_eq!(stills, 1);
    }

    #[tokio::test]
    async fn bad_frames_and_gaps_do_not_stop_the_loop() {
        let store = MemoryStore::new();
        let mut live = live_loop(store);
        let wrong_size = Frame::from_luma(10, 10, vec![0; 100], at(1)).expect("valid frame");
        let mut source = ScriptedSource(
            vec![
                FrameResult::Frame(frame(0, None)),
                FrameResult::Frame(wrong_size),
                FrameResult::Gap,
                FrameResult::Frame(frame(0, None)),
                FrameResult::Frame(frame(2, None)),
            ]
            .into(),
        );
        let (_tx, rx) = watch::channel(false);

        let stats = live.run(&mut source, rx).await;
        assert_eq!(stats.frames_processed, 2);
        assert_eq!(stats.frames_rejected, 2);
        assert_eq!(stats.gaps, 1);
        assert_eq!(live.pipeline().gaps(), 1);
    }

    #[tokio::test]
    async fn shutdown_signal_stops_an_endless_source() {
        let store = MemoryStore::new();
        let mut live = live_loop(store);
        let mut source = EndlessSource(0);
        let (tx, rx) = watch::channel(false);

        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let _ = tx.send(true);
        });
        let stats = live.run(&mut source, rx).await;
        stopper.await.expect("stopper task");
        assert!(stats.frames_processed > 0);
    }
}
