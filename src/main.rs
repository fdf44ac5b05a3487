// Replays a directory of still frames through the live loop, then prints the day's summary and
// writes its heatmap next to the current working directory.

use anyhow::{Context, Result, bail};
use chrono::{Local, NaiveDateTime, TimeDelta};
use nocturnal_eye::analytics::BehavioralAnalytics;
use nocturnal_eye::config::PipelineConfig;
use nocturnal_eye::core_modules::frame::Frame;
use nocturnal_eye::heatmap::HeatmapRenderer;
use nocturnal_eye::pipeline::VisionPipeline;
use nocturnal_eye::runtime::{FrameResult, FrameSource, LiveLoop};
use nocturnal_eye::snapshot::SnapshotManager;
use nocturnal_eye::store::{EventStore, MemoryStore, TimeRange};
use std::env;
use std::path::{Path, PathBuf};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const USAGE: &str = "Usage: nocturnal_eye --frames <dir> [--config <config.json>]";

/// Serves image files from a directory in file-name order. Timestamps start at launch time and
/// advance by one frame period per file.
struct DirectorySource {
    files: Vec<PathBuf>,
    next: usize,
    start: NaiveDateTime,
    period: TimeDelta,
}

impl DirectorySource {
    fn open(dir: &Path, fps: f64) -> Result<Self> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
            .with_context(|| format!("failed to read frame directory {}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| matches!(ext.to_ascii_lowercase().as_str(), "png" | "jpg" | "jpeg" | "bmp"))
                    .unwrap_or(false)
            })
            .collect();
        files.sort();
        if files.is_empty() {
            bail!("no image frames found in {}", dir.display());
        }
        Ok(Self {
            files,
            next: 0,
            start: Local::now().naive_local(),
            period: TimeDelta::milliseconds((1000.0 / fps).round() as i64),
        })
    }
}

impl FrameSource for DirectorySource {
    fn next_frame(&mut self) -> FrameResult {
        let Some(path) = self.files.get(self.next) else {
            return FrameResult::EndOfStream;
        };
        let timestamp = self.start + self.period * self.next as i32;
        self.next += 1;

        let decoded = image::open(path)
            .map_err(anyhow::Error::from)
            .and_then(|img| Frame::from_image(img, timestamp).map_err(anyhow::Error::from));
        match decoded {
            Ok(frame) => FrameResult::Frame(frame),
            Err(e) => {
                // An unreadable file is a hole in the stream.
                warn!(path = %path.display(), error = %e, "failed to decode frame");
                FrameResult::Gap
            }
        }
    }
}

fn init_tracing() {
    let use_json = env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let mut env_filter = EnvFilter::from_default_env();
    if let Ok(directive) = "nocturnal_eye=info".parse() {
        env_filter = env_filter.add_directive(directive);
    }

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(true).with_target(true))
            .with(env_filter)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    // --- 1. Argument Parsing ---
    let args: Vec<String> = env::args().skip(1).collect();
    let mut config_path = None;
    let mut frames_dir = None;
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => config_path = iter.next().map(PathBuf::from),
            "--frames" => frames_dir = iter.next().map(PathBuf::from),
            other => bail!("unexpected argument {other:?}\n{USAGE}"),
        }
    }
    let Some(frames_dir) = frames_dir else {
        bail!("{USAGE}");
    };

    // --- 2. Configuration ---
    let config = match &config_path {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("invalid configuration {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    // --- 3. Pipeline & Storage ---
    let store = MemoryStore::new();
    let pipeline = VisionPipeline::new(&config).context("failed to build vision pipeline")?;
    let mut source = DirectorySource::open(&frames_dir, config.runtime.fps_target)?;
    let mut live = LiveLoop::new(pipeline, store.clone(), &config.runtime);
    if config.snapshots.enabled {
        let snapshots = SnapshotManager::new(config.snapshots.clone()).context("failed to prepare snapshot directory")?;
        live = live.with_snapshots(snapshots);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(true);
        }
    });

    // --- 4. Live Loop ---
    let stats = live.run(&mut source, shutdown_rx).await;
    info!(
        frames = stats.frames_processed,
        rejected = stats.frames_rejected,
        published = stats.records_published,
        snapshots = stats.snapshots_saved,
        "replay finished"
    );

    // --- 5. Reporting ---
    let date = store
        .statistics()?
        .last_event
        .map(|ts| ts.date())
        .unwrap_or_else(|| Local::now().date_naive());

    let analytics = BehavioralAnalytics::new(store.clone(), &config)?;
    let summary = analytics.daily_summary(date)?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    println!("{}", serde_json::to_string_pretty(&analytics.zone_breakdown(&TimeRange::day(date))?)?);

    let renderer = HeatmapRenderer::new(config.heatmap.clone(), config.frame_width, config.frame_height);
    let heatmap = renderer.render_from_store(&store, &TimeRange::day(date))?;
    let output = PathBuf::from(format!("heatmap_{date}.png"));
    std::fs::write(&output, heatmap.to_png()?)
        .with_context(|| format!("failed to write {}", output.display()))?;
    info!(path = %output.display(), points = heatmap.point_count, "heatmap written");

    Ok(())
}
