use anyhow::{Context as AnyhowContext, Result};
use clap::Parser;
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};

use indicatif::ProgressStyle;
use tracing::{info, info_span, Span};
use tracing_indicatif::span_ext::IndicatifSpanExt;
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use hybrid_tracker_rust::config::EngineConfig;
use hybrid_tracker_rust::my_types::*;
use hybrid_tracker_rust::point_tracker::{HybridPointTracker, PointTrackerConfig};
use hybrid_tracker_rust::simulation::SyntheticScene;

#[derive(Parser)]
pub struct Args {
    /// number of synthetic frames to track
    #[clap(long, default_value = "200")]
    pub frames: usize,
    #[clap(long, default_value = "320")]
    pub width: usize,
    #[clap(long, default_value = "240")]
    pub height: usize,
    /// pyramid levels including the full resolution image
    #[clap(long, default_value = "3")]
    pub levels: usize,
    /// distance between blobs of the synthetic scene
    #[clap(long, default_value = "48")]
    pub spacing: f64,
    /// write one JSON object per frame to this file
    #[clap(long)]
    pub report: Option<String>,
    /// read the engine config from a JSON file instead of the command line
    #[clap(long)]
    pub engine_config: Option<String>,
    #[clap(flatten)]
    pub config: EngineConfig,
}

#[derive(Serialize)]
struct FrameReport {
    frame_id: FrameId,
    active: usize,
    inactive: usize,
    spawned: usize,
    dropped: usize,
    total_tracks: u64,
    /// mean distance of the active tracks to the nearest visible blob
    mean_error: Option<f64>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // setup logging
    let indicatif_layer = IndicatifLayer::new();
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(indicatif_layer.get_stdout_writer()))
        .with(indicatif_layer)
        .init();

    let engine_config = match &args.engine_config {
        Some(path) => {
            let file = File::open(path).with_context(|| format!("cannot open {}", path))?;
            serde_json::from_reader(file).with_context(|| format!("cannot parse {}", path))?
        }
        None => args.config.clone(),
    };
    info!(?engine_config, "engine config");

    let mut tracker = HybridPointTracker::new(&PointTrackerConfig {
        levels: args.levels,
        engine: engine_config,
        ..PointTrackerConfig::default()
    })?;
    let scene = SyntheticScene::random(args.width, args.height, args.spacing, 3, 6, 0);

    let mut report = match &args.report {
        Some(path) => Some(BufWriter::new(
            File::create(path).with_context(|| format!("cannot create {}", path))?,
        )),
        None => None,
    };

    let header_span = info_span!("header");
    header_span.pb_set_style(&ProgressStyle::default_bar());
    header_span.pb_set_length(args.frames as u64);
    let header_span_enter = header_span.enter();

    let mut errors = vec![];
    for frame in 0..args.frames {
        let image = scene.render(frame);
        tracker.process(&image)?;
        tracker.spawn_tracks();

        let engine = tracker.engine();
        errors.clear();
        errors.extend(
            engine
                .tracks(engine.tracks_active())
                .filter_map(|t| scene.nearest_blob(t.pixel, frame))
                .map(|(_, distance)| distance),
        );
        let line = FrameReport {
            frame_id: engine.frame_id(),
            active: engine.tracks_active().len(),
            inactive: engine.tracks_inactive().len(),
            spawned: engine.tracks_spawned().len(),
            dropped: engine.tracks_dropped().len(),
            total_tracks: engine.total_tracks_created(),
            mean_error: if errors.is_empty() {
                None
            } else {
                Some(errors.iter().sum::<f64>() / errors.len() as f64)
            },
        };
        if let Some(writer) = report.as_mut() {
            serde_json::to_writer(&mut *writer, &line)?;
            writeln!(writer)?;
        }
        Span::current().pb_inc(1);
    }

    std::mem::drop(header_span_enter);
    std::mem::drop(header_span);

    if let Some(mut writer) = report {
        writer.flush()?;
    }
    let engine = tracker.engine();
    info!(
        frames = args.frames,
        total_tracks = engine.total_tracks_created(),
        active = engine.tracks_active().len(),
        inactive = engine.tracks_inactive().len(),
        "done"
    );

    Ok(())
}
