//! xr_bridge - live RGB-D mapping presented on a stereo headset
//!
//! This daemon:
//! 1. Ingests color/depth frames from the configured transport into the tracker
//! 2. Opens a compositor session and registers the headset view camera
//! 3. Renders the map from the headset pose every displayed frame
//! 4. On exit, releases compositor handles in order and joins ingest
//! 5. Writes TrackingTime.txt, the camera trajectory and a preview snapshot

use anyhow::{Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;

use xr_mapping_bridge::{
    ingest::{open_transport, ImageDecoder, IngestPipeline, TrackingEngine},
    synthetic::{MemoryUploader, SyntheticCompositor, SyntheticCompositorConfig, SyntheticMapper, SyntheticTracker},
    xr::{CtrlcInput, RenderTargets, XrApp},
    BridgeConfig, MirrorCanvas, PreviewSurface,
};

#[path = "../ui.rs"]
mod ui;

const PREVIEW_FILE: &str = "preview.png";

#[derive(Parser, Debug)]
#[command(
    name = "xr_bridge",
    about = "Feed RGB-D frames to the mapper and render it on a headset"
)]
struct Args {
    /// JSON configuration file
    #[arg(long, env = "XR_BRIDGE_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Frame publisher endpoint (tcp://, ipc:// or stub://)
    #[arg(long, value_name = "URL")]
    endpoint: Option<String>,

    /// Frames the headset session runs before it ends itself (0 = until Ctrl-C)
    #[arg(long, default_value_t = 300)]
    frames: u64,

    /// Per-eye render width
    #[arg(long, default_value_t = 640)]
    view_width: u32,

    /// Per-eye render height
    #[arg(long, default_value_t = 480)]
    view_height: u32,

    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = ui::Ui::from_args(Some(&args.ui), is_tty, !stdout_is_tty)?;

    let cfg = {
        let mut stage = ui.stage("Load configuration");
        let mut cfg = BridgeConfig::load_from(args.config.as_deref())?;
        if let Some(endpoint) = &args.endpoint {
            cfg.ingest.endpoint = endpoint.clone();
        }
        stage.detail(cfg.ingest.endpoint.clone());
        cfg
    };

    let tracker = Arc::new(SyntheticTracker::new(cfg.ingest.image_scale));
    let ingest = {
        let _stage = ui.stage("Start frame ingest");
        let transport = open_transport(&cfg.transport_config())?;
        IngestPipeline::spawn(
            transport,
            Box::new(ImageDecoder),
            tracker.clone(),
            cfg.ingest_config(),
        )?
    };

    let mut mapper = SyntheticMapper::with_tracker(tracker.clone());
    let compositor = SyntheticCompositor::new(SyntheticCompositorConfig {
        width: args.view_width,
        height: args.view_height,
        frames_before_exit: (args.frames > 0).then_some(args.frames),
        frame_pacing: std::time::Duration::from_millis(11),
        ..SyntheticCompositorConfig::default()
    });

    let app = {
        let _stage = ui.stage("Open compositor session");
        XrApp::initialize(compositor, cfg.xr_app_config(), &mut mapper)
    };
    let mut app = match app {
        Ok(app) => app,
        Err(err) => {
            tracker.shutdown();
            return settle(Err(err), ingest.stop().map(drop));
        }
    };

    let mut input = CtrlcInput::install()?;
    let mut uploader = MemoryUploader::new();
    let mut canvas = cfg.output.preview.then(|| {
        let first = &app.resources().swapchains[0];
        MirrorCanvas::new(first.width, first.height)
    });

    ui.note("session running; press Ctrl-C to exit");
    let outcome = {
        let mut targets = RenderTargets {
            mapper: &mut mapper,
            uploader: &mut uploader,
            preview: canvas.as_mut().map(|c| c as &mut dyn PreviewSurface),
        };
        app.run(&mut targets, &mut input)
    };

    let wind_down = (|| -> Result<()> {
        let mut stage = ui.stage("Stop frame ingest");
        tracker.shutdown();
        let report = ingest.stop()?;
        stage.detail(format!(
            "{} pairs tracked, {} evicted",
            report.stats.tracked, report.stats.evicted
        ));
        report.latency.save(&cfg.output.dir)?;
        drop(stage);
        tracker
            .save_trajectories(&cfg.output.dir)
            .context("save trajectories")?;
        if let Some(canvas) = &canvas {
            canvas.save(&cfg.output.dir.join(PREVIEW_FILE))?;
        }
        Ok(())
    })();

    let summary = settle(outcome, wind_down)?;
    println!(
        "xr_bridge: {} frame cycles, {} layers submitted, {} uploads, ended in {:?}",
        summary.cycles.cycles,
        summary.cycles.submitted,
        uploader.uploads(),
        summary.final_state
    );
    Ok(())
}

/// A fatal session error wins over a failure while winding down, which is
/// only logged.
fn settle<T>(outcome: Result<T>, wind_down: Result<()>) -> Result<T> {
    match (outcome, wind_down) {
        (Ok(summary), wind_down) => wind_down.map(|()| summary),
        (Err(err), Err(secondary)) => {
            log::error!("wind-down after session failure also failed: {:#}", secondary);
            Err(err)
        }
        (Err(err), Ok(())) => Err(err),
    }
}
