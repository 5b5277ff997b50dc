//! rgbd_probe - inspect the color/depth stream a publisher is sending.
//!
//! Receives message pairs exactly as the bridge does (color, then depth),
//! decodes them, and prints their shapes. Optionally dumps the depth raster of
//! the last pair as CSV.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::{BufWriter, IsTerminal, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use xr_mapping_bridge::frame::write_depth_csv;
use xr_mapping_bridge::ingest::{open_transport, recv_pair, FrameDecoder, ImageDecoder, TransportConfig};
use xr_mapping_bridge::DepthImage;

#[path = "../ui.rs"]
mod ui;

const RECV_TIMEOUT: Duration = Duration::from_millis(200);

#[derive(Parser, Debug)]
#[command(name = "rgbd_probe", about = "Receive and inspect RGB-D frame pairs")]
struct Args {
    /// Frame publisher endpoint (tcp://, ipc:// or stub://)
    #[arg(long, env = "XR_BRIDGE_ENDPOINT", default_value = "tcp://localhost:5555")]
    endpoint: String,

    /// Stop after this many pairs (0 = until Ctrl-C)
    #[arg(long, default_value_t = 0)]
    frames: u64,

    /// Write the last depth raster here as CSV (e.g. depth_data_client.csv)
    #[arg(long, value_name = "PATH")]
    depth_csv: Option<PathBuf>,

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

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::set_handler(move || running.store(false, Ordering::SeqCst))
            .expect("error setting Ctrl-C handler");
    }

    let mut transport = {
        let mut stage = ui.stage("Connect to publisher");
        stage.detail(args.endpoint.clone());
        open_transport(&TransportConfig {
            endpoint: args.endpoint.clone(),
            ..TransportConfig::default()
        })?
    };
    let decoder = ImageDecoder;

    ui.note("receiving; press Ctrl-C to stop");
    let started = Instant::now();
    let mut pairs: u64 = 0;
    let mut failures: u64 = 0;
    let mut last_depth: Option<DepthImage> = None;

    while running.load(Ordering::SeqCst) && (args.frames == 0 || pairs < args.frames) {
        let received = recv_pair(
            transport.as_mut(),
            RECV_TIMEOUT,
            || running.load(Ordering::SeqCst),
            || {},
        )?;
        let Some((color, depth)) = received else {
            break;
        };

        match (decoder.decode_color(&color), decoder.decode_depth(&depth)) {
            (Ok(color), Ok(depth)) => {
                pairs += 1;
                println!(
                    "pair {}: color {}x{} ({} bytes), depth {}x{} ({} bytes)",
                    pairs,
                    color.width(),
                    color.height(),
                    color.as_raw().len(),
                    depth.width(),
                    depth.height(),
                    depth.as_raw().len() * 2
                );
                last_depth = Some(depth);
            }
            (Err(err), _) | (_, Err(err)) => {
                failures += 1;
                log::warn!("dropping pair: {:#}", err);
            }
        }
    }

    if let (Some(path), Some(depth)) = (&args.depth_csv, &last_depth) {
        let _stage = ui.stage("Write depth CSV");
        let file = std::fs::File::create(path)
            .with_context(|| format!("create {}", path.display()))?;
        let mut out = BufWriter::new(file);
        write_depth_csv(depth, &mut out)?;
        out.flush()?;
    }

    let elapsed = started.elapsed().as_secs_f64();
    println!(
        "rgbd_probe: {} pairs, {} dropped in {:.1}s ({:.1} fps)",
        pairs,
        failures,
        elapsed,
        if elapsed > 0.0 { pairs as f64 / elapsed } else { 0.0 }
    );
    Ok(())
}
