//! cam_relay - capture every active camera and relay frames to the sinks.
//!
//! Runs until Ctrl-C, or until the operator types `q` while the preview
//! display is enabled. Either way the pipeline goes through the same ordered
//! stop: workers first, then the dispatcher drains the queue and closes the
//! recordings.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use cam_relay::{
    build_sinks, load_registry, logging, open_handles, spawn_quit_watcher, Pipeline,
    PipelineSettings, RelayConfig, StatusMonitor,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Relay frames from many cameras to preview and recording sinks")]
struct Args {
    /// Config file (JSON, or TOML with a .toml extension).
    #[arg(long, env = "CAM_RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Camera registry CSV; overrides camera_info_file.
    #[arg(long)]
    cameras: Option<PathBuf>,

    /// Publish live preview snapshots and watch stdin for the quit key.
    #[arg(long)]
    show: bool,

    /// Do not record.
    #[arg(long)]
    no_write: bool,

    /// Do not draw the per-camera status block.
    #[arg(long)]
    no_monitor: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut cfg = match &args.config {
        Some(path) => RelayConfig::from_path(path)?,
        None => RelayConfig::load()?,
    };
    if let Some(cameras) = args.cameras {
        cfg.camera_info_file = cameras;
    }
    cfg.show_frames |= args.show;
    cfg.write_frames &= !args.no_write;
    cfg.cam_monitor &= !args.no_monitor;

    logging::init(&cfg.log)?;

    let sources = load_registry(&cfg.camera_info_file)?;
    if sources.is_empty() {
        return Err(anyhow!(
            "no active cameras in {}",
            cfg.camera_info_file.display()
        ));
    }
    for source in &sources {
        log::info!("{} -> {}", source, source.descriptor);
    }
    let handles = open_handles(&sources)?;

    let quit = Arc::new(AtomicBool::new(false));
    if cfg.show_frames {
        spawn_quit_watcher(Arc::clone(&quit)).context("failed to watch stdin")?;
        log::info!(
            "preview in {}; type q to quit",
            cfg.show_frames_folder
        );
    }
    if !cfg.write_frames && !cfg.show_frames {
        log::warn!("no sink enabled; frames are captured and discarded");
    }

    let monitor = Arc::new(StatusMonitor::for_terminal(cfg.cam_monitor));
    let sinks = build_sinks(&cfg, quit);
    let mut pipeline = Pipeline::start(handles, sinks, monitor, PipelineSettings::from(&cfg))?;

    let stop = pipeline.stop_token();
    ctrlc::set_handler(move || {
        stop.cancel();
    })
    .context("error setting Ctrl-C handler")?;

    log::info!("cam_relay running; Ctrl-C to stop");
    pipeline.wait();
    log::info!("shutdown requested");
    if let Some(report) = pipeline.stop() {
        log::info!(
            "{} frames relayed from {} cameras",
            report.frames_dispatched,
            report.captures.len()
        );
    }
    Ok(())
}
