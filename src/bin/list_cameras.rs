//! list_cameras - print the active cameras of a registry, optionally probing
//! each one.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use cam_relay::{load_registry, source_for, RelayConfig};

#[derive(Parser, Debug)]
#[command(author, version, about = "List (and optionally probe) the active cameras")]
struct Args {
    /// Camera registry CSV; defaults to camera_info_file from the config.
    #[arg(long)]
    cameras: Option<PathBuf>,

    /// Open, read one frame from and close every camera.
    #[arg(long)]
    check: bool,

    /// Per-camera read timeout for --check, in milliseconds.
    #[arg(long, default_value = "2000")]
    timeout_ms: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let path = match args.cameras {
        Some(path) => path,
        None => RelayConfig::load()?.camera_info_file,
    };
    let sources = load_registry(&path)?;
    let timeout = Duration::from_millis(args.timeout_ms);

    let mut bad = 0;
    for source in &sources {
        if !args.check {
            println!("{}  {}", source, source.descriptor);
            continue;
        }
        match probe(&source.descriptor, timeout) {
            Ok((width, height)) => println!("{}  OK {}x{}", source, width, height),
            Err(e) => {
                bad += 1;
                println!("{}  BAD {:#}", source, e);
            }
        }
    }
    if bad > 0 {
        std::process::exit(1);
    }
    Ok(())
}

fn probe(descriptor: &str, timeout: Duration) -> Result<(u32, u32)> {
    let mut source = source_for(descriptor)?;
    source.open()?;
    let frame = source.read_frame(timeout);
    source.close();
    let image = frame?;
    Ok((image.width, image.height))
}
