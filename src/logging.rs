//! Process-wide logger setup.
//!
//! Records are formatted `{thread}:{level} {message}`. Capture threads are
//! named after their camera, so the thread column says who logged.

use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::io::Write;

use crate::config::{LogFileMode, LogSettings};

const THREAD_COLUMN: usize = 22;

/// Install the global logger. `RUST_LOG`, when set, wins over the configured
/// level.
pub fn init(settings: &LogSettings) -> Result<()> {
    let default_filter = settings.level.to_string().to_lowercase();
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter));
    builder.format(|buf, record| {
        let thread = std::thread::current();
        writeln!(
            buf,
            "{:<width$}:{} {}",
            thread.name().unwrap_or("main"),
            record.level(),
            record.args(),
            width = THREAD_COLUMN
        )
    });

    if let Some(path) = &settings.file {
        let mut options = OpenOptions::new();
        options.create(true);
        match settings.mode {
            LogFileMode::Append => options.append(true),
            LogFileMode::Truncate => options.write(true).truncate(true),
        };
        let file = options
            .open(path)
            .with_context(|| format!("failed to open log file {}", path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }

    builder
        .try_init()
        .context("logger already initialised")
}
