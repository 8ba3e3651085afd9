//! Live preview display.
//!
//! The latest frame of each camera is published as `{folder}{name}.jpg`,
//! replaced atomically (write to a temporary file, then rename) so a viewer
//! polling the folder never sees a half-written image.
//!
//! The display also carries the operator quit key. A stdin watcher started
//! with `spawn_quit_watcher` raises a shared flag; the next frame handled
//! returns `SinkFlow::StopRequested`.

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufRead, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use super::{FrameSink, SinkFlow};
use crate::frame::Frame;

const PREVIEW_QUALITY: u8 = 75;

pub struct PreviewDisplay {
    folder: PathBuf,
    quit: Arc<AtomicBool>,
    published: HashMap<usize, PathBuf>,
    quit_reported: bool,
}

impl PreviewDisplay {
    pub fn new(folder: impl Into<PathBuf>, quit: Arc<AtomicBool>) -> Self {
        Self {
            folder: folder.into(),
            quit,
            published: HashMap::new(),
            quit_reported: false,
        }
    }

    pub fn snapshot_path(&self, source_name: &str) -> PathBuf {
        let name: String = source_name
            .chars()
            .map(|c| if std::path::is_separator(c) { '_' } else { c })
            .collect();
        self.folder.join(format!("{name}.jpg"))
    }

    fn publish(&self, frame: &Frame, path: &Path) -> Result<()> {
        frame.check_rgb_layout()?;
        let tmp = path.with_extension("jpg.tmp");
        let file =
            File::create(&tmp).with_context(|| format!("failed to create {}", tmp.display()))?;
        let mut out = BufWriter::new(file);
        JpegEncoder::new_with_quality(&mut out, PREVIEW_QUALITY)
            .encode(
                frame.image(),
                frame.width,
                frame.height,
                ExtendedColorType::Rgb8,
            )
            .with_context(|| format!("encode preview of {}", frame))?;
        out.flush()?;
        drop(out);
        fs::rename(&tmp, path)
            .with_context(|| format!("failed to publish {}", path.display()))?;
        Ok(())
    }
}

impl FrameSink for PreviewDisplay {
    fn name(&self) -> &'static str {
        "display"
    }

    fn handle(&mut self, frame: &Frame) -> Result<SinkFlow> {
        if self.quit.load(Ordering::SeqCst) {
            if !self.quit_reported {
                self.quit_reported = true;
                log::warn!("cancelled by user");
            }
            return Ok(SinkFlow::StopRequested);
        }

        if self.published.is_empty() {
            fs::create_dir_all(&self.folder)
                .with_context(|| format!("failed to create {}", self.folder.display()))?;
        }
        let path = self.snapshot_path(&frame.source_name);
        self.publish(frame, &path)?;
        self.published.insert(frame.source_id, path);
        Ok(SinkFlow::Continue)
    }

    /// Removes the published snapshots.
    fn close(&mut self) -> Result<()> {
        for (_, path) in self.published.drain() {
            if let Err(e) = fs::remove_file(&path) {
                log::debug!("preview {} not removed: {}", path.display(), e);
            }
        }
        Ok(())
    }
}

/// `q`, `Q` or ESC.
pub fn is_quit_key(line: &str) -> bool {
    matches!(line.trim(), "q" | "Q") || line.contains('\x1b')
}

/// Watch stdin for the quit key and raise `flag` when it is typed.
///
/// The thread exits when the key is seen or stdin reaches end of file.
pub fn spawn_quit_watcher(flag: Arc<AtomicBool>) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("quit-key".to_string())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else {
                    break;
                };
                if is_quit_key(&line) {
                    flag.store(true, Ordering::SeqCst);
                    break;
                }
            }
        })
}
