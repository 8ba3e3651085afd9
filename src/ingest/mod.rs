//! Frame sources.
//!
//! This module provides the capture backends behind a `SourceHandle`:
//! - Synthetic streams (`stub://` descriptors) for tests and dry runs
//! - GStreamer (feature: capture-gstreamer) for RTSP/HTTP URIs and V4L2 devices
//!
//! A backend only knows how to open, read and close one stream. Reconnect
//! policy, backpressure and monitoring live in the capture worker.
//!
//! Every read takes a timeout so a wedged stream surfaces as
//! `SourceError::Stalled` instead of blocking its worker forever.

#[cfg(feature = "capture-gstreamer")]
mod gst_backend;
pub mod synthetic;

use anyhow::{anyhow, Result};
use std::time::Duration;
use thiserror::Error;

use crate::capture::SourceHandle;
use crate::registry::SourceInfo;

#[cfg(feature = "capture-gstreamer")]
pub use gst_backend::GstreamerSource;
pub use synthetic::{SyntheticConfig, SyntheticSource};

/// Decoded image as produced by a backend: packed RGB8 rows.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawImage {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl RawImage {
    pub fn rgb(data: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let expected = width as usize * height as usize * 3;
        if data.len() != expected {
            return Err(anyhow!(
                "RGB image {}x{} needs {} bytes, got {}",
                width,
                height,
                expected,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
        })
    }
}

/// Source-level failures. Recovered inside the capture worker.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to open {descriptor}: {reason}")]
    Open { descriptor: String, reason: String },
    #[error("read failed: {0}")]
    Read(String),
    #[error("no frame within {0:?}")]
    Stalled(Duration),
    #[error("source is not open")]
    NotOpen,
}

/// Open/read/close capability of one stream.
pub trait FrameSource: Send {
    fn open(&mut self) -> Result<(), SourceError>;

    /// Read the next frame, giving up after `timeout`.
    fn read_frame(&mut self, timeout: Duration) -> Result<RawImage, SourceError>;

    /// Release the stream. Must tolerate being called on a closed source.
    fn close(&mut self);
}

/// Pick a backend for a connection descriptor. The backend is not opened.
pub fn source_for(descriptor: &str) -> Result<Box<dyn FrameSource>> {
    if descriptor.starts_with(synthetic::SCHEME) {
        return Ok(Box::new(SyntheticSource::new(SyntheticConfig::parse(
            descriptor,
        )?)));
    }
    #[cfg(feature = "capture-gstreamer")]
    {
        Ok(Box::new(GstreamerSource::new(descriptor)))
    }
    #[cfg(not(feature = "capture-gstreamer"))]
    {
        Err(anyhow!(
            "descriptor {:?} requires the capture-gstreamer feature",
            descriptor
        ))
    }
}

/// Build one `SourceHandle` per registry entry.
pub fn open_handles(sources: &[SourceInfo]) -> Result<Vec<SourceHandle>> {
    sources
        .iter()
        .map(|info| {
            let backend = source_for(&info.descriptor)
                .map_err(|e| anyhow!("{}: {}", info, e))?;
            Ok(SourceHandle::new(info.clone(), backend))
        })
        .collect()
}
