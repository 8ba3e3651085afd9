//! GStreamer capture backend.
//!
//! Descriptors:
//! - URIs (`rtsp://`, `http://`, `file://`, ...) go through `uridecodebin`
//! - device paths (`/dev/video0`) and bare indices (`0`) go through `v4l2src`
//!
//! Frames are converted to packed RGB in the pipeline and pulled from an
//! appsink with a bounded wait, so a stalled stream is reported as
//! `SourceError::Stalled` and the capture worker reconnects.

use ::gstreamer as gst;
use ::gstreamer::prelude::*;
use ::gstreamer_app as gst_app;
use ::gstreamer_video as gst_video;
use std::time::Duration;

use super::{FrameSource, RawImage, SourceError};

pub struct GstreamerSource {
    descriptor: String,
    pipeline: Option<gst::Pipeline>,
    appsink: Option<gst_app::AppSink>,
}

impl GstreamerSource {
    pub fn new(descriptor: &str) -> Self {
        Self {
            descriptor: descriptor.to_string(),
            pipeline: None,
            appsink: None,
        }
    }

    fn pipeline_description(&self) -> String {
        let input = if self.descriptor.contains("://") {
            format!("uridecodebin uri={}", self.descriptor)
        } else if self.descriptor.chars().all(|c| c.is_ascii_digit()) {
            format!("v4l2src device=/dev/video{}", self.descriptor)
        } else {
            format!("v4l2src device={}", self.descriptor)
        };
        format!(
            "{input} ! videoconvert ! video/x-raw,format=RGB ! \
             appsink name=appsink sync=false max-buffers=1 drop=true"
        )
    }

    fn open_error(&self, reason: impl ToString) -> SourceError {
        SourceError::Open {
            descriptor: self.descriptor.clone(),
            reason: reason.to_string(),
        }
    }

    fn poll_bus(&self) -> Result<(), SourceError> {
        let Some(bus) = self.pipeline.as_ref().and_then(|p| p.bus()) else {
            return Ok(());
        };
        while let Some(message) = bus.pop() {
            use gst::MessageView;
            match message.view() {
                MessageView::Error(err) => {
                    return Err(SourceError::Read(format!(
                        "gstreamer error from {:?}: {}",
                        err.src().map(|s| s.path_string()),
                        err.error()
                    )));
                }
                MessageView::Eos(..) => {
                    return Err(SourceError::Read("end of stream".to_string()));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

impl FrameSource for GstreamerSource {
    fn open(&mut self) -> Result<(), SourceError> {
        gst::init().map_err(|e| self.open_error(e))?;

        let pipeline = gst::parse::launch(&self.pipeline_description())
            .map_err(|e| self.open_error(e))?
            .downcast::<gst::Pipeline>()
            .map_err(|_| self.open_error("capture pipeline is not a Pipeline"))?;
        let appsink = pipeline
            .by_name("appsink")
            .ok_or_else(|| self.open_error("appsink element missing from pipeline"))?
            .downcast::<gst_app::AppSink>()
            .map_err(|_| self.open_error("appsink element has unexpected type"))?;

        if let Err(e) = pipeline.set_state(gst::State::Playing) {
            let _ = pipeline.set_state(gst::State::Null);
            return Err(self.open_error(format!("{:?}", e)));
        }

        log::info!("GstreamerSource: connected to {}", self.descriptor);
        self.pipeline = Some(pipeline);
        self.appsink = Some(appsink);
        Ok(())
    }

    fn read_frame(&mut self, timeout: Duration) -> Result<RawImage, SourceError> {
        self.poll_bus()?;
        let appsink = self.appsink.as_ref().ok_or(SourceError::NotOpen)?;
        let sample = appsink
            .try_pull_sample(gst::ClockTime::from_mseconds(timeout.as_millis() as u64))
            .ok_or(SourceError::Stalled(timeout))?;
        sample_to_image(&sample)
    }

    fn close(&mut self) {
        self.appsink = None;
        if let Some(pipeline) = self.pipeline.take() {
            if let Err(e) = pipeline.set_state(gst::State::Null) {
                log::debug!("GstreamerSource: close {}: {:?}", self.descriptor, e);
            }
        }
    }
}

impl Drop for GstreamerSource {
    fn drop(&mut self) {
        self.close();
    }
}

fn sample_to_image(sample: &gst::Sample) -> Result<RawImage, SourceError> {
    let read_err = |what: &str| SourceError::Read(what.to_string());
    let buffer = sample.buffer().ok_or_else(|| read_err("sample missing buffer"))?;
    let caps = sample.caps().ok_or_else(|| read_err("sample missing caps"))?;
    let info = gst_video::VideoInfo::from_caps(caps)
        .map_err(|e| SourceError::Read(format!("parse caps as video info: {e}")))?;

    let width = info.width();
    let height = info.height();
    let row_bytes = width as usize * 3;
    let stride = info.stride()[0] as usize;

    let map = buffer
        .map_readable()
        .map_err(|_| read_err("buffer is not readable"))?;
    let data = map.as_slice();

    let pixels = if stride == row_bytes {
        data.get(..row_bytes * height as usize)
            .ok_or_else(|| read_err("buffer shorter than frame"))?
            .to_vec()
    } else {
        let mut pixels = Vec::with_capacity(row_bytes * height as usize);
        for row in 0..height as usize {
            let start = row * stride;
            pixels.extend_from_slice(
                data.get(start..start + row_bytes)
                    .ok_or_else(|| read_err("buffer row is out of bounds"))?,
            );
        }
        pixels
    };

    Ok(RawImage {
        data: pixels,
        width,
        height,
    })
}
