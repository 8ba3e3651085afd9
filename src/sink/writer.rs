//! Output streams for recordings.
//!
//! A `WriterFactory` opens one `StreamWriter` per camera. The default
//! factory knows two layouts:
//!
//! - `MJPG`: every frame JPEG-encoded and appended (motion-JPEG stream)
//! - `RGB3`: raw packed RGB rows appended, no header
//!
//! Neither layout stores timing. `StreamSpec::fps` is the nominal rate a
//! player should assume; it is logged when a stream is created and is
//! available to factories whose container can record it.

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::frame::Frame;

const JPEG_QUALITY: u8 = 85;

/// Four-character codec identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FourCc([u8; 4]);

impl FourCc {
    pub const MJPG: FourCc = FourCc(*b"MJPG");
    pub const RGB3: FourCc = FourCc(*b"RGB3");

    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }
}

impl FromStr for FourCc {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let bytes: [u8; 4] = s
            .as_bytes()
            .try_into()
            .map_err(|_| anyhow!("four_cc must be exactly 4 characters, got {:?}", s))?;
        if !bytes.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
            return Err(anyhow!("four_cc must be printable ASCII, got {:?}", s));
        }
        Ok(FourCc(bytes))
    }
}

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Bytes are validated ASCII.
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

/// Parameters a stream is created with.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamSpec {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub four_cc: FourCc,
}

pub trait StreamWriter: Send {
    fn write(&mut self, frame: &Frame) -> Result<()>;

    /// Flush and close. Further calls are no-ops.
    fn finish(&mut self) -> Result<()>;
}

pub trait WriterFactory: Send {
    fn create(&self, path: &Path, spec: &StreamSpec) -> Result<Box<dyn StreamWriter>>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultWriterFactory;

impl DefaultWriterFactory {
    pub fn supports(four_cc: FourCc) -> bool {
        four_cc == FourCc::MJPG || four_cc == FourCc::RGB3
    }
}

impl WriterFactory for DefaultWriterFactory {
    fn create(&self, path: &Path, spec: &StreamSpec) -> Result<Box<dyn StreamWriter>> {
        let layout = match spec.four_cc {
            FourCc::MJPG => Layout::Jpeg,
            FourCc::RGB3 => Layout::Raw,
            other => return Err(anyhow!("unsupported four_cc {}", other)),
        };
        let file = File::create(path)
            .with_context(|| format!("failed to create video file {}", path.display()))?;
        Ok(Box::new(FileStreamWriter {
            path: path.to_path_buf(),
            out: Some(BufWriter::new(file)),
            layout,
        }))
    }
}

#[derive(Clone, Copy, Debug)]
enum Layout {
    Jpeg,
    Raw,
}

struct FileStreamWriter {
    path: PathBuf,
    out: Option<BufWriter<File>>,
    layout: Layout,
}

impl StreamWriter for FileStreamWriter {
    fn write(&mut self, frame: &Frame) -> Result<()> {
        let out = self
            .out
            .as_mut()
            .ok_or_else(|| anyhow!("{} is already closed", self.path.display()))?;
        frame.check_rgb_layout()?;
        match self.layout {
            Layout::Jpeg => JpegEncoder::new_with_quality(out, JPEG_QUALITY)
                .encode(
                    frame.image(),
                    frame.width,
                    frame.height,
                    ExtendedColorType::Rgb8,
                )
                .with_context(|| format!("encode {} into {}", frame, self.path.display())),
            Layout::Raw => out
                .write_all(frame.image())
                .with_context(|| format!("write {} into {}", frame, self.path.display())),
        }
    }

    fn finish(&mut self) -> Result<()> {
        let Some(mut out) = self.out.take() else {
            return Ok(());
        };
        out.flush()
            .with_context(|| format!("flush {}", self.path.display()))
    }
}
