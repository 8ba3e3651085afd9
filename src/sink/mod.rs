//! Frame sinks.
//!
//! Sinks are driven by the single dispatcher thread, one frame at a time, in
//! a fixed order (display first, then recording). Because only the
//! dispatcher touches them, sinks hold plain mutable state without locking.
//!
//! - `PreviewDisplay`: latest frame per camera as a JPEG snapshot, plus the
//!   operator quit key
//! - `RecordingSink`: one output stream per camera, opened lazily

pub mod display;
pub mod file;
pub mod writer;

use anyhow::Result;

use crate::frame::Frame;

pub use display::{is_quit_key, spawn_quit_watcher, PreviewDisplay};
pub use file::{RecordingSettings, RecordingSink};
pub use writer::{DefaultWriterFactory, FourCc, StreamSpec, StreamWriter, WriterFactory};

/// What the dispatcher should do after a sink handled a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SinkFlow {
    Continue,
    /// The sink asks for an orderly shutdown (e.g. the operator pressed quit).
    StopRequested,
}

pub trait FrameSink: Send {
    /// Short name used in logs and failure counters.
    fn name(&self) -> &'static str;

    fn handle(&mut self, frame: &Frame) -> Result<SinkFlow>;

    /// Release every resource. Called once at shutdown; a second call must
    /// be a no-op.
    fn close(&mut self) -> Result<()>;
}
