//! cam-relay
//!
//! Ingests live frames from several independent, unreliable cameras at once,
//! buffers them through one bounded handoff point and fans them out to the
//! configured sinks (recording, live preview) while a status monitor reports
//! per-camera health.
//!
//! # Architecture
//!
//! ```text
//! source -> CaptureWorker (one thread per camera)
//!        -> FrameQueue (bounded, the only backpressure point)
//!        -> Dispatcher (single thread, serial fan-out)
//!        -> { PreviewDisplay, RecordingSink }
//! ```
//!
//! - Capture workers never block on a full queue: they skip the read and
//!   retry, so frames are lost under load rather than buffered.
//! - A failed read triggers a close / delay / reopen cycle that is retried
//!   forever; the delay is an interruptible wait on the [`StopToken`].
//! - The dispatcher isolates sink failures per sink and per frame.
//! - [`Pipeline::stop`] joins the workers, closes the queue, lets the
//!   dispatcher drain it and close its sinks, then joins the dispatcher.
//!
//! # Module Structure
//!
//! - `registry`: camera registry (`SourceInfo`) and its CSV loader
//! - `ingest`: `FrameSource` backends (synthetic `stub://`, GStreamer)
//! - `frame`: `Frame` and the bounded `FrameQueue`
//! - `capture`: `SourceHandle` and `CaptureWorker`
//! - `dispatch`: `Dispatcher`
//! - `sink`: `FrameSink` implementations and stream writers
//! - `monitor`: `StatusMonitor`
//! - `shutdown`: `StopToken`
//! - `pipeline`: wiring and the shutdown coordinator
//! - `config`, `logging`: ambient configuration and log setup

pub mod capture;
pub mod config;
pub mod dispatch;
pub mod frame;
pub mod ingest;
pub mod logging;
pub mod monitor;
pub mod pipeline;
pub mod registry;
pub mod shutdown;
pub mod sink;

pub use capture::{CaptureSettings, CaptureStats, CaptureWorker, Reconnect, SourceHandle, Step};
pub use config::{LogFileMode, LogSettings, RelayConfig};
pub use dispatch::{DispatchStats, Dispatcher};
pub use frame::{Frame, FrameQueue, Pop, PushError};
pub use ingest::{open_handles, source_for, FrameSource, RawImage, SourceError};
pub use monitor::{AnsiRender, LogRender, StatusMonitor, StatusRender};
pub use pipeline::{build_sinks, Pipeline, PipelineSettings, ShutdownReport};
pub use registry::{load_registry, parse_registry, SourceInfo};
pub use shutdown::StopToken;
pub use sink::{
    is_quit_key, spawn_quit_watcher, DefaultWriterFactory, FourCc, FrameSink, PreviewDisplay,
    RecordingSettings, RecordingSink, SinkFlow, StreamSpec, StreamWriter, WriterFactory,
};
