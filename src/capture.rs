//! Capture workers.
//!
//! One `CaptureWorker` per camera, each on its own thread. A worker keeps its
//! camera connected and feeds the shared `FrameQueue`:
//!
//! 1. If the queue is full the worker does not read at all; it backs off and
//!    re-checks the stop token. Frames the camera produces meanwhile are lost.
//! 2. Otherwise it reads one frame. Success pushes a `Frame`, resets the
//!    camera's `reopen_attempts` and periodically reports progress to the
//!    status monitor. Failure reports the error and runs one reconnect cycle
//!    (close, delay, reopen, `reopen_attempts += 1`).
//!
//! Retries are unbounded: a worker never gives up on its camera. The
//! reconnect delay is a wait on the stop token, so shutdown interrupts it.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::frame::{Frame, FrameQueue, PushError};
use crate::ingest::{FrameSource, RawImage, SourceError};
use crate::monitor::StatusMonitor;
use crate::registry::SourceInfo;
use crate::shutdown::StopToken;

// ----------------------------------------------------------------------------
// SourceHandle
// ----------------------------------------------------------------------------

/// One camera: registry info, its backend and liveness bookkeeping.
pub struct SourceHandle {
    info: SourceInfo,
    backend: Box<dyn FrameSource>,
    is_open: bool,
    reopen_attempts: u32,
}

/// Result of one reconnect cycle.
#[derive(Debug)]
pub enum Reconnect {
    Opened,
    Failed(SourceError),
    /// The stop token fired during the delay; the source stays closed.
    Cancelled,
}

impl SourceHandle {
    pub fn new(info: SourceInfo, backend: Box<dyn FrameSource>) -> Self {
        Self {
            info,
            backend,
            is_open: false,
            reopen_attempts: 0,
        }
    }

    pub fn info(&self) -> &SourceInfo {
        &self.info
    }

    pub fn is_open(&self) -> bool {
        self.is_open
    }

    /// Reconnect cycles completed since the last successful read.
    pub fn reopen_attempts(&self) -> u32 {
        self.reopen_attempts
    }

    pub fn open(&mut self) -> Result<(), SourceError> {
        self.backend.open()?;
        self.is_open = true;
        Ok(())
    }

    pub fn read(&mut self, timeout: Duration) -> Result<RawImage, SourceError> {
        if !self.is_open {
            return Err(SourceError::NotOpen);
        }
        let RawImage {
            data,
            width,
            height,
        } = self.backend.read_frame(timeout)?;
        // Everything downstream assumes packed RGB8.
        let image = RawImage::rgb(data, width, height)
            .map_err(|e| SourceError::Read(format!("malformed frame: {e}")))?;
        self.reopen_attempts = 0;
        Ok(image)
    }

    pub fn close(&mut self) {
        if self.is_open {
            self.backend.close();
            self.is_open = false;
        }
    }

    /// Close, wait `delay`, reopen. Counts as one attempt whatever the
    /// outcome of the reopen, unless the stop token interrupts the delay.
    pub fn reconnect(&mut self, delay: Duration, stop: &StopToken) -> Reconnect {
        self.close();
        if stop.wait_timeout(delay) {
            return Reconnect::Cancelled;
        }
        let outcome = match self.open() {
            Ok(()) => Reconnect::Opened,
            Err(e) => Reconnect::Failed(e),
        };
        self.reopen_attempts += 1;
        outcome
    }
}

// ----------------------------------------------------------------------------
// CaptureWorker
// ----------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct CaptureSettings {
    /// Upper bound on one read call.
    pub read_timeout: Duration,
    /// Delay inside a reconnect cycle.
    pub reconnect_delay: Duration,
    /// Backoff while the queue is full.
    pub full_backoff: Duration,
    /// Report progress to the monitor every N captured frames.
    pub report_every: u64,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(2),
            reconnect_delay: Duration::from_secs(1),
            full_backoff: Duration::from_millis(20),
            report_every: 100,
        }
    }
}

/// Per-worker counters, returned when the worker exits.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub source_id: usize,
    pub source_name: String,
    pub frames_captured: u64,
    /// Iterations skipped because the queue was full.
    pub reads_skipped: u64,
    pub read_failures: u64,
    /// Frames read but rejected by the queue (filled by another producer
    /// between the fullness check and the insert, or closed).
    pub frames_lost: u64,
}

/// What one loop iteration did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    Captured,
    Throttled,
    Failed,
    Stopped,
}

pub struct CaptureWorker {
    source: SourceHandle,
    queue: Arc<FrameQueue>,
    monitor: Arc<StatusMonitor>,
    stop: StopToken,
    settings: CaptureSettings,
    stats: CaptureStats,
}

impl CaptureWorker {
    pub fn new(
        source: SourceHandle,
        queue: Arc<FrameQueue>,
        monitor: Arc<StatusMonitor>,
        stop: StopToken,
        settings: CaptureSettings,
    ) -> Self {
        let stats = CaptureStats {
            source_id: source.info.id,
            source_name: source.info.name.clone(),
            ..CaptureStats::default()
        };
        Self {
            source,
            queue,
            monitor,
            stop,
            settings,
            stats,
        }
    }

    pub fn source(&self) -> &SourceHandle {
        &self.source
    }

    pub fn stats(&self) -> &CaptureStats {
        &self.stats
    }

    /// Run on a dedicated thread named `capture-<camera name>`.
    pub fn spawn(self) -> Result<JoinHandle<CaptureStats>> {
        let name = format!("capture-{}", self.source.info.name);
        thread::Builder::new()
            .name(name.clone())
            .spawn(move || self.run())
            .with_context(|| format!("failed to spawn {name}"))
    }

    /// Loop until the stop token fires, then close the camera.
    pub fn run(mut self) -> CaptureStats {
        if self.connect() {
            while self.step() != Step::Stopped {}
        }
        self.source.close();
        log::debug!("{} worker stopped", self.source.info);
        self.stats
    }

    /// Initial connection. Failed opens are retried like reconnect cycles.
    /// Returns `false` if the stop token fired first.
    pub fn connect(&mut self) -> bool {
        let id = self.source.info.id;
        self.monitor.report(id, "waiting for connect ...");
        let mut result = self.source.open();
        loop {
            match result {
                Ok(()) => {
                    self.monitor.report(id, "connected");
                    log::info!("{} connected", self.source.info);
                    return true;
                }
                Err(e) => {
                    log::warn!("{} open failed: {}", self.source.info, e);
                    self.report_failure();
                }
            }
            result = match self
                .source
                .reconnect(self.settings.reconnect_delay, &self.stop)
            {
                Reconnect::Opened => Ok(()),
                Reconnect::Failed(e) => Err(e),
                Reconnect::Cancelled => return false,
            };
        }
    }

    /// One loop iteration.
    pub fn step(&mut self) -> Step {
        if self.stop.is_stopped() {
            return Step::Stopped;
        }

        if self.queue.is_full() {
            self.stats.reads_skipped += 1;
            if self.stop.wait_timeout(self.settings.full_backoff) {
                return Step::Stopped;
            }
            return Step::Throttled;
        }

        match self.source.read(self.settings.read_timeout) {
            Ok(image) => {
                let info = &self.source.info;
                let frame = Frame::new(info.id, info.name.clone(), image);
                self.enqueue(frame)
            }
            Err(e) => {
                self.stats.read_failures += 1;
                log::warn!("read error in {}: {}", self.source.info, e);
                self.report_failure();
                match self
                    .source
                    .reconnect(self.settings.reconnect_delay, &self.stop)
                {
                    Reconnect::Opened => {
                        log::info!("{} reopened", self.source.info);
                        Step::Failed
                    }
                    Reconnect::Failed(e) => {
                        log::warn!("{} reopen failed: {}", self.source.info, e);
                        Step::Failed
                    }
                    Reconnect::Cancelled => Step::Stopped,
                }
            }
        }
    }

    fn enqueue(&mut self, frame: Frame) -> Step {
        let label = frame.to_string();
        match self.queue.try_push(frame) {
            Ok(()) => {
                self.stats.frames_captured += 1;
                log::debug!("put {}. qsize={}", label, self.queue.len());
                let count = self.stats.frames_captured;
                if count % self.settings.report_every.max(1) == 0 {
                    self.monitor
                        .report(self.source.info.id, &format!("frames processed: {count}"));
                }
                Step::Captured
            }
            Err(PushError::Full(_)) => {
                self.stats.frames_lost += 1;
                log::debug!("queue full, {} lost", label);
                Step::Captured
            }
            Err(PushError::Closed(_)) => {
                self.stats.frames_lost += 1;
                Step::Stopped
            }
        }
    }

    fn report_failure(&self) {
        self.monitor.report(
            self.source.info.id,
            &format!(
                "Error. Failed attempts to reopen: {}",
                self.source.reopen_attempts
            ),
        );
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
