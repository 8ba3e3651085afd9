//! Pipeline lifecycle: start every worker, stop them in order.
//!
//! Stop ordering:
//!
//! 1. cancel the stop token (workers and reconnect delays see it)
//! 2. wait for the capture workers, polling every `shutdown_poll`
//! 3. close the queue so nothing more can be inserted
//! 4. the dispatcher drains what is left, closes its sinks and exits
//!
//! Sinks live on the dispatcher thread for the whole run.

use anyhow::{anyhow, Result};
use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::capture::{CaptureSettings, CaptureStats, CaptureWorker, SourceHandle};
use crate::config::RelayConfig;
use crate::dispatch::{DispatchStats, Dispatcher};
use crate::frame::FrameQueue;
use crate::monitor::StatusMonitor;
use crate::registry::SourceInfo;
use crate::shutdown::StopToken;
use crate::sink::{
    DefaultWriterFactory, FrameSink, PreviewDisplay, RecordingSettings, RecordingSink,
};

#[derive(Clone, Debug)]
pub struct PipelineSettings {
    pub queue_capacity: usize,
    pub capture: CaptureSettings,
    /// Dispatcher wait on an empty queue.
    pub dispatch_poll: Duration,
    pub shutdown_poll: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from(&RelayConfig::default())
    }
}

impl From<&RelayConfig> for PipelineSettings {
    fn from(cfg: &RelayConfig) -> Self {
        Self {
            queue_capacity: cfg.camera_frames_que_size,
            capture: CaptureSettings {
                read_timeout: cfg.read_timeout,
                reconnect_delay: cfg.reconnect_delay,
                full_backoff: cfg.queue_poll,
                report_every: cfg.cam_monitor_frame_div,
            },
            dispatch_poll: cfg.queue_poll,
            shutdown_poll: cfg.shutdown_poll,
        }
    }
}

/// What a stopped pipeline did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub frames_dispatched: u64,
    pub per_source: BTreeMap<usize, u64>,
    pub sink_failures: BTreeMap<&'static str, u64>,
    pub captures: Vec<CaptureStats>,
    /// Largest queue length observed.
    pub queue_peak: usize,
}

impl ShutdownReport {
    fn new(dispatch: DispatchStats, captures: Vec<CaptureStats>, queue_peak: usize) -> Self {
        Self {
            frames_dispatched: dispatch.frames_dispatched,
            per_source: dispatch.per_source,
            sink_failures: dispatch.sink_failures,
            captures,
            queue_peak,
        }
    }
}

pub struct Pipeline {
    queue: Arc<FrameQueue>,
    stop: StopToken,
    shutdown_poll: Duration,
    workers: Vec<(String, JoinHandle<CaptureStats>)>,
    dispatcher: Option<JoinHandle<DispatchStats>>,
}

impl Pipeline {
    /// Spawn the dispatcher, then one capture worker per source.
    pub fn start(
        sources: Vec<SourceHandle>,
        sinks: Vec<Box<dyn FrameSink>>,
        monitor: Arc<StatusMonitor>,
        settings: PipelineSettings,
    ) -> Result<Self> {
        if sources.is_empty() {
            return Err(anyhow!("no active sources to capture from"));
        }
        let queue = Arc::new(FrameQueue::new(settings.queue_capacity)?);
        let stop = StopToken::new();

        let infos: Vec<SourceInfo> = sources.iter().map(|s| s.info().clone()).collect();
        monitor.initialize(&infos);

        let dispatcher = Dispatcher::new(
            Arc::clone(&queue),
            sinks,
            stop.clone(),
            settings.dispatch_poll,
        )
        .spawn()?;

        let mut pipeline = Self {
            queue,
            stop,
            shutdown_poll: settings.shutdown_poll,
            workers: Vec::with_capacity(sources.len()),
            dispatcher: Some(dispatcher),
        };

        for source in sources {
            let name = source.info().to_string();
            let worker = CaptureWorker::new(
                source,
                Arc::clone(&pipeline.queue),
                Arc::clone(&monitor),
                pipeline.stop.clone(),
                settings.capture.clone(),
            );
            match worker.spawn() {
                Ok(handle) => pipeline.workers.push((name, handle)),
                Err(e) => {
                    pipeline.stop();
                    return Err(e);
                }
            }
        }
        log::info!(
            "pipeline started: {} sources, queue capacity {}",
            pipeline.workers.len(),
            pipeline.queue.capacity()
        );
        Ok(pipeline)
    }

    pub fn stop_token(&self) -> StopToken {
        self.stop.clone()
    }

    pub fn queue(&self) -> &Arc<FrameQueue> {
        &self.queue
    }

    /// Block until something cancels the stop token.
    pub fn wait(&self) {
        self.stop.wait();
    }

    /// Stop everything and collect the counters. Returns `None` if the
    /// pipeline was already stopped.
    pub fn stop(&mut self) -> Option<ShutdownReport> {
        let dispatcher = self.dispatcher.take()?;
        if self.stop.cancel() {
            log::info!("stopping pipeline");
        }

        let mut captures = Vec::with_capacity(self.workers.len());
        let mut pending = std::mem::take(&mut self.workers);
        while !pending.is_empty() {
            let (finished, running): (Vec<_>, Vec<_>) =
                pending.into_iter().partition(|(_, h)| h.is_finished());
            for (name, handle) in finished {
                match handle.join() {
                    Ok(stats) => captures.push(stats),
                    Err(_) => log::error!("capture worker for {} panicked", name),
                }
            }
            pending = running;
            if !pending.is_empty() {
                log::info!("waiting for {} capture workers", pending.len());
                thread::sleep(self.shutdown_poll);
            }
        }
        captures.sort_by_key(|s| s.source_id);

        self.queue.close();
        let dispatch = match dispatcher.join() {
            Ok(stats) => stats,
            Err(_) => {
                log::error!("dispatcher panicked");
                DispatchStats::default()
            }
        };

        let report = ShutdownReport::new(dispatch, captures, self.queue.peak_len());
        log::info!(
            "pipeline stopped: {} frames dispatched, peak queue {}/{}",
            report.frames_dispatched,
            report.queue_peak,
            self.queue.capacity()
        );
        for stats in &report.captures {
            log::info!(
                "{}: captured {}, skipped {}, failed reads {}, lost {}",
                stats.source_name,
                stats.frames_captured,
                stats.reads_skipped,
                stats.read_failures,
                stats.frames_lost
            );
        }
        for (sink, failures) in &report.sink_failures {
            log::warn!("{} sink failed {} times", sink, failures);
        }
        Some(report)
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Sinks enabled by the config, in dispatch order: display, then recording.
pub fn build_sinks(cfg: &RelayConfig, quit: Arc<AtomicBool>) -> Vec<Box<dyn FrameSink>> {
    let mut sinks: Vec<Box<dyn FrameSink>> = Vec::new();
    if cfg.show_frames {
        sinks.push(Box::new(PreviewDisplay::new(&cfg.show_frames_folder, quit)));
    }
    if cfg.write_frames {
        let settings = RecordingSettings {
            folder: cfg.write_frames_folder.clone(),
            fps: cfg.write_frames_fps,
            four_cc: cfg.write_frames_four_cc,
            suffix: cfg.write_frames_suffix.clone(),
        };
        sinks.push(Box::new(RecordingSink::new(
            settings,
            Box::new(DefaultWriterFactory),
        )));
    }
    sinks
}
