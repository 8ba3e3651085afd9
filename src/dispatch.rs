//! Dispatcher: the single consumer of the frame queue.
//!
//! Frames are taken oldest first and handed to every sink in order, one frame
//! at a time. A failing sink is logged and counted; the frame still goes to
//! the remaining sinks and the loop keeps running.
//!
//! The loop ends once the queue is closed and drained. Sinks are closed on
//! the dispatcher thread before it returns, so they never leave it.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::frame::{Frame, FrameQueue, Pop};
use crate::shutdown::StopToken;
use crate::sink::{FrameSink, SinkFlow};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub frames_dispatched: u64,
    /// Frames dispatched per source id.
    pub per_source: BTreeMap<usize, u64>,
    /// Failed `handle` calls per sink name.
    pub sink_failures: BTreeMap<&'static str, u64>,
}

pub struct Dispatcher {
    queue: Arc<FrameQueue>,
    sinks: Vec<Box<dyn FrameSink>>,
    stop: StopToken,
    poll: Duration,
    stats: DispatchStats,
}

impl Dispatcher {
    pub fn new(
        queue: Arc<FrameQueue>,
        sinks: Vec<Box<dyn FrameSink>>,
        stop: StopToken,
        poll: Duration,
    ) -> Self {
        Self {
            queue,
            sinks,
            stop,
            poll,
            stats: DispatchStats::default(),
        }
    }

    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    pub fn spawn(self) -> Result<JoinHandle<DispatchStats>> {
        thread::Builder::new()
            .name("dispatcher".to_string())
            .spawn(move || self.run())
            .context("failed to spawn dispatcher")
    }

    pub fn run(mut self) -> DispatchStats {
        loop {
            match self.queue.pop_timeout(self.poll) {
                Pop::Frame(frame) => self.dispatch(frame),
                Pop::Timeout => continue,
                Pop::Closed => break,
            }
        }
        self.close_sinks();
        log::debug!(
            "dispatcher finished after {} frames",
            self.stats.frames_dispatched
        );
        self.stats
    }

    /// Hand one frame to every sink in order.
    pub fn dispatch(&mut self, frame: Frame) {
        log::debug!("get {}. qsize={}", frame, self.queue.len());
        for sink in self.sinks.iter_mut() {
            match sink.handle(&frame) {
                Ok(SinkFlow::Continue) => {}
                Ok(SinkFlow::StopRequested) => {
                    if self.stop.cancel() {
                        log::info!("{} sink requested shutdown", sink.name());
                    }
                }
                Err(e) => {
                    log::warn!("{} sink failed on {}: {:#}", sink.name(), frame, e);
                    *self.stats.sink_failures.entry(sink.name()).or_default() += 1;
                }
            }
        }
        self.stats.frames_dispatched += 1;
        *self.stats.per_source.entry(frame.source_id).or_default() += 1;
    }

    fn close_sinks(&mut self) {
        for sink in self.sinks.iter_mut() {
            if let Err(e) = sink.close() {
                log::warn!("closing {} sink failed: {:#}", sink.name(), e);
            }
        }
    }
}
