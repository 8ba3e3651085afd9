//! Frames and the bounded frame queue.
//!
//! - `Frame`: one captured image plus source metadata. Not `Clone`; it is
//!   owned by exactly one stage at a time (capture worker, queue, dispatcher).
//! - `FrameQueue`: bounded FIFO shared by every capture worker (producers)
//!   and the single dispatcher (consumer). It is the only backpressure point
//!   of the pipeline.
//!
//! The queue never drops a frame internally: an insert that would exceed the
//! capacity, or that arrives after the queue was closed, is rejected and the
//! frame is handed back to the caller inside the `PushError`.

use anyhow::{anyhow, Result};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;

use crate::ingest::RawImage;

/// Timestamp layout for `Frame::captured_at` (microsecond resolution).
pub const TIMESTAMP_FORMAT: &str = "%y-%m-%d_%H:%M:%S:%6f";

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// One captured image. Immutable once built.
pub struct Frame {
    pub source_id: usize,
    pub source_name: String,
    /// Local wall-clock capture time, formatted with `TIMESTAMP_FORMAT`.
    pub captured_at: String,
    pub width: u32,
    pub height: u32,
    /// Packed RGB8 rows, `width * height * 3` bytes.
    image: Vec<u8>,
}

impl Frame {
    /// Build a frame stamped with the current local time.
    pub fn new(source_id: usize, source_name: impl Into<String>, image: RawImage) -> Self {
        let captured_at = chrono::Local::now().format(TIMESTAMP_FORMAT).to_string();
        Self::with_timestamp(source_id, source_name, captured_at, image)
    }

    pub fn with_timestamp(
        source_id: usize,
        source_name: impl Into<String>,
        captured_at: impl Into<String>,
        image: RawImage,
    ) -> Self {
        let RawImage {
            data,
            width,
            height,
        } = image;
        Self {
            source_id,
            source_name: source_name.into(),
            captured_at: captured_at.into(),
            width,
            height,
            image: data,
        }
    }

    pub fn image(&self) -> &[u8] {
        &self.image
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn byte_len(&self) -> usize {
        self.image.len()
    }

    /// Error unless the pixels are exactly `width * height * 3` bytes.
    pub fn check_rgb_layout(&self) -> Result<()> {
        let expected = self.width as usize * self.height as usize * 3;
        if self.image.len() != expected {
            return Err(anyhow!(
                "{} is {}x{} but carries {} bytes instead of {}",
                self,
                self.width,
                self.height,
                self.image.len(),
                expected
            ));
        }
        Ok(())
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Frame({},{},{})",
            self.source_id, self.source_name, self.captured_at
        )
    }
}

// Pixel data stays out of debug output.
impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("source_id", &self.source_id)
            .field("source_name", &self.source_name)
            .field("captured_at", &self.captured_at)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.image.len())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// FrameQueue
// ----------------------------------------------------------------------------

/// Rejected insert. The frame is returned to the caller untouched.
#[derive(Debug, Error)]
pub enum PushError {
    #[error("frame queue is full")]
    Full(Frame),
    #[error("frame queue is closed")]
    Closed(Frame),
}

impl PushError {
    pub fn into_frame(self) -> Frame {
        match self {
            PushError::Full(frame) | PushError::Closed(frame) => frame,
        }
    }
}

/// Outcome of a bounded wait on the queue.
#[derive(Debug)]
pub enum Pop {
    Frame(Frame),
    /// Nothing arrived within the wait; the queue is still open.
    Timeout,
    /// The queue is closed and fully drained.
    Closed,
}

struct QueueState {
    frames: VecDeque<Frame>,
    closed: bool,
    peak: usize,
}

/// Bounded multi-producer / single-consumer FIFO.
pub struct FrameQueue {
    state: Mutex<QueueState>,
    not_empty: Condvar,
    capacity: usize,
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(anyhow!("frame queue capacity must be at least 1"));
        }
        Ok(Self {
            state: Mutex::new(QueueState {
                frames: VecDeque::with_capacity(capacity),
                closed: false,
                peak: 0,
            }),
            not_empty: Condvar::new(),
            capacity,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().frames.is_empty()
    }

    /// Non-blocking fullness check used by producers before reading a source.
    pub fn is_full(&self) -> bool {
        self.lock().frames.len() >= self.capacity
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Highest occupancy observed since construction.
    pub fn peak_len(&self) -> usize {
        self.lock().peak
    }

    /// Append a frame without blocking.
    pub fn try_push(&self, frame: Frame) -> Result<(), PushError> {
        let mut state = self.lock();
        if state.closed {
            return Err(PushError::Closed(frame));
        }
        if state.frames.len() >= self.capacity {
            return Err(PushError::Full(frame));
        }
        state.frames.push_back(frame);
        state.peak = state.peak.max(state.frames.len());
        drop(state);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Remove the oldest frame, waiting up to `timeout` for one to arrive.
    ///
    /// Frames still buffered when the queue is closed are returned before
    /// `Pop::Closed` is reported.
    pub fn pop_timeout(&self, timeout: Duration) -> Pop {
        let guard = self.lock();
        let (mut state, _) = self
            .not_empty
            .wait_timeout_while(guard, timeout, |state| {
                state.frames.is_empty() && !state.closed
            })
            .unwrap_or_else(PoisonError::into_inner);
        match state.frames.pop_front() {
            Some(frame) => Pop::Frame(frame),
            None if state.closed => Pop::Closed,
            None => Pop::Timeout,
        }
    }

    /// Refuse further inserts and wake the consumer. Idempotent.
    pub fn close(&self) {
        self.lock().closed = true;
        self.not_empty.notify_all();
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for FrameQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("FrameQueue")
            .field("capacity", &self.capacity)
            .field("len", &state.frames.len())
            .field("closed", &state.closed)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
