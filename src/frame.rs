//! Frames and the rolling frame buffer.
//!
//! - `Frame`: one JPEG image cut from the capture stream, with its decode time.
//! - `FrameBuffer`: bounded FIFO of the most recent frames (the rolling window).
//!
//! The buffer is the only state shared between the ingest thread (writer) and
//! the clip and HTTP readers. It is wrapped in a `Mutex` by `AgentState`.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::SystemTime;

/// Default capture rate sampled out of the video source.
pub const DEFAULT_FPS: u32 = 10;

/// Default rolling window length in seconds.
pub const DEFAULT_WINDOW_SECS: u32 = 10;

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// A single JPEG frame.
///
/// Frames are immutable: the fields are private and the payload is shared
/// behind an `Arc`, so snapshots clone a pointer instead of the image.
#[derive(Clone, Debug)]
pub struct Frame {
    captured_at: SystemTime,
    payload: Arc<[u8]>,
}

impl Frame {
    /// Create a frame stamped with the current wall-clock time.
    pub fn new(payload: Vec<u8>) -> Self {
        Self::with_timestamp(payload, SystemTime::now())
    }

    pub fn with_timestamp(payload: Vec<u8>, captured_at: SystemTime) -> Self {
        Self {
            captured_at,
            payload: payload.into(),
        }
    }

    pub fn captured_at(&self) -> SystemTime {
        self.captured_at
    }

    /// JPEG bytes, including the SOI and EOI markers.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

// ----------------------------------------------------------------------------
// FrameBuffer
// ----------------------------------------------------------------------------

/// Bounded ring buffer holding the rolling window.
///
/// - Insertion ordered, oldest at the front
/// - `len()` never exceeds `capacity()`
/// - Appending past capacity evicts the oldest frame
pub struct FrameBuffer {
    buffer: VecDeque<Frame>,
    capacity: usize,
}

impl FrameBuffer {
    /// Buffer holding exactly `capacity` frames once warmed up.
    ///
    /// A zero capacity is clamped to one so `latest()` keeps working.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Buffer sized for `window_secs` seconds of footage at `fps`.
    pub fn for_window(fps: u32, window_secs: u32) -> Self {
        Self::with_capacity(fps as usize * window_secs as usize)
    }

    /// Push a frame, evicting the oldest one when full. Never blocks.
    pub fn append(&mut self, frame: Frame) {
        while self.buffer.len() >= self.capacity {
            self.buffer.pop_front();
        }
        self.buffer.push_back(frame);
    }

    /// Most recent frame, if any has been captured.
    pub fn latest(&self) -> Option<Frame> {
        self.buffer.back().cloned()
    }

    /// Copy of the `n` most recent frames, oldest first.
    ///
    /// Returns fewer than `n` frames when the buffer holds less. The buffer is
    /// not modified.
    pub fn snapshot(&self, n: usize) -> Vec<Frame> {
        let skip = self.buffer.len().saturating_sub(n);
        self.buffer.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// True once a full window of frames is buffered.
    pub fn is_full(&self) -> bool {
        self.buffer.len() >= self.capacity
    }

    /// Memory usage estimate.
    pub fn memory_bytes(&self) -> usize {
        self.buffer.iter().map(Frame::len).sum()
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::for_window(DEFAULT_FPS, DEFAULT_WINDOW_SECS)
    }
}
