//! Frame ingestion.
//!
//! - `capture`: starts and supervises the ffmpeg process producing MJPEG
//! - `mjpeg`: cuts the MJPEG byte stream into frames
//!
//! `run_ingest` is the body of the long-lived ingest thread: it drains the
//! frame stream into the rolling buffer until the stream ends. The end of the
//! stream is fatal for the agent, so it is always reported as an error unless
//! a shutdown was requested.

pub mod capture;
pub mod mjpeg;

pub use capture::{CaptureConfig, CaptureProcess};
pub use mjpeg::{FrameStream, MjpegDecoder};

use anyhow::{anyhow, Result};
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use crate::state::AgentState;

/// Feed frames from `reader` into the shared buffer.
///
/// Returns `Ok(())` only when `shutdown` is set; otherwise the end of the
/// stream (or a read error) is returned as an error.
pub fn run_ingest<R: Read>(reader: R, state: &AgentState, shutdown: &AtomicBool) -> Result<()> {
    let mut frame_count = 0u64;
    let started = Instant::now();

    for frame in FrameStream::new(reader) {
        let frame = match frame {
            Ok(frame) => frame,
            Err(err) if shutdown.load(Ordering::SeqCst) => {
                log::debug!("ingest stopped during shutdown: {}", err);
                return Ok(());
            }
            Err(err) => return Err(err),
        };

        state.append_frame(frame)?;
        frame_count += 1;
        if frame_count == 1 {
            log::info!(
                "first frame captured after {} ms",
                started.elapsed().as_millis()
            );
        }

        if shutdown.load(Ordering::SeqCst) {
            return Ok(());
        }
    }
    Err(anyhow!("frame stream closed after {} frames", frame_count))
}
