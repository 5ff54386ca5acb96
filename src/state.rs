//! Process-level shared state.
//!
//! One `AgentState` is created at start-up and handed (behind an `Arc`) to the
//! ingest thread, the clip task, the analysis scheduler and the HTTP API.
//! Each field is an independent single-value swap; no operation needs to hold
//! more than one lock.

use anyhow::{anyhow, Result};
use serde::Serialize;
use std::sync::{Mutex, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::clip::ClipArtifact;
use crate::frame::{Frame, FrameBuffer};

pub struct AgentState {
    camera_location: String,
    frame_capacity: usize,
    frames: Mutex<FrameBuffer>,
    clip: RwLock<Option<ClipArtifact>>,
}

/// Body of `GET /latest_state`.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct LatestState {
    pub camera_location: String,
    /// Unix milliseconds of the newest frame.
    pub latest_frame_timestamp: Option<u64>,
    /// Unix milliseconds of the current clip.
    pub latest_clip_timestamp: Option<u64>,
    pub buffered_frame_count: usize,
}

impl AgentState {
    pub fn new(camera_location: impl Into<String>, frames: FrameBuffer) -> Self {
        Self {
            camera_location: camera_location.into(),
            frame_capacity: frames.capacity(),
            frames: Mutex::new(frames),
            clip: RwLock::new(None),
        }
    }

    pub fn camera_location(&self) -> &str {
        &self.camera_location
    }

    /// Frames in a full rolling window.
    pub fn frame_capacity(&self) -> usize {
        self.frame_capacity
    }

    pub fn append_frame(&self, frame: Frame) -> Result<()> {
        self.frames
            .lock()
            .map_err(|_| anyhow!("frame buffer lock poisoned"))?
            .append(frame);
        Ok(())
    }

    pub fn latest_frame(&self) -> Result<Option<Frame>> {
        Ok(self
            .frames
            .lock()
            .map_err(|_| anyhow!("frame buffer lock poisoned"))?
            .latest())
    }

    pub fn snapshot(&self, n: usize) -> Result<Vec<Frame>> {
        Ok(self
            .frames
            .lock()
            .map_err(|_| anyhow!("frame buffer lock poisoned"))?
            .snapshot(n))
    }

    pub fn buffered_frames(&self) -> Result<usize> {
        Ok(self
            .frames
            .lock()
            .map_err(|_| anyhow!("frame buffer lock poisoned"))?
            .len())
    }

    pub fn buffered_bytes(&self) -> Result<usize> {
        Ok(self
            .frames
            .lock()
            .map_err(|_| anyhow!("frame buffer lock poisoned"))?
            .memory_bytes())
    }

    pub fn current_clip(&self) -> Result<Option<ClipArtifact>> {
        Ok(self
            .clip
            .read()
            .map_err(|_| anyhow!("clip reference lock poisoned"))?
            .clone())
    }

    /// Replace the current clip reference.
    pub fn publish_clip(&self, clip: ClipArtifact) -> Result<()> {
        *self
            .clip
            .write()
            .map_err(|_| anyhow!("clip reference lock poisoned"))? = Some(clip);
        Ok(())
    }

    pub fn latest_state(&self) -> Result<LatestState> {
        let (latest_frame_timestamp, buffered_frame_count) = {
            let frames = self
                .frames
                .lock()
                .map_err(|_| anyhow!("frame buffer lock poisoned"))?;
            (
                frames.latest().map(|f| unix_millis(f.captured_at())),
                frames.len(),
            )
        };
        let latest_clip_timestamp = self.current_clip()?.map(|c| unix_millis(c.created_at));
        Ok(LatestState {
            camera_location: self.camera_location.clone(),
            latest_frame_timestamp,
            latest_clip_timestamp,
            buffered_frame_count,
        })
    }
}

pub fn unix_millis(at: SystemTime) -> u64 {
    at.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    #[test]
    fn latest_state_reports_frames_and_clip() {
        let state = AgentState::new("CAM_12", FrameBuffer::with_capacity(3));
        let empty = state.latest_state().unwrap();
        assert_eq!(empty.latest_frame_timestamp, None);
        assert_eq!(empty.latest_clip_timestamp, None);
        assert_eq!(empty.buffered_frame_count, 0);

        let at = UNIX_EPOCH + Duration::from_millis(1_700_000_000_123);
        state
            .append_frame(Frame::with_timestamp(vec![1, 2, 3], at))
            .unwrap();
        state
            .publish_clip(ClipArtifact {
                path: PathBuf::from("clip.mp4"),
                created_at: at + Duration::from_secs(1),
                frame_count: 3,
            })
            .unwrap();

        let snapshot = state.latest_state().unwrap();
        assert_eq!(snapshot.camera_location, "CAM_12");
        assert_eq!(snapshot.latest_frame_timestamp, Some(1_700_000_000_123));
        assert_eq!(snapshot.latest_clip_timestamp, Some(1_700_000_001_123));
        assert_eq!(snapshot.buffered_frame_count, 1);
    }
}
