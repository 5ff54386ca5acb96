//! Camera agent
//!
//! Turns a video source into a rolling window of JPEG frames, periodically
//! encodes that window into a short clip, has the clip classified, and
//! forwards results to a collector with duplicate/cooldown suppression for
//! emergencies.
//!
//! # Architecture
//!
//! ```text
//! capture (ffmpeg) -> ingest -> FrameBuffer -> ClipBuilder -> ClipArtifact
//!                                   |                             |
//!                                  api                      AnalysisScheduler
//!                                                   client -> AlertGate -> forwarder
//! ```
//!
//! # Module Structure
//!
//! - `frame`: Frame and the bounded FrameBuffer
//! - `ingest`: capture process and MJPEG decoding
//! - `clip`: clip encoding and publication
//! - `analysis`: mock and remote analysis clients
//! - `alert`: emergency duplicate/cooldown gate
//! - `forward`: delivery to the collector
//! - `scheduler`: single-flight analysis cycles and periodic threads
//! - `api`: read-only HTTP endpoints
//! - `state`: shared process state
//! - `agent`: wiring and supervision

pub mod agent;
pub mod alert;
pub mod analysis;
pub mod api;
pub mod clip;
pub mod config;
pub mod forward;
pub mod frame;
pub mod ingest;
pub mod scheduler;
pub mod state;

pub use agent::CameraAgent;
pub use alert::{Admission, AlertGate, EmergencyMemory, SuppressReason};
pub use analysis::{
    build_analysis_client, AnalysisClient, AnalysisResult, MockAnalysisClient,
    RemoteAnalysisClient, RemoteAnalysisConfig, Severity,
};
pub use clip::{ClipArtifact, ClipBuilder, ClipEncoder, ClipSettings, FfmpegEncoder};
pub use config::AgentConfig;
pub use forward::{EventForwarder, EventPayload, ForwarderConfig, HttpForwarder};
pub use frame::{Frame, FrameBuffer};
pub use ingest::{CaptureConfig, CaptureProcess, FrameStream, MjpegDecoder};
pub use scheduler::{AnalysisCursor, AnalysisScheduler, CycleOutcome, SchedulerState};
pub use state::{AgentState, LatestState};
