//! Agent wiring: capture, ingest, clip building, analysis and the HTTP API.
//!
//! `CameraAgent::run` owns every thread it starts. It returns `Ok(())` after a
//! requested shutdown and an error when the video stream ends on its own.

use anyhow::{anyhow, Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime};

use crate::alert::AlertGate;
use crate::analysis::build_analysis_client;
use crate::api::{ApiConfig, ApiServer};
use crate::clip::{ClipBuilder, FfmpegEncoder};
use crate::config::AgentConfig;
use crate::forward::HttpForwarder;
use crate::frame::FrameBuffer;
use crate::ingest::{run_ingest, CaptureProcess};
use crate::scheduler::{spawn_periodic, AnalysisScheduler, CycleOutcome};
use crate::state::AgentState;

const SUPERVISE_INTERVAL: Duration = Duration::from_millis(200);
const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(30);

pub struct CameraAgent {
    cfg: AgentConfig,
    state: Arc<AgentState>,
}

impl CameraAgent {
    pub fn new(cfg: AgentConfig) -> Result<Self> {
        cfg.validate()?;
        let state = Arc::new(AgentState::new(
            cfg.camera_location.clone(),
            FrameBuffer::for_window(cfg.fps, cfg.window_secs),
        ));
        Ok(Self { cfg, state })
    }

    pub fn state(&self) -> Arc<AgentState> {
        self.state.clone()
    }

    /// Run until `shutdown` is set or the video stream dies.
    pub fn run(self, shutdown: Arc<AtomicBool>) -> Result<()> {
        let cfg = &self.cfg;
        log::info!(
            "camera agent {} starting: input={} fps={} window={}s analysis={}",
            cfg.camera_location,
            cfg.video_input,
            cfg.fps,
            cfg.window_secs,
            if cfg.use_mock_analysis { "mock" } else { "remote" }
        );

        let analysis_client =
            build_analysis_client(cfg.use_mock_analysis, cfg.remote_analysis_config())?;
        let scheduler = Arc::new(AnalysisScheduler::new(
            self.state.clone(),
            analysis_client,
            AlertGate::new(cfg.timing.emergency_cooldown),
            Box::new(HttpForwarder::new(cfg.forwarder_config())),
            cfg.timing.analysis_pacing,
        ));
        let clip_builder = ClipBuilder::new(
            Box::new(FfmpegEncoder::new(
                cfg.ffmpeg_path.clone(),
                cfg.timing.encode_timeout,
            )),
            cfg.clip_settings(),
        );

        let mut capture = CaptureProcess::spawn(&cfg.capture_config())?;
        let stdout = capture.take_stdout()?;

        let api = match ApiServer::new(
            ApiConfig {
                addr: cfg.api_addr(),
            },
            self.state.clone(),
        )
        .spawn()
        {
            Ok(api) => api,
            Err(err) => {
                capture.kill();
                return Err(err);
            }
        };

        let ingest = {
            let state = self.state.clone();
            let shutdown = shutdown.clone();
            std::thread::Builder::new()
                .name("ingest".to_string())
                .spawn(move || run_ingest(stdout, &state, &shutdown))
                .context("spawn ingest thread")?
        };

        let clip_task = {
            let state = self.state.clone();
            spawn_periodic(
                "clip-builder",
                Duration::ZERO,
                cfg.timing.clip_interval,
                shutdown.clone(),
                move || clip_builder.tick(&state).map(|_| ()),
            )?
        };

        let analysis_task = spawn_periodic(
            "analysis",
            cfg.timing.analysis_initial_delay,
            cfg.timing.analysis_interval,
            shutdown.clone(),
            move || {
                let outcome = scheduler.tick()?;
                log_outcome(outcome);
                Ok(())
            },
        )?;

        let outcome = supervise(&self.state, &shutdown, &ingest);
        if let Supervision::IngestExited = outcome {
            match capture.try_wait() {
                Ok(Some(status)) => {
                    log::error!("capture process for {} exited: {}", capture.input(), status)
                }
                Ok(None) => log::error!("frame stream from {} closed", capture.input()),
                Err(err) => log::warn!("{:#}", err),
            }
        }

        shutdown.store(true, Ordering::SeqCst);
        capture.kill();
        let ingest_result = join_thread("ingest", ingest);
        join_thread("clip-builder", clip_task).ok();
        join_thread("analysis", analysis_task).ok();
        if let Err(err) = api.stop() {
            log::warn!("http api did not stop cleanly: {:#}", err);
        }

        match outcome {
            Supervision::ShutdownRequested => {
                log::info!("camera agent stopped");
                Ok(())
            }
            Supervision::IngestExited => {
                let err = match ingest_result {
                    Ok(Ok(())) => anyhow!("frame ingestion stopped unexpectedly"),
                    Ok(Err(err)) => err,
                    Err(err) => err,
                };
                Err(err.context("video stream ended"))
            }
        }
    }
}

enum Supervision {
    ShutdownRequested,
    IngestExited,
}

fn supervise(state: &AgentState, shutdown: &AtomicBool, ingest: &JoinHandle<Result<()>>) -> Supervision {
    let mut last_health = Instant::now();
    loop {
        if shutdown.load(Ordering::SeqCst) {
            return Supervision::ShutdownRequested;
        }
        if ingest.is_finished() {
            return Supervision::IngestExited;
        }
        if last_health.elapsed() >= HEALTH_LOG_INTERVAL {
            last_health = Instant::now();
            match health_summary(state) {
                Ok(line) => log::info!("{}", line),
                Err(err) => log::warn!("health check failed: {:#}", err),
            }
        }
        std::thread::sleep(SUPERVISE_INTERVAL);
    }
}

/// One-line status: buffer fill, memory and clip age.
pub fn health_summary(state: &AgentState) -> Result<String> {
    let frames = state.buffered_frames()?;
    let bytes = state.buffered_bytes()?;
    let clip_age = match state.current_clip()? {
        Some(clip) => match SystemTime::now().duration_since(clip.created_at) {
            Ok(age) => format!("{}s", age.as_secs()),
            Err(_) => "0s".to_string(),
        },
        None => "none".to_string(),
    };
    Ok(format!(
        "health {}: frames={}/{} buffer={:.1}MB clip_age={}",
        state.camera_location(),
        frames,
        state.frame_capacity(),
        bytes as f64 / (1024.0 * 1024.0),
        clip_age
    ))
}

fn log_outcome(outcome: CycleOutcome) {
    match outcome {
        CycleOutcome::Forwarded(_) | CycleOutcome::Busy | CycleOutcome::Suppressed(_) => {}
        CycleOutcome::ClipNotReady => log::info!("analysis waiting for first clip"),
        CycleOutcome::Pacing { .. } => log::debug!("analysis pacing"),
        CycleOutcome::AnalysisUnavailable | CycleOutcome::ForwardFailed => {
            log::debug!("analysis cycle ended early: {:?}", outcome)
        }
    }
}

fn join_thread<T>(name: &str, handle: JoinHandle<T>) -> Result<T> {
    handle
        .join()
        .map_err(|_| anyhow!("{} thread panicked", name))
}
