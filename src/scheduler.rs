//! Analysis scheduling.
//!
//! `AnalysisScheduler::tick` runs one analysis cycle:
//! 1. skip unless a published clip exists on disk
//! 2. skip unless the pacing interval has elapsed since the cursor
//! 3. analyze the clip; on failure skip and keep the cursor
//! 4. pass the result through the alert gate; on suppress advance the cursor
//! 5. forward; advance the cursor only if the collector accepted it
//!
//! Cycles are single-flight: a tick that arrives while a cycle is running
//! returns `CycleOutcome::Busy` immediately and is not queued.
//!
//! `spawn_periodic` drives this (and the clip builder) from a dedicated thread.

use anyhow::{Context, Result};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::alert::{Admission, AlertGate, SuppressReason};
use crate::analysis::{AnalysisClient, Severity};
use crate::forward::EventForwarder;
use crate::state::AgentState;

/// Default minimum spacing between analyses.
pub const DEFAULT_ANALYSIS_PACING: Duration = Duration::from_secs(10);

/// Pacing state: when the last cycle that counts as "analyzed" started.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AnalysisCursor {
    pub last_analyzed_at: Option<Instant>,
}

impl AnalysisCursor {
    /// Time left before the next analysis is allowed, if any.
    pub fn remaining(&self, now: Instant, pacing: Duration) -> Option<Duration> {
        let last = self.last_analyzed_at?;
        let elapsed = now.saturating_duration_since(last);
        if elapsed < pacing {
            Some(pacing - elapsed)
        } else {
            None
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
}

/// What one tick did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Another cycle was running; this tick was discarded.
    Busy,
    ClipNotReady,
    Pacing { remaining: Duration },
    AnalysisUnavailable,
    Suppressed(SuppressReason),
    Forwarded(Severity),
    ForwardFailed,
}

struct Pipeline {
    client: Box<dyn AnalysisClient>,
    gate: AlertGate,
    forwarder: Box<dyn EventForwarder>,
    cursor: AnalysisCursor,
}

pub struct AnalysisScheduler {
    state: Arc<AgentState>,
    pacing: Duration,
    running: AtomicBool,
    pipeline: Mutex<Pipeline>,
}

impl AnalysisScheduler {
    pub fn new(
        state: Arc<AgentState>,
        client: Box<dyn AnalysisClient>,
        gate: AlertGate,
        forwarder: Box<dyn EventForwarder>,
        pacing: Duration,
    ) -> Self {
        Self {
            state,
            pacing,
            running: AtomicBool::new(false),
            pipeline: Mutex::new(Pipeline {
                client,
                gate,
                forwarder,
                cursor: AnalysisCursor::default(),
            }),
        }
    }

    pub fn scheduler_state(&self) -> SchedulerState {
        if self.running.load(Ordering::SeqCst) {
            SchedulerState::Running
        } else {
            SchedulerState::Idle
        }
    }

    pub fn cursor(&self) -> AnalysisCursor {
        self.pipeline().cursor
    }

    /// A panicked cycle leaves the pipeline reusable; cursor and gate memory
    /// only change once a step has finished.
    fn pipeline(&self) -> MutexGuard<'_, Pipeline> {
        self.pipeline.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn tick(&self) -> Result<CycleOutcome> {
        self.tick_at(Instant::now())
    }

    /// Run one cycle as if the tick fired at `now`.
    pub fn tick_at(&self, now: Instant) -> Result<CycleOutcome> {
        let Some(_flight) = FlightGuard::acquire(&self.running) else {
            log::info!("analysis already running, tick discarded");
            return Ok(CycleOutcome::Busy);
        };
        let mut pipeline = self.pipeline();
        self.run_cycle(&mut pipeline, now)
    }

    fn run_cycle(&self, pipeline: &mut Pipeline, now: Instant) -> Result<CycleOutcome> {
        let clip = match self.state.current_clip()? {
            Some(clip) if clip.exists() => clip,
            _ => {
                log::debug!("analysis skipped: clip not ready");
                return Ok(CycleOutcome::ClipNotReady);
            }
        };

        if let Some(remaining) = pipeline.cursor.remaining(now, self.pacing) {
            log::debug!(
                "analysis skipped: next window in {} ms",
                remaining.as_millis()
            );
            return Ok(CycleOutcome::Pacing { remaining });
        }

        let result = match pipeline.client.analyze(&clip) {
            Ok(result) => result,
            Err(err) => {
                log::warn!(
                    "analysis unavailable ({}): {:#}; retrying next tick",
                    pipeline.client.name(),
                    err
                );
                return Ok(CycleOutcome::AnalysisUnavailable);
            }
        };
        log::info!(
            "analysis result: [{}] {} - {}",
            result.severity,
            result.title,
            result.description
        );

        if let Admission::Suppress(reason) = pipeline.gate.admit_at(&result, now) {
            pipeline.cursor.last_analyzed_at = Some(now);
            log::info!("emergency suppressed ({:?}): {}", reason, result.title);
            return Ok(CycleOutcome::Suppressed(reason));
        }

        match pipeline.forwarder.forward(&result) {
            Ok(()) => {
                pipeline.cursor.last_analyzed_at = Some(now);
                log::info!("forwarded {} event: {}", result.severity, result.title);
                Ok(CycleOutcome::Forwarded(result.severity))
            }
            Err(err) => {
                // Gate memory already records this admission; only the cursor
                // stays put.
                log::warn!(
                    "failed to forward {} event '{}': {:#}; will retry next cycle",
                    result.severity,
                    result.title,
                    err
                );
                Ok(CycleOutcome::ForwardFailed)
            }
        }
    }
}

/// Holds the single-flight flag for the duration of a cycle.
struct FlightGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> FlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Run `task` on its own thread every `interval` until `shutdown` is set.
///
/// Errors and panics from a tick are logged and the loop continues.
pub fn spawn_periodic<F>(
    name: &'static str,
    initial_delay: Duration,
    interval: Duration,
    shutdown: Arc<AtomicBool>,
    mut task: F,
) -> Result<JoinHandle<()>>
where
    F: FnMut() -> Result<()> + Send + 'static,
{
    std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            if !sleep_unless_shutdown(initial_delay, &shutdown) {
                return;
            }
            loop {
                let started = Instant::now();
                match catch_unwind(AssertUnwindSafe(&mut task)) {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => log::warn!("{} tick failed: {:#}", name, err),
                    Err(_) => log::error!("{} tick panicked", name),
                }
                if !sleep_unless_shutdown(interval.saturating_sub(started.elapsed()), &shutdown) {
                    return;
                }
            }
        })
        .with_context(|| format!("spawn {} thread", name))
}

/// Sleep for `duration` in short slices. Returns false once shutdown is set.
fn sleep_unless_shutdown(duration: Duration, shutdown: &AtomicBool) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if shutdown.load(Ordering::SeqCst) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep((deadline - now).min(Duration::from_millis(50)));
    }
}
