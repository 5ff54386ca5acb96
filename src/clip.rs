//! Clip assembly.
//!
//! Every clip tick takes a full rolling-window snapshot, writes the frames as
//! numbered JPEG files into a scratch directory, runs an external encoder into
//! a scratch output next to the clip path, and renames it over the clip path.
//! The rename is the publish step: readers of the clip file see either the old
//! clip or the new one, and the shared `ClipArtifact` reference is only
//! replaced after the rename succeeded.

use anyhow::{bail, ensure, Context, Result};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant, SystemTime};

use crate::frame::Frame;
use crate::state::AgentState;

const STDERR_TAIL_CHARS: usize = 2048;

/// printf-style name of the scratch frame files.
pub const FRAME_PATTERN: &str = "frame_%05d.jpg";

/// The published clip.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClipArtifact {
    pub path: PathBuf,
    pub created_at: SystemTime,
    pub frame_count: usize,
}

impl ClipArtifact {
    /// True while the clip file is present on disk.
    pub fn exists(&self) -> bool {
        self.path.is_file()
    }
}

// ----------------------------------------------------------------------------
// Encoders
// ----------------------------------------------------------------------------

/// Off-process video encoder.
///
/// `encode` turns the numbered JPEG files in `frames_dir` into a video at
/// `output`. Implementations must not touch any other path.
pub trait ClipEncoder: Send + Sync {
    fn name(&self) -> &'static str;

    fn encode(&self, frames_dir: &Path, fps: u32, output: &Path) -> Result<()>;
}

/// H.264/MP4 encoder backed by the ffmpeg CLI.
pub struct FfmpegEncoder {
    binary: String,
    timeout: Duration,
}

impl FfmpegEncoder {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }
}

impl ClipEncoder for FfmpegEncoder {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    fn encode(&self, frames_dir: &Path, fps: u32, output: &Path) -> Result<()> {
        let mut child = Command::new(&self.binary)
            .args(["-y", "-hide_banner", "-loglevel", "error", "-framerate"])
            .arg(fps.to_string())
            .arg("-i")
            .arg(frames_dir.join(FRAME_PATTERN))
            .args(["-c:v", "libx264", "-pix_fmt", "yuv420p"])
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("spawn encoder '{}'", self.binary))?;

        // Drained concurrently so a chatty encoder never blocks on a full pipe.
        let stderr = child.stderr.take().map(|mut pipe| {
            std::thread::spawn(move || {
                let mut text = String::new();
                let _ = pipe.read_to_string(&mut text);
                text
            })
        });

        let status = wait_with_timeout(&mut child, self.timeout);
        let stderr = stderr
            .and_then(|reader| reader.join().ok())
            .unwrap_or_default();
        let status = status?;
        if !status.success() {
            bail!("ffmpeg clip exit {}: {}", status, tail(stderr.trim(), STDERR_TAIL_CHARS));
        }
        Ok(())
    }
}

/// Last `max` characters of `text`.
fn tail(text: &str, max: usize) -> &str {
    let skip = text.chars().count().saturating_sub(max);
    match text.char_indices().nth(skip) {
        Some((idx, _)) => &text[idx..],
        None => "",
    }
}

fn wait_with_timeout(child: &mut Child, timeout: Duration) -> Result<ExitStatus> {
    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(status),
            Ok(None) => {}
            Err(err) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(err).context("poll encoder process");
            }
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            bail!("encoder timed out after {} ms", timeout.as_millis());
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}

// ----------------------------------------------------------------------------
// ClipBuilder
// ----------------------------------------------------------------------------

/// Paths and sizing for one camera's clips.
#[derive(Clone, Debug)]
pub struct ClipSettings {
    pub fps: u32,
    /// Frames in a clip; always the full rolling window.
    pub frames_required: usize,
    /// Where the current clip is published.
    pub output_path: PathBuf,
    /// Scratch directory for the numbered frame files.
    pub scratch_dir: PathBuf,
}

impl ClipSettings {
    /// Per-camera file names inside `clip_dir`, so several agents can share it.
    pub fn for_camera(clip_dir: &Path, camera_location: &str, fps: u32, window_secs: u32) -> Self {
        let camera = sanitize_file_component(camera_location);
        Self {
            fps,
            frames_required: fps as usize * window_secs as usize,
            output_path: clip_dir.join(format!(".latest_clip_{}.mp4", camera)),
            scratch_dir: clip_dir.join(format!(".tmp_frames_{}", camera)),
        }
    }
}

pub struct ClipBuilder {
    encoder: Box<dyn ClipEncoder>,
    settings: ClipSettings,
}

impl ClipBuilder {
    pub fn new(encoder: Box<dyn ClipEncoder>, settings: ClipSettings) -> Self {
        Self { encoder, settings }
    }

    pub fn settings(&self) -> &ClipSettings {
        &self.settings
    }

    /// One clip tick: build from the current window and publish it.
    ///
    /// Returns `Ok(None)` without touching disk when the buffer does not yet
    /// hold a full window. On error the published clip is left unchanged.
    pub fn tick(&self, state: &AgentState) -> Result<Option<ClipArtifact>> {
        let frames = state.snapshot(self.settings.frames_required)?;
        if frames.len() < self.settings.frames_required {
            log::debug!(
                "clip skipped: {}/{} frames buffered",
                frames.len(),
                self.settings.frames_required
            );
            return Ok(None);
        }

        let clip = self.build(&self.settings.output_path, &frames)?;
        state.publish_clip(clip.clone())?;
        log::debug!(
            "clip published: {} ({} frames)",
            clip.path.display(),
            clip.frame_count
        );
        Ok(Some(clip))
    }

    /// Encode exactly one full window of `frames` into `output_path`.
    pub fn build(&self, output_path: &Path, frames: &[Frame]) -> Result<ClipArtifact> {
        ensure!(
            frames.len() == self.settings.frames_required,
            "clip needs {} frames, got {}",
            self.settings.frames_required,
            frames.len()
        );

        self.write_scratch_frames(frames)?;

        let partial = partial_output_path(output_path);
        remove_if_exists(&partial)?;
        if let Err(err) = self
            .encoder
            .encode(&self.settings.scratch_dir, self.settings.fps, &partial)
        {
            let _ = remove_if_exists(&partial);
            return Err(err.context(format!("{} encode failed", self.encoder.name())));
        }
        if !partial.is_file() {
            bail!(
                "{} encoder reported success but wrote no output",
                self.encoder.name()
            );
        }

        std::fs::rename(&partial, output_path).with_context(|| {
            format!(
                "publish clip {} -> {}",
                partial.display(),
                output_path.display()
            )
        })?;

        Ok(ClipArtifact {
            path: output_path.to_path_buf(),
            created_at: SystemTime::now(),
            frame_count: frames.len(),
        })
    }

    fn write_scratch_frames(&self, frames: &[Frame]) -> Result<()> {
        let dir = &self.settings.scratch_dir;
        if dir.exists() {
            std::fs::remove_dir_all(dir)
                .with_context(|| format!("clear scratch dir {}", dir.display()))?;
        }
        std::fs::create_dir_all(dir)
            .with_context(|| format!("create scratch dir {}", dir.display()))?;
        for (index, frame) in frames.iter().enumerate() {
            let path = dir.join(format!("frame_{:05}.jpg", index));
            std::fs::write(&path, frame.payload())
                .with_context(|| format!("write scratch frame {}", path.display()))?;
        }
        Ok(())
    }
}

/// Scratch output beside the clip, keeping its extension so the encoder can
/// infer the container.
fn partial_output_path(output: &Path) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "clip".to_string());
    let ext = output
        .extension()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "mp4".to_string());
    output.with_file_name(format!("{}.partial.{}", stem, ext))
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("remove {}", path.display())),
    }
}

/// Make a camera name safe for use in a file name.
///
/// Keeps alphanumerics, '_' and '-'; everything else becomes '_'.
pub fn sanitize_file_component(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .take(64)
        .collect()
}
